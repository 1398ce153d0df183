use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use tether_wire::WorkflowKind;

use crate::steps::Step;
use crate::task::{TaskState, TaskStatus};

/// The durable slice of task state. This is what survives a process restart
/// and what recovery reads before asking the server anything, so it keeps
/// only fields that are cheap to rebuild trust in: identity, lifecycle, and
/// the derived step list. Camel-case keys are the on-disk contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Projection {
    pub active_task_id: Option<String>,
    pub workflow_type: Option<WorkflowKind>,
    pub status: TaskStatus,
    pub progress: u8,
    pub steps: Vec<Step>,
    pub is_waiting_for_input: bool,
}

impl Projection {
    pub fn from_state(state: &TaskState) -> Self {
        Self {
            active_task_id: state.task_id.clone(),
            workflow_type: state.kind,
            status: state.status,
            progress: state.progress,
            steps: state.steps(),
            is_waiting_for_input: state.status == TaskStatus::WaitingForInput,
        }
    }

    /// The shape that actually lands on disk. Only an active task is worth
    /// recovering after a restart, so every other lifecycle state collapses
    /// to the idle projection and the file stops naming a task.
    pub fn durable(state: &TaskState) -> Self {
        if state.status.is_active() {
            Self::from_state(state)
        } else {
            Self::default()
        }
    }
}

/// Reads and writes the projection file. Unreadable or corrupt contents load
/// as the default projection rather than failing startup.
#[derive(Debug, Clone)]
pub struct ProjectionStore {
    path: PathBuf,
}

impl ProjectionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Projection {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .unwrap_or_default();
        if raw.is_empty() {
            return Projection::default();
        }
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!(path = %self.path.display(), %err, "projection file unreadable, starting clean");
            Projection::default()
        })
    }

    pub async fn save(&self, projection: &Projection) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(projection)?;
        tokio::fs::write(&self.path, format!("{json}\n"))
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Save variant for the hot path: persistence problems are logged, not
    /// propagated, so a full disk cannot stall frame handling.
    pub async fn save_quiet(&self, projection: &Projection) {
        if let Err(err) = self.save(projection).await {
            warn!(%err, "failed to persist projection");
        }
    }
}
