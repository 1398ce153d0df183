use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use tether_core::{
    ProjectionStore, StoreEvent, StoreInput, TaskState, TaskStore,
};
use tether_wire::{
    InteractionReply, RespondAck, StartRequest, StreamEndpoint, TaskStarted, WorkflowKind,
};

use crate::api::{ApiClient, TaskApi};
use crate::channel::{spawn_stream, ReconnectPolicy, StreamHandle};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::interaction::InteractionGate;
use crate::recovery::{RecoveryCoordinator, RecoveryOutcome};

/// One client process tracking one task. Owns the store, the REST client,
/// and the stream channels for the tracked task.
pub struct TaskSession {
    config: ClientConfig,
    api: Arc<dyn TaskApi>,
    store: Arc<TaskStore>,
    gate: InteractionGate<dyn TaskApi>,
    streams: Mutex<Vec<StreamHandle>>,
}

impl TaskSession {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api: Arc<dyn TaskApi> = Arc::new(ApiClient::new(&config)?);
        Ok(Self::with_api(config, api))
    }

    /// Seam for tests and alternate transports.
    pub fn with_api(config: ClientConfig, api: Arc<dyn TaskApi>) -> Self {
        let store = Arc::new(TaskStore::new(ProjectionStore::new(
            config.state.projection_file.clone(),
        )));
        let gate = InteractionGate::new(api.clone());
        Self {
            config,
            api,
            store,
            gate,
            streams: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> Arc<TaskStore> {
        self.store.clone()
    }

    pub fn api(&self) -> Arc<dyn TaskApi> {
        self.api.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub async fn snapshot(&self) -> TaskState {
        self.store.snapshot().await
    }

    /// Start a new workflow and begin streaming it. Replaces whatever task
    /// was tracked before.
    pub async fn start(&self, request: StartRequest) -> Result<TaskStarted> {
        let started = self.api.start(&request).await?;
        self.store
            .start_task(started.task_id.clone(), request.kind())
            .await;
        self.open_streams(&started.task_id).await;
        Ok(started)
    }

    /// Adopt a task already running on the server, replacing whatever was
    /// tracked before. Status responses do not say which workflow a task
    /// belongs to, so the caller names the kind.
    pub async fn attach(&self, task_id: &str, kind: WorkflowKind) -> Result<()> {
        let snapshot = self.api.fetch_status(task_id).await?;
        self.store
            .apply(StoreInput::Recovered {
                kind: Some(kind),
                snapshot,
            })
            .await;
        if self.store.snapshot().await.status.is_active() {
            self.open_streams(task_id).await;
        }
        Ok(())
    }

    /// Run startup recovery and reattach streams when the persisted task is
    /// still live.
    pub async fn resume(&self) -> RecoveryOutcome {
        let outcome = RecoveryCoordinator::new(self.api.clone(), self.store.clone())
            .run()
            .await;
        if let RecoveryOutcome::Resumed { task_id } = &outcome {
            self.open_streams(task_id).await;
        }
        outcome
    }

    /// Ask the server to cancel, then reset locally either way. The server
    /// does not broadcast cancellations, so the local reset is what returns
    /// the store to idle and shuts the streams down.
    pub async fn cancel(&self) -> Result<bool> {
        let Some(task_id) = self.store.snapshot().await.task_id else {
            return Err(ClientError::NoActiveTask);
        };
        let accepted = self.api.cancel(&task_id).await?;
        self.store.apply(StoreInput::CancelRequested).await;
        Ok(accepted)
    }

    pub async fn respond(&self, reply: InteractionReply) -> Result<RespondAck> {
        let Some(task_id) = self.store.snapshot().await.task_id else {
            return Err(ClientError::NoActiveTask);
        };
        self.gate.respond(&self.store, &task_id, reply).await
    }

    pub async fn skip(&self) -> Result<RespondAck> {
        let Some(task_id) = self.store.snapshot().await.task_id else {
            return Err(ClientError::NoActiveTask);
        };
        self.gate.skip(&self.store, &task_id).await
    }

    pub async fn shutdown(&self) {
        let mut streams = self.streams.lock().await;
        for handle in streams.drain(..) {
            handle.stop().await;
        }
    }

    async fn open_streams(&self, task_id: &str) {
        let mut streams = self.streams.lock().await;
        // Channels from a previous task must be gone before the new ones
        // dial in, or they would keep feeding the store stale frames.
        for handle in streams.drain(..) {
            handle.stop().await;
        }
        for endpoint in [StreamEndpoint::Workflow, StreamEndpoint::CodeStream] {
            let url = self.config.ws_url(endpoint, task_id);
            streams.push(spawn_stream(
                endpoint,
                url,
                self.store.clone(),
                ReconnectPolicy::from_config(&self.config),
            ));
        }
    }
}
