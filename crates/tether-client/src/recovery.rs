//! Startup recovery.
//!
//! Runs once per process: reads the persisted projection, confirms the task
//! against the server, and either reseeds the store or clears the slate.
//! Recovery never surfaces an error; a task that cannot be confirmed is
//! treated as gone.

use std::sync::Arc;

use tracing::{info, warn};

use tether_core::{Projection, StoreInput, TaskStatus, TaskStore};

use crate::api::TaskApi;
use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// The task is still live; the caller should reopen its streams.
    Resumed { task_id: String },
    /// The task finished while the client was away; the store now shows the
    /// final outcome and no streams are needed.
    Finalized { status: TaskStatus },
    /// The persisted task could not be confirmed and was wiped.
    Cleared,
    /// Nothing was persisted.
    Idle,
}

pub struct RecoveryCoordinator<A: TaskApi + ?Sized> {
    api: Arc<A>,
    store: Arc<TaskStore>,
}

impl<A: TaskApi + ?Sized> RecoveryCoordinator<A> {
    pub fn new(api: Arc<A>, store: Arc<TaskStore>) -> Self {
        Self { api, store }
    }

    pub async fn run(self) -> RecoveryOutcome {
        let persisted = self.store.projection().load().await;
        let Some(task_id) = persisted.active_task_id.clone() else {
            return RecoveryOutcome::Idle;
        };
        if !persisted.status.is_active() {
            // The previous session already saw this task settle.
            return RecoveryOutcome::Idle;
        }

        info!(%task_id, "found persisted task, confirming with the server");
        let snapshot = match self.api.fetch_status(&task_id).await {
            Ok(snapshot) => snapshot,
            Err(ClientError::TaskNotFound) => {
                info!(%task_id, "server no longer knows the task, clearing");
                return self.clear().await;
            }
            Err(err) => {
                warn!(%task_id, %err, "could not confirm persisted task, clearing");
                return self.clear().await;
            }
        };

        match TaskStatus::from_remote(snapshot.status) {
            Some(status @ (TaskStatus::Running | TaskStatus::WaitingForInput)) => {
                self.store
                    .apply(StoreInput::Recovered {
                        kind: persisted.workflow_type,
                        snapshot,
                    })
                    .await;
                info!(%task_id, %status, "resuming persisted task");
                RecoveryOutcome::Resumed { task_id }
            }
            Some(status @ (TaskStatus::Completed | TaskStatus::Error)) => {
                self.store
                    .apply(StoreInput::Recovered {
                        kind: persisted.workflow_type,
                        snapshot,
                    })
                    .await;
                // The settled outcome lives in memory only. Without an
                // explicit rewrite the stale "running" file would trigger
                // recovery again on every startup.
                self.store
                    .projection()
                    .save_quiet(&Projection::default())
                    .await;
                info!(%task_id, %status, "task settled while the client was away");
                RecoveryOutcome::Finalized { status }
            }
            _ => {
                info!(%task_id, "persisted task is not recoverable, clearing");
                self.clear().await
            }
        }
    }

    /// Wiping must also rewrite the projection file: a pristine in-memory
    /// store skips persistence, which would leave the stale file to trigger
    /// recovery again on every startup.
    async fn clear(&self) -> RecoveryOutcome {
        self.store.reset().await;
        self.store
            .projection()
            .save_quiet(&Projection::default())
            .await;
        RecoveryOutcome::Cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use tether_core::ProjectionStore;
    use tether_wire::{
        InteractionReply, PendingInteraction, RemoteStatus, RespondAck, StartRequest, TaskStarted,
        TaskStatusResponse, TaskSummary, WorkflowKind,
    };

    enum StubBehavior {
        Status(TaskStatusResponse),
        NotFound,
        Unreachable,
    }

    struct StubApi {
        behavior: StubBehavior,
    }

    #[async_trait]
    impl TaskApi for StubApi {
        async fn start(&self, _request: &StartRequest) -> Result<TaskStarted> {
            unreachable!("recovery never starts tasks")
        }

        async fn fetch_status(&self, _task_id: &str) -> Result<TaskStatusResponse> {
            match &self.behavior {
                StubBehavior::Status(snapshot) => Ok(snapshot.clone()),
                StubBehavior::NotFound => Err(ClientError::TaskNotFound),
                StubBehavior::Unreachable => Err(ClientError::Api {
                    status: 503,
                    detail: "service unavailable".to_string(),
                }),
            }
        }

        async fn respond(&self, _task_id: &str, _reply: &InteractionReply) -> Result<RespondAck> {
            unreachable!("recovery never responds")
        }

        async fn cancel(&self, _task_id: &str) -> Result<bool> {
            unreachable!("recovery never cancels")
        }

        async fn pending_interaction(
            &self,
            _task_id: &str,
        ) -> Result<Option<PendingInteraction>> {
            unreachable!("recovery reads interactions from the status snapshot")
        }

        async fn active_tasks(&self) -> Result<Vec<TaskSummary>> {
            unreachable!()
        }

        async fn recent_tasks(&self, _limit: u32) -> Result<Vec<TaskStatusResponse>> {
            unreachable!()
        }
    }

    fn snapshot(status: RemoteStatus) -> TaskStatusResponse {
        TaskStatusResponse {
            task_id: "t-1".to_string(),
            status,
            progress: 48,
            message: "Generating code".to_string(),
            result: None,
            error: None,
            started_at: Some("2025-11-03T08:00:00".to_string()),
            completed_at: None,
            pending_interaction: None,
        }
    }

    async fn seeded_store(dir: &tempfile::TempDir, status: TaskStatus) -> Arc<TaskStore> {
        let files = ProjectionStore::new(dir.path().join("projection.json"));
        files
            .save(&Projection {
                active_task_id: Some("t-1".to_string()),
                workflow_type: Some(WorkflowKind::PaperToCode),
                status,
                progress: 40,
                steps: Vec::new(),
                is_waiting_for_input: status == TaskStatus::WaitingForInput,
            })
            .await
            .unwrap();
        Arc::new(TaskStore::new(files))
    }

    fn coordinator(behavior: StubBehavior, store: Arc<TaskStore>) -> RecoveryCoordinator<StubApi> {
        RecoveryCoordinator::new(Arc::new(StubApi { behavior }), store)
    }

    #[tokio::test]
    async fn resumes_running_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir, TaskStatus::Running).await;

        let outcome = coordinator(
            StubBehavior::Status(snapshot(RemoteStatus::Running)),
            store.clone(),
        )
        .run()
        .await;

        assert_eq!(
            outcome,
            RecoveryOutcome::Resumed {
                task_id: "t-1".to_string()
            }
        );
        let state = store.snapshot().await;
        assert_eq!(state.status, TaskStatus::Running);
        assert_eq!(state.progress, 48);
        assert_eq!(state.kind, Some(WorkflowKind::PaperToCode));
    }

    #[tokio::test]
    async fn restores_pending_interaction() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir, TaskStatus::WaitingForInput).await;

        let mut snap = snapshot(RemoteStatus::WaitingForInput);
        snap.pending_interaction = Some(PendingInteraction {
            kind: Some("plan_review".to_string()),
            title: Some("Review the plan".to_string()),
            description: None,
            data: None,
            options: None,
            required: Some(false),
        });

        let outcome = coordinator(StubBehavior::Status(snap), store.clone())
            .run()
            .await;

        assert!(matches!(outcome, RecoveryOutcome::Resumed { .. }));
        let state = store.snapshot().await;
        assert_eq!(state.status, TaskStatus::WaitingForInput);
        assert_eq!(state.interaction.as_ref().unwrap().kind, "plan_review");
    }

    #[tokio::test]
    async fn finalizes_task_that_completed_while_away() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir, TaskStatus::Running).await;

        let mut snap = snapshot(RemoteStatus::Completed);
        snap.result = Some(serde_json::json!({"status": "success"}));

        let outcome = coordinator(StubBehavior::Status(snap), store.clone())
            .run()
            .await;

        assert_eq!(
            outcome,
            RecoveryOutcome::Finalized {
                status: TaskStatus::Completed
            }
        );
        let state = store.snapshot().await;
        assert_eq!(state.progress, 100);
        assert!(state.result.is_some());
        // The file no longer names the task, so the next startup stays idle.
        assert_eq!(store.projection().load().await, Projection::default());
    }

    #[tokio::test]
    async fn finalizes_task_that_errored_while_away() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir, TaskStatus::Running).await;

        let mut snap = snapshot(RemoteStatus::Error);
        snap.error = Some("pipeline crashed".to_string());

        let outcome = coordinator(StubBehavior::Status(snap), store.clone())
            .run()
            .await;

        assert_eq!(
            outcome,
            RecoveryOutcome::Finalized {
                status: TaskStatus::Error
            }
        );
        let state = store.snapshot().await;
        assert_eq!(state.status, TaskStatus::Error);
        assert_eq!(state.error.as_deref(), Some("pipeline crashed"));
    }

    #[tokio::test]
    async fn clears_when_server_forgot_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir, TaskStatus::Running).await;

        let outcome = coordinator(StubBehavior::NotFound, store.clone()).run().await;

        assert_eq!(outcome, RecoveryOutcome::Cleared);
        assert!(store.snapshot().await.is_pristine());
        // The projection file is rewritten so the next startup stays idle.
        assert_eq!(store.projection().load().await, Projection::default());
    }

    #[tokio::test]
    async fn clears_when_server_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir, TaskStatus::Running).await;

        let outcome = coordinator(StubBehavior::Unreachable, store.clone()).run().await;

        assert_eq!(outcome, RecoveryOutcome::Cleared);
        assert!(store.snapshot().await.is_pristine());
    }

    #[tokio::test]
    async fn clears_cancelled_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir, TaskStatus::Running).await;

        let outcome = coordinator(
            StubBehavior::Status(snapshot(RemoteStatus::Cancelled)),
            store.clone(),
        )
        .run()
        .await;

        assert_eq!(outcome, RecoveryOutcome::Cleared);
        assert!(store.snapshot().await.is_pristine());
    }

    #[tokio::test]
    async fn idle_without_persisted_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::new(ProjectionStore::new(
            dir.path().join("projection.json"),
        )));

        // A NotFound stub would produce Cleared if recovery consulted the
        // server; Idle proves it never did.
        let outcome = coordinator(StubBehavior::NotFound, store).run().await;
        assert_eq!(outcome, RecoveryOutcome::Idle);
    }

    #[tokio::test]
    async fn idle_when_persisted_task_already_settled() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir, TaskStatus::Completed).await;

        let outcome = coordinator(StubBehavior::NotFound, store).run().await;
        assert_eq!(outcome, RecoveryOutcome::Idle);
    }
}
