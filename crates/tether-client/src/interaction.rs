use std::sync::Arc;

use tracing::debug;

use tether_core::{StoreInput, TaskStore};
use tether_wire::{InteractionReply, RespondAck};

use crate::api::TaskApi;
use crate::error::Result;

/// Forwards interaction replies to the server and settles the pending
/// interaction locally only after the server accepted them. Holds no state
/// of its own.
pub struct InteractionGate<A: TaskApi + ?Sized> {
    api: Arc<A>,
}

impl<A: TaskApi + ?Sized> InteractionGate<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    /// A failed round-trip returns the error and leaves the interaction
    /// pending, so the caller can retry with the same or a different reply.
    pub async fn respond(
        &self,
        store: &TaskStore,
        task_id: &str,
        reply: InteractionReply,
    ) -> Result<RespondAck> {
        let ack = self.api.respond(task_id, &reply).await?;
        debug!(task_id, action = reply.action.as_str(), "interaction reply accepted");
        store
            .apply(StoreInput::InteractionResolved {
                action: reply.action.as_str().to_string(),
            })
            .await;
        Ok(ack)
    }

    pub async fn skip(&self, store: &TaskStore, task_id: &str) -> Result<RespondAck> {
        self.respond(store, task_id, InteractionReply::skip()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tether_core::{ProjectionStore, TaskStatus};
    use tether_wire::{
        PendingInteraction, ReplyAction, StartRequest, StreamFrame, TaskStarted,
        TaskStatusResponse, TaskSummary, WorkflowKind,
    };

    struct StubApi {
        accept: bool,
        sent: Mutex<Option<InteractionReply>>,
    }

    impl StubApi {
        fn accepting() -> Self {
            Self {
                accept: true,
                sent: Mutex::new(None),
            }
        }

        fn rejecting() -> Self {
            Self {
                accept: false,
                sent: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl TaskApi for StubApi {
        async fn start(&self, _request: &StartRequest) -> Result<TaskStarted> {
            unreachable!()
        }

        async fn fetch_status(&self, _task_id: &str) -> Result<TaskStatusResponse> {
            unreachable!()
        }

        async fn respond(&self, task_id: &str, reply: &InteractionReply) -> Result<RespondAck> {
            *self.sent.lock().unwrap() = Some(reply.clone());
            if self.accept {
                Ok(RespondAck {
                    status: "ok".to_string(),
                    task_id: task_id.to_string(),
                    action: reply.action.as_str().to_string(),
                })
            } else {
                Err(ClientError::Api {
                    status: 400,
                    detail: "Task is not waiting for input (current status: running)".to_string(),
                })
            }
        }

        async fn cancel(&self, _task_id: &str) -> Result<bool> {
            unreachable!()
        }

        async fn pending_interaction(
            &self,
            _task_id: &str,
        ) -> Result<Option<PendingInteraction>> {
            unreachable!()
        }

        async fn active_tasks(&self) -> Result<Vec<TaskSummary>> {
            unreachable!()
        }

        async fn recent_tasks(&self, _limit: u32) -> Result<Vec<TaskStatusResponse>> {
            unreachable!()
        }
    }

    async fn waiting_store(dir: &tempfile::TempDir) -> TaskStore {
        let store = TaskStore::new(ProjectionStore::new(dir.path().join("projection.json")));
        store.start_task("t-1", WorkflowKind::ChatPlanning).await;
        store
            .apply(StoreInput::Frame(StreamFrame::InteractionRequired {
                task_id: Some("t-1".to_string()),
                interaction_type: Some("plan_review".to_string()),
                title: Some("Review the plan".to_string()),
                description: None,
                data: None,
                options: None,
                required: Some(false),
                timestamp: None,
            }))
            .await;
        store
    }

    #[tokio::test]
    async fn accepted_reply_settles_the_interaction() {
        let dir = tempfile::tempdir().unwrap();
        let store = waiting_store(&dir).await;
        let gate = InteractionGate::new(Arc::new(StubApi::accepting()));

        let ack = gate
            .respond(&store, "t-1", InteractionReply::new(ReplyAction::Confirm))
            .await
            .unwrap();
        assert_eq!(ack.action, "confirm");

        let state = store.snapshot().await;
        assert_eq!(state.status, TaskStatus::Running);
        assert!(state.interaction.is_none());
    }

    #[tokio::test]
    async fn rejected_reply_keeps_the_interaction_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = waiting_store(&dir).await;
        let gate = InteractionGate::new(Arc::new(StubApi::rejecting()));

        let err = gate
            .respond(&store, "t-1", InteractionReply::new(ReplyAction::Confirm))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 400, .. }));

        let state = store.snapshot().await;
        assert_eq!(state.status, TaskStatus::WaitingForInput);
        assert!(state.interaction.is_some());
    }

    #[tokio::test]
    async fn skip_marks_the_reply_as_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = waiting_store(&dir).await;
        let api = Arc::new(StubApi::accepting());
        let gate = InteractionGate::new(api.clone());

        gate.skip(&store, "t-1").await.unwrap();

        let sent = api.sent.lock().unwrap().clone().unwrap();
        assert_eq!(sent.action, ReplyAction::Skip);
        assert!(sent.skipped);
        assert_eq!(store.snapshot().await.status, TaskStatus::Running);
    }
}
