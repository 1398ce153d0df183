use chrono::Utc;
use tokio::sync::{broadcast, watch, RwLock};

use tether_wire::WorkflowKind;

use crate::event_bus::EventBus;
use crate::projection::{Projection, ProjectionStore};
use crate::task::TaskState;
use crate::transition::{apply, StoreEvent, StoreInput};

/// Owner of the tracked task. All mutation goes through [`TaskStore::apply`],
/// which runs the transition, persists the projection when it changed, and
/// publishes the resulting events, in that order, under a single write lock.
/// Readers get snapshots and never observe a half-applied input.
pub struct TaskStore {
    state: RwLock<TaskState>,
    bus: EventBus,
    projection: ProjectionStore,
    live_tx: watch::Sender<bool>,
}

impl TaskStore {
    pub fn new(projection: ProjectionStore) -> Self {
        let (live_tx, _) = watch::channel(false);
        Self {
            state: RwLock::new(TaskState::default()),
            bus: EventBus::new(),
            projection,
            live_tx,
        }
    }

    pub async fn snapshot(&self) -> TaskState {
        self.state.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Watch that is `true` while the tracked task wants open channels.
    /// Channels use the falling edge as their shutdown signal.
    pub fn live(&self) -> watch::Receiver<bool> {
        self.live_tx.subscribe()
    }

    pub fn projection(&self) -> &ProjectionStore {
        &self.projection
    }

    pub async fn apply(&self, input: StoreInput) -> Vec<StoreEvent> {
        let mut guard = self.state.write().await;
        let before = Projection::durable(&guard);
        let (next, events) = apply(&guard, input, Utc::now());
        let after = Projection::durable(&next);
        *guard = next;

        // Chunk and activity churn leaves the projection untouched; only a
        // real projection change hits the disk or the live watch.
        if after != before {
            self.live_tx.send_if_modified(|live| {
                let target = after.status.is_active();
                if *live == target {
                    false
                } else {
                    *live = target;
                    true
                }
            });
            self.projection.save_quiet(&after).await;
        }
        for event in &events {
            self.bus.publish(event.clone());
        }
        drop(guard);
        events
    }

    pub async fn start_task(&self, task_id: impl Into<String>, kind: WorkflowKind) -> Vec<StoreEvent> {
        self.apply(StoreInput::Started {
            task_id: task_id.into(),
            kind,
        })
        .await
    }

    pub async fn reset(&self) -> Vec<StoreEvent> {
        self.apply(StoreInput::Reset).await
    }
}
