pub mod event_bus;
pub mod projection;
pub mod state_paths;
pub mod steps;
pub mod store;
pub mod task;
pub mod transition;

/// Upper bound on retained activity entries; older entries are dropped first.
pub const ACTIVITY_LOG_CAP: usize = 200;

pub use event_bus::EventBus;
pub use projection::{Projection, ProjectionStore};
pub use state_paths::{resolve_state_paths, StatePaths, STATE_DIR_ENV};
pub use steps::{map_steps, template_for, Step, StepSpec, StepStatus};
pub use store::TaskStore;
pub use task::{
    ActivityEntry, ActivityKind, Interaction, StreamBuffer, StreamedFile, TaskState, TaskStatus,
};
pub use transition::{apply, StoreEvent, StoreInput};
