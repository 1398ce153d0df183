pub mod frame;
pub mod rest;
pub mod task;

pub const API_PREFIX: &str = "/api/v1/workflows";
pub const WS_WORKFLOW_PREFIX: &str = "/ws/workflow";
pub const WS_CODE_STREAM_PREFIX: &str = "/ws/code-stream";

pub use frame::*;
pub use rest::*;
pub use task::*;
