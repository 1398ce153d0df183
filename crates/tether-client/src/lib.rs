pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod interaction;
pub mod recovery;
pub mod session;

pub use api::{ApiClient, TaskApi};
pub use channel::{spawn_stream, ReconnectPolicy, StreamHandle};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use interaction::InteractionGate;
pub use recovery::{RecoveryCoordinator, RecoveryOutcome};
pub use session::TaskSession;
