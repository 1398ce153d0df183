use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server rejected request ({status}): {detail}")]
    Api { status: u16, detail: String },

    #[error("Task not found")]
    TaskNotFound,

    #[error("No task is being tracked")]
    NoActiveTask,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<String> for ClientError {
    fn from(err: String) -> Self {
        ClientError::InvalidConfig(err)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
