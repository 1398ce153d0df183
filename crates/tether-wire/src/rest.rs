use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::task::{RemoteStatus, WorkflowKind};

/// Body for `POST {API_PREFIX}/paper-to-code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperToCodeRequest {
    pub input_source: String,
    pub input_type: InputType,
    #[serde(default)]
    pub enable_indexing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    File,
    Url,
}

/// Body for `POST {API_PREFIX}/chat-planning`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPlanningRequest {
    pub requirements: String,
    #[serde(default)]
    pub enable_indexing: bool,
}

/// A start request for either workflow family. Serializes untagged, so the
/// body on the wire is exactly the per-kind request shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StartRequest {
    PaperToCode(PaperToCodeRequest),
    ChatPlanning(ChatPlanningRequest),
}

impl StartRequest {
    pub fn kind(&self) -> WorkflowKind {
        match self {
            StartRequest::PaperToCode(_) => WorkflowKind::PaperToCode,
            StartRequest::ChatPlanning(_) => WorkflowKind::ChatPlanning,
        }
    }
}

/// Response to both start endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStarted {
    pub task_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Response to `GET {API_PREFIX}/status/{task_id}`. Also the row shape for
/// the `recent` listing, which never includes `pending_interaction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: RemoteStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_interaction: Option<PendingInteraction>,
}

/// Interaction payload as nested inside REST responses. The push frame
/// carries the same fields flattened, with `type` spelled `interaction_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInteraction {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub options: Option<Value>,
    #[serde(default)]
    pub required: Option<bool>,
}

/// Body for `POST {API_PREFIX}/respond/{task_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionReply {
    pub action: ReplyAction,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub skipped: bool,
}

impl InteractionReply {
    pub fn new(action: ReplyAction) -> Self {
        Self {
            action,
            data: Map::new(),
            skipped: false,
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// A skip reply carries the `skip` action and the skipped marker the
    /// server also sets when it times an interaction out on its own.
    pub fn skip() -> Self {
        Self {
            action: ReplyAction::Skip,
            data: Map::new(),
            skipped: true,
        }
    }
}

/// Actions a client may submit for a pending interaction. The server
/// additionally synthesizes a `timeout` action internally when an optional
/// interaction expires unanswered; clients never send it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyAction {
    Submit,
    Confirm,
    Modify,
    Skip,
    Cancel,
}

impl ReplyAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplyAction::Submit => "submit",
            ReplyAction::Confirm => "confirm",
            ReplyAction::Modify => "modify",
            ReplyAction::Skip => "skip",
            ReplyAction::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondAck {
    pub status: String,
    pub task_id: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAck {
    pub status: String,
    pub task_id: String,
}

/// Response to `GET {API_PREFIX}/interaction/{task_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionProbe {
    pub has_interaction: bool,
    pub task_id: String,
    pub status: RemoteStatus,
    #[serde(default)]
    pub interaction: Option<PendingInteraction>,
}

/// Response to `GET {API_PREFIX}/active`. Rows carry the reduced summary
/// shape, not the full status payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTasksResponse {
    #[serde(default)]
    pub tasks: Vec<TaskSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub status: RemoteStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub started_at: Option<String>,
}

/// Response to `GET {API_PREFIX}/recent?limit=N`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentTasksResponse {
    #[serde(default)]
    pub tasks: Vec<TaskStatusResponse>,
}

/// FastAPI-style error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: String,
}
