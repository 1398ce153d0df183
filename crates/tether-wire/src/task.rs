use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Task lifecycle status as reported by the server.
///
/// The server keeps an internal `pending` phase between task creation and the
/// first scheduler tick, and may grow further states over time. Anything we
/// do not recognize parses as [`RemoteStatus::Unknown`] instead of failing
/// the whole payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Running,
    WaitingForInput,
    Completed,
    Error,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl RemoteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteStatus::Running => "running",
            RemoteStatus::WaitingForInput => "waiting_for_input",
            RemoteStatus::Completed => "completed",
            RemoteStatus::Error => "error",
            RemoteStatus::Cancelled => "cancelled",
            RemoteStatus::Unknown => "unknown",
        }
    }

    /// Terminal statuses never transition again; the stream endpoints close
    /// shortly after reporting one.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RemoteStatus::Completed | RemoteStatus::Error | RemoteStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, RemoteStatus::Running | RemoteStatus::WaitingForInput)
    }
}

/// Workflow family. The kebab-case name doubles as the REST route segment
/// used to start a task of that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    PaperToCode,
    ChatPlanning,
}

impl WorkflowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowKind::PaperToCode => "paper-to-code",
            WorkflowKind::ChatPlanning => "chat-planning",
        }
    }
}

impl std::str::FromStr for WorkflowKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "paper-to-code" => Ok(WorkflowKind::PaperToCode),
            "chat-planning" => Ok(WorkflowKind::ChatPlanning),
            other => Err(format!("unknown workflow kind `{other}`")),
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a server-reported error string.
///
/// The server signals a missing task the same way everywhere: the literal
/// detail `Task not found`, in REST 404 bodies and in push error frames
/// alike. Every other error text is a workflow failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskErrorKind {
    NotFound,
    Workflow,
}

impl TaskErrorKind {
    pub fn classify(detail: &str) -> Self {
        if detail.trim().eq_ignore_ascii_case("task not found") {
            TaskErrorKind::NotFound
        } else {
            TaskErrorKind::Workflow
        }
    }
}

/// Parse a server timestamp string.
///
/// The server stamps frames and status fields with naive UTC ISO strings,
/// with or without a fractional second and never with a timezone suffix.
pub fn parse_server_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}
