use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use tether_wire::{PendingInteraction, RemoteStatus, WorkflowKind};

use crate::steps::{map_steps, template_for, Step, StepStatus};

/// Client-side task lifecycle status.
///
/// `Idle` exists only here: it is the state before any task is tracked and
/// after a full reset. The remaining values mirror the server vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Idle,
    Running,
    WaitingForInput,
    Completed,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Running => "running",
            TaskStatus::WaitingForInput => "waiting_for_input",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Active statuses keep the stream channels open.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::WaitingForInput)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled
        )
    }

    /// Map a server-reported status. `Unknown` has no client equivalent and
    /// maps to `None`; callers decide whether that means ignore or reset.
    pub fn from_remote(remote: RemoteStatus) -> Option<Self> {
        match remote {
            RemoteStatus::Running => Some(TaskStatus::Running),
            RemoteStatus::WaitingForInput => Some(TaskStatus::WaitingForInput),
            RemoteStatus::Completed => Some(TaskStatus::Completed),
            RemoteStatus::Error => Some(TaskStatus::Error),
            RemoteStatus::Cancelled => Some(TaskStatus::Cancelled),
            RemoteStatus::Unknown => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending request for user input, normalized from either the flat push
/// frame or the nested REST payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub kind: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub options: Value,
    pub required: bool,
}

impl Interaction {
    pub fn from_pending(pending: PendingInteraction) -> Self {
        Self {
            kind: pending.kind.unwrap_or_default(),
            title: pending.title.unwrap_or_default(),
            description: pending.description.unwrap_or_default(),
            data: pending.data.unwrap_or(Value::Null),
            options: pending.options.unwrap_or(Value::Null),
            required: pending.required.unwrap_or(false),
        }
    }

    /// Short human label for log lines and prompts.
    pub fn label(&self) -> &str {
        if !self.title.is_empty() {
            &self.title
        } else if !self.kind.is_empty() {
            &self.kind
        } else {
            "input requested"
        }
    }
}

/// One line of the task activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub kind: ActivityKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Progress,
    Status,
    Interaction,
    Completion,
    Error,
    System,
}

/// Code streamed for the current task, accumulated per file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamBuffer {
    pub files: Vec<StreamedFile>,
    pub open: Option<StreamedFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamedFile {
    pub filename: Option<String>,
    pub content: String,
}

impl StreamBuffer {
    /// Open a named file; an already-open file is closed first and returned.
    pub fn open_file(&mut self, filename: String) -> Option<StreamedFile> {
        let closed = self.open.take();
        if let Some(closed) = &closed {
            self.files.push(closed.clone());
        }
        self.open = Some(StreamedFile {
            filename: Some(filename),
            content: String::new(),
        });
        closed
    }

    /// Append a chunk to the open file, starting an unnamed one when no
    /// `file_start` preceded it. A chunk-level filename fills in a missing
    /// name but never renames an already-named file.
    pub fn append(&mut self, content: &str, filename: Option<&str>) {
        match &mut self.open {
            Some(open) => {
                if open.filename.is_none() {
                    open.filename = filename.map(str::to_string);
                }
                open.content.push_str(content);
            }
            None => {
                self.open = Some(StreamedFile {
                    filename: filename.map(str::to_string),
                    content: content.to_string(),
                });
            }
        }
    }

    pub fn close_file(&mut self) -> Option<StreamedFile> {
        let closed = self.open.take();
        if let Some(closed) = &closed {
            self.files.push(closed.clone());
        }
        closed
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.open.is_none()
    }

    pub fn total_bytes(&self) -> usize {
        let open = self.open.as_ref().map(|f| f.content.len()).unwrap_or(0);
        self.files.iter().map(|f| f.content.len()).sum::<usize>() + open
    }
}

/// Full client-side view of the tracked task. Mutated only through the
/// transition rules; everything else reads clones of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: Option<String>,
    pub kind: Option<WorkflowKind>,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub interaction: Option<Interaction>,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Set once when the task starts tracking; never overwritten.
    pub started_at: Option<DateTime<Utc>>,
    /// Set once on the first terminal transition, success or failure.
    pub completed_at: Option<DateTime<Utc>>,
    pub activity: Vec<ActivityEntry>,
    pub stream: StreamBuffer,
    pub revision: u64,
}

impl TaskState {
    /// Step view derived from the workflow template and current progress.
    /// Empty when no workflow kind is tracked; a failed task reports its
    /// in-flight step as errored rather than active.
    pub fn steps(&self) -> Vec<Step> {
        let Some(kind) = self.kind else {
            return Vec::new();
        };
        let mut steps = map_steps(template_for(kind), self.progress);
        if self.status == TaskStatus::Error {
            for step in &mut steps {
                if step.status == StepStatus::Active {
                    step.status = StepStatus::Error;
                }
            }
        }
        steps
    }

    /// A pristine state differs from the default only by its revision.
    pub fn is_pristine(&self) -> bool {
        let blank = TaskState {
            revision: self.revision,
            ..TaskState::default()
        };
        *self == blank
    }
}
