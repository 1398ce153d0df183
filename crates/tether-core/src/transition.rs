use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use tether_wire::{
    parse_server_timestamp, StreamEndpoint, StreamFrame, TaskErrorKind, TaskStatusResponse,
    WorkflowKind,
};

use crate::task::{ActivityEntry, ActivityKind, Interaction, TaskState, TaskStatus};

/// Inputs the store accepts. Everything that can change task state funnels
/// through here so the transition stays a pure function over
/// `(state, input, now)`.
#[derive(Debug, Clone)]
pub enum StoreInput {
    /// A decoded push frame from either stream endpoint.
    Frame(StreamFrame),
    /// A task was started through the REST API.
    Started { task_id: String, kind: WorkflowKind },
    /// Recovery seeded the store from the persisted projection plus a fresh
    /// status fetch.
    Recovered {
        kind: Option<WorkflowKind>,
        snapshot: TaskStatusResponse,
    },
    /// A respond round-trip succeeded; the pending interaction is settled.
    InteractionResolved { action: String },
    /// Cancel was requested locally; takes effect regardless of whether the
    /// server acknowledged delivery.
    CancelRequested,
    /// Forget everything and return to idle.
    Reset,
}

/// Facts the store announces after applying an input. Channel connectivity
/// variants are published by the channels themselves over the same bus.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    TaskStarted { task_id: String, kind: WorkflowKind },
    TaskRecovered { task_id: String, status: TaskStatus },
    ProgressAdvanced { progress: u8, message: String },
    StatusChanged { status: TaskStatus },
    InteractionRequested { interaction: Interaction },
    InteractionCleared,
    TaskCompleted { result: Option<Value> },
    TaskFailed { error: String },
    TaskReset,
    FileOpened { filename: String },
    FileClosed { filename: Option<String> },
    ChunkAppended { bytes: usize },
    ChannelConnected { endpoint: StreamEndpoint },
    ChannelLost { endpoint: StreamEndpoint, attempt: u32 },
    ChannelDown { endpoint: StreamEndpoint },
}

/// Apply one input to the current state. Returns the next state and the
/// events describing what actually changed; an input that changes nothing
/// returns the state untouched and no events.
pub fn apply(
    state: &TaskState,
    input: StoreInput,
    now: DateTime<Utc>,
) -> (TaskState, Vec<StoreEvent>) {
    let mut next = state.clone();
    let mut events = Vec::new();
    let mut changed = false;

    match input {
        StoreInput::Frame(frame) => {
            apply_frame(&mut next, frame, now, &mut events, &mut changed);
        }
        StoreInput::Started { task_id, kind } => {
            next = TaskState {
                task_id: Some(task_id.clone()),
                kind: Some(kind),
                status: TaskStatus::Running,
                started_at: Some(now),
                revision: state.revision,
                ..TaskState::default()
            };
            push_activity(
                &mut next,
                ActivityKind::System,
                format!("{kind} workflow started"),
                None,
                now,
            );
            events.push(StoreEvent::TaskStarted { task_id, kind });
            events.push(StoreEvent::StatusChanged {
                status: TaskStatus::Running,
            });
            changed = true;
        }
        StoreInput::Recovered { kind, snapshot } => {
            apply_recovered(&mut next, state, kind, snapshot, now, &mut events, &mut changed);
        }
        StoreInput::InteractionResolved { action } => {
            if next.interaction.take().is_some() {
                events.push(StoreEvent::InteractionCleared);
                changed = true;
            }
            if next.status == TaskStatus::WaitingForInput {
                next.status = TaskStatus::Running;
                events.push(StoreEvent::StatusChanged {
                    status: TaskStatus::Running,
                });
                changed = true;
            }
            if changed {
                push_activity(
                    &mut next,
                    ActivityKind::Interaction,
                    format!("response sent: {action}"),
                    None,
                    now,
                );
            }
        }
        StoreInput::CancelRequested => {
            // Collapses straight to idle rather than parking in a terminal
            // status. Leaving the active states also halts any reconnect
            // attempt still in flight.
            if !next.is_pristine() {
                next = TaskState {
                    revision: state.revision,
                    ..TaskState::default()
                };
                events.push(StoreEvent::TaskReset);
                changed = true;
            }
        }
        StoreInput::Reset => {
            if !next.is_pristine() {
                next = TaskState {
                    revision: state.revision,
                    ..TaskState::default()
                };
                events.push(StoreEvent::TaskReset);
                changed = true;
            }
        }
    }

    if changed {
        next.revision = next.revision.saturating_add(1);
    }
    (next, events)
}

fn apply_frame(
    next: &mut TaskState,
    frame: StreamFrame,
    now: DateTime<Utc>,
    events: &mut Vec<StoreEvent>,
    changed: &mut bool,
) {
    if next.status == TaskStatus::Idle {
        debug!(frame = frame.kind_label(), "ignoring frame while no task is tracked");
        return;
    }
    if let (Some(frame_task), Some(current)) = (frame.task_id(), next.task_id.as_deref()) {
        if frame_task != current {
            debug!(
                frame = frame.kind_label(),
                frame_task, "dropping frame addressed to a different task"
            );
            return;
        }
    }

    match frame {
        StreamFrame::Heartbeat { .. } => {}
        StreamFrame::Progress {
            progress, message, ..
        } => {
            absorb_progress(next, progress, &message, now, events, changed);
        }
        StreamFrame::Status {
            status,
            progress,
            message,
            ..
        } => {
            absorb_progress(next, progress, &message, now, events, changed);
            match TaskStatus::from_remote(status) {
                Some(mapped) => apply_status(next, mapped, now, events, changed),
                None => {
                    debug!(status = status.as_str(), "ignoring unrecognized status value")
                }
            }
        }
        StreamFrame::InteractionRequired {
            interaction_type,
            title,
            description,
            data,
            options,
            required,
            ..
        } => {
            let interaction = Interaction {
                kind: interaction_type.unwrap_or_default(),
                title: title.unwrap_or_default(),
                description: description.unwrap_or_default(),
                data: data.unwrap_or(Value::Null),
                options: options.unwrap_or(Value::Null),
                required: required.unwrap_or(false),
            };
            // Reconnect snapshots replay the same pending prompt verbatim.
            if next.status == TaskStatus::WaitingForInput
                && next.interaction.as_ref() == Some(&interaction)
            {
                return;
            }
            if next.status != TaskStatus::WaitingForInput {
                next.status = TaskStatus::WaitingForInput;
                events.push(StoreEvent::StatusChanged {
                    status: TaskStatus::WaitingForInput,
                });
            }
            push_activity(
                next,
                ActivityKind::Interaction,
                interaction.label().to_string(),
                None,
                now,
            );
            events.push(StoreEvent::InteractionRequested {
                interaction: interaction.clone(),
            });
            next.interaction = Some(interaction);
            *changed = true;
        }
        StreamFrame::Complete { result, .. } => {
            if next.interaction.take().is_some() {
                events.push(StoreEvent::InteractionCleared);
                *changed = true;
            }
            if next.status != TaskStatus::Completed {
                next.status = TaskStatus::Completed;
                events.push(StoreEvent::StatusChanged {
                    status: TaskStatus::Completed,
                });
                *changed = true;
            }
            if next.progress != 100 {
                next.progress = 100;
                *changed = true;
            }
            if next.completed_at.is_none() {
                next.completed_at = Some(now);
                *changed = true;
            }
            if result.is_some() && next.result != result {
                next.result = result;
                *changed = true;
            }
            if *changed {
                push_activity(
                    next,
                    ActivityKind::Completion,
                    "workflow completed".to_string(),
                    Some(100),
                    now,
                );
                events.push(StoreEvent::TaskCompleted {
                    result: next.result.clone(),
                });
            }
        }
        StreamFrame::Error { error, .. } => match TaskErrorKind::classify(&error) {
            TaskErrorKind::NotFound => {
                // The server no longer knows the task; surviving local state
                // would resurrect it forever. Wipe instead of erroring.
                *next = TaskState {
                    revision: next.revision,
                    ..TaskState::default()
                };
                events.push(StoreEvent::TaskReset);
                *changed = true;
            }
            TaskErrorKind::Workflow => {
                if next.interaction.take().is_some() {
                    events.push(StoreEvent::InteractionCleared);
                    *changed = true;
                }
                if next.status != TaskStatus::Error {
                    next.status = TaskStatus::Error;
                    events.push(StoreEvent::StatusChanged {
                        status: TaskStatus::Error,
                    });
                    *changed = true;
                }
                if next.completed_at.is_none() {
                    next.completed_at = Some(now);
                    *changed = true;
                }
                if next.error.as_deref() != Some(error.as_str()) {
                    next.error = Some(error.clone());
                    push_activity(next, ActivityKind::Error, error.clone(), None, now);
                    events.push(StoreEvent::TaskFailed { error });
                    *changed = true;
                }
            }
        },
        StreamFrame::CodeChunk {
            content, filename, ..
        } => {
            if content.is_empty() {
                return;
            }
            let bytes = content.len();
            next.stream.append(&content, filename.as_deref());
            events.push(StoreEvent::ChunkAppended { bytes });
            *changed = true;
        }
        StreamFrame::FileStart { filename, .. } => {
            if let Some(closed) = next.stream.open_file(filename.clone()) {
                events.push(StoreEvent::FileClosed {
                    filename: closed.filename,
                });
            }
            events.push(StoreEvent::FileOpened { filename });
            *changed = true;
        }
        StreamFrame::FileEnd { .. } => {
            if let Some(closed) = next.stream.close_file() {
                events.push(StoreEvent::FileClosed {
                    filename: closed.filename,
                });
                *changed = true;
            }
        }
    }
}

fn apply_status(
    next: &mut TaskState,
    status: TaskStatus,
    now: DateTime<Utc>,
    events: &mut Vec<StoreEvent>,
    changed: &mut bool,
) {
    if next.status == status {
        return;
    }

    if status != TaskStatus::WaitingForInput && next.interaction.take().is_some() {
        events.push(StoreEvent::InteractionCleared);
    }
    next.status = status;
    if status == TaskStatus::Completed {
        next.progress = 100;
    }
    push_activity(next, ActivityKind::Status, status.as_str().to_string(), None, now);
    events.push(StoreEvent::StatusChanged { status });
    *changed = true;
}

fn apply_recovered(
    next: &mut TaskState,
    state: &TaskState,
    kind: Option<WorkflowKind>,
    snapshot: TaskStatusResponse,
    now: DateTime<Utc>,
    events: &mut Vec<StoreEvent>,
    changed: &mut bool,
) {
    let Some(status) = TaskStatus::from_remote(snapshot.status) else {
        if !next.is_pristine() {
            *next = TaskState {
                revision: state.revision,
                ..TaskState::default()
            };
            events.push(StoreEvent::TaskReset);
            *changed = true;
        }
        return;
    };

    let interaction = snapshot.pending_interaction.map(Interaction::from_pending);
    let started_at = snapshot
        .started_at
        .as_deref()
        .and_then(parse_server_timestamp)
        .map(|t| t.and_utc());
    let completed_at = snapshot
        .completed_at
        .as_deref()
        .and_then(parse_server_timestamp)
        .map(|t| t.and_utc());
    *next = TaskState {
        task_id: Some(snapshot.task_id.clone()),
        kind,
        status,
        progress: if status == TaskStatus::Completed {
            100
        } else {
            snapshot.progress.min(100)
        },
        message: snapshot.message,
        interaction: interaction.clone(),
        result: snapshot.result,
        error: snapshot.error,
        started_at,
        completed_at,
        revision: state.revision,
        ..TaskState::default()
    };
    push_activity(
        next,
        ActivityKind::System,
        format!("recovered task in status {status}"),
        None,
        now,
    );
    events.push(StoreEvent::TaskRecovered {
        task_id: snapshot.task_id,
        status,
    });
    events.push(StoreEvent::StatusChanged { status });
    if let Some(interaction) = interaction {
        events.push(StoreEvent::InteractionRequested { interaction });
    }
    *changed = true;
}

fn absorb_progress(
    next: &mut TaskState,
    raw_progress: u8,
    message: &str,
    now: DateTime<Utc>,
    events: &mut Vec<StoreEvent>,
    changed: &mut bool,
) {
    let progress = raw_progress.min(100);
    let mut moved = false;

    // Progress never moves backwards; late frames from the slower stream
    // keep the high-water mark.
    if progress > next.progress {
        next.progress = progress;
        moved = true;
    }
    if !message.is_empty() && next.message != message {
        next.message = message.to_string();
        moved = true;
    }

    if moved {
        push_activity(
            next,
            ActivityKind::Progress,
            next.message.clone(),
            Some(next.progress),
            now,
        );
        events.push(StoreEvent::ProgressAdvanced {
            progress: next.progress,
            message: next.message.clone(),
        });
        *changed = true;
    }
}

fn push_activity(
    state: &mut TaskState,
    kind: ActivityKind,
    message: String,
    progress: Option<u8>,
    now: DateTime<Utc>,
) {
    // Both streams forward the same progress frames; collapse entries that
    // repeat the tail within the same wall-clock second.
    if let Some(tail) = state.activity.last() {
        if tail.message == message
            && tail.progress == progress
            && tail.at.timestamp() == now.timestamp()
        {
            return;
        }
    }
    state.activity.push(ActivityEntry {
        id: Uuid::new_v4(),
        kind,
        message,
        progress,
        at: now,
    });
    if state.activity.len() > crate::ACTIVITY_LOG_CAP {
        let overflow = state.activity.len() - crate::ACTIVITY_LOG_CAP;
        state.activity.drain(..overflow);
    }
}
