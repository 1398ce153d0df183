use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::RemoteStatus;

/// The two push endpoints a task exposes. Both carry [`StreamFrame`]s; the
/// code stream additionally interleaves file-boundary and chunk frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEndpoint {
    Workflow,
    CodeStream,
}

impl StreamEndpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamEndpoint::Workflow => "workflow",
            StreamEndpoint::CodeStream => "code-stream",
        }
    }

    /// WebSocket path prefix; append `/{task_id}` to get the full path.
    pub fn path_prefix(self) -> &'static str {
        match self {
            StreamEndpoint::Workflow => crate::WS_WORKFLOW_PREFIX,
            StreamEndpoint::CodeStream => crate::WS_CODE_STREAM_PREFIX,
        }
    }
}

/// One push frame from either stream endpoint.
///
/// The workflow and the code stream endpoints speak the same tagged union;
/// the code stream additionally synthesizes `file_start`/`file_end` pairs
/// around forwarded terminal frames. Replayed terminal frames omit fields the
/// live broadcast carries (and vice versa), so everything but the tag and the
/// per-variant payload core is lenient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Progress {
        #[serde(default)]
        task_id: Option<String>,
        #[serde(default)]
        progress: u8,
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Status {
        #[serde(default)]
        task_id: Option<String>,
        status: RemoteStatus,
        #[serde(default)]
        progress: u8,
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    InteractionRequired {
        #[serde(default)]
        task_id: Option<String>,
        #[serde(default)]
        interaction_type: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        data: Option<Value>,
        #[serde(default)]
        options: Option<Value>,
        #[serde(default)]
        required: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Complete {
        #[serde(default)]
        task_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Error {
        #[serde(default)]
        task_id: Option<String>,
        #[serde(default)]
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    CodeChunk {
        #[serde(default)]
        task_id: Option<String>,
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    FileStart {
        #[serde(default)]
        task_id: Option<String>,
        filename: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    FileEnd {
        #[serde(default)]
        task_id: Option<String>,
        filename: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Heartbeat {
        #[serde(default)]
        task_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
}

impl StreamFrame {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            StreamFrame::Progress { task_id, .. }
            | StreamFrame::Status { task_id, .. }
            | StreamFrame::InteractionRequired { task_id, .. }
            | StreamFrame::Complete { task_id, .. }
            | StreamFrame::Error { task_id, .. }
            | StreamFrame::CodeChunk { task_id, .. }
            | StreamFrame::FileStart { task_id, .. }
            | StreamFrame::FileEnd { task_id, .. }
            | StreamFrame::Heartbeat { task_id, .. } => task_id.as_deref(),
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            StreamFrame::Progress { .. } => "progress",
            StreamFrame::Status { .. } => "status",
            StreamFrame::InteractionRequired { .. } => "interaction_required",
            StreamFrame::Complete { .. } => "complete",
            StreamFrame::Error { .. } => "error",
            StreamFrame::CodeChunk { .. } => "code_chunk",
            StreamFrame::FileStart { .. } => "file_start",
            StreamFrame::FileEnd { .. } => "file_end",
            StreamFrame::Heartbeat { .. } => "heartbeat",
        }
    }

    /// True for the frames that report the task reaching a terminal state.
    /// The server closes the stream roughly half a second after sending one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Complete { .. } | StreamFrame::Error { .. })
    }
}

pub fn decode_frame(raw: &str) -> serde_json::Result<StreamFrame> {
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_progress_frame() {
        let raw = r#"{"type":"progress","task_id":"t-1","progress":42,"message":"Analyzing paper structure","timestamp":"2025-11-03T09:15:42.123456"}"#;
        let frame = decode_frame(raw).unwrap();
        match frame {
            StreamFrame::Progress {
                task_id,
                progress,
                message,
                timestamp,
            } => {
                assert_eq!(task_id.as_deref(), Some("t-1"));
                assert_eq!(progress, 42);
                assert_eq!(message, "Analyzing paper structure");
                assert!(timestamp.is_some());
            }
            other => panic!("expected progress frame, got {other:?}"),
        }
    }

    #[test]
    fn decodes_status_snapshot() {
        let raw = r#"{"type":"status","task_id":"t-1","status":"waiting_for_input","progress":55,"message":"Plan ready for review","timestamp":"2025-11-03T09:15:42"}"#;
        let frame = decode_frame(raw).unwrap();
        match frame {
            StreamFrame::Status { status, progress, .. } => {
                assert_eq!(status, RemoteStatus::WaitingForInput);
                assert_eq!(progress, 55);
            }
            other => panic!("expected status frame, got {other:?}"),
        }
    }

    #[test]
    fn decodes_status_with_unrecognized_value() {
        let raw = r#"{"type":"status","task_id":"t-1","status":"pending","progress":0,"message":""}"#;
        let frame = decode_frame(raw).unwrap();
        assert!(matches!(
            frame,
            StreamFrame::Status {
                status: RemoteStatus::Unknown,
                ..
            }
        ));
    }

    #[test]
    fn decodes_live_complete_without_timestamp() {
        // Live broadcast shape: status marker included, no timestamp.
        let raw = r#"{"type":"complete","task_id":"t-1","status":"success","result":{"status":"success","repo_result":"/out/repo"}}"#;
        let frame = decode_frame(raw).unwrap();
        match frame {
            StreamFrame::Complete { status, result, timestamp, .. } => {
                assert_eq!(status.as_deref(), Some("success"));
                assert_eq!(result.unwrap()["repo_result"], "/out/repo");
                assert!(timestamp.is_none());
            }
            other => panic!("expected complete frame, got {other:?}"),
        }
    }

    #[test]
    fn decodes_replayed_complete_without_status_marker() {
        // Reconnect replay shape: timestamp included, no status marker.
        let raw = r#"{"type":"complete","task_id":"t-1","result":null,"timestamp":"2025-11-03T09:20:00.000001"}"#;
        let frame = decode_frame(raw).unwrap();
        match frame {
            StreamFrame::Complete { status, result, timestamp, .. } => {
                assert!(status.is_none());
                assert!(result.is_none());
                assert!(timestamp.is_some());
            }
            other => panic!("expected complete frame, got {other:?}"),
        }
    }

    #[test]
    fn decodes_flat_interaction_frame_with_null_fields() {
        let raw = r#"{"type":"interaction_required","task_id":"t-1","interaction_type":"plan_review","title":"Review the plan","description":null,"data":{"plan":"..."},"options":{"confirm":"Accept","modify":"Revise","cancel":"Abort"},"required":false,"timestamp":"2025-11-03T09:16:00"}"#;
        let frame = decode_frame(raw).unwrap();
        match frame {
            StreamFrame::InteractionRequired {
                interaction_type,
                title,
                description,
                options,
                required,
                ..
            } => {
                assert_eq!(interaction_type.as_deref(), Some("plan_review"));
                assert_eq!(title.as_deref(), Some("Review the plan"));
                assert!(description.is_none());
                assert_eq!(options.unwrap()["modify"], "Revise");
                assert_eq!(required, Some(false));
            }
            other => panic!("expected interaction frame, got {other:?}"),
        }
    }

    #[test]
    fn decodes_code_stream_frames() {
        let start = decode_frame(
            r#"{"type":"file_start","task_id":"t-1","filename":"src/model.py","timestamp":"2025-11-03T09:17:00"}"#,
        )
        .unwrap();
        assert!(matches!(start, StreamFrame::FileStart { ref filename, .. } if filename == "src/model.py"));

        let chunk = decode_frame(
            r#"{"type":"code_chunk","task_id":"t-1","content":"import torch\n","filename":"src/model.py","timestamp":"2025-11-03T09:17:01"}"#,
        )
        .unwrap();
        match chunk {
            StreamFrame::CodeChunk { content, filename, .. } => {
                assert_eq!(content, "import torch\n");
                assert_eq!(filename.as_deref(), Some("src/model.py"));
            }
            other => panic!("expected code chunk, got {other:?}"),
        }

        let end = decode_frame(
            r#"{"type":"file_end","task_id":"t-1","filename":"src/model.py","timestamp":"2025-11-03T09:17:02"}"#,
        )
        .unwrap();
        assert!(end.task_id().is_some());
        assert_eq!(end.kind_label(), "file_end");
    }

    #[test]
    fn decodes_heartbeat_and_error() {
        let hb = decode_frame(r#"{"type":"heartbeat","task_id":"t-1","timestamp":"2025-11-03T09:18:00"}"#).unwrap();
        assert!(matches!(hb, StreamFrame::Heartbeat { .. }));
        assert!(!hb.is_terminal());

        let err = decode_frame(r#"{"type":"error","task_id":"t-9","error":"Task not found","timestamp":"2025-11-03T09:18:01"}"#).unwrap();
        match &err {
            StreamFrame::Error { error, .. } => assert_eq!(error, "Task not found"),
            other => panic!("expected error frame, got {other:?}"),
        }
        assert!(err.is_terminal());
    }

    #[test]
    fn rejects_unknown_tag_and_missing_tag() {
        assert!(decode_frame(r#"{"type":"telemetry","task_id":"t-1"}"#).is_err());
        assert!(decode_frame(r#"{"task_id":"t-1","progress":10}"#).is_err());
        assert!(decode_frame("not json").is_err());
    }
}
