use runnel_kernel::ResultRecord;
use serde::Serialize;
use serde_json::{json, Value};

/// Envelope broadcast to every connected subscriber. The `command` tag
/// drives client-side interpretation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command")]
pub enum OutboundMessage {
    /// One translated result record of the running execution.
    #[serde(rename = "notebook-upd")]
    Update { content: Value, msg_type: String },
    /// Terminator of a successful execution's stream.
    #[serde(rename = "notebook-end")]
    End,
    #[serde(rename = "notebook-restart")]
    Restarted,
    #[serde(rename = "notebook-interrupt")]
    Interrupted,
    #[serde(rename = "notebook-shutdown")]
    ShutDown,
    #[serde(rename = "notebook-jupyter_connection_info")]
    ConnectionInfo { content: Value, id: Option<i64> },
    /// Prompt-formatted echo of submitted code.
    #[serde(rename = "notebook-echo")]
    Echo { content: Value },
    /// Acceptance acknowledgement for a dispatched command.
    #[serde(rename = "notebook-ack")]
    Ack { status: String },
}

impl OutboundMessage {
    pub fn update(record: ResultRecord) -> Self {
        Self::Update {
            content: record.content,
            msg_type: record.msg_type,
        }
    }

    pub fn echo(text: String) -> Self {
        Self::Echo {
            content: json!({ "text": text }),
        }
    }

    pub fn ack() -> Self {
        Self::Ack {
            status: "operation completed".to_string(),
        }
    }
}
