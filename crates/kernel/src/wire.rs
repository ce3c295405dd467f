//! Codec for the kernel's multipart wire format, shared by the shell and
//! iopub channels. Signing is disabled (empty key in the connection file),
//! so the signature frame is always empty.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;
use zeromq::ZmqMessage;

use crate::{ResultRecord, Status};

const DELIMITER: &[u8] = b"<IDS|MSG>";

pub const PROTOCOL_VERSION: &str = "5.3";

#[derive(Debug, Error)]
pub enum WireError {
    #[error("missing <IDS|MSG> delimiter frame")]
    MissingDelimiter,
    #[error("message truncated after the delimiter")]
    Truncated,
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    pub session: String,
    pub username: String,
    pub msg_type: String,
    pub version: String,
}

impl Header {
    pub fn new(session: &str, msg_type: &str) -> Self {
        Self {
            msg_id: Uuid::new_v4().to_string(),
            session: session.to_string(),
            username: "runnel".to_string(),
            msg_type: msg_type.to_string(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// One decoded message from either kernel channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub msg_type: String,
    pub parent_id: Option<String>,
    pub content: Value,
}

impl From<Notification> for ResultRecord {
    fn from(notification: Notification) -> Self {
        ResultRecord {
            content: notification.content,
            msg_type: notification.msg_type,
        }
    }
}

/// Builds an `execute_request` for the control channel, tagged with a fresh
/// message id.
pub fn execute_request(session: &str, code: &str) -> ZmqMessage {
    let header = Header::new(session, "execute_request");
    let content = json!({
        "code": code,
        "silent": false,
        "store_history": true,
        "user_expressions": {},
        "allow_stdin": false,
        "stop_on_error": false,
    });
    encode(&header, &content)
}

pub fn encode(header: &Header, content: &Value) -> ZmqMessage {
    let mut message = ZmqMessage::from(Bytes::from_static(DELIMITER));
    message.push_back(Bytes::new());
    message.push_back(serde_json::to_vec(header).expect("header serializes").into());
    message.push_back(Bytes::from_static(b"{}"));
    message.push_back(Bytes::from_static(b"{}"));
    message.push_back(serde_json::to_vec(content).expect("content serializes").into());
    message
}

/// Decodes a multipart message, tolerating any number of leading identity
/// or topic frames before the delimiter.
pub fn decode(message: ZmqMessage) -> Result<Notification, WireError> {
    let frames = message.into_vec();
    let delimiter = frames
        .iter()
        .position(|frame| frame.as_ref() == DELIMITER)
        .ok_or(WireError::MissingDelimiter)?;

    let frame = |offset: usize| frames.get(delimiter + offset).ok_or(WireError::Truncated);

    let header: Header = serde_json::from_slice(frame(2)?)?;
    let parent: Value = serde_json::from_slice(frame(3)?)?;
    let content: Value = serde_json::from_slice(frame(5)?)?;

    Ok(Notification {
        msg_type: header.msg_type,
        parent_id: parent
            .get("msg_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        content,
    })
}

/// Extracts the kernel execution state from a `status` notification.
pub fn execution_state(notification: &Notification) -> Option<Status> {
    let state = notification.content.get("execution_state")?.as_str()?;
    Some(if state == "idle" {
        Status::Idle
    } else {
        Status::Busy
    })
}
