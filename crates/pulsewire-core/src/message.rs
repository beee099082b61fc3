//! Wire messages.
//!
//! Every inbound frame is an envelope `{ "type": ..., "data": ..., "timestamp": ... }`.
//! The envelope is kept raw for consumers that want it; the known kinds are
//! additionally decoded into [`InboundMessage`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One unit delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Envelope discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    WorkflowUpdate,
    Notification,
    Error,
    Ping,
    Pong,
    /// A tag this crate does not interpret. Kept for raw consumers.
    Unknown(String),
}

impl MessageKind {
    /// Wire tag for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::WorkflowUpdate => "workflow_update",
            Self::Notification => "notification",
            Self::Error => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Unknown(tag) => tag,
        }
    }
}

impl From<&str> for MessageKind {
    fn from(tag: &str) -> Self {
        match tag {
            "workflow_update" => Self::WorkflowUpdate,
            "notification" => Self::Notification,
            "error" => Self::Error,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A parsed envelope, before its payload is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub kind: MessageKind,
    /// Kind-specific payload.
    pub data: Value,
    /// Sender timestamp, if the envelope carried one.
    pub timestamp: Option<u64>,
    /// Local receive time in epoch milliseconds.
    pub received_at: u64,
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    WorkflowUpdate(WorkflowUpdate),
    Notification(Notification),
    Error(ServerError),
    Ping { timestamp: Option<u64> },
    Pong { timestamp: Option<u64> },
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::WorkflowUpdate(_) => MessageKind::WorkflowUpdate,
            Self::Notification(_) => MessageKind::Notification,
            Self::Error(_) => MessageKind::Error,
            Self::Ping { .. } => MessageKind::Ping,
            Self::Pong { .. } => MessageKind::Pong,
        }
    }
}

/// Messages the core sends on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Liveness check.
    Ping { timestamp: u64 },
}

/// Progress report for one workflow session.
///
/// Absent fields leave the stored record untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowUpdate {
    #[serde(alias = "session_id")]
    pub session_id: String,
    #[serde(default)]
    pub stage: Option<String>,
    /// Percent complete. Clamped to 0..=100 when stored.
    #[serde(default, alias = "progressPercent")]
    pub progress: Option<f64>,
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
    #[serde(default)]
    pub message: Option<String>,
    /// Fields the core does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Paused,
}

impl WorkflowStatus {
    /// Completed and Failed workflows will not report again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Notification payload as sent by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, alias = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "message")]
    pub body: String,
    /// Epoch milliseconds. Non-numeric values are ignored.
    #[serde(default, alias = "timestamp", deserialize_with = "lenient_millis")]
    pub created_at: Option<u64>,
    #[serde(default, alias = "read")]
    pub is_read: bool,
    #[serde(default)]
    pub action: Option<NotificationAction>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Warning,
    Error,
    /// Also used for any kind this crate does not know.
    #[default]
    #[serde(other)]
    Info,
}

/// Optional call to action attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub label: String,
    #[serde(alias = "url", alias = "href")]
    pub target: String,
}

/// Application-level error reported by the server. Never affects the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    pub message: String,
    pub code: Option<String>,
    pub received_at: u64,
}

impl ServerError {
    /// Read an error payload: either a bare string or an object with
    /// `message` and optional `code`.
    pub fn from_payload(data: &Value, received_at: u64) -> Self {
        let (message, code) = match data {
            Value::String(text) => (text.clone(), None),
            Value::Object(fields) => {
                let message = match fields.get("message").or_else(|| fields.get("error")) {
                    Some(Value::String(text)) => text.clone(),
                    Some(other) => other.to_string(),
                    None => data.to_string(),
                };
                let code = fields.get("code").and_then(scalar_to_string);
                (message, code)
            }
            Value::Null => ("unknown error".to_string(), None),
            other => (other.to_string(), None),
        };
        Self {
            message,
            code,
            received_at,
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    scalar_to_string(&value)
        .ok_or_else(|| serde::de::Error::custom("expected a string or number id"))
}

fn lenient_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_wire_shape() {
        let text = serde_json::to_string(&OutboundMessage::Ping { timestamp: 42 }).unwrap();
        assert_eq!(text, r#"{"type":"ping","timestamp":42}"#);
    }

    #[test]
    fn workflow_update_keeps_unknown_fields() {
        let update: WorkflowUpdate = serde_json::from_value(json!({
            "sessionId": "s1",
            "stage": "analyze",
            "progress": 40,
            "status": "running",
            "artifact": "diagram.svg"
        }))
        .unwrap();
        assert_eq!(update.session_id, "s1");
        assert_eq!(update.progress, Some(40.0));
        assert_eq!(update.extra.get("artifact"), Some(&json!("diagram.svg")));
        assert!(!update.extra.contains_key("stage"));
    }

    #[test]
    fn notification_accepts_dashboard_names() {
        let n: Notification = serde_json::from_value(json!({
            "id": 7,
            "type": "success",
            "title": "Done",
            "message": "Workflow finished",
            "timestamp": "2024-01-01T00:00:00Z",
            "read": true,
            "action": { "label": "Open", "url": "/projects/1" }
        }))
        .unwrap();
        assert_eq!(n.id, "7");
        assert_eq!(n.kind, NotificationKind::Success);
        assert_eq!(n.body, "Workflow finished");
        assert_eq!(n.created_at, None);
        assert!(n.is_read);
        assert_eq!(n.action.unwrap().target, "/projects/1");
    }

    #[test]
    fn unknown_notification_kind_is_info() {
        let n: Notification =
            serde_json::from_value(json!({ "id": "n1", "type": "celebration" })).unwrap();
        assert_eq!(n.kind, NotificationKind::Info);
    }

    #[test]
    fn server_error_payload_shapes() {
        let bare = ServerError::from_payload(&json!("quota exceeded"), 1);
        assert_eq!(bare.message, "quota exceeded");
        assert_eq!(bare.code, None);

        let object = ServerError::from_payload(&json!({ "message": "bad", "code": 429 }), 1);
        assert_eq!(object.message, "bad");
        assert_eq!(object.code.as_deref(), Some("429"));
    }

    #[test]
    fn kind_tags() {
        assert_eq!(MessageKind::from("workflow_update"), MessageKind::WorkflowUpdate);
        assert_eq!(
            MessageKind::from("chat_message"),
            MessageKind::Unknown("chat_message".into())
        );
        assert_eq!(MessageKind::Pong.to_string(), "pong");
    }
}
