//! Frame parsing and classification.
//!
//! A persistent stream carries noise: proxy keepalives, bare `pong` text,
//! binary blobs. None of that is an error for consumers, so everything that
//! is not a well-formed envelope comes back as a [`DiscardReason`] the caller
//! logs and drops.

use crate::message::{Frame, InboundMessage, MessageKind, RawMessage, ServerError};
use serde_json::Value;

/// Why a frame or payload was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscardReason {
    #[error("binary frame ({0} bytes)")]
    Binary(usize),
    #[error("frame is not structured data")]
    NotStructured,
    #[error("frame failed to parse: {0}")]
    Malformed(String),
    #[error("envelope has no type discriminator")]
    MissingDiscriminator,
    #[error("unknown message type: {0}")]
    UnknownKind(String),
    #[error("invalid {kind} payload: {error}")]
    InvalidPayload { kind: MessageKind, error: String },
}

/// Parse a frame into an envelope.
///
/// The discriminator is read from `type`, then `kind`. When the envelope has
/// no `data` field the remaining top-level fields are used as the payload.
pub fn parse_frame(frame: &Frame, received_at: u64) -> Result<RawMessage, DiscardReason> {
    let text = match frame {
        Frame::Text(text) => text.trim(),
        Frame::Binary(bytes) => return Err(DiscardReason::Binary(bytes.len())),
    };

    if !(text.starts_with('{') || text.starts_with('[')) {
        return Err(DiscardReason::NotStructured);
    }

    let value: Value =
        serde_json::from_str(text).map_err(|e| DiscardReason::Malformed(e.to_string()))?;

    let Value::Object(mut fields) = value else {
        return Err(DiscardReason::MissingDiscriminator);
    };

    let kind = match fields.remove("type").or_else(|| fields.remove("kind")) {
        Some(Value::String(tag)) => MessageKind::from(tag.as_str()),
        _ => return Err(DiscardReason::MissingDiscriminator),
    };

    let timestamp = fields.get("timestamp").and_then(Value::as_u64);
    let data = match fields.remove("data") {
        Some(data) => data,
        None => {
            fields.remove("timestamp");
            Value::Object(fields)
        }
    };

    Ok(RawMessage {
        kind,
        data,
        timestamp,
        received_at,
    })
}

/// Decode the payload of a parsed envelope.
pub fn classify(raw: &RawMessage) -> Result<InboundMessage, DiscardReason> {
    let invalid = |error: serde_json::Error| DiscardReason::InvalidPayload {
        kind: raw.kind.clone(),
        error: error.to_string(),
    };

    match &raw.kind {
        MessageKind::WorkflowUpdate => serde_json::from_value(raw.data.clone())
            .map(InboundMessage::WorkflowUpdate)
            .map_err(invalid),
        MessageKind::Notification => serde_json::from_value(raw.data.clone())
            .map(InboundMessage::Notification)
            .map_err(invalid),
        MessageKind::Error => Ok(InboundMessage::Error(ServerError::from_payload(
            &raw.data,
            raw.received_at,
        ))),
        MessageKind::Ping => Ok(InboundMessage::Ping {
            timestamp: payload_timestamp(raw),
        }),
        MessageKind::Pong => Ok(InboundMessage::Pong {
            timestamp: payload_timestamp(raw),
        }),
        MessageKind::Unknown(tag) => Err(DiscardReason::UnknownKind(tag.clone())),
    }
}

fn payload_timestamp(raw: &RawMessage) -> Option<u64> {
    raw.data
        .get("timestamp")
        .and_then(Value::as_u64)
        .or(raw.timestamp)
}
