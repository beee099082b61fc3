//! Core types and state machine for pulsewire.
//!
//! This crate is I/O free. It knows how to read frames, fold them into the
//! derived views consumers render, and decide what the connection should do
//! next. Sockets and timers live in `pulsewire-client`, which feeds
//! [`Event`]s into a [`Session`] and executes the [`Command`]s it returns.

mod backoff;
mod dispatch;
pub mod gate;
mod message;
mod session;
mod store;

pub use backoff::ReconnectPolicy;
pub use dispatch::{DiscardReason, classify, parse_frame};
pub use message::{
    Frame, InboundMessage, MessageKind, Notification, NotificationAction, NotificationKind,
    OutboundMessage, RawMessage, ServerError, WorkflowStatus, WorkflowUpdate,
};
pub use session::{
    Command, ConnectionStatus, Event, ReconnectGate, Session, SessionConfig, Snapshot, TimerId,
    TransportId,
};
pub use store::{NotificationRecord, StateStore, WorkflowUpdateRecord};

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Close code sent on an intentional disconnect. Any other code is unexpected.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the transport went away without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport and nothing scheduled.
    #[default]
    Disconnected,
    /// A transport is being opened.
    Connecting,
    /// Transport open, heartbeat armed.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Retries exhausted. Only an explicit connect leaves this state.
    FailedPermanently,
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
