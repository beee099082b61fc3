//! Connection lifecycle and heartbeat as an explicit state machine.
//!
//! Socket and timer callbacks arrive as [`Event`]s; [`Session::handle`] folds
//! each one into the state and returns the [`Command`]s the driver must run.
//! Every transport and timer is tagged with an id, so events from a socket
//! that was already abandoned or a timer that was already cancelled are
//! ignored instead of corrupting the current connection.

use crate::backoff::ReconnectPolicy;
use crate::dispatch::parse_frame;
use crate::message::{Frame, OutboundMessage, RawMessage, ServerError};
use crate::store::{NotificationRecord, StateStore, WorkflowUpdateRecord};
use crate::{ConnectionState, NORMAL_CLOSURE};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Identifies one opened transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(pub u64);

/// Identifies one armed timer (heartbeat or reconnect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport#{}", self.0)
    }
}

/// Caller policy consulted on every unexpected closure. Returning `false`
/// leaves the session disconnected instead of scheduling a retry.
pub type ReconnectGate = Box<dyn Fn(&StateStore) -> bool + Send>;

/// Static settings for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub url: String,
    pub reconnect: ReconnectPolicy,
    pub heartbeat_interval: Duration,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_millis(30_000),
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Consumer asked to connect.
    Connect,
    /// Consumer asked to disconnect.
    Disconnect,
    /// Consumer payload to transmit.
    Send(Value),
    MarkNotificationRead(String),
    ClearAllNotifications,
    ClearServerError,
    /// The transport finished its handshake.
    Opened { transport: TransportId },
    /// The transport closed. `None` means no close frame was received.
    Closed {
        transport: TransportId,
        code: Option<u16>,
    },
    /// The transport reported an error. A `Closed` event follows.
    TransportError {
        transport: TransportId,
        error: String,
    },
    Frame {
        transport: TransportId,
        frame: Frame,
        received_at: u64,
    },
    ReconnectDue { timer: TimerId },
    HeartbeatDue { timer: TimerId, now: u64 },
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    OpenTransport { transport: TransportId, url: String },
    CloseTransport { transport: TransportId, code: u16 },
    SendFrame { transport: TransportId, text: String },
    ScheduleReconnect {
        timer: TimerId,
        delay: Duration,
        attempt: u32,
    },
    CancelReconnect { timer: TimerId },
    ArmHeartbeat { timer: TimerId, interval: Duration },
    DisarmHeartbeat { timer: TimerId },
}

/// Connectivity as seen by consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reconnect_attempt: u32,
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

/// Owned copy of everything consumers read.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub connection: ConnectionStatus,
    pub workflow_updates: Vec<WorkflowUpdateRecord>,
    pub notifications: Vec<NotificationRecord>,
    pub server_error: Option<ServerError>,
    pub last_message: Option<RawMessage>,
}

impl Snapshot {
    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.is_read).count()
    }
}

pub struct Session {
    config: SessionConfig,
    state: ConnectionState,
    reconnect_attempt: u32,
    last_error: Option<String>,
    transport: Option<TransportId>,
    pending_reconnect: Option<TimerId>,
    heartbeat: Option<TimerId>,
    next_id: u64,
    store: StateStore,
    gate: Option<ReconnectGate>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.config.url)
            .field("state", &self.state)
            .field("reconnect_attempt", &self.reconnect_attempt)
            .field("transport", &self.transport)
            .field("pending_reconnect", &self.pending_reconnect)
            .field("heartbeat", &self.heartbeat)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            reconnect_attempt: 0,
            last_error: None,
            transport: None,
            pending_reconnect: None,
            heartbeat: None,
            next_id: 0,
            store: StateStore::new(),
            gate: None,
        }
    }

    /// Install a reconnect gate. See [`crate::gate`].
    pub fn with_reconnect_gate(mut self, gate: ReconnectGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            reconnect_attempt: self.reconnect_attempt,
            last_error: self.last_error.clone(),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn heartbeat_armed(&self) -> bool {
        self.heartbeat.is_some()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.pending_reconnect.is_some()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            connection: self.status(),
            workflow_updates: self.store.workflow_updates().to_vec(),
            notifications: self.store.notifications().to_vec(),
            server_error: self.store.server_error().cloned(),
            last_message: self.store.last_message().cloned(),
        }
    }

    /// Apply one event and return the commands it produced, in order.
    pub fn handle(&mut self, event: Event) -> Vec<Command> {
        let mut out = Vec::new();
        match event {
            Event::Connect => self.connect(&mut out),
            Event::Disconnect => self.disconnect(&mut out),
            Event::Send(payload) => self.send(payload, &mut out),
            Event::MarkNotificationRead(id) => {
                self.store.mark_notification_read(&id);
            }
            Event::ClearAllNotifications => self.store.clear_all_notifications(),
            Event::ClearServerError => self.store.clear_server_error(),
            Event::Opened { transport } => self.on_opened(transport, &mut out),
            Event::Closed { transport, code } => self.on_closed(transport, code, &mut out),
            Event::TransportError { transport, error } => self.on_error(transport, error),
            Event::Frame {
                transport,
                frame,
                received_at,
            } => self.on_frame(transport, &frame, received_at),
            Event::ReconnectDue { timer } => self.on_reconnect_due(timer, &mut out),
            Event::HeartbeatDue { timer, now } => self.on_heartbeat_due(timer, now, &mut out),
        }
        out
    }

    fn connect(&mut self, out: &mut Vec<Command>) {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => {
                tracing::debug!(state = ?self.state, "connect ignored");
                return;
            }
            ConnectionState::Reconnecting => self.cancel_reconnect(out),
            ConnectionState::Disconnected | ConnectionState::FailedPermanently => {
                self.reconnect_attempt = 0;
            }
        }
        self.open(out);
    }

    fn disconnect(&mut self, out: &mut Vec<Command>) {
        self.cancel_reconnect(out);
        self.disarm_heartbeat(out);
        if let Some(transport) = self.transport.take() {
            out.push(Command::CloseTransport {
                transport,
                code: NORMAL_CLOSURE,
            });
        }
        if self.state != ConnectionState::Disconnected {
            tracing::info!(url = %self.config.url, "disconnected");
        }
        self.state = ConnectionState::Disconnected;
        self.reconnect_attempt = 0;
    }

    fn send(&mut self, payload: Value, out: &mut Vec<Command>) {
        match (self.state, self.transport) {
            (ConnectionState::Connected, Some(transport)) => out.push(Command::SendFrame {
                transport,
                text: payload.to_string(),
            }),
            (state, _) => {
                tracing::warn!(?state, "not connected, message dropped");
            }
        }
    }

    fn open(&mut self, out: &mut Vec<Command>) {
        let transport = TransportId(self.next_id());
        self.transport = Some(transport);
        self.state = ConnectionState::Connecting;
        tracing::info!(url = %self.config.url, %transport, attempt = self.reconnect_attempt, "connecting");
        out.push(Command::OpenTransport {
            transport,
            url: self.config.url.clone(),
        });
    }

    fn on_opened(&mut self, transport: TransportId, out: &mut Vec<Command>) {
        if !self.is_current(transport) || self.state != ConnectionState::Connecting {
            tracing::debug!(%transport, "stale open ignored");
            return;
        }
        self.state = ConnectionState::Connected;
        self.reconnect_attempt = 0;
        self.last_error = None;
        tracing::info!(url = %self.config.url, %transport, "connected");

        self.disarm_heartbeat(out);
        let timer = TimerId(self.next_id());
        self.heartbeat = Some(timer);
        out.push(Command::ArmHeartbeat {
            timer,
            interval: self.config.heartbeat_interval,
        });
    }

    fn on_closed(&mut self, transport: TransportId, code: Option<u16>, out: &mut Vec<Command>) {
        if !self.is_current(transport) {
            tracing::debug!(%transport, ?code, "stale close ignored");
            return;
        }
        self.transport = None;
        self.disarm_heartbeat(out);

        if code == Some(NORMAL_CLOSURE) {
            tracing::info!(url = %self.config.url, "server closed the connection normally");
            self.state = ConnectionState::Disconnected;
            self.reconnect_attempt = 0;
            return;
        }

        if self.last_error.is_none() {
            self.last_error = Some(match code {
                Some(code) => format!("connection closed unexpectedly (code {code})"),
                None => "connection closed unexpectedly".to_string(),
            });
        }

        let failures = self.reconnect_attempt + 1;
        self.reconnect_attempt = failures;

        if let Some(gate) = &self.gate {
            if !gate(&self.store) {
                tracing::info!("reconnect suppressed by gate");
                self.state = ConnectionState::Disconnected;
                return;
            }
        }

        let policy = self.config.reconnect;
        if policy.is_exhausted(failures) {
            tracing::warn!(failures, "giving up on reconnection");
            self.state = ConnectionState::FailedPermanently;
            self.last_error = Some("maximum reconnection attempts reached".to_string());
            return;
        }

        let delay = policy.delay(failures);
        let timer = TimerId(self.next_id());
        self.pending_reconnect = Some(timer);
        self.state = ConnectionState::Reconnecting;
        tracing::info!(?code, attempt = failures, ?delay, "scheduling reconnect");
        out.push(Command::ScheduleReconnect {
            timer,
            delay,
            attempt: failures,
        });
    }

    fn on_error(&mut self, transport: TransportId, error: String) {
        if !self.is_current(transport) {
            tracing::debug!(%transport, %error, "stale error ignored");
            return;
        }
        tracing::warn!(%transport, %error, "transport error");
        self.last_error = Some(error);
    }

    fn on_frame(&mut self, transport: TransportId, frame: &Frame, received_at: u64) {
        if !self.is_current(transport) {
            tracing::debug!(%transport, "frame from stale transport ignored");
            return;
        }
        match parse_frame(frame, received_at) {
            Ok(raw) => self.store.dispatch(raw),
            Err(reason) => tracing::debug!(%reason, "frame discarded"),
        }
    }

    fn on_reconnect_due(&mut self, timer: TimerId, out: &mut Vec<Command>) {
        if self.pending_reconnect != Some(timer) || self.state != ConnectionState::Reconnecting {
            tracing::debug!(timer = timer.0, "stale reconnect timer ignored");
            return;
        }
        self.pending_reconnect = None;
        self.open(out);
    }

    fn on_heartbeat_due(&mut self, timer: TimerId, now: u64, out: &mut Vec<Command>) {
        if self.heartbeat != Some(timer) || self.state != ConnectionState::Connected {
            return;
        }
        let Some(transport) = self.transport else {
            return;
        };
        match serde_json::to_string(&OutboundMessage::Ping { timestamp: now }) {
            Ok(text) => out.push(Command::SendFrame { transport, text }),
            Err(e) => tracing::warn!(error = %e, "failed to encode ping"),
        }
    }

    fn cancel_reconnect(&mut self, out: &mut Vec<Command>) {
        if let Some(timer) = self.pending_reconnect.take() {
            out.push(Command::CancelReconnect { timer });
        }
    }

    fn disarm_heartbeat(&mut self, out: &mut Vec<Command>) {
        if let Some(timer) = self.heartbeat.take() {
            out.push(Command::DisarmHeartbeat { timer });
        }
    }

    fn is_current(&self, transport: TransportId) -> bool {
        self.transport == Some(transport)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}
