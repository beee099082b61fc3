//! Consumer-facing handle.

use crate::config::ClientConfig;
use crate::driver::{Control, Driver};
use crate::error::ClientError;
use crate::transport;
use pulsewire_core::{ConnectionStatus, Event, Session, Snapshot};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Handle to a running connection.
///
/// Every operation returns immediately; outcomes show up in later snapshots.
/// Clones share one connection. When the last clone is dropped the
/// connection is closed and every timer cancelled, as with [`Client::dispose`].
#[derive(Clone)]
pub struct Client {
    control: mpsc::UnboundedSender<Control>,
    snapshots: watch::Receiver<Snapshot>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Client {
    /// Start a client on the current tokio runtime.
    pub fn spawn(config: ClientConfig) -> Self {
        let session = Session::new(config.session_config());
        Self::spawn_session(session, config.auto_connect)
    }

    /// Start a client around a prepared session, e.g. one with a reconnect gate.
    pub fn spawn_session(session: Session, auto_connect: bool) -> Self {
        transport::install_crypto_provider();
        let (control, requests) = mpsc::unbounded_channel();
        let (publisher, snapshots) = watch::channel(session.snapshot());
        let task = tokio::spawn(Driver::run(session, publisher, requests));

        let client = Self {
            control,
            snapshots,
            task: Arc::new(Mutex::new(Some(task))),
        };
        if auto_connect {
            client.connect();
        }
        client
    }

    /// Open the connection. No-op while connected or connecting.
    pub fn connect(&self) {
        self.submit(Event::Connect);
    }

    /// Close the connection with a normal closure. Never triggers a reconnect.
    pub fn disconnect(&self) {
        self.submit(Event::Disconnect);
    }

    /// Transmit a payload if connected; otherwise it is logged and dropped.
    pub fn send(&self, payload: Value) {
        self.submit(Event::Send(payload));
    }

    pub fn mark_notification_read(&self, id: impl Into<String>) {
        self.submit(Event::MarkNotificationRead(id.into()));
    }

    pub fn clear_all_notifications(&self) {
        self.submit(Event::ClearAllNotifications);
    }

    pub fn clear_server_error(&self) {
        self.submit(Event::ClearServerError);
    }

    /// Latest published state.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshots.borrow().connection.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.snapshots.borrow().connection.is_connected()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Disconnect, cancel every timer and wait for the driver to stop.
    pub async fn dispose(self) -> Result<(), ClientError> {
        let _ = self.control.send(Control::Shutdown);
        let task = self
            .task
            .lock()
            .ok()
            .and_then(|mut task| task.take())
            .ok_or(ClientError::DriverGone)?;
        task.await?;
        Ok(())
    }

    fn submit(&self, event: Event) {
        if self.control.send(Control::Event(event)).is_err() {
            tracing::debug!("client driver stopped, request ignored");
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.snapshots.borrow().connection)
            .finish_non_exhaustive()
    }
}
