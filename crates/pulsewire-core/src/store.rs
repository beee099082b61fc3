//! Derived views folded from inbound messages.

use crate::dispatch::{DiscardReason, classify};
use crate::message::{
    InboundMessage, Notification, NotificationAction, NotificationKind, RawMessage, ServerError,
    WorkflowStatus, WorkflowUpdate,
};
use serde::Serialize;
use serde_json::{Map, Value};

/// Latest known progress of one workflow session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowUpdateRecord {
    pub session_id: String,
    pub stage: String,
    pub progress_percent: f64,
    pub status: WorkflowStatus,
    pub message: Option<String>,
    pub extra: Map<String, Value>,
    pub updated_at: u64,
}

impl WorkflowUpdateRecord {
    fn new(update: WorkflowUpdate, received_at: u64) -> Self {
        Self {
            session_id: update.session_id,
            stage: update.stage.unwrap_or_default(),
            progress_percent: update.progress.map_or(0.0, clamp_progress),
            status: update.status.unwrap_or_default(),
            message: update.message,
            extra: update.extra,
            updated_at: received_at,
        }
    }

    fn merge(&mut self, update: WorkflowUpdate, received_at: u64) {
        if let Some(stage) = update.stage {
            self.stage = stage;
        }
        if let Some(progress) = update.progress {
            self.progress_percent = clamp_progress(progress);
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if update.message.is_some() {
            self.message = update.message;
        }
        self.extra.extend(update.extra);
        self.updated_at = received_at;
    }
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 100.0)
    }
}

/// One inbox entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub created_at: u64,
    pub is_read: bool,
    pub action: Option<NotificationAction>,
}

impl NotificationRecord {
    fn new(notification: Notification, received_at: u64) -> Self {
        Self {
            id: notification.id,
            kind: notification.kind,
            title: notification.title,
            body: notification.body,
            created_at: notification.created_at.unwrap_or(received_at),
            is_read: notification.is_read,
            action: notification.action,
        }
    }
}

/// Workflow progress, notification inbox, server error and last message.
///
/// Workflow records are server-authoritative: they only change through
/// [`StateStore::dispatch`]. The inbox also accepts read/clear mutations.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    workflow_updates: Vec<WorkflowUpdateRecord>,
    notifications: Vec<NotificationRecord>,
    server_error: Option<ServerError>,
    last_message: Option<RawMessage>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one parsed envelope into the views.
    ///
    /// The envelope becomes the last message whether or not its payload is
    /// understood.
    pub fn dispatch(&mut self, raw: RawMessage) {
        match classify(&raw) {
            Ok(message) => self.apply(message, raw.received_at),
            Err(DiscardReason::UnknownKind(kind)) => {
                tracing::trace!(%kind, "no view for message type");
            }
            Err(reason) => tracing::debug!(%reason, "payload discarded"),
        }
        self.last_message = Some(raw);
    }

    fn apply(&mut self, message: InboundMessage, received_at: u64) {
        match message {
            InboundMessage::WorkflowUpdate(update) => self.upsert_workflow(update, received_at),
            InboundMessage::Notification(notification) => {
                self.notifications
                    .insert(0, NotificationRecord::new(notification, received_at));
            }
            InboundMessage::Error(error) => {
                tracing::warn!(error = %error.message, code = ?error.code, "server reported error");
                self.server_error = Some(error);
            }
            InboundMessage::Ping { .. } | InboundMessage::Pong { .. } => {}
        }
    }

    fn upsert_workflow(&mut self, update: WorkflowUpdate, received_at: u64) {
        match self
            .workflow_updates
            .iter_mut()
            .find(|record| record.session_id == update.session_id)
        {
            Some(record) => record.merge(update, received_at),
            None => self
                .workflow_updates
                .push(WorkflowUpdateRecord::new(update, received_at)),
        }
    }

    /// Mark a notification read. Returns false if no record has that id.
    ///
    /// Ids are not deduplicated on insert, so every record with the id is marked.
    pub fn mark_notification_read(&mut self, id: &str) -> bool {
        let mut found = false;
        for record in self.notifications.iter_mut().filter(|r| r.id == id) {
            record.is_read = true;
            found = true;
        }
        found
    }

    pub fn clear_all_notifications(&mut self) {
        self.notifications.clear();
    }

    pub fn clear_server_error(&mut self) {
        self.server_error = None;
    }

    /// Workflow records in first-seen order.
    pub fn workflow_updates(&self) -> &[WorkflowUpdateRecord] {
        &self.workflow_updates
    }

    pub fn workflow(&self, session_id: &str) -> Option<&WorkflowUpdateRecord> {
        self.workflow_updates
            .iter()
            .find(|record| record.session_id == session_id)
    }

    /// Inbox, newest first.
    pub fn notifications(&self) -> &[NotificationRecord] {
        &self.notifications
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|r| !r.is_read).count()
    }

    pub fn server_error(&self) -> Option<&ServerError> {
        self.server_error.as_ref()
    }

    pub fn last_message(&self) -> Option<&RawMessage> {
        self.last_message.as_ref()
    }
}
