//! Human-readable lines for snapshot changes.

use pulsewire_core::{ConnectionState, Snapshot};
use std::collections::HashSet;

pub fn status(snapshot: &Snapshot) -> String {
    let connection = &snapshot.connection;
    let mut line = format!("[{}]", state_label(connection.state));
    if connection.reconnect_attempt > 0 {
        line.push_str(&format!(" attempt {}", connection.reconnect_attempt));
    }
    if let Some(error) = &connection.last_error {
        line.push_str(&format!(" ({error})"));
    }
    line.push_str(&format!(
        " workflows={} unread={}",
        snapshot.workflow_updates.len(),
        snapshot.unread_count()
    ));
    line
}

fn state_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Reconnecting => "reconnecting",
        ConnectionState::FailedPermanently => "failed",
    }
}

/// Lines describing what changed from `before` to `after`.
pub fn changes(before: &Snapshot, after: &Snapshot) -> Vec<String> {
    let mut lines = Vec::new();

    if before.connection != after.connection {
        lines.push(status(after));
    }

    for record in &after.workflow_updates {
        let previous = before
            .workflow_updates
            .iter()
            .find(|r| r.session_id == record.session_id);
        if previous != Some(record) {
            let mut line = format!(
                "workflow {} {:?} {} {:.0}%",
                record.session_id, record.status, record.stage, record.progress_percent
            );
            if let Some(message) = &record.message {
                line.push_str(&format!(" - {message}"));
            }
            lines.push(line);
        }
    }

    // One change can cover a clear and new arrivals, so match by id.
    let known: HashSet<&str> = before.notifications.iter().map(|n| n.id.as_str()).collect();
    for record in after
        .notifications
        .iter()
        .rev()
        .filter(|n| !known.contains(n.id.as_str()))
    {
        lines.push(format!("notice {:?} {}: {}", record.kind, record.title, record.body));
    }

    if let Some(error) = &after.server_error {
        if before.server_error.as_ref() != Some(error) {
            lines.push(format!("server error: {}", error.message));
        }
    }

    lines
}
