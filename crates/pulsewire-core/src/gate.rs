//! Ready-made reconnect gates for [`Session::with_reconnect_gate`].
//!
//! [`Session::with_reconnect_gate`]: crate::Session::with_reconnect_gate

use crate::session::ReconnectGate;
use crate::store::StateStore;

/// Keep reconnecting only while some tracked workflow can still report.
///
/// A store with no workflows always reconnects.
pub fn until_workflows_settled() -> ReconnectGate {
    Box::new(|store: &StateStore| {
        let updates = store.workflow_updates();
        updates.is_empty() || updates.iter().any(|record| !record.status.is_terminal())
    })
}
