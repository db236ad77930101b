//! Events published to consumers.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::session::DeliveredMessage;

use super::core::Supervisor;
use super::types::{ModelUsage, ProcessStatus};

/// Events emitted by the supervisor
///
/// Consumers call [`Supervisor::subscribe()`] to receive these via a
/// `broadcast::Receiver`. Status/usage events and message batches come from
/// independent sources and carry no ordering relative to each other.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CoreEvent {
    /// Terminal output, cleaned up for display
    Output(String),

    /// Error description for display
    Error(String),

    /// The process status changed
    StatusChanged(ProcessStatus),

    /// One or more usage fields were updated (absent fields are unchanged)
    ModelUsageChanged(ModelUsage),

    /// New assistant messages, in conversation order
    Messages(Vec<DeliveredMessage>),
}

impl Supervisor {
    /// Subscribe to supervisor events.
    ///
    /// If the receiver falls behind, older events are dropped (lagged).
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_sender().subscribe()
    }
}
