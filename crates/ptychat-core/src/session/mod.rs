//! Session discovery and tailing.
//!
//! The agent persists each run under `<sessions_dir>/<session_id>/`. The
//! [`SessionLocator`] finds the session belonging to the supervised process
//! and the [`SessionTailer`] follows its state file.

pub mod locator;
pub mod state;
pub mod tailer;

pub use locator::{locate, SessionLocator};
pub use state::{
    read_state, read_state_async, DeliveredMessage, EntryKind, HistoryEntry, MessagePart,
    SessionLocation, SessionState, UsageSummary,
};
pub use tailer::{MessageListener, SessionTailer, TailerCursor, TailerHandle};
