//! Per-lifetime session binding.
//!
//! The session file only exists after the agent has received input, so the
//! locator → tailer chain starts on the first successful send:
//!
//! ```text
//! Uninitialized ──first send──▶ Binding ──located──▶ Bound
//!                                  └──────timeout──▶ Unavailable
//! ```
//!
//! Process exit or `stop()` tears the binding down back to `Uninitialized`.

use std::sync::Arc;

use tokio::task::AbortHandle;

use crate::session::{SessionLocation, SessionTailer};

/// Session binding of one process lifetime
#[derive(Default)]
pub(crate) enum SessionBinding {
    /// Nothing sent yet
    #[default]
    Uninitialized,
    /// Locator running
    Binding { task: AbortHandle },
    /// Tailer following the located session
    Bound(Arc<SessionTailer>),
    /// Locator gave up; no messages for this lifetime
    Unavailable,
}

impl SessionBinding {
    /// Whether the first send should start binding
    pub(crate) fn is_uninitialized(&self) -> bool {
        matches!(self, SessionBinding::Uninitialized)
    }

    pub(crate) fn is_binding(&self) -> bool {
        matches!(self, SessionBinding::Binding { .. })
    }

    /// Location of the bound session
    pub(crate) fn location(&self) -> Option<&SessionLocation> {
        match self {
            SessionBinding::Bound(tailer) => Some(tailer.location()),
            _ => None,
        }
    }

    /// Tailer of the bound session
    pub(crate) fn tailer(&self) -> Option<&Arc<SessionTailer>> {
        match self {
            SessionBinding::Bound(tailer) => Some(tailer),
            _ => None,
        }
    }

    /// Cancel the locator or stop the tailer, resetting to `Uninitialized`
    pub(crate) fn teardown(&mut self) {
        match std::mem::take(self) {
            SessionBinding::Binding { task } => task.abort(),
            SessionBinding::Bound(tailer) => tailer.stop(),
            SessionBinding::Uninitialized | SessionBinding::Unavailable => {}
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            SessionBinding::Uninitialized => "uninitialized",
            SessionBinding::Binding { .. } => "binding",
            SessionBinding::Bound(_) => "bound",
            SessionBinding::Unavailable => "unavailable",
        }
    }
}
