//! Error taxonomy for the supervision engine.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by core operations
///
/// None of these escape to the consumer as panics: the supervisor reports
/// them as [`CoreEvent::Error`](crate::supervisor::CoreEvent::Error) or logs
/// and swallows them at the layer that detects them.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The external process could not be spawned
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    /// Writing to the pty was rejected
    #[error("failed to write to process: {0}")]
    Write(#[source] std::io::Error),

    /// No process is running
    #[error("process is not running")]
    NotRunning,

    /// No session could be correlated with the process in time
    #[error("no session found in {} within {:.1}s", root.display(), elapsed.as_secs_f64())]
    LocateTimeout { root: PathBuf, elapsed: Duration },

    /// A session state file could not be read or parsed
    #[error("failed to read session state {}: {source}", path.display())]
    SessionRead {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}
