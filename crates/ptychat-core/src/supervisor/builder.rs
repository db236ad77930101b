//! Builder for constructing a [`Supervisor`] instance.
//!
//! ```ignore
//! let supervisor = SupervisorBuilder::new(settings)
//!     .with_launcher(Arc::new(NativePtyLauncher))
//!     .build();
//! ```

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::config::Settings;

use super::core::Supervisor;
use super::launcher::{NativePtyLauncher, ProcessLauncher};

/// Builder for constructing a [`Supervisor`]
pub struct SupervisorBuilder {
    settings: Arc<Settings>,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    runtime: Option<Handle>,
}

impl SupervisorBuilder {
    /// Create a new builder with the given settings
    pub fn new(settings: Settings) -> Self {
        Self::from_shared_settings(Arc::new(settings))
    }

    /// Create a new builder from an already-shared settings
    pub fn from_shared_settings(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            launcher: None,
            runtime: None,
        }
    }

    /// Spawn processes with a custom launcher
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Run background tasks on the given runtime
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the `Supervisor`
    ///
    /// Defaults to the native pty launcher and the current Tokio runtime, so
    /// without `with_runtime` this must be called from within a runtime.
    pub fn build(self) -> Supervisor {
        let launcher = self
            .launcher
            .unwrap_or_else(|| Arc::new(NativePtyLauncher));
        let runtime = self.runtime.unwrap_or_else(Handle::current);

        Supervisor::new(self.settings, launcher, runtime)
    }
}
