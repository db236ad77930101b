//! Process supervision.
//!
//! [`Supervisor`] owns the agent process and publishes [`CoreEvent`]s;
//! construct it with [`SupervisorBuilder`].

mod binding;
pub mod builder;
pub mod core;
pub mod events;
pub mod launcher;
pub mod types;

pub use builder::SupervisorBuilder;
pub use core::{StartOutcome, Supervisor};
pub use events::CoreEvent;
pub use launcher::{
    ChildControl, ExitInfo, LaunchSpec, LaunchedProcess, NativePtyLauncher, ProcessLauncher,
};
pub use types::{ModelUsage, ProcessStatus};
