//! ptychat-core supervises an interactive agent process over a pty and
//! reconstructs its conversation from the session state file it rewrites.
//!
//! The [`Supervisor`](supervisor::Supervisor) is the entry point for
//! consumers: it accepts `start` / `send_message` / `stop` commands and
//! publishes [`CoreEvent`](supervisor::CoreEvent)s.

pub mod config;
pub mod error;
pub mod scanner;
pub mod session;
pub mod supervisor;

pub use error::CoreError;
