//! Process launching over a pseudo-terminal.
//!
//! [`ProcessLauncher`] is the seam between the supervisor and the OS: the
//! native implementation opens a pty with `portable-pty`, tests substitute
//! an in-memory process.

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::PathBuf;

use crate::config::Settings;

/// Environment that keeps the agent from emitting colour codes
pub const NO_COLOR_ENV: &[(&str, &str)] = &[("NO_COLOR", "1"), ("FORCE_COLOR", "0"), ("CLICOLOR", "0")];

/// Everything needed to spawn the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable
    pub command: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory
    pub cwd: PathBuf,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Initial PTY rows
    pub rows: u16,
    /// Initial PTY columns
    pub cols: u16,
}

impl LaunchSpec {
    /// Build the launch spec for the configured agent
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            command: settings.command.clone(),
            args: settings.args.clone(),
            cwd: settings.resolved_workspace_root(),
            env: NO_COLOR_ENV
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            rows: settings.pty.rows,
            cols: settings.pty.cols,
        }
    }
}

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: u32,
    pub success: bool,
}

/// Control over a spawned child
pub trait ChildControl: Send {
    /// OS process id, if known
    fn pid(&self) -> Option<u32>;
    /// Non-blocking exit check
    fn try_wait(&mut self) -> std::io::Result<Option<ExitInfo>>;
    /// Terminate the child
    fn kill(&mut self) -> std::io::Result<()>;
}

/// A spawned process: pty output, pty input and child control
pub struct LaunchedProcess {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub child: Box<dyn ChildControl>,
}

/// Spawns the agent process
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedProcess>;
}

/// Launcher backed by the platform's native pty
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtyLauncher;

impl ProcessLauncher for NativePtyLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedProcess> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(&spec.command);
        cmd.args(&spec.args);
        cmd.cwd(&spec.cwd);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn {}", spec.command))?;
        // Only the child keeps the slave open, so the reader sees EOF on exit
        drop(pair.slave);

        tracing::debug!(
            "Spawned {} with PID {}",
            spec.command,
            child.process_id().unwrap_or(0)
        );

        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let writer = pair
            .master
            .take_writer()
            .context("Failed to take PTY writer")?;

        Ok(LaunchedProcess {
            reader,
            writer,
            child: Box::new(PtyChild {
                child,
                _master: pair.master,
            }),
        })
    }
}

/// Native child; owns the pty master so the terminal stays open
struct PtyChild {
    child: Box<dyn Child + Send + Sync>,
    _master: Box<dyn MasterPty + Send>,
}

impl ChildControl for PtyChild {
    fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    fn try_wait(&mut self) -> std::io::Result<Option<ExitInfo>> {
        Ok(self.child.try_wait()?.map(|status| ExitInfo {
            code: status.exit_code(),
            success: status.success(),
        }))
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill()
    }
}

/// Incremental UTF-8 decoding of pty reads
///
/// Keeps an incomplete trailing sequence for the next read instead of
/// turning it into replacement characters.
#[derive(Debug, Default)]
pub(crate) struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(s) => {
                let text = s.to_string();
                self.pending.clear();
                text
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                text
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory process for supervisor tests.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;

    /// Test-side handle to one stub process
    #[derive(Clone)]
    pub(crate) struct StubControl {
        output_tx: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>>,
        written: Arc<Mutex<Vec<u8>>>,
        exit: Arc<Mutex<Option<ExitInfo>>>,
        fail_writes: Arc<AtomicBool>,
        hold_writes: Arc<AtomicBool>,
        write_pending: Arc<AtomicBool>,
        killed: Arc<AtomicBool>,
    }

    impl StubControl {
        /// Make the stub print `text` on its terminal
        pub(crate) fn emit(&self, text: &str) {
            if let Some(tx) = self.output_tx.lock().as_ref() {
                let _ = tx.send(text.as_bytes().to_vec());
            }
        }

        /// Everything written to the stub's terminal so far
        pub(crate) fn written(&self) -> String {
            String::from_utf8_lossy(&self.written.lock()).into_owned()
        }

        /// Terminate the stub with an exit code
        pub(crate) fn exit(&self, code: u32) {
            *self.exit.lock() = Some(ExitInfo {
                code,
                success: code == 0,
            });
            self.output_tx.lock().take();
        }

        pub(crate) fn fail_writes(&self) {
            self.fail_writes.store(true, Ordering::SeqCst);
        }

        /// Make writes block until `release_writes`
        pub(crate) fn hold_writes(&self) {
            self.hold_writes.store(true, Ordering::SeqCst);
        }

        pub(crate) fn release_writes(&self) {
            self.hold_writes.store(false, Ordering::SeqCst);
        }

        /// Whether a write is blocked on `hold_writes`
        pub(crate) fn write_pending(&self) -> bool {
            self.write_pending.load(Ordering::SeqCst)
        }

        pub(crate) fn was_killed(&self) -> bool {
            self.killed.load(Ordering::SeqCst)
        }
    }

    /// Launcher producing stub processes
    #[derive(Default)]
    pub(crate) struct StubLauncher {
        pub(crate) fail: AtomicBool,
        launched: Mutex<Vec<(LaunchSpec, StubControl)>>,
    }

    impl StubLauncher {
        pub(crate) fn failing() -> Self {
            let launcher = Self::default();
            launcher.fail.store(true, Ordering::SeqCst);
            launcher
        }

        pub(crate) fn launch_count(&self) -> usize {
            self.launched.lock().len()
        }

        pub(crate) fn last(&self) -> StubControl {
            self.launched.lock().last().expect("nothing launched").1.clone()
        }

        pub(crate) fn last_spec(&self) -> LaunchSpec {
            self.launched.lock().last().expect("nothing launched").0.clone()
        }
    }

    impl ProcessLauncher for StubLauncher {
        fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedProcess> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("No such file or directory");
            }

            let (tx, rx) = mpsc::channel();
            let control = StubControl {
                output_tx: Arc::new(Mutex::new(Some(tx))),
                written: Arc::new(Mutex::new(Vec::new())),
                exit: Arc::new(Mutex::new(None)),
                fail_writes: Arc::new(AtomicBool::new(false)),
                hold_writes: Arc::new(AtomicBool::new(false)),
                write_pending: Arc::new(AtomicBool::new(false)),
                killed: Arc::new(AtomicBool::new(false)),
            };
            self.launched.lock().push((spec.clone(), control.clone()));

            Ok(LaunchedProcess {
                reader: Box::new(ChannelReader {
                    rx,
                    pending: Vec::new(),
                }),
                writer: Box::new(StubWriter {
                    control: control.clone(),
                }),
                child: Box::new(StubChild { control }),
            })
        }
    }

    struct ChannelReader {
        rx: mpsc::Receiver<Vec<u8>>,
        pending: Vec<u8>,
    }

    impl Read for ChannelReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pending.is_empty() {
                match self.rx.recv() {
                    Ok(bytes) => self.pending = bytes,
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    struct StubWriter {
        control: StubControl,
    }

    impl Write for StubWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            while self.control.hold_writes.load(Ordering::SeqCst) {
                self.control.write_pending.store(true, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            self.control.write_pending.store(false, Ordering::SeqCst);
            if self.control.fail_writes.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "pty closed",
                ));
            }
            self.control.written.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct StubChild {
        control: StubControl,
    }

    impl ChildControl for StubChild {
        fn pid(&self) -> Option<u32> {
            Some(4242)
        }

        fn try_wait(&mut self) -> std::io::Result<Option<ExitInfo>> {
            Ok(*self.control.exit.lock())
        }

        fn kill(&mut self) -> std::io::Result<()> {
            self.control.killed.store(true, Ordering::SeqCst);
            self.control.exit(143);
            Ok(())
        }
    }
}
