//! Supervisor: the entry point for consumers (chat UI, CLI).
//!
//! Owns the agent's pty, drives the lifecycle state machine, scans terminal
//! output for status markers and wires the session locator and tailer.
//! Consumers send commands and receive [`CoreEvent`]s; they never see a
//! panic or an unhandled error.

use std::io::{Read, Write};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};

use crate::config::Settings;
use crate::error::CoreError;
use crate::scanner;
use crate::session::{
    DeliveredMessage, SessionLocation, SessionLocator, SessionTailer, UsageSummary,
};

use super::binding::SessionBinding;
use super::events::CoreEvent;
use super::launcher::{ChildControl, ExitInfo, LaunchSpec, ProcessLauncher, Utf8Carry};
use super::types::{ModelUsage, ProcessStatus};

/// Default broadcast channel capacity
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Size of a single pty read
const READ_BUFFER_SIZE: usize = 4096;

/// Result of a successful `start()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new process was spawned
    Started { pid: Option<u32> },
    /// A process was already running; nothing changed
    AlreadyRunning,
}

/// Events forwarded from the pty threads to the lifetime's pump task
enum PtyEvent {
    Output(String),
    Exited(Option<ExitInfo>),
}

/// The live process of one lifetime
struct ProcessHandle {
    generation: u64,
    pid: Option<u32>,
    /// Locked separately so a blocked write never holds `Inner`
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Arc<Mutex<Box<dyn ChildControl>>>,
}

struct Inner {
    status: ProcessStatus,
    handle: Option<ProcessHandle>,
    /// Incremented on every spawn; late callbacks compare against it
    generation: u64,
    binding: SessionBinding,
    usage: ModelUsage,
}

impl Inner {
    fn is_live(&self, generation: u64) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.generation == generation)
    }

    /// Set `status`, returning the event to emit if it changed
    fn transition(&mut self, status: ProcessStatus) -> Option<CoreEvent> {
        if self.status == status {
            return None;
        }
        tracing::debug!("Status {:?} -> {:?}", self.status, status);
        self.status = status;
        Some(CoreEvent::StatusChanged(status))
    }
}

pub(crate) struct Shared {
    settings: Arc<Settings>,
    launcher: Arc<dyn ProcessLauncher>,
    runtime: Handle,
    inner: Mutex<Inner>,
    event_tx: broadcast::Sender<CoreEvent>,
}

/// Supervisor of one agent process at a time
///
/// Cheap to clone; clones share the same process. Constructed via
/// [`SupervisorBuilder`](super::builder::SupervisorBuilder).
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    /// Create a new supervisor (prefer `SupervisorBuilder`)
    pub(crate) fn new(
        settings: Arc<Settings>,
        launcher: Arc<dyn ProcessLauncher>,
        runtime: Handle,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                settings,
                launcher,
                runtime,
                inner: Mutex::new(Inner {
                    status: ProcessStatus::NotStarted,
                    handle: None,
                    generation: 0,
                    binding: SessionBinding::Uninitialized,
                    usage: ModelUsage::default(),
                }),
                event_tx,
            }),
        }
    }

    fn from_weak(weak: &Weak<Shared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    /// Access application settings (read-only)
    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    pub(crate) fn event_sender(&self) -> &broadcast::Sender<CoreEvent> {
        &self.shared.event_tx
    }

    fn emit(&self, event: CoreEvent) {
        // No subscribers is fine
        let _ = self.shared.event_tx.send(event);
    }

    fn emit_all(&self, events: impl IntoIterator<Item = CoreEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    // =========================================================
    // Queries
    // =========================================================

    /// Whether a process is currently running
    pub fn is_running(&self) -> bool {
        self.shared.inner.lock().handle.is_some()
    }

    /// Current lifecycle status
    pub fn status(&self) -> ProcessStatus {
        self.shared.inner.lock().status
    }

    /// Usage fields collected so far
    pub fn model_usage(&self) -> ModelUsage {
        self.shared.inner.lock().usage.clone()
    }

    /// Session bound to the current process, once located
    pub fn session_location(&self) -> Option<SessionLocation> {
        self.shared.inner.lock().binding.location().cloned()
    }

    /// PID of the running process
    pub fn pid(&self) -> Option<u32> {
        self.shared.inner.lock().handle.as_ref().and_then(|h| h.pid)
    }

    fn bound_tailer(&self) -> Option<Arc<SessionTailer>> {
        self.shared.inner.lock().binding.tailer().cloned()
    }

    /// Token usage recorded in the bound session file
    ///
    /// `Ok(None)` until a session is bound.
    pub async fn session_usage(&self) -> Result<Option<UsageSummary>, CoreError> {
        match self.bound_tailer() {
            Some(tailer) => tailer.usage().await,
            None => Ok(None),
        }
    }

    /// Prompt the bound session was started with
    pub async fn initial_prompt(&self) -> Result<Option<String>, CoreError> {
        match self.bound_tailer() {
            Some(tailer) => tailer.initial_prompt().await,
            None => Ok(None),
        }
    }

    /// Result of the bound session's latest run
    pub async fn latest_result(&self) -> Result<Option<Value>, CoreError> {
        match self.bound_tailer() {
            Some(tailer) => tailer.latest_result().await,
            None => Ok(None),
        }
    }

    // =========================================================
    // Commands
    // =========================================================

    /// Spawn the agent
    ///
    /// Returns [`StartOutcome::AlreadyRunning`] without side effects when a
    /// process is already live. The status moves to `Starting` before the
    /// spawn; a spawn failure then moves it to `Error` and is also reported
    /// as [`CoreEvent::Error`].
    pub fn start(&self) -> Result<StartOutcome, CoreError> {
        let mut inner = self.shared.inner.lock();
        if inner.handle.is_some() {
            return Ok(StartOutcome::AlreadyRunning);
        }

        let spec = LaunchSpec::from_settings(&self.shared.settings);
        tracing::info!(
            "Starting {} {} in {}",
            spec.command,
            spec.args.join(" "),
            spec.cwd.display()
        );
        let mut events: Vec<CoreEvent> = inner
            .transition(ProcessStatus::Starting)
            .into_iter()
            .collect();

        let process = match self.shared.launcher.launch(&spec) {
            Ok(process) => process,
            Err(source) => {
                let error = CoreError::Spawn {
                    command: spec.command,
                    source,
                };
                tracing::error!("{:#}", error);
                events.extend(inner.transition(ProcessStatus::Error));
                drop(inner);
                events.push(CoreEvent::Error(error.to_string()));
                self.emit_all(events);
                return Err(error);
            }
        };

        inner.generation += 1;
        let generation = inner.generation;
        let pid = process.child.pid();
        let child = Arc::new(Mutex::new(process.child));

        inner.handle = Some(ProcessHandle {
            generation,
            pid,
            writer: Arc::new(Mutex::new(process.writer)),
            child: child.clone(),
        });
        inner.binding = SessionBinding::Uninitialized;
        drop(inner);

        self.spawn_io(generation, process.reader, child);
        self.emit_all(events);

        Ok(StartOutcome::Started { pid })
    }

    /// Send one line of input to the agent
    ///
    /// Fails with [`CoreError::NotRunning`] (and no events) when nothing is
    /// running. The first successful send of a lifetime starts looking for
    /// the session file.
    pub fn send_message(&self, text: &str) -> Result<(), CoreError> {
        let (generation, writer) = {
            let inner = self.shared.inner.lock();
            let Some(handle) = inner.handle.as_ref() else {
                return Err(CoreError::NotRunning);
            };
            (handle.generation, handle.writer.clone())
        };

        let payload = format!("{}\r", text);
        let written = {
            let mut writer = writer.lock();
            writer
                .write_all(payload.as_bytes())
                .and_then(|_| writer.flush())
        };
        if let Err(e) = written {
            let error = CoreError::Write(e);
            tracing::warn!("{}", error);
            self.emit(CoreEvent::Error(error.to_string()));
            return Err(error);
        }

        let mut inner = self.shared.inner.lock();
        if !inner.is_live(generation) {
            tracing::debug!("Process ended while input was being written");
            return Ok(());
        }

        let mut events = Vec::new();
        if inner.status == ProcessStatus::InteractiveMode {
            events.extend(inner.transition(ProcessStatus::Busy));
        }

        if inner.binding.is_uninitialized() {
            let task = self.spawn_binding(generation);
            inner.binding = SessionBinding::Binding { task };
        }
        drop(inner);

        self.emit_all(events);
        Ok(())
    }

    /// Terminate the running process
    ///
    /// Returns whether termination succeeded; with no process this is an
    /// immediate success. Never fails.
    pub fn stop(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        let Some(handle) = inner.handle.take() else {
            return true;
        };

        let killed = match handle.child.lock().kill() {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Failed to kill process: {}", e);
                false
            }
        };
        tracing::info!(
            "Stopped process (pid {})",
            handle.pid.map_or("?".to_string(), |p| p.to_string())
        );

        inner.binding.teardown();
        let status_event = inner.transition(ProcessStatus::Stopped);
        drop(inner);

        self.emit_all(status_event);
        killed
    }

    // =========================================================
    // Process I/O
    // =========================================================

    /// Start the pty reader and exit watcher threads and the pump task
    fn spawn_io(
        &self,
        generation: u64,
        mut reader: Box<dyn Read + Send>,
        child: Arc<Mutex<Box<dyn ChildControl>>>,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel::<PtyEvent>();

        // Thread: Read from PTY master -> pump
        let output_tx = tx.clone();
        thread::spawn(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            let mut carry = Utf8Carry::default();
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break, // EOF
                    Ok(n) => {
                        let text = carry.decode(&buf[..n]);
                        if !text.is_empty() && output_tx.send(PtyEvent::Output(text)).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::debug!("PTY read error: {}", e);
                        break;
                    }
                }
            }
        });

        // Thread: Periodic exit check -> pump
        let exit_interval = Duration::from_millis(self.shared.settings.pty.exit_poll_interval_ms);
        thread::spawn(move || loop {
            let result = child.lock().try_wait();
            match result {
                Ok(Some(exit)) => {
                    let _ = tx.send(PtyEvent::Exited(Some(exit)));
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!("Failed to check process status: {}", e);
                    let _ = tx.send(PtyEvent::Exited(None));
                    return;
                }
            }
            if tx.is_closed() {
                return;
            }
            thread::sleep(exit_interval);
        });

        let weak = Arc::downgrade(&self.shared);
        self.shared.runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(supervisor) = Supervisor::from_weak(&weak) else {
                    break;
                };
                match event {
                    PtyEvent::Output(text) => supervisor.handle_output(generation, &text),
                    PtyEvent::Exited(exit) => supervisor.handle_exit(generation, exit),
                }
            }
        });
    }

    /// Scan and forward one chunk of terminal output
    fn handle_output(&self, generation: u64, raw: &str) {
        let display = scanner::format_output(raw);
        let outcome = scanner::scan(raw);

        let mut events = Vec::new();
        {
            let mut inner = self.shared.inner.lock();
            if inner.generation != generation {
                return;
            }
            if !display.is_empty() {
                events.push(CoreEvent::Output(display));
            }
            // Trailing output of an exited process is shown but never
            // revives its status
            if inner.is_live(generation) && !outcome.is_empty() {
                if let Some(update) = outcome.usage {
                    inner.usage.merge(&update);
                    events.push(CoreEvent::ModelUsageChanged(update));
                }
                if outcome.interactive {
                    events.extend(inner.transition(ProcessStatus::InteractiveMode));
                }
            }
        }
        self.emit_all(events);
    }

    /// Tear down after the process exited on its own
    fn handle_exit(&self, generation: u64, exit: Option<ExitInfo>) {
        let mut inner = self.shared.inner.lock();
        if !inner.is_live(generation) {
            tracing::debug!("Ignoring exit of superseded process (generation {})", generation);
            return;
        }

        match exit {
            Some(info) if info.success => tracing::info!("Process exited"),
            Some(info) => tracing::warn!("Process exited with code {}", info.code),
            None => tracing::warn!("Process exited with unknown status"),
        }

        inner.handle = None;
        inner.binding.teardown();
        let status_event = inner.transition(ProcessStatus::Stopped);
        drop(inner);

        self.emit_all(status_event);
    }

    // =========================================================
    // Session binding
    // =========================================================

    /// Run the locator for `generation` in the background
    fn spawn_binding(&self, generation: u64) -> tokio::task::AbortHandle {
        let locator = SessionLocator::from_settings(&self.shared.settings);
        let weak = Arc::downgrade(&self.shared);

        let task = self.shared.runtime.spawn(async move {
            let result = locator.locate().await;
            let Some(supervisor) = Supervisor::from_weak(&weak) else {
                return;
            };
            match result {
                Ok(location) => supervisor.attach_tailer(generation, location),
                Err(e) => {
                    tracing::warn!("Session messages unavailable for this run: {}", e);
                    supervisor.mark_unavailable(generation);
                }
            }
        });
        task.abort_handle()
    }

    /// Bind the located session and start tailing it
    fn attach_tailer(&self, generation: u64, location: SessionLocation) {
        let interval = Duration::from_millis(self.shared.settings.tailer.poll_interval_ms);
        let tailer = SessionTailer::new(location, interval);

        let weak = Arc::downgrade(&self.shared);
        tailer.on_messages(move |batch| {
            if let Some(supervisor) = Supervisor::from_weak(&weak) {
                supervisor.handle_messages(generation, batch);
            }
        });

        let mut inner = self.shared.inner.lock();
        if !inner.is_live(generation) || !inner.binding.is_binding() {
            tracing::debug!("Discarding session located for a finished process");
            return;
        }

        tracing::info!(
            "Following session {} ({})",
            tailer.location().session_id,
            tailer.location().state_file.display()
        );
        tailer.start();
        inner.binding = SessionBinding::Bound(tailer);
    }

    fn mark_unavailable(&self, generation: u64) {
        let mut inner = self.shared.inner.lock();
        if inner.is_live(generation) && inner.binding.is_binding() {
            inner.binding = SessionBinding::Unavailable;
        }
    }

    /// Forward a tailer batch; a reply ends the busy state
    fn handle_messages(&self, generation: u64, batch: &[DeliveredMessage]) {
        let status_event = {
            let mut inner = self.shared.inner.lock();
            if !inner.is_live(generation) {
                return;
            }
            if inner.status == ProcessStatus::Busy {
                inner.transition(ProcessStatus::InteractiveMode)
            } else {
                None
            }
        };

        self.emit(CoreEvent::Messages(batch.to_vec()));
        self.emit_all(status_event);
    }

    #[cfg(test)]
    pub(crate) fn binding_name(&self) -> &'static str {
        self.shared.inner.lock().binding.name()
    }
}
