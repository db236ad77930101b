//! Session tailer.
//!
//! The agent rewrites its whole state file on every turn, so the tailer
//! re-reads it on a fixed interval and delivers only the assistant texts it
//! has not delivered yet. Ordering and deduplication rely on the per-entry
//! timestamp: an entry is delivered only if its timestamp is strictly newer
//! than the newest one delivered so far.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::CoreError;

use serde_json::Value;

use super::state::{
    read_state_async, DeliveredMessage, SessionLocation, SessionState, UsageSummary,
};

/// Default interval between reads of the state file
pub const DEFAULT_TAIL_INTERVAL: Duration = Duration::from_secs(1);

/// Callback receiving each non-empty batch of delivered messages
pub type MessageListener = Arc<dyn Fn(&[DeliveredMessage]) + Send + Sync>;

/// Reconciliation state of a tailer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailerCursor {
    /// History length seen by the last poll that scanned entries
    pub history_len: Option<usize>,
    /// Timestamp of the newest delivered entry
    pub last_delivered: Option<DateTime<Utc>>,
}

enum RunState {
    Idle,
    Running { stop_tx: watch::Sender<bool> },
    Stopped { stop_tx: watch::Sender<bool> },
}

/// Handle to a tailer's polling lifetime
#[derive(Debug, Clone)]
pub struct TailerHandle {
    stopped: watch::Receiver<bool>,
}

impl TailerHandle {
    /// Whether the tailer has been stopped
    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Resolve once the tailer is stopped
    pub async fn stopped(mut self) {
        loop {
            let done = *self.stopped.borrow_and_update();
            if done || self.stopped.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Polls one session state file and emits new assistant messages
///
/// A tailer is single-use: its cursor is never reset, so following a new
/// session takes a new instance.
pub struct SessionTailer {
    location: SessionLocation,
    interval: Duration,
    cursor: Mutex<TailerCursor>,
    listeners: Mutex<Vec<MessageListener>>,
    run: Mutex<RunState>,
}

impl SessionTailer {
    /// Create a tailer for a located session
    pub fn new(location: SessionLocation, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            location,
            interval,
            cursor: Mutex::new(TailerCursor::default()),
            listeners: Mutex::new(Vec::new()),
            run: Mutex::new(RunState::Idle),
        })
    }

    /// The session this tailer follows
    pub fn location(&self) -> &SessionLocation {
        &self.location
    }

    /// Snapshot of the reconciliation cursor
    pub fn cursor(&self) -> TailerCursor {
        self.cursor.lock().clone()
    }

    /// Register a listener for future batches
    pub fn on_messages<F>(&self, listener: F)
    where
        F: Fn(&[DeliveredMessage]) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Start polling: one immediate poll, then one per interval
    ///
    /// Calling this again returns a handle to the same lifetime, also after
    /// the tailer was stopped.
    pub fn start(self: &Arc<Self>) -> TailerHandle {
        let mut run = self.run.lock();
        match &*run {
            RunState::Running { stop_tx } | RunState::Stopped { stop_tx } => {
                return TailerHandle {
                    stopped: stop_tx.subscribe(),
                };
            }
            RunState::Idle => {}
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = TailerHandle {
            stopped: stop_tx.subscribe(),
        };
        *run = RunState::Running { stop_tx };
        drop(run);

        tracing::debug!(
            "Tailing session {} every {:?}",
            self.location.session_id,
            self.interval
        );

        let tailer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tailer.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut failing = false;

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        match tailer.poll_once().await {
                            Ok(_) => failing = false,
                            Err(e) if !failing => {
                                tracing::warn!("{}", e);
                                failing = true;
                            }
                            Err(e) => tracing::debug!("{}", e),
                        }
                    }
                }
            }

            tracing::debug!("Stopped tailing session {}", tailer.location.session_id);
        });

        handle
    }

    /// Stop polling; idempotent
    pub fn stop(&self) {
        let mut run = self.run.lock();
        let next = match std::mem::replace(&mut *run, RunState::Idle) {
            RunState::Running { stop_tx } => {
                let _ = stop_tx.send(true);
                RunState::Stopped { stop_tx }
            }
            RunState::Idle => {
                let (stop_tx, _) = watch::channel(true);
                RunState::Stopped { stop_tx }
            }
            stopped @ RunState::Stopped { .. } => stopped,
        };
        *run = next;
    }

    /// Whether the polling loop is active
    pub fn is_running(&self) -> bool {
        matches!(*self.run.lock(), RunState::Running { .. })
    }

    /// Read the state file once and emit any new messages
    ///
    /// Returns the emitted batch (empty when nothing was new).
    pub async fn poll_once(&self) -> Result<Vec<DeliveredMessage>, CoreError> {
        let state = self.state().await?;

        let batch = self.ingest(&state);
        if !batch.is_empty() {
            tracing::debug!(
                "Session {}: delivering {} message(s)",
                self.location.session_id,
                batch.len()
            );
            self.emit(&batch);
        }
        Ok(batch)
    }

    /// Read the full session state
    pub async fn state(&self) -> Result<SessionState, CoreError> {
        read_state_async(&self.location.state_file)
            .await
            .map_err(|source| CoreError::SessionRead {
                path: self.location.state_file.clone(),
                source,
            })
    }

    /// Token usage summary recorded by the agent
    pub async fn usage(&self) -> Result<Option<UsageSummary>, CoreError> {
        Ok(self.state().await?.usage)
    }

    /// Prompt the session was started with
    pub async fn initial_prompt(&self) -> Result<Option<String>, CoreError> {
        Ok(self.state().await?.initial_prompt)
    }

    /// Result of the agent's latest run
    pub async fn latest_result(&self) -> Result<Option<Value>, CoreError> {
        Ok(self.state().await?.latest_result)
    }

    /// Advance the cursor over `state` and collect undelivered texts
    fn ingest(&self, state: &SessionState) -> Vec<DeliveredMessage> {
        let mut cursor = self.cursor.lock();

        let len = state.message_history.len();
        if cursor.history_len == Some(len) {
            return Vec::new();
        }
        cursor.history_len = Some(len);

        let mut batch = Vec::new();
        for entry in state.responses() {
            let Some(timestamp) = entry.timestamp else {
                continue;
            };
            if cursor.last_delivered.is_some_and(|last| timestamp <= last) {
                continue;
            }
            cursor.last_delivered = Some(timestamp);
            batch.extend(entry.texts().map(|text| DeliveredMessage {
                content: text.to_string(),
                timestamp: Some(timestamp),
            }));
        }
        batch
    }

    fn emit(&self, batch: &[DeliveredMessage]) {
        let listeners: Vec<MessageListener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::path::Path;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
    }

    fn response(timestamp: Option<DateTime<Utc>>, texts: &[&str]) -> Value {
        let parts: Vec<Value> = texts
            .iter()
            .map(|t| json!({"part_kind": "text", "content": t}))
            .collect();
        match timestamp {
            Some(t) => json!({"kind": "response", "parts": parts, "timestamp": t.to_rfc3339()}),
            None => json!({"kind": "response", "parts": parts}),
        }
    }

    fn request(text: &str) -> Value {
        json!({"kind": "request", "parts": [{"part_kind": "user-prompt", "content": text}]})
    }

    fn write_history(path: &Path, history: &[Value]) {
        let state = json!({"timestamp": 1_760_000_000, "message_history": history, "usage": {}});
        std::fs::write(path, state.to_string()).unwrap();
    }

    fn tailer_for(path: &Path, interval: Duration) -> Arc<SessionTailer> {
        SessionTailer::new(
            SessionLocation {
                session_id: "s1".to_string(),
                state_file: path.to_path_buf(),
            },
            interval,
        )
    }

    fn contents(batch: &[DeliveredMessage]) -> Vec<&str> {
        batch.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn test_delivers_each_message_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_context.json");
        let tailer = tailer_for(&path, DEFAULT_TAIL_INTERVAL);

        let mut history = vec![request("hello"), response(Some(ts(1)), &["hi", "there"])];
        write_history(&path, &history);
        let first = tailer.poll_once().await.unwrap();
        assert_eq!(contents(&first), vec!["hi", "there"]);
        assert_eq!(first[0].timestamp, Some(ts(1)));

        history.push(request("again"));
        history.push(response(Some(ts(2)), &["second"]));
        write_history(&path, &history);
        let second = tailer.poll_once().await.unwrap();
        assert_eq!(contents(&second), vec!["second"]);

        assert_eq!(
            tailer.cursor(),
            TailerCursor {
                history_len: Some(4),
                last_delivered: Some(ts(2)),
            }
        );
    }

    #[tokio::test]
    async fn test_unchanged_length_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_context.json");
        let tailer = tailer_for(&path, DEFAULT_TAIL_INTERVAL);

        write_history(&path, &[response(Some(ts(1)), &["one"])]);
        assert_eq!(tailer.poll_once().await.unwrap().len(), 1);

        // Same length, new content: not rescanned
        write_history(&path, &[response(Some(ts(5)), &["rewritten"])]);
        assert!(tailer.poll_once().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entries_without_timestamp_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_context.json");
        let tailer = tailer_for(&path, DEFAULT_TAIL_INTERVAL);

        write_history(
            &path,
            &[
                response(None, &["unordered"]),
                response(Some(ts(3)), &["ordered"]),
            ],
        );
        let batch = tailer.poll_once().await.unwrap();
        assert_eq!(contents(&batch), vec!["ordered"]);
    }

    #[tokio::test]
    async fn test_older_or_equal_timestamps_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_context.json");
        let tailer = tailer_for(&path, DEFAULT_TAIL_INTERVAL);

        write_history(&path, &[response(Some(ts(10)), &["latest"])]);
        tailer.poll_once().await.unwrap();

        write_history(
            &path,
            &[
                response(Some(ts(10)), &["latest"]),
                response(Some(ts(10)), &["same instant"]),
                response(Some(ts(4)), &["older"]),
                response(Some(ts(11)), &["newer"]),
            ],
        );
        let batch = tailer.poll_once().await.unwrap();
        assert_eq!(contents(&batch), vec!["newer"]);
    }

    #[tokio::test]
    async fn test_non_text_parts_are_not_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_context.json");
        let tailer = tailer_for(&path, DEFAULT_TAIL_INTERVAL);

        let entry = json!({
            "kind": "response",
            "timestamp": ts(1).to_rfc3339(),
            "parts": [
                {"part_kind": "tool-call", "tool_name": "read_file", "args": {"path": "a"}},
                {"part_kind": "text", "content": "read it"}
            ]
        });
        write_history(&path, &[entry]);
        assert_eq!(contents(&tailer.poll_once().await.unwrap()), vec!["read it"]);
    }

    #[tokio::test]
    async fn test_every_listener_receives_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_context.json");
        let tailer = tailer_for(&path, DEFAULT_TAIL_INTERVAL);

        let seen_a = Arc::new(Mutex::new(Vec::<Vec<DeliveredMessage>>::new()));
        let seen_b = Arc::new(Mutex::new(Vec::<Vec<DeliveredMessage>>::new()));
        let a = seen_a.clone();
        tailer.on_messages(move |batch| a.lock().push(batch.to_vec()));
        let b = seen_b.clone();
        tailer.on_messages(move |batch| b.lock().push(batch.to_vec()));

        write_history(&path, &[response(Some(ts(1)), &["x", "y"])]);
        tailer.poll_once().await.unwrap();
        tailer.poll_once().await.unwrap();

        assert_eq!(seen_a.lock().len(), 1);
        assert_eq!(seen_a.lock()[0].len(), 2);
        assert_eq!(*seen_a.lock(), *seen_b.lock());
    }

    #[tokio::test]
    async fn test_read_failure_reports_session_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_context.json");
        let tailer = tailer_for(&path, DEFAULT_TAIL_INTERVAL);

        assert!(matches!(
            tailer.poll_once().await,
            Err(CoreError::SessionRead { .. })
        ));
        std::fs::write(&path, "{ truncated").unwrap();
        assert!(tailer.poll_once().await.is_err());
        assert_eq!(tailer.cursor(), TailerCursor::default());
    }

    #[tokio::test]
    async fn test_polling_loop_recovers_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_context.json");
        let tailer = tailer_for(&path, Duration::from_millis(20));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tailer.on_messages(move |batch| {
            let _ = tx.send(batch.to_vec());
        });

        // File does not exist yet: polls fail and are retried
        let handle = tailer.start();
        assert!(tailer.is_running());
        tokio::time::sleep(Duration::from_millis(60)).await;

        write_history(&path, &[response(Some(ts(1)), &["late"])]);
        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("batch within timeout")
            .expect("channel open");
        assert_eq!(contents(&batch), vec!["late"]);

        tailer.stop();
        tailer.stop();
        assert!(!tailer.is_running());
        tokio::time::timeout(Duration::from_secs(1), handle.stopped())
            .await
            .expect("lifetime resolves after stop");

        // Restarting a stopped tailer returns the finished lifetime
        let again = tailer.start();
        assert!(again.is_stopped());
        assert!(!tailer.is_running());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_context.json");
        write_history(&path, &[response(Some(ts(1)), &["only"])]);
        let tailer = tailer_for(&path, Duration::from_millis(10));

        let count = Arc::new(Mutex::new(0usize));
        let c = count.clone();
        tailer.on_messages(move |batch| *c.lock() += batch.len());

        let first = tailer.start();
        let second = tailer.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        tailer.stop();

        assert_eq!(*count.lock(), 1);
        assert!(first.is_stopped());
        assert!(second.is_stopped());
    }

    #[tokio::test]
    async fn test_reads_auxiliary_session_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_context.json");
        let tailer = tailer_for(&path, DEFAULT_TAIL_INTERVAL);
        assert!(matches!(
            tailer.usage().await,
            Err(CoreError::SessionRead { .. })
        ));

        let state = json!({
            "timestamp": 1_760_000_000,
            "message_history": [],
            "usage": {"request_tokens": 120, "response_tokens": 30, "total_tokens": 150},
            "initial_prompt": "fix the build",
            "latest_result": "build fixed"
        });
        std::fs::write(&path, state.to_string()).unwrap();

        let usage = tailer.usage().await.unwrap().unwrap();
        assert_eq!(usage.total_tokens, Some(150));
        assert_eq!(
            tailer.initial_prompt().await.unwrap().as_deref(),
            Some("fix the build")
        );
        assert_eq!(
            tailer.latest_result().await.unwrap(),
            Some(json!("build fixed"))
        );
        // Reading the state never moves the cursor
        assert_eq!(tailer.cursor(), TailerCursor::default());
    }
}
