//! Session locator.
//!
//! The agent creates its session directory asynchronously after receiving
//! its first input, and nothing in it identifies the process that owns it.
//! The locator therefore polls the session root and correlates by the
//! state file's top-level `timestamp`: of the sessions created within
//! `match_tolerance` of now, the closest one wins.
//!
//! All timestamps are Unix **seconds**.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::Settings;
use crate::error::CoreError;

use super::state::{read_state, SessionLocation};

/// Default interval between directory scans
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Polls a session root directory for a session created around now
#[derive(Debug, Clone)]
pub struct SessionLocator {
    root: PathBuf,
    state_file_name: String,
    match_tolerance: Duration,
    timeout: Duration,
    poll_interval: Duration,
}

impl SessionLocator {
    /// Create a locator with explicit tolerance and timeout
    pub fn new(
        root: impl Into<PathBuf>,
        state_file_name: impl Into<String>,
        match_tolerance: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            state_file_name: state_file_name.into(),
            match_tolerance,
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Create a locator from application settings
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.resolved_sessions_dir(),
            settings.state_file_name.clone(),
            Duration::from_secs(settings.locator.match_tolerance_secs),
            Duration::from_secs(settings.locator.timeout_secs),
        )
        .with_poll_interval(Duration::from_millis(settings.locator.poll_interval_ms))
    }

    /// Override the scan interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Session root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Poll until a session matches or the timeout elapses
    ///
    /// The timeout is checked once per scan, so the elapsed time before
    /// failing may exceed it by up to one scan.
    pub async fn locate(&self) -> Result<SessionLocation, CoreError> {
        let started = Instant::now();
        tracing::debug!(
            "Locating session in {} (tolerance {:?}, timeout {:?})",
            self.root.display(),
            self.match_tolerance,
            self.timeout
        );

        loop {
            if let Some(location) = self.scan_in_background().await {
                tracing::info!(
                    "Located session {} after {:?}",
                    location.session_id,
                    started.elapsed()
                );
                return Ok(location);
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                return Err(CoreError::LocateTimeout {
                    root: self.root.clone(),
                    elapsed,
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Run one scan on the blocking pool
    async fn scan_in_background(&self) -> Option<SessionLocation> {
        let locator = self.clone();
        match tokio::task::spawn_blocking(move || locator.scan_once(unix_now_secs())).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("Session scan failed: {}", e);
                None
            }
        }
    }

    /// Scan the root once, returning the session closest to `now_secs`
    /// within the tolerance
    ///
    /// Missing or half-written state files are skipped: the agent may not
    /// have finished creating them yet.
    pub fn scan_once(&self, now_secs: f64) -> Option<SessionLocation> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Session root {} not readable: {}", self.root.display(), e);
                return None;
            }
        };

        let tolerance = self.match_tolerance.as_secs_f64();
        let mut best: Option<(f64, SessionLocation)> = None;

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let session_id = match path.file_name().and_then(|s| s.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };

            let state_file = path.join(&self.state_file_name);
            if !state_file.is_file() {
                continue;
            }

            let created_at = match read_state(&state_file) {
                Ok(state) => match state.created_at_secs() {
                    Some(secs) => secs,
                    None => continue,
                },
                Err(e) => {
                    tracing::debug!("Skipping session {}: {:#}", session_id, e);
                    continue;
                }
            };

            let delta = (now_secs - created_at).abs();
            if delta > tolerance {
                continue;
            }

            if best.as_ref().is_none_or(|(best_delta, _)| delta < *best_delta) {
                best = Some((
                    delta,
                    SessionLocation {
                        session_id,
                        state_file,
                    },
                ));
            }
        }

        best.map(|(_, location)| location)
    }
}

/// Locate a session under `root` using the default state file name
pub async fn locate(
    root: impl Into<PathBuf>,
    match_tolerance_secs: u64,
    timeout_secs: u64,
) -> Result<SessionLocation, CoreError> {
    SessionLocator::new(
        root,
        Settings::default().state_file_name,
        Duration::from_secs(match_tolerance_secs),
        Duration::from_secs(timeout_secs),
    )
    .locate()
    .await
}

/// Current time as fractional Unix seconds
pub(crate) fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
