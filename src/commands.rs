//! Subcommand implementations.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use ptychat_core::config::Settings;
use ptychat_core::session::{SessionLocation, SessionLocator, SessionTailer};
use ptychat_core::supervisor::{CoreEvent, ProcessStatus, SupervisorBuilder};
use ptychat_core::CoreError;

use crate::console;

/// How long to wait for the final events after stopping
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Start the agent and relay stdin lines until EOF, Ctrl-C or process exit
pub async fn run_chat(settings: Settings, json: bool) -> Result<()> {
    let supervisor = SupervisorBuilder::new(settings).build();
    let mut events = supervisor.subscribe();

    // Printer: ends after the process stopped
    let mut printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let lines = if json {
                        vec![console::render_json(&event)]
                    } else {
                        console::render(&event)
                    };
                    for line in &lines {
                        line.print();
                    }
                    if event == CoreEvent::StatusChanged(ProcessStatus::Stopped) {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("Event printer lagged, dropped {} events", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    supervisor.start()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    tracing::debug!("stdin closed");
                    break;
                };
                match supervisor.send_message(&line) {
                    Ok(()) => {}
                    Err(CoreError::NotRunning) => break,
                    // Already reported as an event
                    Err(e) => tracing::debug!("Send failed: {}", e),
                }
            }
            _ = &mut ctrl_c => {
                tracing::debug!("Interrupted");
                break;
            }
            _ = &mut printer => return Ok(()),
        }
    }

    if !supervisor.stop() {
        tracing::warn!("Failed to terminate the agent");
    }
    let _ = tokio::time::timeout(DRAIN_TIMEOUT, printer).await;
    Ok(())
}

/// Locate the session created around now and print it
pub async fn run_locate(settings: Settings) -> Result<()> {
    let locator = SessionLocator::from_settings(&settings);
    tracing::info!("Looking for a new session in {}", locator.root().display());
    let location = locator.locate().await?;
    println!("{}", console::render_location(&location));
    Ok(())
}

/// Follow a state file and print new assistant messages until Ctrl-C
pub async fn run_tail(settings: Settings, path: PathBuf) -> Result<()> {
    let location = location_for(path);
    tracing::info!("Tailing {}", location.state_file.display());

    let tailer = SessionTailer::new(
        location,
        Duration::from_millis(settings.tailer.poll_interval_ms),
    );
    tailer.on_messages(|batch| {
        for line in console::render_messages(batch) {
            println!("{}", line);
        }
    });

    let handle = tailer.start();
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tailer.stop();
    handle.stopped().await;
    Ok(())
}

/// Session id is the name of the state file's parent directory
fn location_for(state_file: PathBuf) -> SessionLocation {
    let session_id = state_file
        .parent()
        .and_then(|p| p.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    SessionLocation {
        session_id,
        state_file,
    }
}
