//! Terminal rendering of supervisor events.

use chrono::Local;

use ptychat_core::session::{DeliveredMessage, SessionLocation};
use ptychat_core::supervisor::{CoreEvent, ModelUsage};

/// Where a rendered line should be printed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Stdout(String),
    Stderr(String),
}

impl Line {
    pub fn print(&self) {
        match self {
            Line::Stdout(text) => println!("{}", text),
            Line::Stderr(text) => eprintln!("{}", text),
        }
    }
}

/// Render an event for a human reader
pub fn render(event: &CoreEvent) -> Vec<Line> {
    match event {
        CoreEvent::Output(text) => vec![Line::Stdout(text.clone())],
        CoreEvent::Error(message) => vec![Line::Stderr(format!("error: {}", message))],
        CoreEvent::StatusChanged(status) => vec![Line::Stderr(format!("[{}]", status))],
        CoreEvent::ModelUsageChanged(usage) => render_usage(usage)
            .map(Line::Stderr)
            .into_iter()
            .collect(),
        CoreEvent::Messages(batch) => render_messages(batch)
            .into_iter()
            .map(Line::Stdout)
            .collect(),
    }
}

/// Render an event as one JSON line
pub fn render_json(event: &CoreEvent) -> Line {
    match serde_json::to_string(event) {
        Ok(json) => Line::Stdout(json),
        Err(e) => Line::Stderr(format!("error: failed to encode event: {}", e)),
    }
}

fn render_usage(usage: &ModelUsage) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(model) = &usage.current_model {
        parts.push(format!("model: {}", model));
    }
    if let Some(context) = &usage.session_context_string {
        parts.push(format!("context: {}", context));
    }
    if let Some(tokens) = &usage.token_usage_string {
        parts.push(format!("tokens: {}", tokens));
    }
    if parts.is_empty() {
        None
    } else {
        Some(format!("[{}]", parts.join(" | ")))
    }
}

/// One line per message, prefixed with its local time when known
pub fn render_messages(batch: &[DeliveredMessage]) -> Vec<String> {
    batch
        .iter()
        .map(|message| match message.timestamp {
            Some(ts) => format!(
                "{} assistant> {}",
                ts.with_timezone(&Local).format("%H:%M:%S"),
                message.content
            ),
            None => format!("assistant> {}", message.content),
        })
        .collect()
}

pub fn render_location(location: &SessionLocation) -> String {
    format!(
        "{}\t{}",
        location.session_id,
        location.state_file.display()
    )
}
