//! Session state file written by the agent.
//!
//! The agent rewrites `<sessions_dir>/<session_id>/session_context.json` with
//! its full conversation after every turn. This module only reads it.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Full persisted state of one agent session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    /// Creation time of the session (Unix seconds)
    #[serde(default, alias = "created_at")]
    pub timestamp: Option<Value>,
    /// Ordered conversation history
    #[serde(default)]
    pub message_history: Vec<HistoryEntry>,
    /// Token usage summary
    #[serde(default)]
    pub usage: Option<UsageSummary>,
    /// Prompt the session was started with
    #[serde(default)]
    pub initial_prompt: Option<String>,
    /// Result of the latest run
    #[serde(default)]
    pub latest_result: Option<Value>,
    /// Workspace the agent was started in
    #[serde(default)]
    pub workspace_path: Option<String>,
}

impl SessionState {
    /// Parse a state document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse session state")
    }

    /// Creation time in Unix seconds, if present and numeric
    pub fn created_at_secs(&self) -> Option<f64> {
        self.timestamp
            .as_ref()
            .and_then(Value::as_f64)
            .filter(|secs| secs.is_finite())
    }

    /// Entries produced by the model, in history order
    pub fn responses(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.message_history
            .iter()
            .filter(|entry| entry.kind == EntryKind::Response)
    }
}

/// Who produced a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Sent to the model
    Request,
    /// Produced by the model
    Response,
    /// Any kind this version does not know about
    #[serde(other)]
    Other,
}

/// One entry of `message_history`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: EntryKind,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    /// Absent or unparseable timestamps leave the entry unordered
    #[serde(default, deserialize_with = "de_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    /// Text of every text part, in part order
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(MessagePart::text)
    }
}

/// One content part of a history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePart {
    pub part_kind: String,
    #[serde(default)]
    pub content: Option<Value>,
}

impl MessagePart {
    /// Part kind carrying displayable text
    pub const TEXT_KIND: &'static str = "text";

    /// The text content, for text parts with string content
    pub fn text(&self) -> Option<&str> {
        if self.part_kind != Self::TEXT_KIND {
            return None;
        }
        self.content.as_ref().and_then(Value::as_str)
    }
}

/// Token usage summary kept by the agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    #[serde(default)]
    pub requests: Option<u64>,
    #[serde(default)]
    pub request_tokens: Option<u64>,
    #[serde(default)]
    pub response_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

/// A located session: its id (directory name) and state file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionLocation {
    pub session_id: String,
    pub state_file: PathBuf,
}

/// One assistant text delivered to the consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredMessage {
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Read and parse a state file
pub fn read_state(path: &Path) -> Result<SessionState> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read session state: {:?}", path))?;
    SessionState::from_json(&content).with_context(|| format!("In {:?}", path))
}

/// Read and parse a state file without blocking the runtime
pub async fn read_state_async(path: &Path) -> Result<SessionState> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read session state: {:?}", path))?;
    SessionState::from_json(&content).with_context(|| format!("In {:?}", path))
}

/// Parse a timestamp given as RFC 3339 text or Unix seconds
///
/// Numbers are always seconds (fractional allowed), the same unit as the
/// session creation time.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            // Naive ISO timestamps are taken as UTC
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => n.as_f64().and_then(secs_to_datetime),
        _ => None,
    }
}

fn secs_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

fn de_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}
