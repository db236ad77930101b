//! Status scanner for agent terminal output.
//!
//! The terminal stream carries no message boundaries, only a few literal
//! status lines. Each chunk is scanned on its own; a marker split across two
//! chunks is missed.

pub mod transform;

use crate::supervisor::ModelUsage;

pub use transform::{format_output, strip_ansi};

/// Prefix of the context window status line: `Session context: ▮ 42%`
pub const SESSION_CONTEXT_PREFIX: &str = "Session context:";
/// Prefix of the daily usage status line: `Daily total: ▮ 120k tokens`
pub const DAILY_TOTAL_PREFIX: &str = "Daily total:";
/// Prefix of the model announcement: `Using model: gpt-5`
pub const USING_MODEL_PREFIX: &str = "Using model:";
/// Glyph preceding the value on meter lines
pub const METER_GLYPH: char = '▮';
/// Case-insensitive substring meaning the agent accepts input
pub const INTERACTIVE_INDICATOR: &str = "using model";

/// Result of scanning one chunk of terminal output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Partial usage update (at most one field set)
    pub usage: Option<ModelUsage>,
    /// The chunk contains the interactive-mode indicator
    pub interactive: bool,
}

impl ScanOutcome {
    /// Whether the chunk carried no signal at all
    pub fn is_empty(&self) -> bool {
        self.usage.is_none() && !self.interactive
    }
}

/// Scan a chunk of terminal text for status markers
///
/// Usage markers are tried in priority order and the first match wins. The
/// interactive indicator is an independent check over the same chunk.
pub fn scan(chunk: &str) -> ScanOutcome {
    let plain = strip_ansi(chunk);
    ScanOutcome {
        usage: scan_usage(&plain),
        interactive: plain.to_lowercase().contains(INTERACTIVE_INDICATOR),
    }
}

fn scan_usage(plain: &str) -> Option<ModelUsage> {
    let lines: Vec<&str> = plain
        .lines()
        .map(|l| l.trim_end_matches('\r').trim_start())
        .collect();

    if let Some(rest) = find_prefixed(&lines, SESSION_CONTEXT_PREFIX) {
        return meter_value(rest).map(|v| ModelUsage {
            session_context_string: Some(v),
            ..Default::default()
        });
    }
    if let Some(rest) = find_prefixed(&lines, DAILY_TOTAL_PREFIX) {
        return meter_value(rest).map(|v| ModelUsage {
            token_usage_string: Some(v),
            ..Default::default()
        });
    }
    if let Some(rest) = find_prefixed(&lines, USING_MODEL_PREFIX) {
        let model = rest.trim();
        if model.is_empty() {
            return None;
        }
        return Some(ModelUsage {
            current_model: Some(model.to_string()),
            ..Default::default()
        });
    }
    None
}

/// Text following `prefix` on the first line that starts with it
fn find_prefixed<'a>(lines: &[&'a str], prefix: &str) -> Option<&'a str> {
    lines.iter().find_map(|line| line.strip_prefix(prefix))
}

/// Value of a meter line: skip the glyph and the character after it
fn meter_value(rest: &str) -> Option<String> {
    let value = match rest.find(METER_GLYPH) {
        Some(idx) => {
            let after = &rest[idx + METER_GLYPH.len_utf8()..];
            after.chars().skip(1).collect::<String>()
        }
        None => rest.to_string(),
    };
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
