//! Status and usage types shared between the supervisor and its consumers.

use serde::{Deserialize, Serialize};

/// Lifecycle status of the supervised process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// No process has been started yet
    #[default]
    NotStarted,
    /// Spawned, waiting for the agent to announce its model
    Starting,
    /// Ready for input
    InteractiveMode,
    /// Input was sent and the reply has not arrived yet
    Busy,
    /// The process could not be started
    Error,
    /// The process exited or was stopped
    Stopped,
}

impl ProcessStatus {
    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            ProcessStatus::NotStarted => "Not started",
            ProcessStatus::Starting => "Starting",
            ProcessStatus::InteractiveMode => "Ready",
            ProcessStatus::Busy => "Busy",
            ProcessStatus::Error => "Error",
            ProcessStatus::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Model and token usage reported by the agent's status lines
///
/// Every field is independent: `None` means "unknown", never "cleared".
/// The same type carries partial updates (one field set) and the merged
/// cumulative view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Context window summary, e.g. `42%`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_context_string: Option<String>,
    /// Token usage summary from the `Daily total:` line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage_string: Option<String>,
    /// Name of the model currently in use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_model: Option<String>,
}

impl ModelUsage {
    /// Whether no field is known
    pub fn is_empty(&self) -> bool {
        self.session_context_string.is_none()
            && self.token_usage_string.is_none()
            && self.current_model.is_none()
    }

    /// Apply a partial update; fields absent from `update` are kept
    pub fn merge(&mut self, update: &ModelUsage) {
        if let Some(v) = &update.session_context_string {
            self.session_context_string = Some(v.clone());
        }
        if let Some(v) = &update.token_usage_string {
            self.token_usage_string = Some(v.clone());
        }
        if let Some(v) = &update.current_model {
            self.current_model = Some(v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ProcessStatus::InteractiveMode).unwrap();
        assert_eq!(json, "\"interactive_mode\"");
        let status: ProcessStatus = serde_json::from_str("\"not_started\"").unwrap();
        assert_eq!(status, ProcessStatus::NotStarted);
    }

    #[test]
    fn test_merge_keeps_unknown_fields() {
        let mut usage = ModelUsage {
            current_model: Some("gpt-5".to_string()),
            token_usage_string: Some("12k".to_string()),
            ..Default::default()
        };
        usage.merge(&ModelUsage {
            session_context_string: Some("42%".to_string()),
            ..Default::default()
        });

        assert_eq!(usage.current_model.as_deref(), Some("gpt-5"));
        assert_eq!(usage.token_usage_string.as_deref(), Some("12k"));
        assert_eq!(usage.session_context_string.as_deref(), Some("42%"));
    }

    #[test]
    fn test_partial_usage_serializes_only_known_fields() {
        let usage = ModelUsage {
            current_model: Some("gpt-5".to_string()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&usage).unwrap(),
            r#"{"current_model":"gpt-5"}"#
        );
        assert!(ModelUsage::default().is_empty());
    }

    #[test]
    fn test_usage_wire_names() {
        let usage = ModelUsage {
            session_context_string: Some("42%".to_string()),
            token_usage_string: Some("1k".to_string()),
            current_model: None,
        };
        assert_eq!(
            serde_json::to_string(&usage).unwrap(),
            r#"{"session_context_string":"42%","token_usage_string":"1k"}"#
        );
    }
}
