//! Shared deterministic types for publishing and agent runs.
//!
//! These types define stable contracts between components. They carry no I/O
//! handles and serialize deterministically.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a workspace lives and whether it survives teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePolicy {
    /// Unique temporary directory, deleted on teardown.
    Ephemeral,
    /// Fixed directory, purged on creation and kept after teardown.
    Persistent,
}

impl LifecyclePolicy {
    /// `Persistent` when debugging so the working copy can be inspected afterwards.
    pub fn from_debug(debug: bool) -> Self {
        if debug { Self::Persistent } else { Self::Ephemeral }
    }
}

/// Title and description for a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub title: String,
    pub body: String,
}

impl PublishRequest {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// Both fields must contain something other than whitespace.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("PR title cannot be empty".to_string());
        }
        if self.body.trim().is_empty() {
            return Err("PR body cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Terminal result of one publish attempt. Always returned as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PublishResult {
    Published {
        pull_request_url: String,
        branch: String,
    },
    NothingToPublish,
    Failed {
        reason: String,
    },
}

impl PublishResult {
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published { .. })
    }
}

impl fmt::Display for PublishResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Published {
                pull_request_url, ..
            } => write!(f, "PR created successfully: {pull_request_url}"),
            Self::NothingToPublish => {
                f.write_str("No changes detected in the workspace. Nothing to commit.")
            }
            Self::Failed { reason } => f.write_str(reason),
        }
    }
}

/// One capability invocation requested by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

/// Structured output produced by one agent stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub summary: String,
    /// Spend reported by the agent for this stage, in USD.
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_blank_title() {
        for title in ["", "   ", "\n\t"] {
            let err = PublishRequest::new(title, "body").validate().unwrap_err();
            assert!(err.contains("title") && err.contains("empty"));
        }
    }

    #[test]
    fn validate_rejects_blank_body() {
        let err = PublishRequest::new("title", "   \n\t  ").validate().unwrap_err();
        assert!(err.contains("body cannot be empty"));
    }

    #[test]
    fn validate_accepts_text() {
        assert!(PublishRequest::new("Add feature", "Adds it").validate().is_ok());
    }

    #[test]
    fn publish_result_serializes_with_tag() {
        let json = serde_json::to_value(PublishResult::Published {
            pull_request_url: "https://github.com/a/b/pull/1".to_string(),
            branch: "feature/x-00000001".to_string(),
        })
        .expect("json");
        assert_eq!(json["result"], "published");
        assert_eq!(json["pull_request_url"], "https://github.com/a/b/pull/1");
    }

    #[test]
    fn publish_result_messages() {
        assert_eq!(
            PublishResult::NothingToPublish.to_string(),
            "No changes detected in the workspace. Nothing to commit."
        );
        assert!(
            PublishResult::Published {
                pull_request_url: "u".to_string(),
                branch: "b".to_string()
            }
            .to_string()
            .starts_with("PR created successfully")
        );
    }

    #[test]
    fn agent_output_defaults_optional_fields() {
        let out: AgentOutput = serde_json::from_str(r#"{"summary":"ok"}"#).expect("parse");
        assert_eq!(out.cost_usd, 0.0);
        assert!(out.tool_calls.is_empty());
    }

    #[test]
    fn policy_from_debug_flag() {
        assert_eq!(LifecyclePolicy::from_debug(true), LifecyclePolicy::Persistent);
        assert_eq!(LifecyclePolicy::from_debug(false), LifecyclePolicy::Ephemeral);
    }
}
