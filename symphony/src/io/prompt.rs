//! Stage prompt rendering.
//!
//! Each stage prompt is the stage's own template followed by a fixed output
//! contract listing the reply format and the available capabilities.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

const CONTRACT_TEMPLATE: &str = include_str!("prompts/contract.md");

/// Summary left by a finished stage, fed to later stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    pub stage: String,
    pub summary: String,
}

/// Capability advertised in the output contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolInfo {
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub idea: &'a str,
    pub stage: &'a str,
    pub history: &'a [StageSummary],
    pub tools: &'a [ToolInfo],
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("contract", CONTRACT_TEMPLATE)
            .context("load contract template")?;
        Ok(Self { env })
    }

    /// Render `template` (a stage prompt) plus the output contract.
    pub fn render(&self, template: &str, input: &PromptInputs<'_>) -> Result<String> {
        let ctx = context! {
            idea => input.idea.trim(),
            stage => input.stage,
            history => input.history,
            tools => input.tools,
        };
        let body = self
            .env
            .render_str(template, &ctx)
            .with_context(|| format!("render prompt for stage {}", input.stage))?;
        let contract = self
            .env
            .get_template("contract")?
            .render(&ctx)
            .context("render output contract")?;

        let prompt = format!("{}\n{}", body.trim_end(), contract);
        debug!(stage = input.stage, prompt_bytes = prompt.len(), "rendered prompt");
        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::default_stages;

    const TOOLS: [ToolInfo; 1] = [ToolInfo {
        name: "create_pr",
        description: "Open a pull request",
    }];

    #[test]
    fn renders_idea_history_and_contract() {
        let engine = PromptEngine::new().expect("engine");
        let history = vec![StageSummary {
            stage: "product_manager".to_string(),
            summary: "Add a greeting endpoint".to_string(),
        }];
        let stages = default_stages();
        let developer = stages
            .iter()
            .find(|stage| stage.name == "developer")
            .expect("developer stage");

        let prompt = engine
            .render(
                &developer.prompt,
                &PromptInputs {
                    idea: "  say hello  ",
                    stage: "developer",
                    history: &history,
                    tools: &TOOLS,
                },
            )
            .expect("render");

        assert!(prompt.contains("say hello"));
        assert!(prompt.contains("- product_manager: Add a greeting endpoint"));
        assert!(prompt.contains("Stage: developer"));
        assert!(prompt.contains("`create_pr`: Open a pull request"));
    }

    #[test]
    fn first_stage_has_no_history_section() {
        let engine = PromptEngine::new().expect("engine");
        let prompt = engine
            .render(
                "Idea: {{ idea }}{% if history %} HISTORY{% endif %}",
                &PromptInputs {
                    idea: "x",
                    stage: "product_manager",
                    history: &[],
                    tools: &TOOLS,
                },
            )
            .expect("render");
        assert!(prompt.starts_with("Idea: x\n"));
        assert!(!prompt.contains("HISTORY"));
    }

    #[test]
    fn invalid_template_is_an_error() {
        let engine = PromptEngine::new().expect("engine");
        let err = engine
            .render(
                "{% if %}",
                &PromptInputs {
                    idea: "x",
                    stage: "broken",
                    history: &[],
                    tools: &[],
                },
            )
            .unwrap_err();
        assert!(format!("{err:#}").contains("stage broken"));
    }
}
