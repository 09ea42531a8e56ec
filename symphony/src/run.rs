//! End-to-end run: clone, drive the agent stages, publish, tear down.
//!
//! Each configured stage renders its prompt, runs the agent through an
//! [`Executor`], charges the reported spend to the [`BudgetGuard`], and then
//! dispatches the agent's tool calls. A budget overrun stops the run before any
//! further paid work. Stage artifacts are written under
//! `<artifacts_dir>/<run_id>/<stage>/`, outside the working copy.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;
use serde_json::json;
use tracing::{info, info_span, instrument, warn};

use crate::core::budget::{BudgetError, BudgetGuard, BudgetSummary};
use crate::core::retry::Sleeper;
use crate::core::types::{LifecyclePolicy, PublishResult};
use crate::io::config::{StageConfig, SymphonyConfig};
use crate::io::executor::{AGENT_OUTPUT_SCHEMA, ExecRequest, Executor, execute_and_load};
use crate::io::github::PullRequestHost;
use crate::io::prompt::{PromptEngine, PromptInputs, StageSummary, ToolInfo};
use crate::io::workspace::{Workspace, WorkspaceManager, WorkspaceSettings, with_workspace};
use crate::publish::{PublishSettings, Publisher};
use crate::tools::{ToolContext, ToolRegistry};

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RunStop {
    Completed,
    BudgetExceeded { stage: String, limit: f64, total_spent: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub stages_completed: Vec<String>,
    /// Result of the last `create_pr` call, if any stage made one.
    pub publish: Option<PublishResult>,
    pub budget: BudgetSummary,
    pub stop: RunStop,
}

/// What to run and against which remote.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub idea: String,
    pub repo_url: String,
    pub token: String,
    pub policy: LifecyclePolicy,
}

/// Drives configured stages inside a workspace.
pub struct Driver<'a, E: ?Sized, H: ?Sized, S: ?Sized> {
    cfg: &'a SymphonyConfig,
    executor: &'a E,
    host: &'a H,
    sleeper: &'a S,
    budget: &'a BudgetGuard,
    tools: ToolRegistry,
    prompts: PromptEngine,
    artifacts_root: PathBuf,
}

impl<'a, E, H, S> Driver<'a, E, H, S>
where
    E: Executor + ?Sized,
    H: PullRequestHost + ?Sized,
    S: Sleeper + ?Sized,
{
    pub fn new(
        cfg: &'a SymphonyConfig,
        executor: &'a E,
        host: &'a H,
        sleeper: &'a S,
        budget: &'a BudgetGuard,
    ) -> Result<Self> {
        let artifacts_root = if cfg.workspace.artifacts_dir.is_absolute() {
            cfg.workspace.artifacts_dir.clone()
        } else {
            std::env::current_dir()
                .context("resolve current directory")?
                .join(&cfg.workspace.artifacts_dir)
        };
        Ok(Self {
            cfg,
            executor,
            host,
            sleeper,
            budget,
            tools: ToolRegistry::new(),
            prompts: PromptEngine::new()?,
            artifacts_root,
        })
    }

    /// Clone, run every stage, and tear the workspace down on every exit path.
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        let manager = WorkspaceManager::new(WorkspaceSettings::from_config(self.cfg));
        with_workspace(
            &manager,
            &request.repo_url,
            &request.token,
            request.policy,
            |workspace| self.run_in(workspace, &request.idea),
        )?
    }

    /// Run every stage against an existing workspace.
    #[instrument(skip_all, fields(root = %workspace.root().display()))]
    pub fn run_in(&self, workspace: &Workspace, idea: &str) -> Result<RunOutcome> {
        let run_id = generate_run_id();
        let run_dir = self.artifacts_root.join(&run_id);
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("create run dir {}", run_dir.display()))?;
        let schema_path = run_dir.join("agent_output.schema.json");
        fs::write(&schema_path, AGENT_OUTPUT_SCHEMA)
            .with_context(|| format!("write {}", schema_path.display()))?;
        info!(run_id = %run_id, "run started");

        let publisher = Publisher::new(
            workspace.repository(),
            self.host,
            self.sleeper,
            PublishSettings::from_config(&self.cfg.publish),
        );
        let files = workspace.files();
        let ctx = ToolContext {
            files: &files,
            publisher: &publisher,
        };
        let tool_infos: Vec<ToolInfo> = self.tools.list();

        let mut history: Vec<StageSummary> = Vec::new();
        let mut stages_completed = Vec::new();
        let mut publish = None;
        let mut stop = RunStop::Completed;

        for stage in &self.cfg.stages {
            let _span = info_span!("stage", name = %stage.name).entered();
            if self.budget.is_exhausted() {
                let state = self.budget.state();
                warn!("budget already exhausted, skipping remaining stages");
                stop = RunStop::BudgetExceeded {
                    stage: stage.name.clone(),
                    limit: state.budget_limit.unwrap_or_default(),
                    total_spent: state.total_spent,
                };
                break;
            }
            let stage_dir = run_dir.join(&stage.name);
            let request = self.stage_request(
                stage,
                workspace.root(),
                &stage_dir,
                &schema_path,
                &PromptInputs {
                    idea,
                    stage: &stage.name,
                    history: &history,
                    tools: &tool_infos,
                },
            )?;

            info!("running agent");
            let output = execute_and_load(self.executor, &request)
                .with_context(|| format!("stage {}", stage.name))?;

            match self.budget.add_cost(output.cost_usd) {
                Ok(()) => {}
                Err(BudgetError::Exceeded { limit, total_spent }) => {
                    warn!(limit, total_spent, "budget exceeded, stopping run");
                    stop = RunStop::BudgetExceeded {
                        stage: stage.name.clone(),
                        limit,
                        total_spent,
                    };
                    break;
                }
                Err(err) => return Err(err).with_context(|| format!("stage {}", stage.name)),
            }

            let mut tool_log = Vec::new();
            for call in &output.tool_calls {
                let outcome = self.tools.dispatch(call, &ctx);
                tool_log.push(json!({
                    "name": call.name,
                    "success": outcome.success,
                    "message": outcome.message,
                }));
                if let Some(result) = outcome.publish {
                    publish = Some(result);
                }
            }
            write_json(&stage_dir.join("tool_results.json"), &tool_log)?;

            history.push(StageSummary {
                stage: stage.name.clone(),
                summary: output.summary,
            });
            stages_completed.push(stage.name.clone());
        }

        let outcome = RunOutcome {
            run_id,
            stages_completed,
            publish,
            budget: self.budget.summary(),
            stop,
        };
        write_json(&run_dir.join("outcome.json"), &outcome)?;
        info!(stop = ?outcome.stop, "run finished");
        Ok(outcome)
    }

    fn stage_request(
        &self,
        stage: &StageConfig,
        workdir: &Path,
        stage_dir: &Path,
        schema_path: &Path,
        inputs: &PromptInputs<'_>,
    ) -> Result<ExecRequest> {
        fs::create_dir_all(stage_dir)
            .with_context(|| format!("create stage dir {}", stage_dir.display()))?;
        let prompt = self.prompts.render(&stage.prompt, inputs)?;
        let prompt_path = stage_dir.join("prompt.md");
        fs::write(&prompt_path, &prompt)
            .with_context(|| format!("write {}", prompt_path.display()))?;
        Ok(ExecRequest {
            workdir: workdir.to_path_buf(),
            prompt,
            output_schema_path: schema_path.to_path_buf(),
            output_path: stage_dir.join("output.json"),
            executor_log_path: stage_dir.join("executor.log"),
            timeout: Duration::from_secs(self.cfg.agent.timeout_secs),
            output_limit_bytes: self.cfg.agent.output_limit_bytes,
        })
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

fn generate_run_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(8)
        .collect::<String>()
        .to_lowercase();
    format!("run-{suffix}")
}
