//! Executor abstraction for agent invocation.
//!
//! The [`Executor`] trait decouples stage orchestration from the actual agent
//! backend (by default `codex exec`). Tests use scripted executors that write
//! predetermined outputs without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::types::AgentOutput;
use crate::io::process::{CommandOutput, StdoutMode, run_with_timeout};

/// JSON Schema every agent output must satisfy.
pub const AGENT_OUTPUT_SCHEMA: &str = include_str!("../../schemas/agent_output.schema.json");

/// Parameters for an executor invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Working directory for the agent process (the workspace root).
    pub workdir: PathBuf,
    /// Prompt text fed to the agent on stdin.
    pub prompt: String,
    /// Path to the JSON Schema that constrains agent output.
    pub output_schema_path: PathBuf,
    /// Path where the agent must write its output JSON.
    pub output_path: PathBuf,
    /// Path to write agent stdout/stderr log.
    pub executor_log_path: PathBuf,
    pub timeout: Duration,
    /// Truncate agent output logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Abstraction over agent execution backends.
pub trait Executor {
    /// Run the agent with the given request. Must write output to `request.output_path`.
    fn exec(&self, request: &ExecRequest) -> Result<()>;
}

/// Executor that spawns a configured command line.
///
/// `{output_path}`, `{schema_path}` and `{workdir}` in any argument are
/// replaced with the request's paths.
#[derive(Debug, Clone)]
pub struct AgentCommandExecutor {
    command: Vec<String>,
}

impl AgentCommandExecutor {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            bail!("agent command must be non-empty");
        }
        Ok(Self { command })
    }

    fn expand(&self, request: &ExecRequest) -> Vec<String> {
        let output = request.output_path.display().to_string();
        let schema = request.output_schema_path.display().to_string();
        let workdir = request.workdir.display().to_string();
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{output_path}", &output)
                    .replace("{schema_path}", &schema)
                    .replace("{workdir}", &workdir)
            })
            .collect()
    }
}

impl Executor for AgentCommandExecutor {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn exec(&self, request: &ExecRequest) -> Result<()> {
        let argv = self.expand(request);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("agent command must be non-empty"))?;
        info!(program = %program, workdir = %request.workdir.display(), "starting agent");

        if !request.output_schema_path.exists() {
            return Err(anyhow!(
                "missing output schema {}",
                request.output_schema_path.display()
            ));
        }
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);

        let output = run_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
            StdoutMode::Forward,
        )
        .with_context(|| format!("run {program}"))?;

        write_executor_log(&request.executor_log_path, &output)?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "agent timed out");
            return Err(anyhow!("{program} timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            return Err(anyhow!(
                "{program} failed with status {:?}",
                output.status.code()
            ));
        }

        debug!("agent completed successfully");
        Ok(())
    }
}

/// Execute the agent, then load and validate its output.
#[instrument(skip_all, fields(output_path = %request.output_path.display()))]
pub fn execute_and_load<E: Executor + ?Sized>(
    executor: &E,
    request: &ExecRequest,
) -> Result<AgentOutput> {
    executor.exec(request)?;
    if !request.output_path.exists() {
        return Err(anyhow!(
            "missing executor output {}",
            request.output_path.display()
        ));
    }
    let contents = fs::read_to_string(&request.output_path)
        .with_context(|| format!("read agent output {}", request.output_path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse {}", request.output_path.display()))?;
    validate_agent_output(&value)?;
    let output: AgentOutput =
        serde_json::from_value(value).context("decode agent output")?;
    debug!(
        cost_usd = output.cost_usd,
        tool_calls = output.tool_calls.len(),
        "parsed agent output"
    );
    Ok(output)
}

/// Validate a JSON value against the bundled agent output schema (Draft 2020-12).
pub fn validate_agent_output(instance: &Value) -> Result<()> {
    let schema: Value =
        serde_json::from_str(AGENT_OUTPUT_SCHEMA).context("parse agent output schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("agent output failed schema validation:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

fn write_executor_log(path: &Path, output: &CommandOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create executor log dir {}", parent.display()))?;
    }
    fs::write(path, output.render_log("agent"))
        .with_context(|| format!("write executor log {}", path.display()))
}
