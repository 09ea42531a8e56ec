//! Symphony configuration: a TOML file overlaid with environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;
use crate::io::git::GitIdentity;
use crate::io::github::DEFAULT_API_URL;

const PRODUCT_MANAGER_PROMPT: &str = include_str!("prompts/product_manager.md");
const DEVELOPER_PROMPT: &str = include_str!("prompts/developer.md");
const REVIEWER_PROMPT: &str = include_str!("prompts/reviewer.md");

/// Symphony configuration (TOML).
///
/// Every section is optional; missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SymphonyConfig {
    pub workspace: WorkspaceConfig,
    pub publish: PublishConfig,
    pub network: NetworkConfig,
    pub github: GitHubConfig,
    pub budget: BudgetConfig,
    pub agent: AgentConfig,
    pub git: GitConfig,
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Fixed location used by the persistent (debug) policy.
    pub persistent_dir: PathBuf,
    /// Name prefix for ephemeral workspace directories.
    pub temp_prefix: String,
    /// Stage prompts, outputs and logs land here, never inside the working copy.
    pub artifacts_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            persistent_dir: PathBuf::from("workspace_debug"),
            temp_prefix: "symphony-".to_string(),
            artifacts_dir: PathBuf::from(".symphony/runs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublishConfig {
    pub remote: String,
    pub branch_prefix: String,
    pub commit_prefix: String,
    /// Attempts for push and PR creation, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            branch_prefix: "ai-symphony".to_string(),
            commit_prefix: "feat: ".to_string(),
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 10_000,
        }
    }
}

impl PublishConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Hard limit for each clone, push and API call.
    pub timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_url: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BudgetConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent command line. `{output_path}`, `{schema_path}` and `{workdir}`
    /// are substituted per stage; the prompt arrives on stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate agent stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: [
                "codex",
                "exec",
                "--sandbox",
                "workspace-write",
                "--skip-git-repo-check",
                "--output-schema",
                "{schema_path}",
                "--output-last-message",
                "{output_path}",
                "-",
            ]
            .map(str::to_string)
            .to_vec(),
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub user_name: String,
    pub user_email: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            user_name: "AI Symphony".to_string(),
            user_email: "symphony@localhost".to_string(),
        }
    }
}

impl GitConfig {
    pub fn identity(&self) -> GitIdentity {
        GitIdentity {
            name: self.user_name.clone(),
            email: self.user_email.clone(),
        }
    }
}

/// One agent stage: a name and the minijinja template for its prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    pub name: String,
    pub prompt: String,
}

impl StageConfig {
    fn new(name: &str, prompt: &str) -> Self {
        Self {
            name: name.to_string(),
            prompt: prompt.to_string(),
        }
    }
}

pub fn default_stages() -> Vec<StageConfig> {
    vec![
        StageConfig::new("product_manager", PRODUCT_MANAGER_PROMPT),
        StageConfig::new("developer", DEVELOPER_PROMPT),
        StageConfig::new("reviewer", REVIEWER_PROMPT),
    ]
}

impl Default for SymphonyConfig {
    fn default() -> Self {
        Self {
            workspace: WorkspaceConfig::default(),
            publish: PublishConfig::default(),
            network: NetworkConfig::default(),
            github: GitHubConfig::default(),
            budget: BudgetConfig::default(),
            agent: AgentConfig::default(),
            git: GitConfig::default(),
            stages: default_stages(),
        }
    }
}

impl SymphonyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.publish.max_attempts == 0 {
            return Err(anyhow!("publish.max_attempts must be > 0"));
        }
        if self.publish.base_delay_ms > self.publish.max_delay_ms {
            return Err(anyhow!(
                "publish.base_delay_ms must not exceed publish.max_delay_ms"
            ));
        }
        if self.publish.remote.trim().is_empty() {
            return Err(anyhow!("publish.remote must be non-empty"));
        }
        if self.network.timeout_secs == 0 {
            return Err(anyhow!("network.timeout_secs must be > 0"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if let Some(limit) = self.budget.limit_usd {
            if !limit.is_finite() || limit <= 0.0 {
                return Err(anyhow!("budget.limit_usd must be a positive number"));
            }
        }
        if self.workspace.temp_prefix.contains(['/', '\\']) {
            return Err(anyhow!("workspace.temp_prefix must not contain path separators"));
        }
        if self.stages.is_empty() {
            return Err(anyhow!("stages must list at least one stage"));
        }
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(anyhow!("stage names must be non-empty"));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SymphonyConfig::default()`.
pub fn load_config(path: &Path) -> Result<SymphonyConfig> {
    if !path.exists() {
        let cfg = SymphonyConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SymphonyConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Process environment relevant to a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    pub github_pat: Option<String>,
    pub repo_url: Option<String>,
    pub max_retries: Option<u32>,
    pub debug_mode: bool,
    pub budget_limit_usd: Option<f64>,
}

impl Environment {
    pub const REQUIRED: [&'static str; 2] = ["GITHUB_PAT", "REPO_URL"];

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let max_retries = get("MAX_RETRIES")
            .map(|raw| {
                raw.parse::<u32>()
                    .with_context(|| format!("parse MAX_RETRIES '{raw}'"))
            })
            .transpose()?;
        let budget_limit_usd = get("BUDGET_LIMIT_USD")
            .map(|raw| {
                raw.parse::<f64>()
                    .with_context(|| format!("parse BUDGET_LIMIT_USD '{raw}'"))
            })
            .transpose()?;
        let debug_mode = get("DEBUG_MODE")
            .is_some_and(|raw| raw.eq_ignore_ascii_case("true") || raw == "1");

        Ok(Self {
            github_pat: get("GITHUB_PAT"),
            repo_url: get("REPO_URL"),
            max_retries,
            debug_mode,
            budget_limit_usd,
        })
    }

    /// Required variables that are absent, in declaration order.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let present = [self.github_pat.is_some(), self.repo_url.is_some()];
        Self::REQUIRED
            .into_iter()
            .zip(present)
            .filter_map(|(name, set)| (!set).then_some(name))
            .collect()
    }

    /// `(repo_url, token)`, or an error naming what is missing.
    pub fn credentials(&self) -> Result<(&str, &str)> {
        match (self.repo_url.as_deref(), self.github_pat.as_deref()) {
            (Some(url), Some(token)) => Ok((url, token)),
            _ => Err(anyhow!(
                "missing required environment variables: {}",
                self.missing_required().join(", ")
            )),
        }
    }
}

/// Overlay environment values on top of the file config (environment wins).
pub fn apply_env_overrides(mut base: SymphonyConfig, env: &Environment) -> Result<SymphonyConfig> {
    if let Some(max_retries) = env.max_retries {
        base.publish.max_attempts = max_retries;
    }
    if let Some(limit) = env.budget_limit_usd {
        base.budget.limit_usd = Some(limit);
    }
    base.validate()?;
    Ok(base)
}
