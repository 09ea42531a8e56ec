//! Symphony CLI.
//!
//! Clones a repository into a workspace, lets agent stages change it, and
//! publishes the result as a pull request.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use symphony::core::budget::BudgetGuard;
use symphony::core::credential::CredentialedUrl;
use symphony::core::retry::ThreadSleeper;
use symphony::core::types::{LifecyclePolicy, PublishRequest};
use symphony::exit_codes;
use symphony::io::config::{Environment, SymphonyConfig, apply_env_overrides, load_config};
use symphony::io::executor::AgentCommandExecutor;
use symphony::io::git::Git;
use symphony::io::github::{GitHubClient, RepoSlug};
use symphony::logging::{self, LogFormat};
use symphony::publish::{Publish, PublishSettings, Publisher};
use symphony::run::{Driver, RunOutcome, RunRequest, RunStop};
use symphony::tools::ToolRegistry;
use symphony::worker::{EventQueue, spawn_worker};

const DEFAULT_CONFIG_PATH: &str = "symphony.toml";

#[derive(Parser)]
#[command(
    name = "symphony",
    version,
    about = "Turn an idea into a pull request with a pipeline of agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clone REPO_URL, run every agent stage on IDEA, and publish the result.
    Run {
        idea: String,
        /// Keep the working copy in the persistent debug directory.
        #[arg(long)]
        debug: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Publish the pending changes of an existing checkout as a pull request.
    Publish {
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Report missing required environment variables.
    CheckEnv,
    /// List the capabilities agents can call.
    Tools,
}

fn main() {
    match run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            idea,
            debug,
            config,
        } => cmd_run(idea, debug, &config),
        Command::Publish {
            title,
            body,
            workdir,
            config,
        } => {
            logging::init(LogFormat::from_env());
            cmd_publish(PublishRequest::new(title, body), workdir, &config)
        }
        Command::CheckEnv => cmd_check_env(),
        Command::Tools => {
            cmd_tools();
            Ok(exit_codes::OK)
        }
    }
}

fn load(config_path: &Path) -> Result<(SymphonyConfig, Environment)> {
    let env = Environment::from_env()?;
    let cfg = apply_env_overrides(load_config(config_path)?, &env)?;
    Ok((cfg, env))
}

fn github_client(cfg: &SymphonyConfig, repo_url: &str, token: &str) -> Result<GitHubClient> {
    let slug = RepoSlug::from_url(repo_url)
        .with_context(|| format!("cannot derive owner/repo from '{repo_url}'"))?;
    Ok(GitHubClient::new(
        &cfg.github.api_url,
        slug,
        token,
        cfg.network.timeout(),
    )?)
}

fn cmd_run(idea: String, debug: bool, config_path: &Path) -> Result<i32> {
    let queue = EventQueue::new();
    logging::init_queue(LogFormat::from_env(), queue.writer())?;

    let (cfg, env) = load(config_path)?;
    let (repo_url, token) = env.credentials()?;
    let request = RunRequest {
        idea,
        repo_url: repo_url.to_string(),
        token: token.to_string(),
        policy: LifecyclePolicy::from_debug(debug || env.debug_mode),
    };
    let budget = Arc::new(BudgetGuard::new(cfg.budget.limit_usd));

    let job_budget = Arc::clone(&budget);
    let worker = spawn_worker(queue, move || -> Result<RunOutcome> {
        let host = github_client(&cfg, &request.repo_url, &request.token)?;
        let executor = AgentCommandExecutor::new(cfg.agent.command.clone())?;
        let driver = Driver::new(&cfg, &executor, &host, &ThreadSleeper, &job_budget)?;
        info!(policy = ?request.policy, "starting run");
        driver.run(&request)
    })
    .context("spawn worker thread")?;

    let result = worker.wait_with(|line| eprintln!("{line}"));
    println!("{}", budget.format_summary());
    let outcome = result.map_err(anyhow::Error::msg)?;

    if let Some(publish) = &outcome.publish {
        println!("{publish}");
    }
    Ok(match (&outcome.stop, &outcome.publish) {
        (RunStop::BudgetExceeded { .. }, _) => exit_codes::BUDGET_EXCEEDED,
        (RunStop::Completed, Some(publish)) => exit_codes::for_publish(publish),
        (RunStop::Completed, None) => exit_codes::OK,
    })
}

fn cmd_publish(request: PublishRequest, workdir: PathBuf, config_path: &Path) -> Result<i32> {
    let (cfg, env) = load(config_path)?;
    let (repo_url, token) = env.credentials()?;
    let host = github_client(&cfg, repo_url, token)?;
    let git = Git::new(workdir)
        .with_identity(cfg.git.identity())
        .with_network_timeout(cfg.network.timeout())
        .with_secret(CredentialedUrl::new(repo_url, token));

    let publisher = Publisher::new(
        &git,
        &host,
        &ThreadSleeper,
        PublishSettings::from_config(&cfg.publish),
    );
    let result = publisher.publish(&request);
    println!("{result}");
    Ok(exit_codes::for_publish(&result))
}

fn cmd_check_env() -> Result<i32> {
    let missing = Environment::from_env()?.missing_required();
    if missing.is_empty() {
        println!("All required environment variables are set.");
        return Ok(exit_codes::OK);
    }
    for name in &missing {
        eprintln!("Missing required environment variable: {name}");
    }
    Ok(exit_codes::INVALID)
}

fn cmd_tools() {
    for tool in ToolRegistry::new().list() {
        println!("{}\t{}", tool.name, tool.description);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_debug() {
        let cli = Cli::parse_from(["symphony", "run", "add a login page", "--debug"]);
        match cli.command {
            Command::Run {
                idea,
                debug,
                config,
            } => {
                assert_eq!(idea, "add a login page");
                assert!(debug);
                assert_eq!(config, PathBuf::from(DEFAULT_CONFIG_PATH));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_publish_requires_title_and_body() {
        assert!(Cli::try_parse_from(["symphony", "publish", "--title", "t"]).is_err());
        let cli = Cli::parse_from([
            "symphony", "publish", "--title", "t", "--body", "b", "--workdir", "/tmp/x",
        ]);
        assert!(matches!(cli.command, Command::Publish { .. }));
    }

    #[test]
    fn parse_check_env_and_tools() {
        assert!(matches!(
            Cli::parse_from(["symphony", "check-env"]).command,
            Command::CheckEnv
        ));
        assert!(matches!(
            Cli::parse_from(["symphony", "tools"]).command,
            Command::Tools
        ));
    }
}
