//! Change publishing: commit, branch, push, open a pull request.
//!
//! One call to [`Publisher::publish`] walks
//! `validate -> dirty check -> commit -> branch -> push -> pull request`.
//! Push and pull request creation run under the [`RetryPolicy`]; every other
//! step runs once. Every outcome, including failure, comes back as a
//! [`PublishResult`].

use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::core::branch::generate_branch_name;
use crate::core::retry::{RetryFailure, RetryPolicy, Sleeper};
use crate::core::types::{PublishRequest, PublishResult};
use crate::io::config::PublishConfig;
use crate::io::git::{PushError, Repository};
use crate::io::github::{HostError, NewPullRequest, PullRequestHost};

/// Something that can turn pending workspace changes into a pull request.
pub trait Publish {
    fn publish(&self, request: &PublishRequest) -> PublishResult;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSettings {
    pub remote: String,
    pub branch_prefix: String,
    pub commit_prefix: String,
    pub retry: RetryPolicy,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self::from_config(&PublishConfig::default())
    }
}

impl PublishSettings {
    pub fn from_config(cfg: &PublishConfig) -> Self {
        Self {
            remote: cfg.remote.clone(),
            branch_prefix: cfg.branch_prefix.clone(),
            commit_prefix: cfg.commit_prefix.clone(),
            retry: cfg.retry_policy(),
        }
    }
}

/// Why a publish attempt stopped short of a pull request.
enum PipelineFailure {
    Local(anyhow::Error),
    Push(RetryFailure<PushError>),
    Host(RetryFailure<HostError>),
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(err) => write!(f, "Failed to create PR: {err:#}"),
            Self::Push(failure) => write_retry_failure(f, failure.attempts, &failure.error),
            Self::Host(failure) => write_retry_failure(f, failure.attempts, &failure.error),
        }
    }
}

fn write_retry_failure(
    f: &mut fmt::Formatter<'_>,
    attempts: u32,
    cause: &dyn fmt::Display,
) -> fmt::Result {
    let noun = if attempts == 1 { "attempt" } else { "attempts" };
    write!(f, "Failed to create PR after {attempts} {noun}: {cause}")
}

/// Publishes the pending changes of one working copy.
pub struct Publisher<'a, R: ?Sized, H: ?Sized, S: ?Sized> {
    repo: &'a R,
    host: &'a H,
    sleeper: &'a S,
    settings: PublishSettings,
}

impl<'a, R, H, S> Publisher<'a, R, H, S>
where
    R: Repository + ?Sized,
    H: PullRequestHost + ?Sized,
    S: Sleeper + ?Sized,
{
    pub fn new(repo: &'a R, host: &'a H, sleeper: &'a S, settings: PublishSettings) -> Self {
        Self {
            repo,
            host,
            sleeper,
            settings,
        }
    }

    fn run_pipeline(&self, request: &PublishRequest) -> Result<PublishResult, PipelineFailure> {
        if !self.repo.is_dirty().map_err(PipelineFailure::Local)? {
            info!("workspace clean, nothing to publish");
            return Ok(PublishResult::NothingToPublish);
        }

        let title = request.title.trim();
        self.repo.stage_all().map_err(PipelineFailure::Local)?;
        let message = format!("{}{title}", self.settings.commit_prefix);
        self.repo.commit(&message).map_err(PipelineFailure::Local)?;
        debug!(message = %message, "changes committed");

        let branch = generate_branch_name(&self.settings.branch_prefix, &mut rand::thread_rng());
        self.repo
            .create_branch(&branch)
            .map_err(PipelineFailure::Local)?;
        info!(branch = %branch, "branch created");

        let remote = self.settings.remote.as_str();
        self.settings
            .retry
            .run(self.sleeper, PushError::is_transient, |attempt| {
                debug!(attempt, "pushing branch");
                self.repo.push_branch(remote, &branch)
            })
            .map_err(PipelineFailure::Push)?;

        let url = self
            .settings
            .retry
            .run(self.sleeper, HostError::is_transient, |attempt| {
                debug!(attempt, "opening pull request");
                let base = self.host.default_branch()?;
                self.host.create_pull_request(&NewPullRequest {
                    title: title.to_string(),
                    body: request.body.clone(),
                    head: branch.clone(),
                    base,
                })
            })
            .map_err(PipelineFailure::Host)?;

        Ok(PublishResult::Published {
            pull_request_url: url,
            branch,
        })
    }
}

impl<R, H, S> Publish for Publisher<'_, R, H, S>
where
    R: Repository + ?Sized,
    H: PullRequestHost + ?Sized,
    S: Sleeper + ?Sized,
{
    #[instrument(skip_all)]
    fn publish(&self, request: &PublishRequest) -> PublishResult {
        if let Err(reason) = request.validate() {
            warn!(reason = %reason, "publish request rejected");
            return PublishResult::Failed { reason };
        }
        match self.run_pipeline(request) {
            Ok(result) => {
                info!(result = %result, "publish finished");
                result
            }
            Err(failure) => {
                let reason = failure.to_string();
                warn!(reason = %reason, "publish failed");
                PublishResult::Failed { reason }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSleeper, ScriptedHost, ScriptedRepository};
    use anyhow::anyhow;

    fn publish(repo: &ScriptedRepository, host: &ScriptedHost) -> PublishResult {
        let sleeper = RecordingSleeper::default();
        Publisher::new(repo, host, &sleeper, PublishSettings::default())
            .publish(&PublishRequest::new("Add greeting", "Adds a greeting"))
    }

    #[test]
    fn invalid_request_touches_nothing() {
        let repo = ScriptedRepository::dirty();
        let host = ScriptedHost::default();
        let sleeper = RecordingSleeper::default();
        let result = Publisher::new(&repo, &host, &sleeper, PublishSettings::default())
            .publish(&PublishRequest::new(" ", "body"));
        assert_eq!(
            result,
            PublishResult::Failed {
                reason: "PR title cannot be empty".to_string()
            }
        );
        assert!(repo.calls().is_empty());
        assert!(host.pull_requests().is_empty());
    }

    #[test]
    fn commit_uses_prefix_and_title() {
        let repo = ScriptedRepository::dirty();
        let host = ScriptedHost::default();
        assert!(publish(&repo, &host).is_published());
        assert!(repo.calls().contains(&"commit feat: Add greeting".to_string()));
    }

    #[test]
    fn local_failure_is_reported_without_retry() {
        let repo = ScriptedRepository::dirty().failing_commit(anyhow!("disk full"));
        let host = ScriptedHost::default();
        let result = publish(&repo, &host);
        assert_eq!(
            result,
            PublishResult::Failed {
                reason: "Failed to create PR: disk full".to_string()
            }
        );
        assert!(!repo.calls().iter().any(|c| c.starts_with("push")));
    }

    #[test]
    fn single_attempt_failure_uses_singular_noun() {
        let repo = ScriptedRepository::dirty()
            .with_push_results(vec![Err(ScriptedRepository::rejected_push())]);
        let host = ScriptedHost::default();
        let PublishResult::Failed { reason } = publish(&repo, &host) else {
            panic!("expected failure");
        };
        assert!(reason.starts_with("Failed to create PR after 1 attempt: "), "{reason}");
    }
}
