//! Publish pipeline scenarios against scripted adapters and a real local remote.

use std::time::Duration;

use regex::Regex;
use symphony::core::retry::{RetryPolicy, ThreadSleeper};
use symphony::core::types::{PublishRequest, PublishResult};
use symphony::io::git::Repository;
use symphony::publish::{Publish, PublishSettings, Publisher};
use symphony::test_support::{
    DEFAULT_PR_URL, GitFixture, RecordingSleeper, ScriptedHost, ScriptedRepository,
};

fn request() -> PublishRequest {
    PublishRequest::new("Add greeting", "Adds a greeting to the README.")
}

fn publish_with(
    repo: &ScriptedRepository,
    host: &ScriptedHost,
    sleeper: &RecordingSleeper,
) -> PublishResult {
    Publisher::new(repo, host, sleeper, PublishSettings::default()).publish(&request())
}

#[test]
fn empty_title_fails_before_any_side_effect() {
    let repo = ScriptedRepository::dirty();
    let host = ScriptedHost::default();
    let sleeper = RecordingSleeper::default();

    let result = Publisher::new(&repo, &host, &sleeper, PublishSettings::default())
        .publish(&PublishRequest::new("", "valid"));

    let PublishResult::Failed { reason } = result else {
        panic!("expected failure, got {result:?}");
    };
    assert!(reason.contains("title") && reason.contains("empty"), "{reason}");
    assert!(repo.calls().is_empty());
    assert_eq!(host.default_branch_calls(), 0);
    assert!(host.pull_requests().is_empty());
}

#[test]
fn whitespace_body_fails_before_any_side_effect() {
    let repo = ScriptedRepository::dirty();
    let host = ScriptedHost::default();
    let sleeper = RecordingSleeper::default();

    let result = Publisher::new(&repo, &host, &sleeper, PublishSettings::default())
        .publish(&PublishRequest::new("Title", " \n\t "));

    assert_eq!(
        result,
        PublishResult::Failed {
            reason: "PR body cannot be empty".to_string()
        }
    );
    assert!(repo.calls().is_empty());
}

#[test]
fn clean_workspace_publishes_nothing() {
    let repo = ScriptedRepository::clean();
    let host = ScriptedHost::default();
    let sleeper = RecordingSleeper::default();

    let result = publish_with(&repo, &host, &sleeper);

    assert_eq!(result, PublishResult::NothingToPublish);
    assert_eq!(repo.calls(), vec!["is_dirty".to_string()]);
    assert!(host.pull_requests().is_empty());
}

#[test]
fn happy_path_runs_every_step_in_order() {
    let repo = ScriptedRepository::dirty();
    let host = ScriptedHost::default().with_default_branch("trunk");
    let sleeper = RecordingSleeper::default();

    let result = publish_with(&repo, &host, &sleeper);

    let PublishResult::Published {
        pull_request_url,
        branch,
    } = result
    else {
        panic!("expected publish, got {result:?}");
    };
    assert_eq!(pull_request_url, DEFAULT_PR_URL);
    let pattern = Regex::new(r"^feature/ai-symphony-[0-9a-f]{8}$").expect("regex");
    assert!(pattern.is_match(&branch), "{branch}");

    assert_eq!(
        repo.calls(),
        vec![
            "is_dirty".to_string(),
            "stage_all".to_string(),
            "commit feat: Add greeting".to_string(),
            format!("create_branch {branch}"),
            format!("push origin {branch}"),
        ]
    );
    let prs = host.pull_requests();
    assert_eq!(prs.len(), 1);
    assert_eq!(prs[0].title, "Add greeting");
    assert_eq!(prs[0].body, "Adds a greeting to the README.");
    assert_eq!(prs[0].head, branch);
    assert_eq!(prs[0].base, "trunk");
    assert!(sleeper.waits().is_empty());
}

#[test]
fn transient_push_failures_are_retried_with_backoff() {
    let repo = ScriptedRepository::dirty().with_push_results(vec![
        Err(ScriptedRepository::transient_push()),
        Err(ScriptedRepository::transient_push()),
        Ok(()),
    ]);
    let host = ScriptedHost::default();
    let sleeper = RecordingSleeper::default();

    let result = publish_with(&repo, &host, &sleeper);

    assert!(result.is_published(), "{result:?}");
    assert_eq!(repo.push_count(), 3);
    assert_eq!(
        sleeper.waits(),
        vec![Duration::from_secs(2), Duration::from_secs(4)]
    );
    assert_eq!(host.pull_requests().len(), 1);
}

#[test]
fn exhausted_push_retries_fail_without_pull_request() {
    let repo = ScriptedRepository::dirty().with_push_results(vec![
        Err(ScriptedRepository::transient_push()),
        Err(ScriptedRepository::transient_push()),
        Err(ScriptedRepository::transient_push()),
    ]);
    let host = ScriptedHost::default();
    let sleeper = RecordingSleeper::default();

    let result = publish_with(&repo, &host, &sleeper);

    let PublishResult::Failed { reason } = result else {
        panic!("expected failure, got {result:?}");
    };
    assert!(reason.contains("3 attempts"), "{reason}");
    assert!(reason.contains("Could not resolve host"), "{reason}");
    assert_eq!(repo.push_count(), 3);
    assert_eq!(host.default_branch_calls(), 0);
    assert!(host.pull_requests().is_empty());
}

#[test]
fn rejected_push_is_not_retried() {
    let repo = ScriptedRepository::dirty()
        .with_push_results(vec![Err(ScriptedRepository::rejected_push())]);
    let host = ScriptedHost::default();
    let sleeper = RecordingSleeper::default();

    let result = publish_with(&repo, &host, &sleeper);

    assert!(matches!(result, PublishResult::Failed { .. }));
    assert_eq!(repo.push_count(), 1);
    assert!(sleeper.waits().is_empty());
}

#[test]
fn rate_limited_pull_request_is_retried() {
    let repo = ScriptedRepository::dirty();
    let host = ScriptedHost::default().with_pr_results(vec![
        Err(ScriptedHost::rate_limited()),
        Err(ScriptedHost::server_error()),
        Ok("https://github.com/acme/widgets/pull/9".to_string()),
    ]);
    let sleeper = RecordingSleeper::default();

    let result = publish_with(&repo, &host, &sleeper);

    let PublishResult::Published {
        pull_request_url, ..
    } = result
    else {
        panic!("expected publish, got {result:?}");
    };
    assert_eq!(pull_request_url, "https://github.com/acme/widgets/pull/9");
    assert_eq!(host.pull_requests().len(), 3);
    assert_eq!(host.default_branch_calls(), 3);
    assert_eq!(repo.push_count(), 1);
}

#[test]
fn default_branch_lookup_shares_the_retry_budget() {
    let repo = ScriptedRepository::dirty();
    let host = ScriptedHost::default()
        .with_default_branch_results(vec![Err(ScriptedHost::connection_refused())]);
    let sleeper = RecordingSleeper::default();

    let result = publish_with(&repo, &host, &sleeper);

    assert!(result.is_published(), "{result:?}");
    assert_eq!(host.default_branch_calls(), 2);
    assert_eq!(host.pull_requests().len(), 1);
    assert_eq!(sleeper.waits(), vec![Duration::from_secs(2)]);
}

#[test]
fn api_validation_error_fails_after_one_attempt() {
    let repo = ScriptedRepository::dirty();
    let host = ScriptedHost::default().with_pr_results(vec![Err(ScriptedHost::unprocessable())]);
    let sleeper = RecordingSleeper::default();

    let result = publish_with(&repo, &host, &sleeper);

    let PublishResult::Failed { reason } = result else {
        panic!("expected failure, got {result:?}");
    };
    assert!(reason.starts_with("Failed to create PR after 1 attempt"), "{reason}");
    assert!(reason.contains("Validation Failed"), "{reason}");
    assert_eq!(host.pull_requests().len(), 1);
}

#[test]
fn every_publish_uses_a_fresh_branch() {
    let host = ScriptedHost::default();
    let sleeper = RecordingSleeper::default();
    let mut branches = Vec::new();
    for _ in 0..5 {
        let repo = ScriptedRepository::dirty();
        publish_with(&repo, &host, &sleeper);
        branches.extend(repo.created_branches());
    }
    branches.sort();
    branches.dedup();
    assert_eq!(branches.len(), 5);
}

#[test]
fn custom_retry_policy_bounds_attempts() {
    let repo = ScriptedRepository::dirty().with_push_results(vec![
        Err(ScriptedRepository::transient_push()),
        Err(ScriptedRepository::transient_push()),
    ]);
    let host = ScriptedHost::default();
    let sleeper = RecordingSleeper::default();
    let settings = PublishSettings {
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(150),
        },
        ..PublishSettings::default()
    };

    let result = Publisher::new(&repo, &host, &sleeper, settings).publish(&request());

    let PublishResult::Failed { reason } = result else {
        panic!("expected failure, got {result:?}");
    };
    assert!(reason.contains("2 attempts"), "{reason}");
    assert_eq!(sleeper.waits(), vec![Duration::from_millis(100)]);
}

#[test]
fn publishes_real_changes_to_a_local_remote() {
    let fixture = GitFixture::new().expect("fixture");
    let git = fixture.clone_git().expect("clone");
    std::fs::write(git.workdir().join("hello.txt"), "hello\n").expect("write");
    assert!(git.is_dirty().expect("status"));
    let host = ScriptedHost::default();

    let result = Publisher::new(&git, &host, &ThreadSleeper, PublishSettings::default())
        .publish(&request());

    let PublishResult::Published { branch, .. } = result else {
        panic!("expected publish, got {result:?}");
    };
    assert!(fixture.remote_has_branch(&branch).expect("show-ref"));
    assert_eq!(
        fixture.remote_file(&branch, "hello.txt").expect("show"),
        "hello\n"
    );
    assert_eq!(
        fixture.remote_subject(&branch).expect("log"),
        "feat: Add greeting"
    );
    assert_eq!(
        fixture.remote_branches().expect("branches"),
        vec![branch.clone(), "main".to_string()]
    );
    assert!(!git.is_dirty().expect("status"));
}
