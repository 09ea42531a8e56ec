//! Workspace creation and teardown against a local bare remote.

use std::fs;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::time::Duration;

use symphony::core::retry::ThreadSleeper;
use symphony::core::types::{LifecyclePolicy, PublishRequest, PublishResult};
use symphony::io::git::Repository;
use symphony::io::workspace::{
    WorkspaceError, WorkspaceManager, WorkspaceSettings, with_workspace,
};
use symphony::publish::{Publish, PublishSettings, Publisher};
use symphony::test_support::{GitFixture, ScriptedHost, test_identity};

fn settings(base: &Path) -> WorkspaceSettings {
    WorkspaceSettings {
        persistent_dir: base.join("workspace_debug"),
        temp_prefix: "symphony-".to_string(),
        temp_root: Some(base.join("tmp")),
        network_timeout: Duration::from_secs(60),
        identity: test_identity(),
    }
}

fn manager(base: &Path) -> WorkspaceManager {
    fs::create_dir_all(base.join("tmp")).expect("tmp root");
    WorkspaceManager::new(settings(base))
}

fn ephemeral_dirs(base: &Path) -> Vec<PathBuf> {
    fs::read_dir(base.join("tmp"))
        .expect("read tmp")
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .collect()
}

#[test]
fn persistent_creation_replaces_stale_directory() {
    let fixture = GitFixture::new().expect("fixture");
    let scratch = tempfile::tempdir().expect("scratch");
    let debug_dir = scratch.path().join("workspace_debug");
    fs::create_dir_all(debug_dir.join("nested")).expect("stale dirs");
    fs::write(debug_dir.join("nested/old.txt"), "stale").expect("stale file");

    let ws = manager(scratch.path())
        .create(&fixture.remote_url(), "token", LifecyclePolicy::Persistent)
        .expect("create");

    assert_eq!(ws.root(), debug_dir.as_path());
    assert!(!debug_dir.join("nested").exists());
    assert_eq!(
        fs::read_to_string(debug_dir.join("README.md")).expect("readme"),
        "# widgets\n"
    );
    assert!(!ws.repository().is_dirty().expect("status"));
}

#[test]
fn failed_purge_clears_stale_files_and_clones_in_place() {
    let fixture = GitFixture::new().expect("fixture");
    let scratch = tempfile::tempdir().expect("scratch");
    let debug_dir = scratch.path().join("workspace_debug");
    fs::create_dir_all(&debug_dir).expect("stale dir");
    fs::write(debug_dir.join("stale.txt"), "left over").expect("stale file");

    let ws = manager(scratch.path())
        .with_remover(|_| Err(io::Error::new(io::ErrorKind::PermissionDenied, "simulated")))
        .create(&fixture.remote_url(), "token", LifecyclePolicy::Persistent)
        .expect("create despite purge failure");

    assert_eq!(ws.root(), debug_dir.as_path());
    assert!(!debug_dir.join("stale.txt").exists());
    assert!(debug_dir.join("README.md").exists());
    ws.teardown();
}

#[test]
fn uncleared_stale_directory_clones_into_fresh_sibling() {
    let fixture = GitFixture::new().expect("fixture");
    let scratch = tempfile::tempdir().expect("scratch");
    let debug_dir = scratch.path().join("workspace_debug");
    fs::create_dir_all(debug_dir.join("locked")).expect("stale dir");
    fs::write(debug_dir.join("locked/held.txt"), "busy").expect("stale file");

    let ws = manager(scratch.path())
        .with_remover(|_| Err(io::Error::new(io::ErrorKind::PermissionDenied, "simulated")))
        .create(&fixture.remote_url(), "token", LifecyclePolicy::Persistent)
        .expect("create despite stale content");

    let root = ws.root().to_path_buf();
    assert_ne!(root, debug_dir);
    assert_eq!(root.parent(), Some(scratch.path()));
    assert!(
        root.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("workspace_debug-"))
    );
    assert!(root.join("README.md").exists());
    assert!(!ws.repository().is_dirty().expect("status"));
    assert!(debug_dir.join("locked/held.txt").exists());

    ws.teardown();
    assert!(root.exists());
}

#[test]
fn ephemeral_teardown_removes_directory_on_success() {
    let fixture = GitFixture::new().expect("fixture");
    let scratch = tempfile::tempdir().expect("scratch");
    let manager = manager(scratch.path());

    let root = with_workspace(
        &manager,
        &fixture.remote_url(),
        "token",
        LifecyclePolicy::Ephemeral,
        |ws| {
            assert!(ws.root().join("README.md").exists());
            ws.root().to_path_buf()
        },
    )
    .expect("workspace");

    assert!(!root.exists());
    assert!(ephemeral_dirs(scratch.path()).is_empty());
}

#[test]
fn ephemeral_teardown_removes_directory_on_panic() {
    let fixture = GitFixture::new().expect("fixture");
    let scratch = tempfile::tempdir().expect("scratch");
    let manager = manager(scratch.path());

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        with_workspace(
            &manager,
            &fixture.remote_url(),
            "token",
            LifecyclePolicy::Ephemeral,
            |ws| {
                fs::write(ws.root().join("partial.txt"), "half done").expect("write");
                panic!("agent crashed mid-scope");
            },
        )
    }));

    assert!(outcome.is_err());
    assert!(ephemeral_dirs(scratch.path()).is_empty());
}

#[test]
fn persistent_teardown_keeps_directory_on_success_and_panic() {
    let fixture = GitFixture::new().expect("fixture");
    let scratch = tempfile::tempdir().expect("scratch");
    let manager = manager(scratch.path());
    let debug_dir = scratch.path().join("workspace_debug");

    with_workspace(
        &manager,
        &fixture.remote_url(),
        "token",
        LifecyclePolicy::Persistent,
        |ws| fs::write(ws.root().join("kept.txt"), "kept").expect("write"),
    )
    .expect("workspace");
    assert!(debug_dir.join("kept.txt").exists());

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        with_workspace(
            &manager,
            &fixture.remote_url(),
            "token",
            LifecyclePolicy::Persistent,
            |ws| {
                fs::write(ws.root().join("crash.txt"), "evidence").expect("write");
                panic!("agent crashed mid-scope");
            },
        )
    }));
    assert!(outcome.is_err());
    assert!(debug_dir.join("crash.txt").exists());
    assert!(!debug_dir.join("kept.txt").exists());
}

#[test]
fn clone_failure_is_a_clone_error_without_secrets() {
    let scratch = tempfile::tempdir().expect("scratch");
    let missing = scratch.path().join("does-not-exist.git");

    let err = manager(scratch.path())
        .create(
            &missing.display().to_string(),
            "super-secret-token",
            LifecyclePolicy::Ephemeral,
        )
        .expect_err("clone must fail");

    assert!(matches!(err, WorkspaceError::Clone(_)), "{err}");
    assert!(!err.to_string().contains("super-secret-token"));
    assert!(ephemeral_dirs(scratch.path()).is_empty());
}

#[test]
fn remote_url_is_redacted_in_debug_output() {
    let fixture = GitFixture::new().expect("fixture");
    let scratch = tempfile::tempdir().expect("scratch");
    let ws = manager(scratch.path())
        .create(&fixture.remote_url(), "super-secret-token", LifecyclePolicy::Ephemeral)
        .expect("create");
    assert!(!format!("{ws:?}").contains("super-secret-token"));
    assert!(!ws.remote().to_string().contains("super-secret-token"));
}

#[test]
fn workspace_changes_publish_end_to_end() {
    let fixture = GitFixture::new().expect("fixture");
    let scratch = tempfile::tempdir().expect("scratch");
    let manager = manager(scratch.path());
    let host = ScriptedHost::default();

    let result = with_workspace(
        &manager,
        &fixture.remote_url(),
        "token",
        LifecyclePolicy::Ephemeral,
        |ws| {
            ws.files()
                .write("docs/greeting.md", "hello\n")
                .expect("write");
            Publisher::new(
                ws.repository(),
                &host,
                &ThreadSleeper,
                PublishSettings::default(),
            )
            .publish(&PublishRequest::new("Add greeting doc", "Adds docs/greeting.md"))
        },
    )
    .expect("workspace");

    let PublishResult::Published { branch, .. } = result else {
        panic!("expected publish, got {result:?}");
    };
    assert_eq!(
        fixture
            .remote_file(&branch, "docs/greeting.md")
            .expect("show"),
        "hello\n"
    );
    assert_eq!(host.pull_requests()[0].base, "main");
    assert!(ephemeral_dirs(scratch.path()).is_empty());
}
