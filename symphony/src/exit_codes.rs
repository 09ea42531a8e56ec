//! Stable exit codes for symphony CLI commands.

use crate::core::types::PublishResult;

/// Command succeeded (or a run finished without a publish failure).
pub const OK: i32 = 0;
/// Invalid configuration, missing environment, or an unexpected error.
pub const INVALID: i32 = 1;
/// The workspace had no changes to publish.
pub const NOTHING_TO_PUBLISH: i32 = 2;
/// Publishing failed (validation, local git step, push, or pull request).
pub const PUBLISH_FAILED: i32 = 3;
/// The run stopped because the spend ceiling was reached.
pub const BUDGET_EXCEEDED: i32 = 4;

pub fn for_publish(result: &PublishResult) -> i32 {
    match result {
        PublishResult::Published { .. } => OK,
        PublishResult::NothingToPublish => NOTHING_TO_PUBLISH,
        PublishResult::Failed { .. } => PUBLISH_FAILED,
    }
}
