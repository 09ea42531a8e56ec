//! Workspace lifecycle and change publishing for agent-driven code changes.
//!
//! A run clones a remote repository into an isolated workspace, lets agent
//! stages change files inside it, and publishes the result as a pull request
//! with bounded retries, all under a spend ceiling. The crate keeps a strict
//! split:
//!
//! - **[`core`]**: Pure, deterministic logic (credential embedding, budget
//!   accounting, retry schedule, branch naming, failure classification).
//! - **[`io`]**: Side-effecting adapters (git, the hosting API, directories,
//!   configuration, agent processes). Isolated behind traits so tests can
//!   substitute scripted fakes.
//!
//! Orchestration modules ([`publish`], [`tools`], [`run`], [`worker`]) join the
//! two to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod publish;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
pub mod worker;
