//! Side-effecting adapters: git, the hosting API, directories, files,
//! configuration and agent processes.

pub mod config;
pub mod executor;
pub mod files;
pub mod git;
pub mod github;
pub mod process;
pub mod prompt;
pub mod workspace;
