//! Deterministic, pure logic shared by the publishing pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests (randomness and
//! sleeping are injected by the caller).

pub mod branch;
pub mod budget;
pub mod classifier;
pub mod credential;
pub mod retry;
pub mod types;
