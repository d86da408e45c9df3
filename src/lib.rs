//! pssh - Parallel SSH
//!
//! Runs one command on many hosts at once. Each host gets a [`Task`] that
//! owns an `ssh` child process and its pipes; a single-threaded [`Manager`]
//! drives every task through one `poll(2)` loop, bounds how many run at once,
//! and collects a [`TaskResult`] per host.

pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod host;
pub mod report;
pub mod ssh;
pub mod ui;

// Re-exports
pub use config::{Settings, TaskConfig};
pub use core::{Environment, Manager, ManagerConfig, PollIoMap, Task, TaskError};
pub use host::HostSpec;
pub use report::TaskResult;

/// Result type alias
pub type Result<T> = anyhow::Result<T>;
