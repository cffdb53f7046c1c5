//! Toad: persistent batch-job orchestration.
//!
//! Entries are rendered through a command template into shell commands,
//! launched under a concurrency ceiling, and polled through a pluggable
//! completion checker until every task is COMPLETED or ERROR.

pub mod checker;
pub mod config;
pub mod error;
pub mod launcher;
pub mod model;
pub mod render;
pub mod scheduler;
pub mod seed;
pub mod store;
pub mod summary;
