//! Retest Core Library
//!
//! Incremental test re-execution for an emitting build pipeline: detect which
//! test units changed, debounce, and run only those, in memory.
//! The binary entry point is in main.rs.

pub mod changes;
pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod error;
pub mod executor;
pub mod logging;
pub mod pipeline;
pub mod reporter;
pub mod runner;
pub mod seed;
pub mod signals;
pub mod watch;
