//! TargetSmith application orchestrator with clean module layout.
//!
//! This module provides:
//! - `core`: TargetSmith struct, initialization and commands
//! - `tasks`: Async task orchestration with tokio::spawn, including the
//!   production loops
//! - `tests`: Unit tests for the orchestrator

pub mod core;
pub mod tasks;

// Re-export the main struct
pub use core::TargetSmith;
