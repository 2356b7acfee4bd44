//! CLI command implementations for procmon-sync.
//!
//! This module provides implementations for all CLI subcommands:
//! - `config`: Configuration file generation
//! - `snapshot`: One provider pass, reconciled and printed

pub mod config;
pub mod snapshot;

// Re-export command functions
pub use config::command_config;
pub use snapshot::command_snapshot;
