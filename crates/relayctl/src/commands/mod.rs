//! Subcommand implementations.

pub mod queue;
pub mod targets;
