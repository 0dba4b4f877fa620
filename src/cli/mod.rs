//! Command-line interface for resonance.
//!
//! Batch downloads from playlist exports, plus commands for inspecting and
//! resetting saved state and checking the external tools.

mod commands;

pub use commands::{Cli, Commands, run_command};
