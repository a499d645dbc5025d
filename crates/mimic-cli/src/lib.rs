//! # mimic-cli
//!
//! Command-line interface for the Mimic client.
//!
//! ## Commands
//!
//! - `mimic start`: Run the scheduler and the remote control link
//! - `mimic behaviours`: List known behaviours and their availability
//! - `mimic run <id>`: Run one behaviour in the foreground
//! - `mimic config`: Show configuration
//! - `mimic set`: Set a config value
//! - `mimic doctor`: Audit configuration

pub mod commands;

pub use commands::Cli;
