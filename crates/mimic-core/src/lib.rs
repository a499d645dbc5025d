//! # mimic-core
//!
//! Core types and the error taxonomy for the Mimic behaviour automation client.
//! This crate defines the shared vocabulary used by every other crate in the workspace.

pub mod error;
pub mod types;

pub use error::{MimicError, Result};
pub use types::*;
