//! # mimic-config
//!
//! Configuration system for the Mimic client. Reads `mimic.toml`, applies
//! environment variable overrides, and merges configuration fragments pushed
//! by the control server, rewriting the whole document on every merge.

pub mod merge;
pub mod schema;
pub mod store;

pub use merge::{deep_merge, strip_nulls};
pub use schema::{MimicConfig, SchedulerConfig, ServerConfig};
pub use schema::{ConfigWarning, WarningSeverity};
pub use store::{ConfigStore, apply_env_overrides};
