//! # mimic-runtime
//!
//! Runs behaviours one at a time and guarantees their resources are released.
//!
//! ## Architecture
//!
//! ```text
//!   remote loop / CLI ──ManagerHandle──▶ ┌──────────────┐ ◀── 1 s tick
//!                      (mpsc commands)   │ ManagerActor │
//!                                        │  owns:       │
//!                                        │  Manager     │
//!                                        │  ConfigStore │
//!                                        └──────┬───────┘
//!                                               │ start / stop
//!                                               ▼
//!                                        ┌──────────────┐
//!                                        │ExecutionUnit │──▶ payload task (abortable)
//!                                        │ CleanupStack │◀── payload pushes cleanup
//!                                        └──────────────┘
//! ```

pub mod actor;
pub mod behaviour;
pub mod builtin;
pub mod catalog;
pub mod cleanup;
pub mod command;
pub mod manager;
pub mod unit;

pub use actor::{ManagerActor, ManagerCommand, ManagerHandle};
pub use behaviour::{
    Availability, Behaviour, BehaviourContext, BehaviourDescriptor, Requirements,
};
pub use builtin::{PauseBehaviour, default_behaviours};
pub use catalog::BehaviourCatalog;
pub use cleanup::{CleanupHandle, CleanupReport, CleanupStack, CleanupTask};
pub use command::{CommandBehaviour, CommandSpec};
pub use manager::{BehaviourManager, PendingQueue, idle_candidates};
pub use unit::{ExecutionUnit, RunOutcome, UnitState};
