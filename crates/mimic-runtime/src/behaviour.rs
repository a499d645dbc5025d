//! The behaviour contract and the context a run receives.

use async_trait::async_trait;
use mimic_core::{BehaviourCategory, BehaviourId, BehaviourSummary, MimicError, Os, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use uuid::Uuid;

use crate::cleanup::{CleanupHandle, CleanupStack};

/// One self-contained simulated activity.
///
/// `run` may be aborted at any await point. Anything it acquires that must be
/// released goes on `ctx.cleanup()` right after acquiring it.
#[async_trait]
pub trait Behaviour: Send + Sync {
    /// Stable identifier, e.g. "work_emails".
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn category(&self) -> BehaviourCategory;

    fn description(&self) -> &str {
        ""
    }

    /// What the host must provide for this behaviour to be offered at all.
    fn requirements(&self) -> Requirements {
        Requirements::default()
    }

    async fn run(&self, ctx: BehaviourContext) -> Result<()>;
}

// ── Availability ───────────────────────────────────────────────

/// Declarative capability descriptor, evaluated once by the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirements {
    /// Supported operating systems. Empty means any.
    pub os: Vec<Os>,
    /// Programs that must be resolvable on `PATH` (or absolute paths that must exist).
    pub executables: Vec<String>,
}

impl Requirements {
    pub fn with_executable(mut self, exe: impl Into<String>) -> Self {
        self.executables.push(exe.into());
        self
    }

    /// Evaluate against the running host.
    pub fn check(&self) -> Availability {
        self.check_with(Os::current(), |exe| which::which(exe).is_ok())
    }

    /// Evaluate against an arbitrary host description.
    pub fn check_with<F>(&self, os: Os, has_executable: F) -> Availability
    where
        F: Fn(&str) -> bool,
    {
        if !self.os.is_empty() && !self.os.contains(&os) {
            return Availability::Unavailable {
                reason: format!("not supported on {:?}", os),
            };
        }
        let missing: Vec<&str> = self
            .executables
            .iter()
            .map(String::as_str)
            .filter(|exe| !has_executable(exe))
            .collect();
        if !missing.is_empty() {
            return Availability::Unavailable {
                reason: format!("missing executables: {}", missing.join(", ")),
            };
        }
        Availability::Available
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Availability {
    Available,
    Unavailable { reason: String },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// Immutable description of a behaviour, built once by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviourDescriptor {
    pub id: BehaviourId,
    pub display_name: String,
    pub category: BehaviourCategory,
    pub description: String,
    pub availability: Availability,
}

impl BehaviourDescriptor {
    pub fn of(behaviour: &dyn Behaviour, availability: Availability) -> Self {
        Self {
            id: behaviour.id().to_string(),
            display_name: behaviour.display_name().to_string(),
            category: behaviour.category(),
            description: behaviour.description().to_string(),
            availability,
        }
    }

    pub fn summary(&self) -> BehaviourSummary {
        BehaviourSummary {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            category: self.category,
        }
    }
}

// ── Context ────────────────────────────────────────────────────

/// Everything a single run gets from the runtime.
#[derive(Debug, Clone)]
pub struct BehaviourContext {
    behaviour_id: BehaviourId,
    run_id: Uuid,
    settings: Value,
    cleanup: CleanupStack,
    exit_callbacks: CleanupStack,
}

impl BehaviourContext {
    pub fn new(
        behaviour_id: impl Into<BehaviourId>,
        run_id: Uuid,
        settings: Value,
        cleanup: CleanupStack,
        exit_callbacks: CleanupStack,
    ) -> Self {
        Self {
            behaviour_id: behaviour_id.into(),
            run_id,
            settings,
            cleanup,
            exit_callbacks,
        }
    }

    pub fn behaviour_id(&self) -> &str {
        &self.behaviour_id
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Snapshot of `[behaviours.<id>]` taken when the run started.
    pub fn settings(&self) -> &Value {
        &self.settings
    }

    /// Typed lookup of one key of the settings snapshot.
    pub fn setting<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.settings.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v.clone()).map(Some).map_err(|e| {
                MimicError::Config(format!(
                    "behaviours.{}.{}: {}",
                    self.behaviour_id, key, e
                ))
            }),
        }
    }

    /// Like [`setting`](Self::setting), falling back to `default` when the key is absent.
    pub fn setting_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.setting(key)?.unwrap_or(default))
    }

    /// The run's cleanup stack.
    pub fn cleanup(&self) -> &CleanupStack {
        &self.cleanup
    }

    /// Register a callback on the unit itself. Unit callbacks run before the
    /// cleanup stack when the run ends.
    pub fn on_exit<F, Fut>(&self, label: impl Into<String>, callback: F) -> CleanupHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.exit_callbacks.push(label, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(settings: Value) -> BehaviourContext {
        BehaviourContext::new(
            "work_word",
            Uuid::new_v4(),
            settings,
            CleanupStack::new(),
            CleanupStack::new(),
        )
    }

    #[test]
    fn test_requirements_any_host() {
        let req = Requirements::default();
        assert!(req.check_with(Os::Windows, |_| false).is_available());
    }

    #[test]
    fn test_requirements_wrong_os() {
        let req = Requirements {
            os: vec![Os::Windows],
            executables: vec![],
        };
        assert!(!req.check_with(Os::Linux, |_| true).is_available());
        assert!(req.check_with(Os::Windows, |_| true).is_available());
    }

    #[test]
    fn test_requirements_missing_executable() {
        let req = Requirements::default()
            .with_executable("firefox")
            .with_executable("sh");
        match req.check_with(Os::Linux, |exe| exe == "sh") {
            Availability::Unavailable { reason } => assert!(reason.contains("firefox")),
            Availability::Available => panic!("firefox should be missing"),
        }
    }

    #[test]
    fn test_requirements_from_toml_shape() {
        let req: Requirements =
            serde_json::from_value(json!({"os": ["linux", "windows"], "executables": ["git"]}))
                .unwrap();
        assert_eq!(req.os, vec![Os::Linux, Os::Windows]);
        assert_eq!(req.executables, vec!["git".to_string()]);
    }

    #[test]
    fn test_setting_lookup() {
        let c = ctx(json!({"documents": 3, "title": "Q3 report"}));
        assert_eq!(c.setting::<u32>("documents").unwrap(), Some(3));
        assert_eq!(c.setting::<String>("missing").unwrap(), None);
        assert_eq!(c.setting_or("pages", 10u32).unwrap(), 10);
        assert!(c.setting::<u32>("title").is_err());
    }
}
