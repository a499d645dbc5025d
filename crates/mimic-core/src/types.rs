use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a behaviour, e.g. "work_emails".
pub type BehaviourId = String;

/// Category a behaviour belongs to. Only `Idle` behaviours are picked by the idle cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BehaviourCategory {
    Idle,
    Attack,
}

impl fmt::Display for BehaviourCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BehaviourCategory::Idle => write!(f, "Idle"),
            BehaviourCategory::Attack => write!(f, "Attack"),
        }
    }
}

impl FromStr for BehaviourCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(BehaviourCategory::Idle),
            "attack" => Ok(BehaviourCategory::Attack),
            other => Err(format!("unknown behaviour category '{other}'")),
        }
    }
}

/// Whether the scheduler keeps picking idle behaviours on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleCycleStatus {
    #[default]
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for IdleCycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdleCycleStatus::Running => write!(f, "running"),
            IdleCycleStatus::Paused => write!(f, "paused"),
            IdleCycleStatus::Stopped => write!(f, "stopped"),
        }
    }
}

impl FromStr for IdleCycleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(IdleCycleStatus::Running),
            "paused" => Ok(IdleCycleStatus::Paused),
            "stopped" => Ok(IdleCycleStatus::Stopped),
            other => Err(format!("unknown idle cycle status '{other}'")),
        }
    }
}

/// Operating system family, used by declarative behaviour requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    MacOS,
    Windows,
    Other,
}

impl Os {
    pub fn current() -> Self {
        #[cfg(target_os = "linux")]
        {
            Os::Linux
        }
        #[cfg(target_os = "macos")]
        {
            Os::MacOS
        }
        #[cfg(target_os = "windows")]
        {
            Os::Windows
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            Os::Other
        }
    }
}

/// The public face of a behaviour, as reported to the server and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviourSummary {
    pub id: BehaviourId,
    pub display_name: String,
    pub category: BehaviourCategory,
}

/// Snapshot of the scheduler slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerStatus {
    /// Whether a behaviour is executing right now.
    pub running: bool,
    pub current_behaviour: Option<BehaviourSummary>,
    pub idle_cycle_status: IdleCycleStatus,
    /// Number of runs started since the process came up.
    pub runs_started: usize,
    /// Requests waiting in the pending queue.
    pub queued: usize,
}

/// Resolve the host name the way the server identifies this client.
pub fn hostname() -> String {
    std::process::Command::new("hostname")
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
