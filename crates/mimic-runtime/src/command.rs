//! Behaviours declared in configuration that run an external program.
//!
//! ```toml
//! [behaviours.browse_news]
//! command = "python3"
//! args = ["scripts/browse.py", "--site", "news"]
//! category = "Idle"
//! display_name = "Browse news"
//! requires = { os = ["linux", "windows"], executables = ["firefox"] }
//! cleanup_command = "pkill"
//! cleanup_args = ["-f", "firefox"]
//! timeout_secs = 900
//! ```
//!
//! The child is spawned with `kill_on_drop`, so aborting the run kills it.
//! On Unix it also leads its own process group, and a cleanup task kills the
//! whole group, so programs it started do not outlive the run.
//! It receives its whole settings table as JSON in `MIMIC_BEHAVIOUR_CONFIG`.

use async_trait::async_trait;
use mimic_config::MimicConfig;
use mimic_core::{BehaviourCategory, MimicError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::behaviour::{Behaviour, BehaviourContext, Requirements};

/// Timeout for the optional cleanup command.
const CLEANUP_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_category")]
    pub category: BehaviourCategory,
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requires: Requirements,
    pub working_dir: Option<PathBuf>,
    /// Kill the child and fault the run after this many seconds.
    pub timeout_secs: Option<u64>,
    /// Run on every exit path, e.g. to close windows the child opened.
    pub cleanup_command: Option<String>,
    #[serde(default)]
    pub cleanup_args: Vec<String>,
}

fn default_category() -> BehaviourCategory {
    BehaviourCategory::Idle
}

pub struct CommandBehaviour {
    id: String,
    display_name: String,
    spec: CommandSpec,
}

impl CommandBehaviour {
    pub fn new(id: impl Into<String>, spec: CommandSpec) -> Self {
        let id = id.into();
        let display_name = spec.display_name.clone().unwrap_or_else(|| id.clone());
        Self {
            id,
            display_name,
            spec,
        }
    }

    /// Parse one settings table. `Ok(None)` when it declares no `command`.
    pub fn from_settings(id: &str, settings: &Value) -> Result<Option<Self>> {
        if settings.get("command").is_none() {
            return Ok(None);
        }
        let spec: CommandSpec = serde_json::from_value(settings.clone())
            .map_err(|e| MimicError::Config(format!("behaviours.{}: {}", id, e)))?;
        if spec.command.trim().is_empty() {
            return Err(MimicError::ConfigValidation {
                field: format!("behaviours.{}.command", id),
                reason: "command is empty".into(),
            });
        }
        Ok(Some(Self::new(id, spec)))
    }

    /// Every command behaviour declared in `config`. Invalid sections are skipped.
    pub fn from_config(config: &MimicConfig) -> Vec<Self> {
        config
            .behaviours
            .iter()
            .filter_map(|(id, settings)| match Self::from_settings(id, settings) {
                Ok(found) => found,
                Err(e) => {
                    warn!(behaviour = %id, error = %e, "skipping invalid command behaviour");
                    None
                }
            })
            .collect()
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn fault(&self, reason: impl Into<String>) -> MimicError {
        MimicError::Behaviour {
            behaviour: self.id.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Behaviour for CommandBehaviour {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn category(&self) -> BehaviourCategory {
        self.spec.category
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn requirements(&self) -> Requirements {
        self.spec.requires.clone().with_executable(self.spec.command.clone())
    }

    async fn run(&self, ctx: BehaviourContext) -> Result<()> {
        if let Some(cleanup) = &self.spec.cleanup_command {
            let program = cleanup.clone();
            let args = self.spec.cleanup_args.clone();
            let behaviour = self.id.clone();
            ctx.cleanup().push(format!("{}: {}", self.id, program), move || async move {
                run_cleanup_command(&behaviour, &program, &args).await
            });
        }

        let mut command = Command::new(&self.spec.command);
        command
            .args(&self.spec.args)
            .env("MIMIC_BEHAVIOUR_ID", &self.id)
            .env("MIMIC_BEHAVIOUR_CONFIG", ctx.settings().to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.spec.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| self.fault(format!("failed to spawn '{}': {}", self.spec.command, e)))?;
        info!(behaviour = %self.id, pid = ?child.id(), command = %self.spec.command, "child process started");

        #[cfg(unix)]
        {
            if let Some(pgid) = child.id() {
                let behaviour = self.id.clone();
                ctx.cleanup()
                    .push(format!("{}: kill process group {}", self.id, pgid), move || async move {
                        kill_process_group(&behaviour, pgid).await;
                        Ok(())
                    });
            }
        }

        let status = match self.spec.timeout_secs {
            Some(secs) => {
                let waited = tokio::time::timeout(Duration::from_secs(secs), child.wait()).await;
                match waited {
                    Ok(status) => status?,
                    Err(_) => {
                        let _ = child.kill().await;
                        return Err(self.fault(format!("timed out after {}s", secs)));
                    }
                }
            }
            None => child.wait().await?,
        };

        if status.success() {
            debug!(behaviour = %self.id, "child process exited cleanly");
            Ok(())
        } else {
            Err(self.fault(format!("child exited with {}", status)))
        }
    }
}

/// SIGKILL every process left in the group. An empty group is the normal case
/// after a clean exit.
#[cfg(unix)]
async fn kill_process_group(behaviour: &str, pgid: u32) {
    let result = Command::new("kill")
        .args(["-s", "KILL", "--", &format!("-{pgid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if status.success() => {
            debug!(behaviour = %behaviour, pgid, "killed leftover processes");
        }
        Ok(_) => {
            debug!(behaviour = %behaviour, pgid, "process group already empty");
        }
        Err(e) => {
            warn!(behaviour = %behaviour, pgid, error = %e, "cannot run kill for process group");
        }
    }
}

async fn run_cleanup_command(behaviour: &str, program: &str, args: &[String]) -> Result<()> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .kill_on_drop(true);

    let status = tokio::time::timeout(CLEANUP_COMMAND_TIMEOUT, command.status())
        .await
        .map_err(|_| MimicError::CleanupTask {
            label: program.to_string(),
            reason: format!("timed out after {}s", CLEANUP_COMMAND_TIMEOUT.as_secs()),
        })??;

    if status.success() {
        debug!(behaviour = %behaviour, program = %program, "cleanup command finished");
        Ok(())
    } else {
        Err(MimicError::CleanupTask {
            label: program.to_string(),
            reason: format!("exited with {}", status),
        })
    }
}
