use mimic_core::IdleCycleStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typed view of `mimic.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MimicConfig {
    pub client: ClientConfig,
    pub server: ServerConfig,
    pub general: GeneralConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
    /// Free-form settings keyed by behaviour id.
    pub behaviours: BTreeMap<String, serde_json::Value>,
}

impl Default for MimicConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            server: ServerConfig::default(),
            general: GeneralConfig::default(),
            scheduler: SchedulerConfig::default(),
            logging: LoggingConfig::default(),
            behaviours: BTreeMap::new(),
        }
    }
}

// ── Client ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Hostname reported to the server. Detected from the system when unset.
    pub hostname: Option<String>,
}

impl ClientConfig {
    pub fn resolved_hostname(&self) -> String {
        match &self.hostname {
            Some(h) if !h.trim().is_empty() => h.trim().to_string(),
            _ => mimic_core::hostname(),
        }
    }
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Connect to the control server at all.
    pub enabled: bool,
    /// Base URL for HTTP requests, e.g. "https://control.example.com".
    pub http_url: String,
    /// Base URL for the command socket, e.g. "wss://control.example.com".
    pub websocket_url: String,
    /// Path of the authentication endpoint.
    pub connect_path: String,
    /// Path of the command socket endpoint.
    pub socket_path: String,
    /// Initial reconnect delay in seconds; doubles on each failure.
    pub reconnect_delay_secs: u64,
    /// Reconnect delay ceiling in seconds.
    pub max_reconnect_delay_secs: u64,
    /// Seconds between status updates while connected.
    pub status_interval_secs: u64,
    /// Timeout for the authentication request.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            http_url: "http://127.0.0.1:8000".into(),
            websocket_url: "ws://127.0.0.1:8000".into(),
            connect_path: "/client/connect".into(),
            socket_path: "/client/client_socket".into(),
            reconnect_delay_secs: 5,
            max_reconnect_delay_secs: 300,
            status_interval_secs: 10,
            request_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn connect_url(&self) -> String {
        join_url(&self.http_url, &self.connect_path)
    }

    pub fn socket_url(&self) -> String {
        join_url(&self.websocket_url, &self.socket_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

// ── General ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub user: UserConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Account used to authenticate against the control server.
    pub domain_email: Option<String>,
    pub domain_password: Option<String>,
}

impl UserConfig {
    pub fn has_credentials(&self) -> bool {
        matches!(
            (&self.domain_email, &self.domain_password),
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty()
        )
    }
}

// ── Scheduler ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval of the scheduling tick.
    pub tick_interval_ms: u64,
    /// How long a forced termination waits for the worker to finish.
    pub terminate_timeout_ms: u64,
    /// Pause after a failed scheduling iteration.
    pub error_retry_secs: u64,
    /// Whether the tick picks new behaviours.
    pub idle_cycle: IdleCycleStatus,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            terminate_timeout_ms: 2000,
            error_retry_secs: 5,
            idle_cycle: IdleCycleStatus::Running,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let icon = match self.severity {
            WarningSeverity::Error => "❌",
            WarningSeverity::Warning => "⚠️ ",
            WarningSeverity::Info => "💡",
        };
        write!(f, "{} {}: {}", icon, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl MimicConfig {
    /// Check the configuration. Returns every finding, or an error listing
    /// the hard errors when any were found.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Server URLs ───
        if self.server.enabled {
            check_url(
                &mut warnings,
                "server.http_url",
                &self.server.http_url,
                &["http", "https"],
            );
            check_url(
                &mut warnings,
                "server.websocket_url",
                &self.server.websocket_url,
                &["ws", "wss"],
            );

            if !self.general.user.has_credentials() {
                warnings.push(ConfigWarning {
                    field: "general.user".into(),
                    message: "server is enabled but no credentials are set".into(),
                    severity: WarningSeverity::Warning,
                    hint: Some(
                        "Set general.user.domain_email and general.user.domain_password".into(),
                    ),
                });
            }
        }

        // ── Reconnect backoff ───
        if self.server.reconnect_delay_secs == 0 {
            warnings.push(ConfigWarning {
                field: "server.reconnect_delay_secs".into(),
                message: "reconnect delay is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 5".into()),
            });
        } else if self.server.max_reconnect_delay_secs < self.server.reconnect_delay_secs {
            warnings.push(ConfigWarning {
                field: "server.max_reconnect_delay_secs".into(),
                message: format!(
                    "max delay {}s is below the base delay {}s",
                    self.server.max_reconnect_delay_secs, self.server.reconnect_delay_secs
                ),
                severity: WarningSeverity::Warning,
                hint: Some("The base delay will be used as the ceiling".into()),
            });
        }

        if self.server.status_interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "server.status_interval_secs".into(),
                message: "status interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 10".into()),
            });
        }

        // ── Scheduler ───
        if self.scheduler.tick_interval_ms == 0 {
            warnings.push(ConfigWarning {
                field: "scheduler.tick_interval_ms".into(),
                message: "tick interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 1000".into()),
            });
        }
        if self.scheduler.terminate_timeout_ms == 0 {
            warnings.push(ConfigWarning {
                field: "scheduler.terminate_timeout_ms".into(),
                message: "terminate timeout is 0, so cleanup may run outside the worker".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 2000".into()),
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        // ── Behaviour sections ───
        for (id, section) in &self.behaviours {
            if !section.is_object() {
                warnings.push(ConfigWarning {
                    field: format!("behaviours.{}", id),
                    message: "behaviour settings must be a table".into(),
                    severity: WarningSeverity::Warning,
                    hint: None,
                });
                continue;
            }

            if let Some(category) = section.get("category").and_then(|v| v.as_str()) {
                if category.parse::<mimic_core::BehaviourCategory>().is_err() {
                    warnings.push(ConfigWarning {
                        field: format!("behaviours.{}.category", id),
                        message: format!("unknown category '{}'", category),
                        severity: WarningSeverity::Warning,
                        hint: Some("Valid values: Idle, Attack".into()),
                    });
                }
            }

            if let Some(command) = section.get("command") {
                let empty = command.as_str().map(|c| c.trim().is_empty()).unwrap_or(true);
                if empty {
                    warnings.push(ConfigWarning {
                        field: format!("behaviours.{}.command", id),
                        message: "command must be a non-empty string".into(),
                        severity: WarningSeverity::Error,
                        hint: None,
                    });
                }
            }
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}

fn check_url(warnings: &mut Vec<ConfigWarning>, field: &str, value: &str, schemes: &[&str]) {
    match url::Url::parse(value) {
        Ok(parsed) if schemes.contains(&parsed.scheme()) => {}
        Ok(parsed) => warnings.push(ConfigWarning {
            field: field.into(),
            message: format!("unexpected scheme '{}'", parsed.scheme()),
            severity: WarningSeverity::Error,
            hint: Some(format!("Use one of: {}", schemes.join(", "))),
        }),
        Err(e) => warnings.push(ConfigWarning {
            field: field.into(),
            message: format!("invalid URL '{}': {}", value, e),
            severity: WarningSeverity::Error,
            hint: None,
        }),
    }
}
