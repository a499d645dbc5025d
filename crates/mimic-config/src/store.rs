use mimic_core::{MimicError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::merge::{deep_merge, strip_nulls};
use crate::schema::MimicConfig;

/// Owns the configuration document.
///
/// The document is kept as a JSON value so fragments pushed by the control
/// server can be merged whatever their shape. The typed [`MimicConfig`] view
/// is derived from it on demand, with environment overrides applied on top.
/// Every successful merge rewrites the whole file.
pub struct ConfigStore {
    document: Value,
    config_path: PathBuf,
    persistent: bool,
}

impl ConfigStore {
    /// Resolve the config path: explicit path > MIMIC_CONFIG env > ~/.mimic/mimic.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("MIMIC_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mimic")
            .join("mimic.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let document = if config_path.exists() {
            info!(?config_path, "loading configuration");
            read_document(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            serde_json::to_value(MimicConfig::default())?
        };

        let store = Self {
            document,
            config_path,
            persistent: true,
        };

        // Log warnings, fail on errors
        let config = store.get()?;
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => return Err(MimicError::Config(e)),
        }

        Ok(store)
    }

    /// A store that never touches the disk. Merges only update memory.
    pub fn in_memory(document: Value) -> Result<Self> {
        let store = Self {
            document: normalise(document)?,
            config_path: PathBuf::from("mimic.toml"),
            persistent: false,
        };
        store.get()?;
        Ok(store)
    }

    /// Typed view of the current document, with env overrides applied.
    pub fn get(&self) -> Result<MimicConfig> {
        let config = typed(&self.document)?;
        Ok(apply_env_overrides(config, |key| std::env::var(key).ok()))
    }

    /// The raw document as last written.
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Snapshot of `[behaviours.<id>]`, or an empty table.
    pub fn behaviour_settings(&self, behaviour_id: &str) -> Value {
        self.document
            .get("behaviours")
            .and_then(|b| b.get(behaviour_id))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    /// Deep-merge a fragment into the document and persist the result.
    ///
    /// The fragment must be a table. The merged document must still describe
    /// a valid [`MimicConfig`]; otherwise nothing changes.
    pub fn merge(&mut self, fragment: &Value) -> Result<()> {
        if !fragment.is_object() {
            return Err(MimicError::Config(format!(
                "config fragment must be an object, got {}",
                type_name(fragment)
            )));
        }

        let mut merged = self.document.clone();
        deep_merge(&mut merged, fragment);
        typed(&merged)?;

        if self.persistent {
            write_document(&self.config_path, &merged)?;
        }
        self.document = merged;
        debug!(path = ?self.config_path, "configuration merged");
        Ok(())
    }

    /// Merge a fragment into `[behaviours.<id>]`, creating the section when absent.
    pub fn merge_behaviour(&mut self, behaviour_id: &str, fragment: &Value) -> Result<()> {
        if behaviour_id.is_empty() {
            return Err(MimicError::Config("behaviour id is empty".into()));
        }
        let mut section = Map::new();
        section.insert(behaviour_id.to_string(), fragment.clone());
        let mut behaviours = Map::new();
        behaviours.insert("behaviours".to_string(), Value::Object(section));
        self.merge(&Value::Object(behaviours))
    }

    /// Write the current document to disk.
    pub fn save(&self) -> Result<()> {
        write_document(&self.config_path, &self.document)
    }

    /// Reload the document from disk.
    pub fn reload(&mut self) -> Result<()> {
        if !self.config_path.exists() {
            return Err(MimicError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let document = read_document(&self.config_path)?;
        typed(&document)?;
        self.document = document;
        info!("configuration reloaded");
        Ok(())
    }
}

/// Apply env var overrides (MIMIC_SERVER_HTTP_URL, MIMIC_LOG_LEVEL, etc.)
///
/// `lookup` resolves a variable name; the store passes `std::env::var`.
pub fn apply_env_overrides<F>(mut config: MimicConfig, lookup: F) -> MimicConfig
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("MIMIC_SERVER_HTTP_URL") {
        config.server.http_url = v;
    }
    if let Some(v) = lookup("MIMIC_SERVER_WEBSOCKET_URL") {
        config.server.websocket_url = v;
    }
    if let Some(v) = lookup("MIMIC_LOG_LEVEL") {
        config.logging.level = v;
    }
    // Credentials: the file takes priority, env is the fallback.
    if config.general.user.domain_email.is_none() {
        if let Some(v) = lookup("MIMIC_USER_EMAIL") {
            config.general.user.domain_email = Some(v);
        }
    }
    if config.general.user.domain_password.is_none() {
        if let Some(v) = lookup("MIMIC_USER_PASSWORD") {
            config.general.user.domain_password = Some(v);
        }
    }
    config
}

fn typed(document: &Value) -> Result<MimicConfig> {
    serde_json::from_value(document.clone())
        .map_err(|e| MimicError::Config(format!("invalid configuration: {}", e)))
}

fn normalise(document: Value) -> Result<Value> {
    match document {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(document),
        other => Err(MimicError::Config(format!(
            "configuration root must be a table, got {}",
            type_name(&other)
        ))),
    }
}

fn read_document(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)?;
    let document = toml::from_str::<Value>(&raw).map_err(|e| {
        MimicError::Config(format!("failed to parse {}: {}", path.display(), e))
    })?;
    normalise(document)
}

/// Write to a sibling temp file, then rename over the target.
fn write_document(path: &Path, document: &Value) -> Result<()> {
    let rendered = toml::to_string_pretty(&strip_nulls(document))
        .map_err(|e| MimicError::Config(format!("failed to serialize config: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, rendered)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
