use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use mimic_config::{ConfigStore, MimicConfig, WarningSeverity};
use mimic_core::{IdleCycleStatus, MimicError};
use std::path::{Path, PathBuf};

mod behaviours;
mod run;
mod start;

/// Mimic: unattended user-behaviour client with remote control
#[derive(Parser)]
#[command(name = "mimic", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to mimic.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and, if enabled, the remote control link
    Start {
        /// Don't connect to the control server
        #[arg(long)]
        no_remote: bool,
        /// Initial idle cycle status (running, paused, stopped)
        #[arg(long)]
        idle_cycle: Option<IdleCycleStatus>,
    },
    /// List known behaviours and whether they can run on this host
    Behaviours {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one behaviour in the foreground until it finishes (Ctrl+C stops it)
    Run {
        /// Behaviour id
        id: String,
        /// Stop the behaviour after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set a config value in mimic.toml (dot-notation key)
    Set {
        /// Config key in dot notation (e.g. server.enabled, scheduler.idle_cycle)
        key: String,
        /// Value to set
        value: String,
    },
    /// Audit configuration
    Doctor,
    /// Show version and build info
    Version,
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub async fn run(self) -> mimic_core::Result<()> {
        // Load config first so we can use it for log format
        let store = ConfigStore::load(self.config.as_deref())?;
        let config = store.get()?;

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(config.logging.level.as_str())
        };
        init_logging(log_level, &config.logging.format);

        match self.command {
            Commands::Start {
                no_remote,
                idle_cycle,
            } => start::cmd_start(config, store, no_remote, idle_cycle).await,
            Commands::Behaviours { json } => behaviours::cmd_behaviours(&config, json),
            Commands::Run { id, timeout } => run::cmd_run(config, store, id, timeout).await,
            Commands::Config { json } => Self::cmd_config(&store, json),
            Commands::Set { key, value } => Self::cmd_config_set(store.path(), key, value),
            Commands::Doctor => Self::cmd_doctor(&config),
            Commands::Version => Self::cmd_version(),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    fn cmd_config(store: &ConfigStore, json: bool) -> mimic_core::Result<()> {
        let document = mimic_config::strip_nulls(store.document());
        if json {
            println!("{}", serde_json::to_string_pretty(&document)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&document)
                    .map_err(|e| MimicError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_config_set(path: &Path, key: String, value: String) -> mimic_core::Result<()> {
        match set_config_value(path, &key, &value)? {
            Some(old) => println!("✅ {} = {} (was {})", key, value, old.trim()),
            None => println!("✅ {key} = {value} (new)"),
        }
        Ok(())
    }

    fn cmd_doctor(config: &MimicConfig) -> mimic_core::Result<()> {
        println!("🩺 Mimic Doctor: configuration audit");
        println!();

        let warnings = match config.validate() {
            Ok(w) => w,
            Err(e) => {
                println!("{e}");
                return Ok(());
            }
        };

        let mut warn_count = 0;
        let mut info_count = 0;
        for w in &warnings {
            println!("  {w}");
            match w.severity {
                WarningSeverity::Warning => warn_count += 1,
                WarningSeverity::Info => info_count += 1,
                _ => {}
            }
        }

        // Catalog checks beyond schema validation
        let catalog =
            mimic_runtime::BehaviourCatalog::build(mimic_runtime::default_behaviours(config));
        let idle = catalog.ids_in(mimic_core::BehaviourCategory::Idle).len();
        if idle <= 1 {
            println!(
                "  💡 behaviours: only {idle} idle behaviour(s) available, so the idle cycle will repeat itself"
            );
            info_count += 1;
        }
        for d in catalog.unavailable() {
            if let mimic_runtime::Availability::Unavailable { reason } = &d.availability {
                println!("  ⚠️  behaviours.{}: unavailable ({})", d.id, reason);
                warn_count += 1;
            }
        }

        if !config.server.enabled {
            println!("  💡 server.enabled: remote control is off");
            info_count += 1;
        }

        println!();
        println!(
            "  ✅ {} behaviours available, ⚠️  {warn_count} warnings, 💡 {info_count} suggestions",
            catalog.available().count()
        );
        Ok(())
    }

    fn cmd_version() -> mimic_core::Result<()> {
        println!("Mimic v{}", env!("CARGO_PKG_VERSION"));
        println!("   Rust edition: 2024");
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        println!("   Host: {}", mimic_core::hostname());
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> mimic_core::Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "mimic", &mut std::io::stdout());
        Ok(())
    }
}

/// Initialize tracing. `RUST_LOG` wins over `level`.
fn init_logging(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

/// Write `key = value` into the TOML file at `path`, keeping its formatting.
/// Returns the previous value, if any.
fn set_config_value(path: &Path, key: &str, value: &str) -> mimic_core::Result<Option<String>> {
    let content = if path.exists() {
        std::fs::read_to_string(path).map_err(|e| {
            MimicError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?
    } else {
        String::new()
    };
    let mut doc = content.parse::<toml_edit::DocumentMut>().map_err(|e| {
        MimicError::Config(format!("Invalid TOML in {}: {}", path.display(), e))
    })?;

    // "server.http_url" → ["server", "http_url"]
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(MimicError::Config(format!("Invalid key '{key}'")));
    }
    let table_parts = &parts[..parts.len() - 1];
    let leaf_key = parts[parts.len() - 1];

    let mut table: &mut toml_edit::Item = doc.as_item_mut();
    for part in table_parts {
        if table.get(part).is_none() {
            table[part] = toml_edit::Item::Table(toml_edit::Table::new());
        }
        table = &mut table[part];
    }

    // Infer the value type: bool, integer, float, or string
    let toml_value = if value == "true" {
        toml_edit::value(true)
    } else if value == "false" {
        toml_edit::value(false)
    } else if let Ok(i) = value.parse::<i64>() {
        toml_edit::value(i)
    } else if let Ok(f) = value.parse::<f64>() {
        toml_edit::value(f)
    } else {
        toml_edit::value(value)
    };

    let old_value = table.get(leaf_key).map(|v| v.to_string());
    table[leaf_key] = toml_value;

    // Refuse to write something the loader would reject.
    let updated: MimicConfig = toml::from_str(&doc.to_string())
        .map_err(|e| MimicError::Config(format!("{key}: {e}")))?;
    updated.validate().map_err(MimicError::Config)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, doc.to_string()).map_err(|e| {
        MimicError::Config(format!("Cannot write {}: {}", path.display(), e))
    })?;
    Ok(old_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_start_flags() {
        let cli = Cli::try_parse_from(["mimic", "start", "--no-remote", "--idle-cycle", "paused"])
            .unwrap();
        match cli.command {
            Commands::Start {
                no_remote,
                idle_cycle,
            } => {
                assert!(no_remote);
                assert_eq!(idle_cycle, Some(IdleCycleStatus::Paused));
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn test_cli_rejects_verbose_and_quiet() {
        assert!(Cli::try_parse_from(["mimic", "-v", "-q", "version"]).is_err());
    }

    #[test]
    fn test_set_creates_tables_and_infers_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mimic.toml");

        assert_eq!(set_config_value(&path, "server.status_interval_secs", "30").unwrap(), None);
        assert_eq!(set_config_value(&path, "behaviours.browse.command", "firefox").unwrap(), None);
        let old = set_config_value(&path, "server.status_interval_secs", "15").unwrap();
        assert_eq!(old.as_deref().map(str::trim), Some("30"));

        let config: MimicConfig = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(config.server.status_interval_secs, 15);
        assert_eq!(config.behaviours["browse"]["command"], "firefox");
    }

    #[test]
    fn test_set_keeps_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mimic.toml");
        std::fs::write(&path, "# managed by ops\n[logging]\nlevel = \"info\"\n").unwrap();

        set_config_value(&path, "logging.level", "debug").unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("# managed by ops"));
        assert!(raw.contains("level = \"debug\""));
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mimic.toml");
        assert!(set_config_value(&path, "scheduler.tick_interval_ms", "0").is_err());
        assert!(set_config_value(&path, "scheduler.idle_cycle", "sometimes").is_err());
        assert!(set_config_value(&path, "server..url", "x").is_err());
        assert!(!path.exists());
    }
}
