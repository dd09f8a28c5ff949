//! Configuration system for the Eisen client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/eisen/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use eisen_proto::task::MAX_TASK_TITLE_LENGTH;

use crate::identity::BootstrapConfig;
use crate::sync::SyncConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    sync: SyncFileConfig,
    bootstrap: BootstrapFileConfig,
    storage: StorageFileConfig,
    identity: IdentityFileConfig,
    ui: UiFileConfig,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    echo_window_ms: Option<u64>,
    bulk_debounce_ms: Option<u64>,
    retry_interval_ms: Option<u64>,
    max_retry_backoff_ms: Option<u64>,
}

/// `[bootstrap]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BootstrapFileConfig {
    timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    data_dir: Option<PathBuf>,
    blob_name: Option<String>,
    store_url: Option<String>,
    connect_timeout_secs: Option<u64>,
}

/// `[identity]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct IdentityFileConfig {
    actor_id: Option<String>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
    max_task_title_len: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct EisenConfig {
    // -- Sync --
    /// Remote snapshots this soon after a local write are treated as echoes.
    pub echo_window: Duration,
    /// Minimum spacing between bulk writes.
    pub bulk_debounce: Duration,
    /// First retry delay for a failed write.
    pub retry_interval: Duration,
    /// Cap for the doubling retry delay.
    pub max_retry_backoff: Duration,

    // -- Bootstrap --
    /// Total time allowed for identity resolution and remote connect.
    pub bootstrap_timeout: Duration,
    /// How often the identity provider is polled.
    pub bootstrap_poll_interval: Duration,

    // -- Storage --
    /// Directory holding the local blob.
    pub data_dir: PathBuf,
    /// Local blob file name, without extension.
    pub blob_name: String,
    /// Remote document store WebSocket URL.
    pub store_url: Option<String>,
    /// Per-request timeout for the remote store.
    pub connect_timeout: Duration,

    // -- Identity --
    /// Configured actor id; `None` means the local sentinel.
    pub actor_id: Option<String>,

    // -- UI --
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
    /// Maximum task title length in characters.
    pub max_task_title_len: usize,
}

impl Default for EisenConfig {
    fn default() -> Self {
        Self {
            echo_window: Duration::from_millis(1000),
            bulk_debounce: Duration::from_millis(1000),
            retry_interval: Duration::from_millis(2000),
            max_retry_backoff: Duration::from_millis(30_000),
            bootstrap_timeout: Duration::from_millis(3000),
            bootstrap_poll_interval: Duration::from_millis(100),
            data_dir: default_data_dir(),
            blob_name: "eisen-tasks".to_string(),
            store_url: None,
            connect_timeout: Duration::from_secs(10),
            actor_id: None,
            timestamp_format: "%Y-%m-%d %H:%M".to_string(),
            max_task_title_len: MAX_TASK_TITLE_LENGTH,
        }
    }
}

impl EisenConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path (`~/.config/eisen/config.toml`) is
    /// tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            echo_window: file
                .sync
                .echo_window_ms
                .map_or(defaults.echo_window, Duration::from_millis),
            bulk_debounce: file
                .sync
                .bulk_debounce_ms
                .map_or(defaults.bulk_debounce, Duration::from_millis),
            retry_interval: file
                .sync
                .retry_interval_ms
                .map_or(defaults.retry_interval, Duration::from_millis),
            max_retry_backoff: file
                .sync
                .max_retry_backoff_ms
                .map_or(defaults.max_retry_backoff, Duration::from_millis),
            bootstrap_timeout: file
                .bootstrap
                .timeout_ms
                .map_or(defaults.bootstrap_timeout, Duration::from_millis),
            bootstrap_poll_interval: file
                .bootstrap
                .poll_interval_ms
                .map_or(defaults.bootstrap_poll_interval, Duration::from_millis),
            data_dir: cli
                .data_dir
                .clone()
                .or_else(|| file.storage.data_dir.clone())
                .unwrap_or(defaults.data_dir),
            blob_name: file
                .storage
                .blob_name
                .clone()
                .unwrap_or(defaults.blob_name),
            store_url: cli
                .store_url
                .clone()
                .or_else(|| file.storage.store_url.clone()),
            connect_timeout: file
                .storage
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            actor_id: cli
                .actor_id
                .clone()
                .or_else(|| file.identity.actor_id.clone())
                .filter(|id| !id.trim().is_empty()),
            timestamp_format: file
                .ui
                .timestamp_format
                .clone()
                .unwrap_or(defaults.timestamp_format),
            max_task_title_len: file
                .ui
                .max_task_title_len
                .unwrap_or(defaults.max_task_title_len),
        }
    }

    /// Settings for the sync coordinator.
    #[must_use]
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            echo_window_ms: duration_ms(self.echo_window),
            bulk_debounce_ms: duration_ms(self.bulk_debounce),
            retry_interval_ms: duration_ms(self.retry_interval),
            max_retry_backoff_ms: duration_ms(self.max_retry_backoff),
            max_title_len: self.max_task_title_len,
        }
    }

    /// Settings for backend selection at startup.
    #[must_use]
    pub fn bootstrap_config(&self) -> BootstrapConfig {
        BootstrapConfig {
            timeout: self.bootstrap_timeout,
            poll_interval: self.bootstrap_poll_interval,
            store_url: self.store_url.clone(),
            request_timeout: self.connect_timeout,
            data_dir: self.data_dir.clone(),
            blob_name: self.blob_name.clone(),
        }
    }
}

/// Global CLI options, shared by every subcommand.
#[derive(clap::Args, Debug, Default)]
pub struct CliArgs {
    /// Actor whose tasks are shown and edited.
    #[arg(long, global = true, env = "EISEN_ACTOR_ID")]
    pub actor_id: Option<String>,

    /// WebSocket URL of the remote document store.
    #[arg(long, global = true, env = "EISEN_STORE_URL")]
    pub store_url: Option<String>,

    /// Directory for the local task file.
    #[arg(long, global = true, env = "EISEN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Keep everything in memory; nothing is written to disk.
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Path to config file (default: `~/.config/eisen/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info", env = "EISEN_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/eisen.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("eisen")
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("eisen").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
