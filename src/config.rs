/// Notifier configuration: persisted as TOML.
///
/// Location: `--config <FILE>`, or `<workspace>/.vscode/qat-notifier.toml`
/// when a workspace is given. A missing file means "all defaults".
///
/// Every option takes effect without a restart: the config file is watched
/// (see `watcher.rs`) and each successful re-read is published to the engine
/// and the rule store over a `watch` channel.
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_RULES_PATH: &str = ".vscode/qat-rules.json";
pub const DEFAULT_CONFIG_FILE: &str = ".vscode/qat-notifier.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("config parse error in {path}: {source}")]
    Parse {
        path:   PathBuf,
        source: toml::de::Error,
    },

    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config {path}: {source}")]
    Write {
        path:   PathBuf,
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// NotifierConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifierConfig {
    /// Master on/off switch for all notifications.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Rules file, absolute or relative to the workspace root.
    #[serde(default = "default_rules_path")]
    pub rules_path: String,

    /// Minimum gap between any two notifications. 0 (or negative) disables
    /// the check.
    #[serde(default = "default_global_cooldown_ms", deserialize_with = "non_negative")]
    pub global_cooldown_ms: u64,

    /// Cap on how much document text is sampled into a snapshot.
    #[serde(default = "default_max_scan_chars", deserialize_with = "non_negative_usize")]
    pub max_scan_chars: usize,

    /// Idle threshold for `onIdle` triggers and the default for `dirtyIdle`
    /// checks. 0 turns idle detection off.
    #[serde(default = "default_idle_ms", deserialize_with = "non_negative")]
    pub idle_ms: u64,
}

fn default_enabled() -> bool { true }
fn default_rules_path() -> String { DEFAULT_RULES_PATH.to_owned() }
fn default_global_cooldown_ms() -> u64 { 15_000 }
fn default_max_scan_chars() -> usize { 20_000 }
fn default_idle_ms() -> u64 { 120_000 }

/// Millisecond and size options accept any TOML number. Negatives clamp to
/// 0 and fractions truncate.
#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Int(i64),
    Float(f64),
}

fn non_negative<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(match Number::deserialize(deserializer)? {
        Number::Int(n)   => n.max(0) as u64,
        Number::Float(f) => f.max(0.0) as u64,
    })
}

fn non_negative_usize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let n = non_negative(deserializer)?;
    Ok(usize::try_from(n).unwrap_or(usize::MAX))
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled:            default_enabled(),
            rules_path:         default_rules_path(),
            global_cooldown_ms: default_global_cooldown_ms(),
            max_scan_chars:     default_max_scan_chars(),
            idle_ms:            default_idle_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

pub fn load_or_default(path: &Path) -> Result<NotifierConfig, ConfigError> {
    if !path.exists() {
        return Ok(NotifierConfig::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save(config: &NotifierConfig, path: &Path) -> Result<(), ConfigError> {
    let raw = toml::to_string_pretty(config)?;
    let write_err = |source| ConfigError::Write { path: path.to_path_buf(), source };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(write_err)?;
    }
    std::fs::write(path, raw).map_err(write_err)
}

/// Default config file for a workspace, when `--config` is not given.
pub fn default_config_path(workspace: Option<&Path>) -> Option<PathBuf> {
    workspace.map(|ws| ws.join(DEFAULT_CONFIG_FILE))
}
