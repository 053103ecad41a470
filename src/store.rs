/// Rule store: loads, validates and publishes the active rule set.
///
/// Loading is fail-open: a missing, unreadable or malformed rules file, or
/// one with no valid entries, degrades to the built-in default rules. The
/// engine is never left without a usable rule set.
///
/// Accepted document shapes:
///   [ {rule}, {rule}, ... ]
///   { "rules": [ {rule}, ... ] }
///
/// Each entry is validated on its own; an invalid entry is dropped with a
/// logged reason and never aborts the rest of the load.
use crate::{
    config::NotifierConfig,
    defaults,
    diagnostics::DiagnosticsState,
    rules::{glob::FileGlob, Check, CheckType, Notify, NotifyLevel, Rule, RuleSet, Trigger, When},
    watcher,
};
use anyhow::Result;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, watch};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RuleValidationError {
    #[error("entry is not an object")]
    NotAnObject,

    #[error("missing id")]
    MissingId,

    #[error("rule '{id}': invalid trigger {found}")]
    InvalidTrigger { id: String, found: String },

    #[error("rule '{id}': invalid check type {found}")]
    InvalidCheck { id: String, found: String },

    #[error("rule '{id}': invalid notification level {found}")]
    InvalidLevel { id: String, found: String },

    #[error("rule '{id}': missing messages")]
    MissingMessages { id: String },

    #[error("rule '{id}': invalid fileGlob '{glob}': {source}")]
    InvalidGlob {
        id:     String,
        glob:   String,
        source: regex::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RuleLoadError {
    #[error("no workspace folder or rules path")]
    NoSource,

    #[error("rules file not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read rules from {}: {source}", .path.display())]
    Read {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse rules from {}: {source}", .path.display())]
    Parse {
        path:   PathBuf,
        source: serde_json::Error,
    },

    #[error("rules file has no rules array: {}", .0.display())]
    NoRulesArray(PathBuf),

    #[error("no valid rules in {}", .0.display())]
    NoValidRules(PathBuf),
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn describe(value: Option<&Value>) -> String {
    value.map(Value::to_string).unwrap_or_else(|| "(missing)".to_owned())
}

fn normalize_when(id: &str, raw: Option<&Map<String, Value>>) -> Result<When, RuleValidationError> {
    let Some(raw) = raw else {
        return Ok(When::default());
    };

    let language_ids = raw
        .get("languageId")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_str).map(str::to_owned).collect::<Vec<_>>())
        .filter(|ids| !ids.is_empty());

    let file_glob = match raw.get("fileGlob").and_then(Value::as_str).filter(|g| !g.is_empty()) {
        Some(glob) => Some(FileGlob::new(glob).map_err(|source| RuleValidationError::InvalidGlob {
            id:   id.to_owned(),
            glob: glob.to_owned(),
            source,
        })?),
        None => None,
    };

    Ok(When { language_ids, file_glob })
}

/// Validate one raw rule entry. Never partially accepts a rule.
pub fn normalize_rule(raw: &Value) -> Result<Rule, RuleValidationError> {
    let obj = raw.as_object().ok_or(RuleValidationError::NotAnObject)?;

    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .ok_or(RuleValidationError::MissingId)?
        .to_owned();

    let trigger = obj
        .get("trigger")
        .and_then(Value::as_str)
        .and_then(Trigger::parse)
        .ok_or_else(|| RuleValidationError::InvalidTrigger {
            id:    id.clone(),
            found: describe(obj.get("trigger")),
        })?;

    let raw_check = obj.get("check").and_then(Value::as_object);
    let kind = raw_check
        .and_then(|c| c.get("type"))
        .and_then(Value::as_str)
        .and_then(CheckType::parse)
        .ok_or_else(|| RuleValidationError::InvalidCheck {
            id:    id.clone(),
            found: describe(raw_check.and_then(|c| c.get("type"))),
        })?;

    let raw_notify = obj.get("notify").and_then(Value::as_object);
    let level = raw_notify
        .and_then(|n| n.get("level"))
        .and_then(Value::as_str)
        .and_then(NotifyLevel::parse)
        .ok_or_else(|| RuleValidationError::InvalidLevel {
            id:    id.clone(),
            found: describe(raw_notify.and_then(|n| n.get("level"))),
        })?;

    let messages: Vec<String> = raw_notify
        .and_then(|n| n.get("messages"))
        .and_then(Value::as_array)
        .map(|msgs| {
            msgs.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    if messages.is_empty() {
        return Err(RuleValidationError::MissingMessages { id });
    }

    let when = normalize_when(&id, obj.get("when").and_then(Value::as_object))?;

    // Unknown modes fall back to the evaluator default (errors)
    let mode = raw_check
        .and_then(|c| c.get("mode"))
        .and_then(Value::as_str)
        .and_then(DiagnosticsState::parse);
    let idle_ms = raw_check
        .and_then(|c| c.get("idleMs"))
        .and_then(Value::as_f64)
        .map(|ms| ms.max(0.0) as u64);

    let cooldown_ms = obj
        .get("cooldownMs")
        .and_then(Value::as_f64)
        .filter(|ms| *ms > 0.0)
        .map(|ms| ms as u64);

    Ok(Rule {
        enabled: obj.get("enabled").and_then(Value::as_bool).unwrap_or(true),
        id,
        trigger,
        when,
        check: Check { kind, mode, idle_ms },
        notify: Notify { level, messages },
        cooldown_ms,
    })
}

/// Normalize every entry, dropping (and logging) the invalid ones.
pub fn normalize_rules(raw_rules: &[Value]) -> Vec<Rule> {
    raw_rules
        .iter()
        .filter_map(|raw| match normalize_rule(raw) {
            Ok(rule) => Some(rule),
            Err(e) => {
                tracing::warn!("Skipping invalid rule: {}", e);
                None
            }
        })
        .collect()
}

fn extract_rules(parsed: &Value) -> Option<&Vec<Value>> {
    match parsed {
        Value::Array(rules) => Some(rules),
        Value::Object(obj)  => obj.get("rules").and_then(Value::as_array),
        _ => None,
    }
}

/// Parse a rules document. `origin` is only used in error messages.
pub fn parse_rules_document(text: &str, origin: &Path) -> Result<Vec<Rule>, RuleLoadError> {
    let parsed: Value = serde_json::from_str(text).map_err(|source| RuleLoadError::Parse {
        path: origin.to_path_buf(),
        source,
    })?;
    let raw_rules = extract_rules(&parsed).ok_or_else(|| RuleLoadError::NoRulesArray(origin.to_path_buf()))?;
    let rules = normalize_rules(raw_rules);
    if rules.is_empty() {
        return Err(RuleLoadError::NoValidRules(origin.to_path_buf()));
    }
    Ok(rules)
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Absolute `rules_path` is used as-is; relative ones are joined to the
/// workspace root. No workspace or an empty path means no source.
pub fn resolve_rules_path(workspace_root: Option<&Path>, rules_path: &str) -> Option<PathBuf> {
    let workspace_root = workspace_root?;
    let rules_path = rules_path.trim();
    if rules_path.is_empty() {
        return None;
    }
    let path = Path::new(rules_path);
    if path.is_absolute() {
        Some(path.to_path_buf())
    } else {
        Some(workspace_root.join(path))
    }
}

pub async fn load_rules_file(path: &Path) -> Result<Vec<Rule>, RuleLoadError> {
    let text = tokio::fs::read_to_string(path).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            RuleLoadError::NotFound(path.to_path_buf())
        } else {
            RuleLoadError::Read { path: path.to_path_buf(), source }
        }
    })?;
    parse_rules_document(&text, path)
}

/// Load the rule set for `source`, falling back to the defaults on any error.
pub async fn load(source: Option<&Path>) -> RuleSet {
    let result = match source {
        Some(path) => load_rules_file(path).await,
        None       => Err(RuleLoadError::NoSource),
    };
    match result {
        Ok(rules) => rules.into(),
        Err(e @ (RuleLoadError::Read { .. } | RuleLoadError::Parse { .. })) => {
            tracing::error!("{}. Using built-in default rules.", e);
            defaults::default_rules()
        }
        Err(e) => {
            tracing::warn!("{}. Using built-in default rules.", e);
            defaults::default_rules()
        }
    }
}

// ---------------------------------------------------------------------------
// RuleStore
// ---------------------------------------------------------------------------

pub struct RuleStore {
    workspace_root: Option<PathBuf>,
    rules_path:     String,
    current:        watch::Sender<RuleSet>,
}

impl RuleStore {
    /// Starts out holding the defaults until the first `reload`.
    pub fn new(workspace_root: Option<PathBuf>, config: &NotifierConfig) -> Self {
        let (current, _) = watch::channel(defaults::default_rules());
        Self {
            workspace_root,
            rules_path: config.rules_path.clone(),
            current,
        }
    }

    /// Change notification: the receiver sees every completed reload.
    pub fn subscribe(&self) -> watch::Receiver<RuleSet> {
        self.current.subscribe()
    }

    pub fn current_rules(&self) -> RuleSet {
        self.current.borrow().clone()
    }

    pub fn resolved_path(&self) -> Option<PathBuf> {
        resolve_rules_path(self.workspace_root.as_deref(), &self.rules_path)
    }

    /// Returns true when the rules path changed.
    pub fn update_config(&mut self, config: &NotifierConfig) -> bool {
        if config.rules_path == self.rules_path {
            return false;
        }
        self.rules_path = config.rules_path.clone();
        true
    }

    pub async fn reload(&mut self) -> RuleSet {
        let rules = load(self.resolved_path().as_deref()).await;
        tracing::info!("Loaded {} rule(s).", rules.len());
        self.current.send_replace(rules.clone());
        rules
    }
}

// ---------------------------------------------------------------------------
// Store task
// ---------------------------------------------------------------------------

/// Reloads on startup, on explicit requests, when the rules file changes on
/// disk, and when the configured rules path changes. A config channel whose
/// sender is gone simply stops delivering path changes.
/// The file watch is (re-)armed before each reload.
pub async fn run(
    mut store:     RuleStore,
    mut reload_rx: mpsc::Receiver<()>,
    mut config_rx: watch::Receiver<NotifierConfig>,
    reload_tx:     mpsc::Sender<()>,
) -> Result<()> {
    let mut file_watch = None;
    rearm_rules_watch(&store, &mut file_watch, &reload_tx);
    store.reload().await;

    loop {
        tokio::select! {
            request = reload_rx.recv() => {
                if request.is_none() {
                    break;
                }
                rearm_rules_watch(&store, &mut file_watch, &reload_tx);
                store.reload().await;
            }
            Ok(()) = config_rx.changed() => {
                let config = config_rx.borrow_and_update().clone();
                if store.update_config(&config) {
                    tracing::info!("Rules path changed to '{}'", config.rules_path);
                    file_watch = None;
                    rearm_rules_watch(&store, &mut file_watch, &reload_tx);
                    store.reload().await;
                }
            }
        }
    }
    drop(file_watch);
    Ok(())
}

fn rearm_rules_watch(
    store:      &RuleStore,
    file_watch: &mut Option<watcher::FileWatch>,
    reload_tx:  &mpsc::Sender<()>,
) {
    match store.resolved_path() {
        Some(path) => watcher::rearm(file_watch, &path, reload_tx),
        None => *file_watch = None,
    }
}
