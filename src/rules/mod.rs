/// Rule model and check evaluators.
///
/// Rules are produced by the store (`store.rs`) after validation, so every
/// field here already satisfies the rule invariants: non-empty id, known
/// trigger/check/level, and at least one trimmed, non-empty message.
///
/// Each check kind lives in its own file and exposes a pure
/// `evaluate(check, ctx) -> bool`.
pub mod always;
pub mod diagnostics;
pub mod dirty_idle;
pub mod glob;

use crate::{
    diagnostics::{DiagnosticsSource, DiagnosticsState},
    snapshot::EditorSnapshot,
};
use glob::FileGlob;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// An ordered, immutable rule set. Replaced wholesale on reload.
pub type RuleSet = Arc<[Rule]>;

// ---------------------------------------------------------------------------
// Closed vocabularies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Trigger {
    OnOpen,
    OnSave,
    OnType,
    OnIdle,
    Interval,
}

impl Trigger {
    pub const ALL: [Trigger; 5] = [
        Trigger::OnOpen,
        Trigger::OnSave,
        Trigger::OnType,
        Trigger::OnIdle,
        Trigger::Interval,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnOpen   => "onOpen",
            Self::OnSave   => "onSave",
            Self::OnType   => "onType",
            Self::OnIdle   => "onIdle",
            Self::Interval => "interval",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckType {
    Diagnostics,
    DirtyIdle,
    Always,
}

impl CheckType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "diagnostics" => Some(Self::Diagnostics),
            "dirtyIdle"   => Some(Self::DirtyIdle),
            "always"      => Some(Self::Always),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

impl NotifyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info    => "info",
            Self::Warning => "warning",
            Self::Error   => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "info"    => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error"   => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for NotifyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Rule {
    pub id:          String,
    pub enabled:     bool,
    pub trigger:     Trigger,
    pub when:        When,
    pub check:       Check,
    pub notify:      Notify,
    /// Only ever `Some` with a positive value; absent or non-positive
    /// cooldowns are normalized away at load time.
    pub cooldown_ms: Option<u64>,
}

/// Pre-conditions narrowing which documents a rule applies to.
/// Both fields are AND-ed; `None` means no constraint.
#[derive(Debug, Clone, Default)]
pub struct When {
    pub language_ids: Option<Vec<String>>,
    pub file_glob:    Option<FileGlob>,
}

impl When {
    pub fn is_unconstrained(&self) -> bool {
        self.language_ids.is_none() && self.file_glob.is_none()
    }

    pub fn matches(&self, snapshot: &EditorSnapshot) -> bool {
        // A document-less context can only satisfy unconstrained rules
        if snapshot.document.is_none() {
            return self.is_unconstrained();
        }

        if let Some(ids) = &self.language_ids {
            let Some(lang) = snapshot.language_id.as_deref() else {
                return false;
            };
            if !ids.iter().any(|id| id == lang) {
                return false;
            }
        }

        if let Some(glob) = &self.file_glob {
            let Some(target) = snapshot
                .relative_path
                .as_deref()
                .or(snapshot.file_name.as_deref())
            else {
                return false;
            };
            if !glob.is_match(target) {
                return false;
            }
        }

        true
    }
}

#[derive(Debug, Clone)]
pub struct Check {
    pub kind:    CheckType,
    /// Diagnostics mode; defaults to `errors` at evaluation time.
    pub mode:    Option<DiagnosticsState>,
    /// Dirty-idle threshold; defaults to the configured idle threshold.
    pub idle_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Notify {
    pub level:    NotifyLevel,
    pub messages: Vec<String>,
}

// ---------------------------------------------------------------------------
// Check evaluation
// ---------------------------------------------------------------------------

/// Read-only context passed to every check evaluator.
pub struct MatchContext<'a> {
    pub snapshot:         &'a EditorSnapshot,
    pub diagnostics:      &'a dyn DiagnosticsSource,
    pub idle_duration_ms: u64,
    /// Configured idle threshold, used when a dirty-idle check has no `idleMs`.
    pub default_idle_ms:  u64,
}

pub fn evaluate(check: &Check, ctx: &MatchContext) -> bool {
    match check.kind {
        CheckType::Diagnostics => diagnostics::evaluate(check, ctx),
        CheckType::DirtyIdle   => dirty_idle::evaluate(check, ctx),
        CheckType::Always      => always::evaluate(check, ctx),
    }
}
