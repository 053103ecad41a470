/// Rule engine: the decision core of the notifier.
///
/// For each trigger it selects the enabled rules registered for that
/// trigger, walks them *in rule-set order*, and stops at the first rule that
/// passes `when`, is off cooldown and whose check matches. That rule's
/// message goes to the notification gate; if the gate shows it, the rule's
/// firing time is recorded. Either way no further rules are tried, so one
/// trigger produces at most one notification. Rule authors control
/// precedence purely by ordering.
///
/// Two independent rate limits apply:
///   per-rule → `cooldownMs`, tracked in `FiringHistory`
///   global   → `globalCooldownMs`, enforced by `NotificationGate`
use crate::{
    clock::SharedClock,
    config::NotifierConfig,
    diagnostics::DiagnosticsSource,
    notification::{NotificationGate, NotificationSink},
    rules::{self, MatchContext, Rule, RuleSet, Trigger},
    snapshot::{DocumentId, SnapshotProvider},
    state::FiringHistory,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerOptions {
    /// Document to evaluate; the active document when `None`.
    pub document:         Option<DocumentId>,
    /// Measured idle duration; the tracker's current value when `None`.
    pub idle_duration_ms: Option<u64>,
    /// Restrict evaluation to rules with this id (interval ticks).
    pub rule_id:          Option<String>,
}

impl TriggerOptions {
    pub fn for_document(document: DocumentId) -> Self {
        Self { document: Some(document), ..Self::default() }
    }

    pub fn for_rule(rule_id: impl Into<String>) -> Self {
        Self { rule_id: Some(rule_id.into()), ..Self::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Notifications are switched off in configuration.
    Disabled,
    /// No candidate rule passed `when`, cooldown and check.
    NoMatch,
    /// A rule matched but the gate refused to show its message.
    Suppressed { rule_id: String },
    Notified { rule_id: String, message: String },
}

/// Collaborators a trigger is evaluated against.
pub struct Environment<'a> {
    pub editor:           &'a dyn SnapshotProvider,
    pub diagnostics:      &'a dyn DiagnosticsSource,
    /// Time since last user activity, as of this trigger.
    pub idle_duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Message selection
// ---------------------------------------------------------------------------

/// Uniform random pick over a rule's messages. Seedable for tests and for
/// reproducible sessions (`--seed`).
pub struct MessagePicker {
    rng: StdRng,
}

impl MessagePicker {
    pub fn from_entropy() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    pub fn seeded(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    pub fn pick<'a>(&mut self, messages: &'a [String]) -> Option<&'a str> {
        if messages.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..messages.len());
        Some(messages[index].as_str())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct RuleEngine<S> {
    rules:   RuleSet,
    config:  NotifierConfig,
    history: FiringHistory,
    gate:    NotificationGate<S>,
    picker:  MessagePicker,
    clock:   SharedClock,
}

impl<S: NotificationSink> RuleEngine<S> {
    pub fn new(
        rules:  RuleSet,
        config: NotifierConfig,
        sink:   S,
        clock:  SharedClock,
        picker: MessagePicker,
    ) -> Self {
        let gate = NotificationGate::new(sink, clock.clone(), config.global_cooldown_ms);
        Self {
            rules,
            config,
            history: FiringHistory::default(),
            gate,
            picker,
            clock,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Swap in a new rule set. Firing history is kept: a reload does not
    /// reset cooldowns for rule ids that survive it.
    pub fn set_rules(&mut self, rules: RuleSet) {
        self.rules = rules;
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    pub fn update_config(&mut self, config: NotifierConfig) {
        self.gate.set_global_cooldown_ms(config.global_cooldown_ms);
        self.config = config;
    }

    pub fn history(&self) -> &FiringHistory {
        &self.history
    }

    pub fn gate(&self) -> &NotificationGate<S> {
        &self.gate
    }

    pub fn handle_trigger(
        &mut self,
        trigger: Trigger,
        options: TriggerOptions,
        env:     &Environment,
    ) -> TriggerOutcome {
        if !self.config.enabled {
            tracing::debug!("Notifier is disabled.");
            return TriggerOutcome::Disabled;
        }

        let rules = self.rules.clone();
        let mut candidates = candidates(&rules, trigger, options.rule_id.as_deref()).peekable();
        if candidates.peek().is_none() {
            return TriggerOutcome::NoMatch;
        }

        let snapshot = env.editor.snapshot(options.document.as_ref());
        let ctx = MatchContext {
            snapshot:         &snapshot,
            diagnostics:      env.diagnostics,
            idle_duration_ms: options.idle_duration_ms.unwrap_or(env.idle_duration_ms),
            default_idle_ms:  self.config.idle_ms,
        };
        let now = self.clock.now_ms();

        for rule in candidates {
            if !rule.when.matches(&snapshot) {
                tracing::debug!("Rule {} skipped due to when conditions.", rule.id);
                continue;
            }
            if !self.history.is_off_cooldown(&rule.id, rule.cooldown_ms, now) {
                continue;
            }

            let matched = rules::evaluate(&rule.check, &ctx);
            tracing::debug!(
                "Rule {} evaluated: {}.",
                rule.id,
                if matched { "matched" } else { "not matched" }
            );
            if !matched {
                continue;
            }

            // First match wins, whether or not the gate lets it through
            let Some(message) = self.picker.pick(&rule.notify.messages) else {
                return TriggerOutcome::Suppressed { rule_id: rule.id.clone() };
            };
            if self.gate.notify(rule.notify.level, message, &rule.id) {
                self.history.record(&rule.id, now);
                return TriggerOutcome::Notified {
                    rule_id: rule.id.clone(),
                    message: message.to_owned(),
                };
            }
            return TriggerOutcome::Suppressed { rule_id: rule.id.clone() };
        }

        TriggerOutcome::NoMatch
    }
}

/// Enabled rules for `trigger`, in rule-set order, optionally narrowed to one id.
fn candidates<'r>(
    rules:   &'r [Rule],
    trigger: Trigger,
    rule_id: Option<&'r str>,
) -> impl Iterator<Item = &'r Rule> + 'r {
    rules.iter().filter(move |rule| {
        if rule.trigger != trigger || rule_id.is_some_and(|id| id != rule.id) {
            return false;
        }
        if !rule.enabled {
            tracing::debug!("Rule {} is disabled.", rule.id);
            return false;
        }
        true
    })
}
