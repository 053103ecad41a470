/// Interval timers for `interval` rules.
///
/// One tokio task per enabled interval rule, each sending a `Tick` on a
/// channel every period. The whole set is torn down and rebuilt whenever the
/// rule set or configuration changes, so a reload never leaves a stale timer
/// running alongside its replacement. Ticks carry the schedule generation
/// they were sent under; ones still queued from an earlier generation are
/// dropped by the receiver.
use crate::{
    config::NotifierConfig,
    rules::{Rule, Trigger},
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Floor for rules that have no cooldown of their own.
pub const MIN_FALLBACK_PERIOD_MS: u64 = 60_000;

pub fn interval_period_ms(rule: &Rule, global_cooldown_ms: u64) -> u64 {
    match rule.cooldown_ms {
        Some(ms) if ms > 0 => ms,
        _ => global_cooldown_ms.max(MIN_FALLBACK_PERIOD_MS),
    }
}

/// `(rule id, period)` for every enabled interval rule, in rule-set order.
pub fn plan(rules: &[Rule], config: &NotifierConfig) -> Vec<(String, u64)> {
    rules
        .iter()
        .filter(|r| r.trigger == Trigger::Interval && r.enabled)
        .map(|r| (r.id.clone(), interval_period_ms(r, config.global_cooldown_ms)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub generation: u64,
    pub rule_id:    String,
}

#[derive(Default)]
pub struct IntervalScheduler {
    timers:     Vec<JoinHandle<()>>,
    generation: u64,
}

impl IntervalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.timers.len()
    }

    /// False for ticks sent by timers a later `reschedule` replaced.
    pub fn is_current(&self, tick: &Tick) -> bool {
        tick.generation == self.generation
    }

    pub fn cancel_all(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }

    /// Cancel every existing timer, then start one per planned rule. The
    /// first tick for each comes one full period from now.
    pub fn reschedule(&mut self, rules: &[Rule], config: &NotifierConfig, tx: &mpsc::Sender<Tick>) {
        self.cancel_all();
        self.generation += 1;
        let generation = self.generation;

        for (rule_id, period_ms) in plan(rules, config) {
            tracing::debug!("Scheduling interval rule {} every {}ms", rule_id, period_ms);
            let tx = tx.clone();
            let period = Duration::from_millis(period_ms);
            self.timers.push(tokio::spawn(async move {
                let mut ticker = time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let tick = Tick { generation, rule_id: rule_id.clone() };
                    if tx.send(tick).await.is_err() {
                        break;
                    }
                }
            }));
        }
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
