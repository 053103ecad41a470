/// Notification gate and display sinks.
///
/// The gate enforces one global cooldown across every rule: a notification
/// is shown only if at least `global_cooldown_ms` has passed since the last
/// one that was actually shown. Rejections (cooldown, empty message) are
/// normal outcomes and never consume the cooldown.
use crate::{clock::SharedClock, rules::NotifyLevel};
use serde::{Deserialize, Serialize};
use std::io::Write;

// ---------------------------------------------------------------------------
// Payload + sinks
// ---------------------------------------------------------------------------

/// One displayed notification, as written to stdout (one JSON object per line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub level:        NotifyLevel,
    pub message:      String,
    pub rule_id:      String,
    pub timestamp_ms: u64,
}

pub trait NotificationSink {
    fn show(&mut self, notification: &Notification);
}

/// Writes notifications as JSON lines to stdout for the editor host.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl NotificationSink for StdoutSink {
    fn show(&mut self, notification: &Notification) {
        let line = match serde_json::to_string(notification) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to serialize notification: {}", e);
                return;
            }
        };
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tracing::warn!("Failed to write notification to stdout: {}", e);
        }
    }
}

/// Log-only sink, for running without an editor host attached.
#[derive(Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn show(&mut self, notification: &Notification) {
        match notification.level {
            NotifyLevel::Info    => tracing::info!("[notify] {}", notification.message),
            NotifyLevel::Warning => tracing::warn!("[notify] {}", notification.message),
            NotifyLevel::Error   => tracing::error!("[notify] {}", notification.message),
        }
    }
}

impl<S: NotificationSink + ?Sized> NotificationSink for Box<S> {
    fn show(&mut self, notification: &Notification) {
        (**self).show(notification)
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct NotificationGate<S> {
    sink:               S,
    clock:              SharedClock,
    global_cooldown_ms: u64,
    last_shown_ms:      Option<u64>,
}

impl<S: NotificationSink> NotificationGate<S> {
    pub fn new(sink: S, clock: SharedClock, global_cooldown_ms: u64) -> Self {
        Self {
            sink,
            clock,
            global_cooldown_ms,
            last_shown_ms: None,
        }
    }

    pub fn set_global_cooldown_ms(&mut self, ms: u64) {
        if ms != self.global_cooldown_ms {
            tracing::info!("Global cooldown updated: {}ms", ms);
        }
        self.global_cooldown_ms = ms;
    }

    pub fn last_shown_ms(&self) -> Option<u64> {
        self.last_shown_ms
    }

    /// Returns true iff the notification was actually displayed.
    pub fn notify(&mut self, level: NotifyLevel, message: &str, rule_id: &str) -> bool {
        if message.trim().is_empty() {
            tracing::warn!("Skipped notification with empty message.");
            return false;
        }

        let now = self.clock.now_ms();
        if self.global_cooldown_ms > 0 {
            if let Some(last) = self.last_shown_ms {
                let since_last = now.saturating_sub(last);
                if since_last < self.global_cooldown_ms {
                    tracing::debug!(
                        "Global cooldown active ({}ms < {}ms).",
                        since_last, self.global_cooldown_ms
                    );
                    return false;
                }
            }
        }

        self.sink.show(&Notification {
            level,
            message:      message.to_owned(),
            rule_id:      rule_id.to_owned(),
            timestamp_ms: now,
        });
        self.last_shown_ms = Some(now);
        tracing::info!("Notification shown ({}): {}", level, message);
        true
    }

    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;

    /// Records every notification it is asked to show.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        pub shown: Vec<Notification>,
    }

    impl NotificationSink for RecordingSink {
        fn show(&mut self, notification: &Notification) {
            self.shown.push(notification.clone());
        }
    }

    fn gate(cooldown_ms: u64) -> (NotificationGate<RecordingSink>, std::sync::Arc<ManualClock>) {
        let clock = ManualClock::new(1_000_000);
        (NotificationGate::new(RecordingSink::default(), clock.clone(), cooldown_ms), clock)
    }

    #[test]
    fn first_notification_is_shown() {
        let (mut gate, _) = gate(15_000);
        assert!(gate.notify(NotifyLevel::Info, "Saved!", "r1"));
        assert_eq!(gate.sink().shown.len(), 1);
        assert_eq!(gate.sink().shown[0].message, "Saved!");
        assert_eq!(gate.sink().shown[0].rule_id, "r1");
    }

    #[test]
    fn global_cooldown_applies_across_rules() {
        let (mut gate, clock) = gate(15_000);
        assert!(gate.notify(NotifyLevel::Info, "one", "a"));
        clock.advance(14_999);
        assert!(!gate.notify(NotifyLevel::Error, "two", "b"));
        clock.advance(1);
        assert!(gate.notify(NotifyLevel::Error, "two", "b"));
        assert_eq!(gate.sink().shown.len(), 2);
    }

    #[test]
    fn rejection_does_not_consume_cooldown() {
        let (mut gate, clock) = gate(10_000);
        assert!(gate.notify(NotifyLevel::Info, "one", "a"));
        clock.advance(5_000);
        assert!(!gate.notify(NotifyLevel::Info, "two", "a"));
        clock.advance(5_000);
        // Measured from the last *shown* notification, not the rejected one
        assert!(gate.notify(NotifyLevel::Info, "three", "a"));
    }

    #[test]
    fn empty_message_is_rejected_without_consuming_cooldown() {
        let (mut gate, _) = gate(10_000);
        assert!(!gate.notify(NotifyLevel::Info, "   ", "a"));
        assert_eq!(gate.last_shown_ms(), None);
        assert!(gate.notify(NotifyLevel::Info, "real", "a"));
    }

    #[test]
    fn zero_cooldown_disables_the_check() {
        let (mut gate, _) = gate(0);
        assert!(gate.notify(NotifyLevel::Info, "one", "a"));
        assert!(gate.notify(NotifyLevel::Info, "two", "a"));
        assert_eq!(gate.sink().shown.len(), 2);
    }

    #[test]
    fn notification_serializes_as_camel_case() {
        let n = Notification {
            level:        NotifyLevel::Warning,
            message:      "Heads up".to_owned(),
            rule_id:      "r1".to_owned(),
            timestamp_ms: 42,
        };
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(
            json,
            r#"{"level":"warning","message":"Heads up","ruleId":"r1","timestampMs":42}"#
        );
    }
}
