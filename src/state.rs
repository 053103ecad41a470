/// Stateful trackers owned by the engine task.
///
/// Everything here is driven by explicit `now_ms` values, never by reading a
/// clock, so the engine decides what "now" is and tests can step time.
/// No locking is needed because the engine is single-threaded.
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Firing history (per-rule cooldowns)
// ---------------------------------------------------------------------------

/// rule id -> timestamp of its last *shown* notification.
/// In memory only; cleared when the process exits.
#[derive(Debug, Default)]
pub struct FiringHistory {
    last_fired: HashMap<String, u64>,
}

impl FiringHistory {
    pub fn record(&mut self, rule_id: &str, now_ms: u64) {
        self.last_fired.insert(rule_id.to_owned(), now_ms);
    }

    pub fn last_fired_ms(&self, rule_id: &str) -> Option<u64> {
        self.last_fired.get(rule_id).copied()
    }

    /// A rule with no cooldown, or one that never fired, is always off cooldown.
    pub fn is_off_cooldown(&self, rule_id: &str, cooldown_ms: Option<u64>, now_ms: u64) -> bool {
        let Some(cooldown) = cooldown_ms.filter(|c| *c > 0) else {
            return true;
        };
        let Some(last) = self.last_fired_ms(rule_id) else {
            return true;
        };
        let since_last = now_ms.saturating_sub(last);
        if since_last < cooldown {
            tracing::debug!("Rule {} cooldown ({}ms < {}ms).", rule_id, since_last, cooldown);
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Idle tracker
// ---------------------------------------------------------------------------

/// Fires once `idle_ms` has passed without activity, then re-arms for another
/// `idle_ms` so a user who stays away gets repeated idle events. An
/// `idle_ms` of 0 switches idle detection off.
#[derive(Debug)]
pub struct IdleTracker {
    idle_ms:          u64,
    last_activity_ms: u64,
    next_check_ms:    u64,
}

impl IdleTracker {
    pub fn new(idle_ms: u64, now_ms: u64) -> Self {
        Self {
            idle_ms,
            last_activity_ms: now_ms,
            next_check_ms:    now_ms.saturating_add(idle_ms),
        }
    }

    pub fn idle_ms(&self) -> u64 {
        self.idle_ms
    }

    pub fn mark_activity(&mut self, reason: &str, now_ms: u64) {
        tracing::trace!("Activity detected: {}", reason);
        self.last_activity_ms = now_ms;
        self.next_check_ms = now_ms.saturating_add(self.idle_ms);
    }

    pub fn set_idle_ms(&mut self, idle_ms: u64, now_ms: u64) {
        if idle_ms == self.idle_ms {
            return;
        }
        self.idle_ms = idle_ms;
        tracing::info!("Idle threshold updated: {}ms", idle_ms);
        let remaining = idle_ms.saturating_sub(self.idle_duration_ms(now_ms));
        self.next_check_ms = now_ms.saturating_add(remaining);
    }

    pub fn idle_duration_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_activity_ms)
    }

    pub fn is_enabled(&self) -> bool {
        self.idle_ms > 0
    }

    /// Milliseconds until the next idle check is due (0 if overdue), or
    /// `None` while idle detection is off.
    pub fn until_next_check_ms(&self, now_ms: u64) -> Option<u64> {
        if !self.is_enabled() {
            return None;
        }
        Some(self.next_check_ms.saturating_sub(now_ms))
    }

    /// Returns the idle duration when an idle event is due.
    pub fn poll(&mut self, now_ms: u64) -> Option<u64> {
        if !self.is_enabled() || now_ms < self.next_check_ms {
            return None;
        }
        let idle_for = self.idle_duration_ms(now_ms);
        self.next_check_ms = now_ms.saturating_add(self.idle_ms);
        if idle_for >= self.idle_ms {
            tracing::debug!("Idle detected after {}ms", idle_for);
            Some(idle_for)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Throttle (leading + trailing edge)
// ---------------------------------------------------------------------------

/// Passes the first item of a quiet period through immediately; items
/// arriving inside the window are coalesced and the latest is released once
/// the window elapses.
#[derive(Debug)]
pub struct Throttle<T> {
    window_ms:      u64,
    last_release:   Option<u64>,
    pending:        Option<T>,
}

impl<T> Throttle<T> {
    pub fn new(window_ms: u64) -> Self {
        Self { window_ms, last_release: None, pending: None }
    }

    pub fn offer(&mut self, item: T, now_ms: u64) -> Option<T> {
        let due = match self.last_release {
            None       => true,
            Some(last) => now_ms.saturating_sub(last) >= self.window_ms,
        };
        if due {
            self.pending = None;
            self.last_release = Some(now_ms);
            Some(item)
        } else {
            self.pending = Some(item);
            None
        }
    }

    /// When a trailing item is waiting, milliseconds until it is due.
    pub fn until_due_ms(&self, now_ms: u64) -> Option<u64> {
        self.pending.as_ref()?;
        let last = self.last_release.unwrap_or(now_ms);
        Some(last.saturating_add(self.window_ms).saturating_sub(now_ms))
    }

    pub fn take_due(&mut self, now_ms: u64) -> Option<T> {
        if self.until_due_ms(now_ms)? > 0 {
            return None;
        }
        self.last_release = Some(now_ms);
        self.pending.take()
    }
}
