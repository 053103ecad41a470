/// Notifier session: owns all per-workspace state and drives the engine.
///
/// The session task is the only place state is mutated: editor events,
/// rule-set swaps, config updates, interval ticks, idle checks and the
/// trailing edge of the typing throttle are all serialized through one
/// `tokio::select!` loop, so no locks are needed anywhere.
///
/// Event → trigger mapping:
///   documentOpened       → register + activate, onOpen
///   activeEditorChanged  → onOpen for a known document
///   documentChanged      → dirty, onType (throttled, active doc only)
///   documentSaved        → clean, onSave (active doc only)
///   documentClosed       → forget document and its diagnostics
///   diagnosticsChanged   → update diagnostics store
///   reloadRules          → ask the store task to reload
use crate::{
    clock::SharedClock,
    config::NotifierConfig,
    diagnostics::DiagnosticsStore,
    engine::{Environment, RuleEngine, TriggerOptions, TriggerOutcome},
    input::EditorEvent,
    notification::NotificationSink,
    rules::{RuleSet, Trigger},
    scheduler::{IntervalScheduler, Tick},
    snapshot::{Document, DocumentId, EditorContext},
    state::{IdleTracker, Throttle},
};
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Leading + trailing throttle window for `onType`.
pub const TYPE_THROTTLE_MS: u64 = 800;

pub struct Session<S> {
    engine:      RuleEngine<S>,
    editor:      EditorContext,
    diagnostics: DiagnosticsStore,
    idle:        IdleTracker,
    typing:      Throttle<DocumentId>,
    scheduler:   IntervalScheduler,
    reload_tx:   mpsc::Sender<()>,
    clock:       SharedClock,
}

impl<S: NotificationSink> Session<S> {
    pub fn new(
        engine:         RuleEngine<S>,
        workspace_root: Option<PathBuf>,
        reload_tx:      mpsc::Sender<()>,
        clock:          SharedClock,
    ) -> Self {
        let config = engine.config().clone();
        let now = clock.now_ms();
        Self {
            editor:      EditorContext::new(workspace_root, config.max_scan_chars),
            diagnostics: DiagnosticsStore::default(),
            idle:        IdleTracker::new(config.idle_ms, now),
            typing:      Throttle::new(TYPE_THROTTLE_MS),
            scheduler:   IntervalScheduler::new(),
            engine,
            reload_tx,
            clock,
        }
    }

    pub fn engine(&self) -> &RuleEngine<S> {
        &self.engine
    }

    pub fn editor(&self) -> &EditorContext {
        &self.editor
    }

    pub fn scheduled_intervals(&self) -> usize {
        self.scheduler.active()
    }

    fn fire(&mut self, trigger: Trigger, options: TriggerOptions) -> TriggerOutcome {
        let now = self.clock.now_ms();
        let env = Environment {
            editor:           &self.editor,
            diagnostics:      &self.diagnostics,
            idle_duration_ms: self.idle.idle_duration_ms(now),
        };
        let outcome = self.engine.handle_trigger(trigger, options, &env);
        tracing::trace!("{} → {:?}", trigger, outcome);
        outcome
    }

    // -----------------------------------------------------------------------
    // Editor events
    // -----------------------------------------------------------------------

    pub fn apply_event(&mut self, event: EditorEvent) {
        let now = self.clock.now_ms();
        match event {
            EditorEvent::DocumentOpened { uri, path, language_id, text, is_untitled, is_dirty } => {
                let path = path.or_else(|| uri.file_path());
                self.editor.open(Document {
                    id: uri.clone(),
                    path,
                    language_id,
                    text,
                    is_dirty,
                    is_untitled,
                });
                self.editor.set_active(Some(uri.clone()));
                self.idle.mark_activity("documentOpened", now);
                self.fire(Trigger::OnOpen, TriggerOptions::for_document(uri));
            }

            EditorEvent::ActiveEditorChanged { uri } => {
                let known = self.editor.set_active(uri.clone());
                self.idle.mark_activity("activeEditorChanged", now);
                if let (true, Some(uri)) = (known, uri) {
                    self.fire(Trigger::OnOpen, TriggerOptions::for_document(uri));
                }
            }

            EditorEvent::DocumentChanged { uri, text } => {
                if let Some(doc) = self.editor.get_mut(&uri) {
                    if let Some(text) = text {
                        doc.text = text;
                    }
                    doc.is_dirty = true;
                }
                self.idle.mark_activity("documentChanged", now);
                if self.editor.is_active(&uri) {
                    if let Some(uri) = self.typing.offer(uri, now) {
                        self.fire(Trigger::OnType, TriggerOptions::for_document(uri));
                    }
                }
            }

            EditorEvent::DocumentSaved { uri } => {
                if let Some(doc) = self.editor.get_mut(&uri) {
                    doc.is_dirty = false;
                }
                self.idle.mark_activity("documentSaved", now);
                if self.editor.is_active(&uri) {
                    self.fire(Trigger::OnSave, TriggerOptions::for_document(uri));
                }
            }

            EditorEvent::DocumentClosed { uri } => {
                self.editor.close(&uri);
                self.diagnostics.forget(&uri);
            }

            EditorEvent::DiagnosticsChanged { uri, severities } => {
                self.diagnostics.set(&uri, severities);
            }

            EditorEvent::Activity => self.idle.mark_activity("activity", now),

            EditorEvent::ReloadRules => {
                if self.reload_tx.try_send(()).is_err() {
                    tracing::debug!("Rules reload already pending");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    pub fn on_interval(&mut self, rule_id: &str) -> TriggerOutcome {
        self.fire(Trigger::Interval, TriggerOptions::for_rule(rule_id))
    }

    /// Ticks from timers replaced by a later reschedule are ignored.
    pub fn on_tick(&mut self, tick: Tick) -> Option<TriggerOutcome> {
        if !self.scheduler.is_current(&tick) {
            tracing::debug!("Dropping stale interval tick for {}", tick.rule_id);
            return None;
        }
        Some(self.on_interval(&tick.rule_id))
    }

    pub fn on_idle_check(&mut self) -> Option<TriggerOutcome> {
        let idle_for = self.idle.poll(self.clock.now_ms())?;
        let options = TriggerOptions {
            document:         self.editor.active().cloned(),
            idle_duration_ms: Some(idle_for),
            rule_id:          None,
        };
        Some(self.fire(Trigger::OnIdle, options))
    }

    pub fn on_typing_due(&mut self) -> Option<TriggerOutcome> {
        let uri = self.typing.take_due(self.clock.now_ms())?;
        if !self.editor.is_active(&uri) {
            return None;
        }
        Some(self.fire(Trigger::OnType, TriggerOptions::for_document(uri)))
    }

    fn idle_wait(&self) -> Option<Duration> {
        self.idle.until_next_check_ms(self.clock.now_ms()).map(Duration::from_millis)
    }

    fn typing_wait(&self) -> Option<Duration> {
        self.typing.until_due_ms(self.clock.now_ms()).map(Duration::from_millis)
    }

    // -----------------------------------------------------------------------
    // Rule set / configuration changes
    // -----------------------------------------------------------------------

    pub fn apply_rules(&mut self, rules: RuleSet, tick_tx: &mpsc::Sender<Tick>) {
        tracing::info!("Applying {} rule(s)", rules.len());
        self.engine.set_rules(rules);
        self.reschedule(tick_tx);
    }

    pub fn apply_config(&mut self, config: NotifierConfig, tick_tx: &mpsc::Sender<Tick>) {
        let now = self.clock.now_ms();
        self.idle.set_idle_ms(config.idle_ms, now);
        self.editor.set_max_scan_chars(config.max_scan_chars);
        self.engine.update_config(config);
        self.reschedule(tick_tx);
    }

    fn reschedule(&mut self, tick_tx: &mpsc::Sender<Tick>) {
        self.scheduler.reschedule(self.engine.rules(), self.engine.config(), tick_tx);
    }
}

// ---------------------------------------------------------------------------
// Task loop
// ---------------------------------------------------------------------------

/// Runs until the editor event stream ends.
pub async fn run<S: NotificationSink>(
    session:       &mut Session<S>,
    mut events:    mpsc::Receiver<EditorEvent>,
    mut rules_rx:  watch::Receiver<RuleSet>,
    mut config_rx: watch::Receiver<NotifierConfig>,
) -> Result<()> {
    let (tick_tx, mut tick_rx) = mpsc::channel::<Tick>(32);

    // Pick up whatever is current before waiting on changes
    let rules = rules_rx.borrow_and_update().clone();
    session.apply_rules(rules, &tick_tx);
    let config = config_rx.borrow_and_update().clone();
    session.apply_config(config, &tick_tx);

    tracing::info!("Notifier session started");

    loop {
        let idle_wait = session.idle_wait();
        let typing_wait = session.typing_wait();

        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => session.apply_event(event),
                    None => break,
                }
            }

            Some(tick) = tick_rx.recv() => {
                session.on_tick(tick);
            }

            Ok(()) = rules_rx.changed() => {
                let rules = rules_rx.borrow_and_update().clone();
                session.apply_rules(rules, &tick_tx);
            }

            Ok(()) = config_rx.changed() => {
                let config = config_rx.borrow_and_update().clone();
                tracing::info!("Configuration updated");
                session.apply_config(config, &tick_tx);
            }

            _ = tokio::time::sleep(idle_wait.unwrap_or_default()), if idle_wait.is_some() => {
                session.on_idle_check();
            }

            _ = tokio::time::sleep(typing_wait.unwrap_or_default()), if typing_wait.is_some() => {
                session.on_typing_due();
            }
        }
    }

    session.scheduler.cancel_all();
    tracing::info!("Notifier session ended");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::{ManualClock, SystemClock},
        diagnostics::DiagnosticSeverity,
        engine::MessagePicker,
        notification::tests::RecordingSink,
        rules::Rule,
        store::normalize_rule,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn rules(raw: Vec<Value>) -> RuleSet {
        let rules: Vec<Rule> = raw.iter().map(|r| normalize_rule(r).unwrap()).collect();
        rules.into()
    }

    fn rule(id: &str, trigger: &str, check: Value) -> Value {
        json!({
            "id": id,
            "trigger": trigger,
            "check": check,
            "notify": { "level": "info", "messages": [id] }
        })
    }

    fn quiet_config() -> NotifierConfig {
        NotifierConfig { global_cooldown_ms: 0, idle_ms: 10_000, ..NotifierConfig::default() }
    }

    fn session(rule_set: RuleSet, clock: SharedClock) -> (Session<RecordingSink>, mpsc::Receiver<()>) {
        let engine = RuleEngine::new(
            rule_set,
            quiet_config(),
            RecordingSink::default(),
            clock.clone(),
            MessagePicker::seeded(3),
        );
        let (reload_tx, reload_rx) = mpsc::channel(1);
        (Session::new(engine, Some(PathBuf::from("/ws")), reload_tx, clock), reload_rx)
    }

    fn shown(s: &Session<RecordingSink>) -> Vec<String> {
        s.engine().gate().sink().shown.iter().map(|n| n.rule_id.clone()).collect()
    }

    fn opened(uri: &str, lang: &str) -> EditorEvent {
        EditorEvent::DocumentOpened {
            uri:         DocumentId::new(uri),
            path:        None,
            language_id: lang.to_owned(),
            text:        String::new(),
            is_untitled: false,
            is_dirty:    false,
        }
    }

    fn changed(uri: &str) -> EditorEvent {
        EditorEvent::DocumentChanged { uri: DocumentId::new(uri), text: Some("x".into()) }
    }

    #[test]
    fn open_registers_activates_and_fires() {
        let clock = ManualClock::new(0);
        let (mut s, _reload) = session(rules(vec![rule("open", "onOpen", json!({ "type": "always" }))]), clock);
        s.apply_event(opened("file:///ws/src/lib.rs", "rust"));

        assert_eq!(s.editor().active().map(|d| d.as_str()), Some("file:///ws/src/lib.rs"));
        assert_eq!(shown(&s), vec!["open"]);
    }

    #[test]
    fn save_fires_for_active_document_only() {
        let clock = ManualClock::new(0);
        let (mut s, _reload) = session(rules(vec![rule("save", "onSave", json!({ "type": "always" }))]), clock);
        s.apply_event(opened("file:///ws/a.rs", "rust"));
        s.apply_event(opened("file:///ws/b.rs", "rust"));

        s.apply_event(EditorEvent::DocumentSaved { uri: DocumentId::new("file:///ws/a.rs") });
        assert!(shown(&s).is_empty());

        s.apply_event(EditorEvent::DocumentSaved { uri: DocumentId::new("file:///ws/b.rs") });
        assert_eq!(shown(&s), vec!["save"]);
    }

    #[test]
    fn save_sees_current_diagnostics() {
        let clock = ManualClock::new(0);
        let (mut s, _reload) = session(
            rules(vec![rule("errors", "onSave", json!({ "type": "diagnostics", "mode": "errors" }))]),
            clock,
        );
        let uri = DocumentId::new("file:///ws/a.rs");
        s.apply_event(opened(uri.as_str(), "rust"));
        s.apply_event(EditorEvent::DiagnosticsChanged {
            uri:        uri.clone(),
            severities: vec![DiagnosticSeverity::Error],
        });
        s.apply_event(EditorEvent::DocumentSaved { uri: uri.clone() });
        assert_eq!(shown(&s), vec!["errors"]);

        // Closing forgets the diagnostics; reopened document is clean
        s.apply_event(EditorEvent::DocumentClosed { uri: uri.clone() });
        s.apply_event(opened(uri.as_str(), "rust"));
        s.apply_event(EditorEvent::DocumentSaved { uri });
        assert_eq!(shown(&s), vec!["errors"]);
    }

    #[test]
    fn typing_is_throttled_leading_and_trailing() {
        let clock = ManualClock::new(0);
        let (mut s, _reload) = session(rules(vec![rule("type", "onType", json!({ "type": "always" }))]), clock.clone());
        s.apply_event(opened("file:///ws/a.rs", "rust"));

        s.apply_event(changed("file:///ws/a.rs"));
        assert_eq!(shown(&s).len(), 1);

        clock.advance(100);
        s.apply_event(changed("file:///ws/a.rs"));
        clock.advance(100);
        s.apply_event(changed("file:///ws/a.rs"));
        assert_eq!(shown(&s).len(), 1);
        assert_eq!(s.typing_wait(), Some(Duration::from_millis(600)));

        assert!(s.on_typing_due().is_none());
        clock.advance(600);
        assert!(s.on_typing_due().is_some());
        assert_eq!(shown(&s).len(), 2);
        assert_eq!(s.typing_wait(), None);
    }

    #[test]
    fn editing_marks_document_dirty_and_saving_cleans_it() {
        let clock = ManualClock::new(0);
        let (mut s, _reload) = session(
            rules(vec![rule("idle", "onIdle", json!({ "type": "dirtyIdle" }))]),
            clock.clone(),
        );
        s.apply_event(opened("file:///ws/a.rs", "rust"));
        s.apply_event(changed("file:///ws/a.rs"));

        clock.advance(10_000);
        assert!(matches!(s.on_idle_check(), Some(TriggerOutcome::Notified { .. })));

        s.apply_event(EditorEvent::DocumentSaved { uri: DocumentId::new("file:///ws/a.rs") });
        clock.advance(10_000);
        assert_eq!(s.on_idle_check(), Some(TriggerOutcome::NoMatch));
    }

    #[test]
    fn idle_check_waits_for_threshold_and_rearms() {
        let clock = ManualClock::new(0);
        let (mut s, _reload) = session(
            rules(vec![rule("idle", "onIdle", json!({ "type": "always" }))]),
            clock.clone(),
        );
        clock.advance(9_999);
        assert_eq!(s.on_idle_check(), None);
        clock.advance(1);
        assert!(s.on_idle_check().is_some());
        assert_eq!(s.idle_wait(), Some(Duration::from_millis(10_000)));

        s.apply_event(EditorEvent::Activity);
        clock.advance(5_000);
        assert_eq!(s.idle_wait(), Some(Duration::from_millis(5_000)));
    }

    #[test]
    fn reload_request_is_forwarded_once() {
        let clock = ManualClock::new(0);
        let (mut s, mut reload_rx) = session(rules(vec![]), clock);
        s.apply_event(EditorEvent::ReloadRules);
        s.apply_event(EditorEvent::ReloadRules);
        assert_eq!(reload_rx.try_recv(), Ok(()));
        assert!(reload_rx.try_recv().is_err());
    }

    #[test]
    fn unknown_active_editor_does_not_fire() {
        let clock = ManualClock::new(0);
        let (mut s, _reload) = session(rules(vec![rule("open", "onOpen", json!({ "type": "always" }))]), clock);
        s.apply_event(EditorEvent::ActiveEditorChanged { uri: Some(DocumentId::new("file:///ws/x.rs")) });
        assert!(shown(&s).is_empty());
        assert!(s.editor().active().is_none());
    }

    #[tokio::test]
    async fn config_change_updates_schedule_and_disables() {
        let clock = ManualClock::new(0);
        let (mut s, _reload) = session(
            rules(vec![rule("tick", "interval", json!({ "type": "always" }))]),
            clock,
        );
        let (tick_tx, _tick_rx) = mpsc::channel(4);
        s.apply_rules(s.engine().rules().clone(), &tick_tx);
        assert_eq!(s.scheduled_intervals(), 1);

        s.apply_config(NotifierConfig { enabled: false, ..quiet_config() }, &tick_tx);
        assert_eq!(s.scheduled_intervals(), 1);
        assert_eq!(s.on_interval("tick"), TriggerOutcome::Disabled);

        s.apply_rules(rules(vec![]), &tick_tx);
        assert_eq!(s.scheduled_intervals(), 0);
    }

    #[tokio::test]
    async fn ticks_from_a_replaced_schedule_are_ignored() {
        let clock = ManualClock::new(0);
        let tick_rules = rules(vec![rule("tick", "interval", json!({ "type": "always" }))]);
        let (mut s, _reload) = session(tick_rules.clone(), clock);
        let (tick_tx, _tick_rx) = mpsc::channel(4);

        s.apply_rules(tick_rules.clone(), &tick_tx);
        let stale = Tick { generation: 1, rule_id: "tick".into() };
        s.apply_rules(tick_rules, &tick_tx);

        assert_eq!(s.on_tick(stale), None);
        assert!(shown(&s).is_empty());

        let current = Tick { generation: 2, rule_id: "tick".into() };
        assert!(matches!(s.on_tick(current), Some(TriggerOutcome::Notified { .. })));
        assert_eq!(shown(&s), vec!["tick"]);
    }

    #[tokio::test]
    async fn zero_idle_threshold_never_schedules_idle_checks() {
        let clock = ManualClock::new(0);
        let (mut s, _reload) = session(
            rules(vec![rule("idle", "onIdle", json!({ "type": "always" }))]),
            clock.clone(),
        );
        let (tick_tx, _tick_rx) = mpsc::channel(4);
        s.apply_config(NotifierConfig { idle_ms: 0, ..quiet_config() }, &tick_tx);

        assert_eq!(s.idle_wait(), None);
        clock.advance(1_000_000);
        assert_eq!(s.on_idle_check(), None);
        assert!(shown(&s).is_empty());
    }

    #[tokio::test]
    async fn run_processes_events_until_stream_closes() {
        let clock: SharedClock = Arc::new(SystemClock);
        let (mut s, _reload) = session(rules(vec![]), clock);

        let (_rules_tx, rules_rx) = watch::channel(rules(vec![rule("save", "onSave", json!({ "type": "always" }))]));
        let (_config_tx, config_rx) = watch::channel(quiet_config());
        let (events_tx, events_rx) = mpsc::channel(8);

        events_tx.send(opened("file:///ws/a.rs", "rust")).await.unwrap();
        events_tx
            .send(EditorEvent::DocumentSaved { uri: DocumentId::new("file:///ws/a.rs") })
            .await
            .unwrap();
        drop(events_tx);

        run(&mut s, events_rx, rules_rx, config_rx).await.unwrap();
        assert_eq!(shown(&s), vec!["save"]);
        assert_eq!(s.scheduled_intervals(), 0);
    }
}
