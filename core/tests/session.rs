//! Session flow tests: start/end, round evaluation, pre-expiry flush,
//! confirm-advance and event routing.

use daybank_core::{
    bus::EventSubscriber,
    command::PlayerCommand,
    config::SessionConfig,
    delivery::DeliveryZone,
    engine::SessionEngine,
    event::{SessionEndReason, SimEvent},
    net::NullTransport,
    round_timer::RoundPhase,
    types::{Day, Money, Role, Tick},
    ui::UiSink,
};
use std::{any::Any, cell::RefCell, rc::Rc};

fn build(session_id: &str) -> SessionEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    SessionEngine::build_test(session_id.to_string()).expect("build test engine")
}

fn build_with(session_id: &str, config: SessionConfig) -> SessionEngine {
    SessionEngine::new(
        session_id.to_string(),
        Role::Authority,
        config,
        Box::new(NullTransport::default()),
    )
    .expect("build engine")
}

fn event_types(engine: &SessionEngine) -> Vec<String> {
    engine
        .event_log()
        .entries()
        .iter()
        .map(|e| e.event_type.clone())
        .collect()
}

fn position(types: &[String], kind: &str) -> usize {
    types
        .iter()
        .position(|t| t == kind)
        .unwrap_or_else(|| panic!("no {kind} in {types:?}"))
}

#[test]
fn request_start_starts_exactly_once() {
    let mut engine = build("start-once");

    assert!(engine.request_start().unwrap());
    assert!(!engine.request_start().unwrap());

    assert_eq!(engine.event_log().count_of("session_started"), 1);
    assert_eq!(engine.event_log().count_of("round_started"), 1);
    assert!(engine.session_started());
    assert_eq!(engine.economy().current_day(), 1);
    assert_eq!(engine.round().phase, RoundPhase::Running);
    assert_eq!(engine.round().remaining, 60.0);
}

#[test]
fn start_resets_previous_progress() {
    let mut engine = build("start-reset");
    engine.add_money(500).unwrap();
    engine.advance_days(3).unwrap();

    engine.request_start().unwrap();

    assert_eq!(engine.economy().current_day(), 1);
    assert_eq!(engine.economy().banked_money(), 0);
    assert_eq!(engine.economy().target_money(), 1000);

    let types = event_types(&engine);
    assert!(position(&types, "session_started") < position(&types, "progress_reset"));
}

#[test]
fn round_succeeds_when_target_met() {
    let mut engine = build("round-success");
    engine.request_start().unwrap();
    engine.add_money(1000).unwrap();

    engine.run_for(61.0, 0.5).unwrap();

    assert_eq!(engine.round().phase, RoundPhase::AwaitingAdvance);
    assert_eq!(engine.round().remaining, 0.0);
    let evaluated: Vec<_> = engine
        .event_log()
        .entries()
        .iter()
        .filter(|e| e.event_type == "round_evaluated")
        .collect();
    assert_eq!(evaluated.len(), 1);
    assert!(evaluated[0].payload.contains("\"success\":true"));
    assert!(engine.session_started());
}

#[test]
fn confirm_advance_only_from_awaiting_advance() {
    let mut engine = build("confirm-advance");
    engine.request_start().unwrap();
    assert!(!engine.confirm_advance().unwrap(), "round still running");

    engine.add_money(1000).unwrap();
    engine.run_for(61.0, 0.5).unwrap();

    assert!(engine.confirm_advance().unwrap());
    assert!(!engine.confirm_advance().unwrap(), "second confirm is a no-op");

    assert_eq!(engine.economy().current_day(), 2);
    assert_eq!(engine.economy().banked_money(), 1000);
    assert_eq!(engine.economy().target_money(), 1100);
    assert_eq!(engine.round().phase, RoundPhase::Running);
    assert_eq!(engine.round().day, 2);
    assert_eq!(engine.event_log().count_of("round_started"), 2);
}

#[test]
fn failed_round_ends_session() {
    let mut engine = build("round-fail");
    engine.request_start().unwrap();
    engine.add_money(200).unwrap();

    engine.run_for(61.0, 0.5).unwrap();

    assert!(!engine.session_started());
    assert_eq!(engine.round().phase, RoundPhase::Idle);
    let ended: Vec<_> = engine
        .event_log()
        .entries()
        .iter()
        .filter(|e| e.event_type == "session_ended")
        .collect();
    assert_eq!(ended.len(), 1);
    assert!(ended[0].payload.contains("round_failed"));

    let types = event_types(&engine);
    assert!(position(&types, "round_evaluated") < position(&types, "session_ended"));
}

#[test]
fn failed_round_can_idle_instead() {
    let mut config = SessionConfig::default_test();
    config.round.end_session_on_failure = false;
    let mut engine = build_with("round-fail-idle", config);
    engine.request_start().unwrap();

    engine.run_for(61.0, 0.5).unwrap();

    assert!(engine.session_started());
    assert_eq!(engine.round().phase, RoundPhase::Idle);
    assert!(!engine.confirm_advance().unwrap());
    assert_eq!(engine.event_log().count_of("session_ended"), 0);
}

#[test]
fn request_end_is_idempotent() {
    let mut engine = build("end-once");
    assert!(!engine.request_end().unwrap(), "nothing running yet");

    engine.request_start().unwrap();
    assert!(engine.request_end().unwrap());
    assert!(!engine.request_end().unwrap());

    assert_eq!(engine.event_log().count_of("session_ended"), 1);
    assert_eq!(engine.round().phase, RoundPhase::Idle);

    // The countdown no longer moves.
    let remaining = engine.round().remaining;
    engine.run_for(5.0, 0.5).unwrap();
    assert_eq!(engine.round().remaining, remaining);
}

#[test]
fn pre_expiry_flush_counts_last_second_delivery() {
    let mut engine = build("pre-expiry");
    let zone = DeliveryZone::new("dock", 0);
    engine.add_pre_expiry_hook(Box::new(zone.clone()));
    engine.request_start().unwrap();

    engine.run_for(59.5, 0.5).unwrap();
    zone.deliver(1000);
    assert_eq!(engine.economy().current_money(), 0, "held until the zone settles");

    engine.run_for(1.0, 0.5).unwrap();

    assert_eq!(zone.settled_total(), 1000);
    assert_eq!(zone.pending_count(), 0);
    assert_eq!(engine.round().phase, RoundPhase::AwaitingAdvance);

    let types = event_types(&engine);
    assert!(position(&types, "target_reached") < position(&types, "round_evaluated"));
}

#[test]
fn delivery_zone_settles_on_interval() {
    let mut engine = build("zone-interval");
    let zone = DeliveryZone::new("dock", 10);
    engine.add_pre_expiry_hook(Box::new(zone.clone()));
    engine.request_start().unwrap();

    zone.deliver(50);
    zone.deliver(25);
    zone.penalize(5);
    for _ in 0..9 {
        engine.tick(0.1).unwrap();
    }
    assert_eq!(engine.economy().current_money(), 0);

    engine.tick(0.1).unwrap();
    assert_eq!(engine.economy().current_money(), 70);
    assert_eq!(zone.settled_count(), 2);
}

#[test]
fn paused_clock_holds_the_countdown() {
    let mut engine = build("pause");
    engine.request_start().unwrap();
    engine.run_for(10.0, 0.5).unwrap();
    let remaining = engine.round().remaining;

    engine.clock.pause();
    engine.run_for(10.0, 0.5).unwrap();
    assert_eq!(engine.round().remaining, remaining);

    engine.clock.resume();
    engine.run_for(1.0, 0.5).unwrap();
    assert!(engine.round().remaining < remaining);
}

#[test]
fn run_for_ignores_non_positive_step() {
    let mut engine = build("zero-dt");
    engine.request_start().unwrap();

    engine.run_for(5.0, 0.0).unwrap();
    engine.run_for(5.0, -1.0).unwrap();
    engine.run_for(5.0, f64::NAN).unwrap();

    assert_eq!(engine.clock.current_tick, 0);
    assert_eq!(engine.round().remaining, 60.0);
}

#[test]
fn commands_decode_and_execute() {
    let mut engine = build("commands");
    let script = [
        r#"{"cmd":"request_start"}"#,
        r#"{"cmd":"add_money","amount":250}"#,
        r#"{"cmd":"remove_money","amount":50}"#,
        r#"{"cmd":"set_target","value":150}"#,
    ];
    for line in script {
        let command: PlayerCommand = serde_json::from_str(line).expect("valid command");
        engine.execute(command).unwrap();
    }

    assert_eq!(engine.economy().current_money(), 200);
    assert_eq!(engine.economy().target_money(), 150);
    assert!(engine.economy().target_reached());
}

#[test]
fn spend_banked_reports_result() {
    let mut engine = build("spend");
    engine.add_money(300).unwrap();
    engine.advance_day().unwrap();

    assert!(!engine.spend_banked(301).unwrap());
    assert!(engine.spend_banked(100).unwrap());
    assert_eq!(engine.economy().banked_money(), 200);
    assert_eq!(engine.snapshot().banked_money, 200);
}

// ── Subscribers ────────────────────────────────────────────────────

struct Recorder {
    name: &'static str,
    seen: Vec<(Tick, String)>,
}

impl EventSubscriber for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn on_event(&mut self, tick: Tick, event: &SimEvent) {
        self.seen.push((tick, event.kind().to_string()));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn recorder(name: &'static str) -> Box<Recorder> {
    Box::new(Recorder { name, seen: Vec::new() })
}

#[test]
fn subscribers_see_events_in_production_order() {
    let mut engine = build("subscribers");
    let id = engine.subscribe(recorder("spawner")).unwrap();

    engine.request_start().unwrap();
    engine.add_money(1000).unwrap();

    let seen: Vec<&str> = engine
        .bus()
        .get::<Recorder>(id)
        .expect("recorder registered")
        .seen
        .iter()
        .map(|(_, kind)| kind.as_str())
        .collect();
    assert_eq!(
        seen,
        vec![
            "session_started",
            "progress_reset",
            "day_advanced",
            "round_started",
            "money_changed",
            "target_reached",
        ]
    );
}

#[test]
fn duplicate_subscription_is_rejected() {
    let mut engine = build("dup-sub");
    let id = engine.subscribe(recorder("spawner")).unwrap();
    assert!(engine.subscribe(recorder("spawner")).is_err());
    assert_eq!(engine.bus().len(), 1);

    let removed = engine.unsubscribe(id).unwrap();
    assert_eq!(removed.name(), "spawner");
    assert!(engine.unsubscribe(id).is_err());

    engine.add_money(10).unwrap();
    assert!(engine.bus().is_empty());
}

#[test]
fn session_end_reason_is_logged() {
    let mut engine = build("end-reason");
    engine.request_start().unwrap();
    engine.request_end().unwrap();

    let entry = engine
        .event_log()
        .entries()
        .iter()
        .rev()
        .find(|e| e.event_type == "session_ended")
        .expect("session_ended logged");
    let event: SimEvent = serde_json::from_str(&entry.payload).unwrap();
    assert_eq!(
        event,
        SimEvent::SessionEnded {
            reason: SessionEndReason::Requested
        }
    );
}

// ── UI ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct ScreenState {
    day:           Day,
    target:        Money,
    earnings:      Money,
    banked:        Money,
    countdown:     f64,
    visuals_start: u32,
    gameplay:      bool,
}

struct Screen(Rc<RefCell<ScreenState>>);

impl UiSink for Screen {
    fn set_day(&mut self, day: Day) {
        self.0.borrow_mut().day = day;
    }
    fn set_target(&mut self, target: Money) {
        self.0.borrow_mut().target = target;
    }
    fn set_earnings(&mut self, current: Money) {
        self.0.borrow_mut().earnings = current;
    }
    fn set_banked(&mut self, banked: Money) {
        self.0.borrow_mut().banked = banked;
    }
    fn set_round_countdown(&mut self, remaining_secs: f64) {
        self.0.borrow_mut().countdown = remaining_secs;
    }
    fn set_day_night_progress(&mut self, _progress: f32) {}
    fn set_gameplay_visible(&mut self, visible: bool) {
        self.0.borrow_mut().gameplay = visible;
    }
    fn start_visual_simulation(&mut self) {
        self.0.borrow_mut().visuals_start += 1;
    }
}

#[test]
fn host_ui_follows_replicated_values() {
    let screen = Rc::new(RefCell::new(ScreenState::default()));
    let mut engine = build("host-ui").with_ui(Box::new(Screen(screen.clone())));

    engine.request_start().unwrap();
    engine.add_money(400).unwrap();
    engine.run_for(2.0, 0.5).unwrap();

    let state = screen.borrow();
    assert_eq!(state.day, 1);
    assert_eq!(state.target, 1000);
    assert_eq!(state.earnings, 400);
    assert_eq!(state.banked, 0);
    assert_eq!(state.visuals_start, 1);
    assert!((state.countdown - 58.0).abs() < 1e-9);
    assert!(state.gameplay);
    drop(state);

    engine.request_end().unwrap();
    assert!(!screen.borrow().gameplay);
}
