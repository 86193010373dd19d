//! Scene transition tests: the authority holds the simulation until every
//! connected observer has loaded the scene, or the barrier times out.

use daybank_core::{
    config::SessionConfig,
    engine::{pump, SceneContinuation, SessionEngine},
    net::LoopbackHub,
    round_timer::RoundPhase,
};

struct Net {
    hub:       LoopbackHub,
    authority: SessionEngine,
    observers: Vec<SessionEngine>,
}

fn scene_config(start: bool, advance: bool) -> SessionConfig {
    let mut config = SessionConfig::default_test();
    if start {
        config.scenes.start_scene = Some("warehouse".into());
    }
    if advance {
        config.scenes.day_scene = Some("warehouse".into());
    }
    config
}

impl Net {
    fn new(session_id: &str, observers: u64, config: SessionConfig) -> Self {
        let hub = LoopbackHub::new();
        let mut authority =
            SessionEngine::authority(session_id.to_string(), config.clone(), &hub).unwrap();
        let observers: Vec<SessionEngine> = (1..=observers)
            .map(|id| SessionEngine::observer(session_id.to_string(), config.clone(), &hub, id).unwrap())
            .collect();
        for observer in &observers {
            authority.peer_connected(observer.local_id()).unwrap();
        }
        let mut net = Self { hub, authority, observers };
        net.settle();
        net
    }

    fn settle(&mut self) {
        let mut nodes: Vec<&mut SessionEngine> = std::iter::once(&mut self.authority)
            .chain(self.observers.iter_mut())
            .collect();
        pump(&self.hub, &mut nodes).unwrap();
    }

    /// The observer at `index` finishes loading whatever it was asked to.
    fn load(&mut self, index: usize) {
        let generation = self.observers[index]
            .pending_scene()
            .map(|(generation, _)| *generation)
            .expect("scene change announced");
        assert!(self.observers[index].scene_loaded(generation));
        self.settle();
    }

    fn released_payloads(&self) -> Vec<String> {
        self.authority
            .event_log()
            .entries()
            .iter()
            .filter(|e| e.event_type == "scene_barrier_released")
            .map(|e| e.payload.clone())
            .collect()
    }
}

#[test]
fn start_waits_for_every_observer() {
    let mut net = Net::new("barrier-all", 3, scene_config(true, false));
    net.authority.request_start().unwrap();
    net.settle();

    assert_eq!(net.authority.scene_barrier_pending(), Some(1));
    assert!(net.authority.clock.paused);
    assert_eq!(net.authority.economy().current_day(), 0);
    for observer in &net.observers {
        assert_eq!(observer.pending_scene().map(|(g, s)| (*g, s.as_str())), Some((1, "warehouse")));
    }

    net.authority.tick(1.0).unwrap();
    net.load(0);
    net.authority.tick(1.0).unwrap();
    net.load(1);
    assert_eq!(net.authority.scene_barrier_pending(), Some(1), "one observer still loading");
    assert_eq!(net.authority.round().phase, RoundPhase::Idle);

    net.authority.tick(1.0).unwrap();
    net.load(2);

    assert_eq!(net.authority.scene_barrier_pending(), None);
    assert!(!net.authority.clock.paused);
    assert_eq!(net.authority.economy().current_day(), 1);
    assert_eq!(net.authority.round().phase, RoundPhase::Running);
    assert_eq!(net.authority.round().remaining, 60.0, "loading time is not round time");

    let released = net.released_payloads();
    assert_eq!(released.len(), 1);
    assert!(released[0].contains("all_acknowledged"));
    assert_eq!(net.observers[2].snapshot().current_day, 1);
}

#[test]
fn timeout_releases_once_and_late_ack_is_discarded() {
    let mut net = Net::new("barrier-timeout", 3, scene_config(true, false));
    net.authority.request_start().unwrap();
    net.settle();

    net.authority.tick(1.0).unwrap();
    net.load(0);
    net.authority.tick(1.0).unwrap();
    net.load(1);
    for _ in 0..3 {
        net.authority.tick(1.0).unwrap();
    }

    assert_eq!(net.authority.scene_barrier_pending(), None);
    assert_eq!(net.authority.economy().current_day(), 1);
    let released = net.released_payloads();
    assert_eq!(released.len(), 1);
    assert!(released[0].contains("timed_out"));
    assert!(released[0].contains("\"unacknowledged\":[3]"));

    net.load(2);
    net.authority.tick(1.0).unwrap();

    assert_eq!(net.authority.late_scene_acks(), 1);
    assert_eq!(net.released_payloads().len(), 1, "continuation ran once");
    assert_eq!(net.authority.event_log().count_of("day_advanced"), 1);
    assert_eq!(net.authority.event_log().count_of("round_started"), 1);
}

#[test]
fn observer_acknowledges_each_generation_once() {
    let mut net = Net::new("barrier-dup", 1, scene_config(true, false));
    net.authority.request_start().unwrap();
    net.settle();

    assert!(net.observers[0].scene_loaded(1));
    assert!(!net.observers[0].scene_loaded(1));
    assert!(net.observers[0].pending_scene().is_none());
    net.settle();

    assert_eq!(net.authority.late_scene_acks(), 0);
    assert_eq!(net.authority.recovery().record(1).and_then(|r| r.last_acked_scene_generation), Some(1));
}

#[test]
fn disconnect_stops_the_wait_for_that_peer() {
    let mut net = Net::new("barrier-disconnect", 2, scene_config(true, false));
    net.authority.request_start().unwrap();
    net.settle();
    net.load(0);
    assert!(net.authority.scene_barrier_pending().is_some());

    net.hub.disconnect(2);
    net.authority.peer_disconnected(2).unwrap();

    assert_eq!(net.authority.scene_barrier_pending(), None);
    assert_eq!(net.authority.economy().current_day(), 1);
    assert!(net.released_payloads()[0].contains("all_acknowledged"));
}

#[test]
fn solo_host_releases_immediately() {
    let mut net = Net::new("barrier-solo", 0, scene_config(true, true));
    net.authority.request_start().unwrap();

    assert_eq!(net.authority.scene_barrier_pending(), None);
    assert!(!net.authority.clock.paused);
    assert_eq!(net.authority.economy().current_day(), 1);
    assert_eq!(net.authority.event_log().count_of("scene_change_pending"), 1);
}

#[test]
fn confirmed_advance_waits_for_day_scene() {
    let mut net = Net::new("barrier-advance", 2, scene_config(false, true));
    net.authority.request_start().unwrap();
    net.authority.add_money(1000).unwrap();
    net.authority.run_for(61.0, 0.5).unwrap();
    net.settle();
    assert_eq!(net.authority.round().phase, RoundPhase::AwaitingAdvance);

    assert!(net.authority.confirm_advance().unwrap());
    net.settle();
    assert_eq!(net.authority.economy().current_day(), 1, "held behind the barrier");
    assert!(!net.authority.confirm_advance().unwrap(), "advance already taken");

    net.load(0);
    net.load(1);

    assert_eq!(net.authority.economy().current_day(), 2);
    assert_eq!(net.authority.economy().target_money(), 1100);
    assert_eq!(net.authority.round().phase, RoundPhase::Running);
    assert_eq!(net.observers[1].snapshot().current_day, 2);
}

#[test]
fn ending_the_session_cancels_a_pending_barrier() {
    let mut net = Net::new("barrier-cancel", 1, scene_config(true, false));
    net.authority.request_start().unwrap();
    net.settle();

    net.authority.request_end().unwrap();
    assert_eq!(net.authority.scene_barrier_pending(), None);
    assert!(!net.authority.clock.paused);

    net.load(0);
    net.authority.run_for(10.0, 1.0).unwrap();

    assert_eq!(net.authority.late_scene_acks(), 1);
    assert_eq!(net.authority.economy().current_day(), 0);
    assert!(net.released_payloads().is_empty());
}

#[test]
fn observer_countdown_holds_during_mid_round_barrier() {
    let mut net = Net::new("barrier-countdown", 1, scene_config(false, false));
    net.authority.request_start().unwrap();
    net.settle();

    let step = |net: &mut Net, secs: f64| {
        for _ in 0..(secs / 0.5) as usize {
            net.authority.tick(0.5).unwrap();
            net.observers[0].tick(0.5).unwrap();
            net.settle();
        }
    };
    step(&mut net, 10.0);
    assert_eq!(net.authority.round().remaining, 50.0);

    net.authority
        .begin_scene_transition("storage".into(), SceneContinuation::ResumeRound, Some(8.0))
        .unwrap();
    net.settle();
    assert!(net.observers[0].snapshot().round_paused);

    step(&mut net, 7.0);
    assert_eq!(net.authority.round().remaining, 50.0);
    let displayed = net.observers[0].projection().displayed_remaining();
    assert!((displayed - 50.0).abs() < 1e-3, "countdown held, got {displayed}");

    net.load(0);
    assert_eq!(net.authority.scene_barrier_pending(), None);
    assert!(!net.observers[0].snapshot().round_paused);

    step(&mut net, 1.0);
    assert_eq!(net.authority.round().remaining, 49.0);
    let displayed = net.observers[0].projection().displayed_remaining();
    assert!((displayed - 49.0).abs() < 1e-3, "countdown resumed, got {displayed}");
}

#[test]
fn reconnecting_peer_is_sent_the_pending_scene() {
    let mut net = Net::new("barrier-rejoin", 3, scene_config(true, false));
    net.hub.disconnect(3);
    net.authority.peer_disconnected(3).unwrap();

    net.authority.request_start().unwrap();
    net.settle();
    assert!(net.observers[2].pending_scene().is_none(), "announcement missed while away");
    net.load(0);

    net.hub.connect(3);
    net.authority.peer_connected(3).unwrap();
    net.settle();
    assert_eq!(
        net.observers[2].pending_scene().map(|(g, s)| (*g, s.as_str())),
        Some((1, "warehouse"))
    );

    net.load(1);
    assert_eq!(net.authority.scene_barrier_pending(), Some(1), "waits on the returning peer");
    net.load(2);

    assert_eq!(net.authority.scene_barrier_pending(), None);
    assert_eq!(net.authority.economy().current_day(), 1);
    assert!(net.released_payloads()[0].contains("all_acknowledged"));
}
