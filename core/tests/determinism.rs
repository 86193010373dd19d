//! Two sessions, same seed, same inputs.
//! They must produce identical event logs, tick for tick.

use daybank_core::{
    delivery::DeliveryZone,
    engine::SessionEngine,
    rng::{RngBank, RngStream},
    round_timer::RoundPhase,
    types::Tick,
};

fn run_session(seed: u64) -> Vec<(Tick, String)> {
    let mut engine = SessionEngine::build_test("det-session".to_string()).expect("build engine");
    let zone = DeliveryZone::new("dock", 5);
    engine.add_pre_expiry_hook(Box::new(zone.clone()));

    let bank = RngBank::new(seed);
    let mut deliveries = bank.stream(RngStream::Deliveries);
    let mut penalties = bank.stream(RngStream::Penalties);

    engine.request_start().unwrap();
    for _ in 0..3000 {
        if !engine.session_started() {
            break;
        }
        if deliveries.chance(0.1) {
            zone.deliver(deliveries.range_i64(5, 40));
        }
        if penalties.chance(0.01) {
            zone.penalize(penalties.range_i64(1, 10));
        }
        engine.tick(0.1).unwrap();
        if engine.round().phase == RoundPhase::AwaitingAdvance {
            engine.confirm_advance().unwrap();
        }
    }

    engine
        .event_log()
        .entries()
        .iter()
        .map(|e| (e.tick, e.payload.clone()))
        .collect()
}

#[test]
fn same_seed_same_event_log() {
    let a = run_session(0xDEAD_BEEF);
    let b = run_session(0xDEAD_BEEF);

    assert!(a.len() > 50, "session too quiet to prove anything: {} events", a.len());
    assert_eq!(a.len(), b.len(), "event counts diverged");
    for (i, (left, right)) in a.iter().zip(&b).enumerate() {
        assert_eq!(left, right, "divergence at event {i}");
    }
}

#[test]
fn different_seeds_diverge() {
    let a = run_session(1);
    let b = run_session(2);
    assert_ne!(a, b);
}

#[test]
fn streams_are_independent_of_each_other() {
    let bank = RngBank::new(77);
    let mut solo = bank.stream(RngStream::Deliveries);
    let expected: Vec<u64> = (0..8).map(|_| solo.next_u64()).collect();

    let mut deliveries = bank.stream(RngStream::Deliveries);
    let mut network = bank.stream(RngStream::Network);
    let interleaved: Vec<u64> = (0..8)
        .map(|_| {
            network.next_u64();
            deliveries.next_u64()
        })
        .collect();
    assert_eq!(expected, interleaved);
}
