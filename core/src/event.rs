//! The event stream — every state change the session core makes.
//!
//! RULE: Components never call each other to announce a change.
//! A mutation pushes a SimEvent; the engine routes it to the round timer,
//! the replication mirror, the event log and external subscribers,
//! in that order.

use crate::{
    barrier::ReleaseReason,
    types::{ConnectionId, Day, Money, SceneGeneration, SessionId},
};
use serde::{Deserialize, Serialize};

/// Every event emitted during a session.
/// Variants are append-only; the log stores their snake_case names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    // ── Engine events ──────────────────────────────
    SessionInitialized {
        session_id: SessionId,
    },

    // ── Economy events ─────────────────────────────
    MoneyChanged {
        current_money: Money,
    },
    TargetReached {
        current_money: Money,
        target_money:  Money,
    },
    TargetLost {
        current_money: Money,
        target_money:  Money,
    },
    BankedMoneyChanged {
        banked_money: Money,
    },
    DailyEarningsBanked {
        banked_total: Money,
        amount_added: Money,
    },
    TargetIncreased {
        previous:     Money,
        target_money: Money,
        increase:     Money,
    },
    TargetChanged {
        target_money: Money,
    },
    DayAdvanced {
        day: Day,
    },
    ProgressReset {
        target_money: Money,
    },

    // ── Round events ───────────────────────────────
    RoundStarted {
        day:        Day,
        total_secs: f64,
    },
    RoundEvaluated {
        day:     Day,
        success: bool,
    },

    // ── Session events ─────────────────────────────
    SessionStarted,
    SessionEnded {
        reason: SessionEndReason,
    },

    // ── Scene transition events ────────────────────
    SceneChangePending {
        generation: SceneGeneration,
        scene:      String,
    },
    SceneBarrierReleased {
        generation:     SceneGeneration,
        reason:         ReleaseReason,
        unacknowledged: Vec<ConnectionId>,
    },

    // ── Peer events ────────────────────────────────
    PeerConnected {
        connection_id: ConnectionId,
        spawn_slot:    usize,
        reconnect:     bool,
    },
    PeerDisconnected {
        connection_id: ConnectionId,
    },
}

impl SimEvent {
    /// Stable snake_case name, used for the event_type column of the log.
    pub fn kind(&self) -> &'static str {
        match self {
            SimEvent::SessionInitialized { .. }   => "session_initialized",
            SimEvent::MoneyChanged { .. }         => "money_changed",
            SimEvent::TargetReached { .. }        => "target_reached",
            SimEvent::TargetLost { .. }           => "target_lost",
            SimEvent::BankedMoneyChanged { .. }   => "banked_money_changed",
            SimEvent::DailyEarningsBanked { .. }  => "daily_earnings_banked",
            SimEvent::TargetIncreased { .. }      => "target_increased",
            SimEvent::TargetChanged { .. }        => "target_changed",
            SimEvent::DayAdvanced { .. }          => "day_advanced",
            SimEvent::ProgressReset { .. }        => "progress_reset",
            SimEvent::RoundStarted { .. }         => "round_started",
            SimEvent::RoundEvaluated { .. }       => "round_evaluated",
            SimEvent::SessionStarted              => "session_started",
            SimEvent::SessionEnded { .. }         => "session_ended",
            SimEvent::SceneChangePending { .. }   => "scene_change_pending",
            SimEvent::SceneBarrierReleased { .. } => "scene_barrier_released",
            SimEvent::PeerConnected { .. }        => "peer_connected",
            SimEvent::PeerDisconnected { .. }     => "peer_disconnected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    Requested,
    RoundFailed,
}
