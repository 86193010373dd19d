//! Round timer — the per-day countdown and its win/lose evaluation.
//!
//! States: Idle → Running → { AwaitingAdvance (success) | Idle (failure) }.
//!
//! Expiry order is fixed and never reordered:
//!   1. every pre-expiry hook runs, synchronously, in registration order
//!   2. success = the economy's target_reached flag
//!   3. phase moves to AwaitingAdvance or Idle
//!   4. RoundEvaluated is emitted
//!
//! A delivery that should count for the round must reach the economy
//! inside step 1 at the latest.
//!
//! Only the authority runs this machine. Observers render the countdown
//! from the replicated progress field instead.

use crate::{
    economy::EconomyStateMachine,
    event::SimEvent,
    types::{Day, Role, Tick},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Idle,
    Running,
    AwaitingAdvance,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundState {
    pub day:       Day,
    pub remaining: f64,
    pub total:     f64,
    pub phase:     RoundPhase,
}

/// A collaborator that must settle its pending state before a round is
/// judged, e.g. a delivery zone with unbanked packages.
pub trait PreExpiryHook {
    fn name(&self) -> &str;

    /// Runs once per round, before success is evaluated.
    fn before_expiry(&mut self, economy: &mut EconomyStateMachine);

    /// Runs on every authority tick while the round is running.
    fn on_tick(&mut self, _tick: Tick, _economy: &mut EconomyStateMachine) {}
}

pub struct RoundTimer {
    role:     Role,
    duration: f64,
    state:    RoundState,
    outbox:   Vec<SimEvent>,
}

impl RoundTimer {
    pub fn new(role: Role, duration_secs: f64) -> Self {
        Self {
            role,
            duration: duration_secs,
            state: RoundState {
                day:       0,
                remaining: 0.0,
                total:     duration_secs,
                phase:     RoundPhase::Idle,
            },
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> &RoundState {
        &self.state
    }

    pub fn phase(&self) -> RoundPhase {
        self.state.phase
    }

    pub fn remaining(&self) -> f64 {
        self.state.remaining
    }

    pub fn is_running(&self) -> bool {
        self.state.phase == RoundPhase::Running
    }

    /// Fraction of the countdown still remaining.
    pub fn progress(&self) -> f64 {
        match self.state.phase {
            RoundPhase::Running => (self.state.remaining / self.state.total).clamp(0.0, 1.0),
            RoundPhase::AwaitingAdvance => 0.0,
            RoundPhase::Idle if self.state.day == 0 => 1.0,
            RoundPhase::Idle => (self.state.remaining / self.state.total).clamp(0.0, 1.0),
        }
    }

    /// Fraction of the day elapsed.
    pub fn day_night_progress(&self) -> f64 {
        match self.state.phase {
            RoundPhase::AwaitingAdvance => 1.0,
            RoundPhase::Idle if self.state.day == 0 => 0.0,
            _ => 1.0 - self.progress(),
        }
    }

    pub fn take_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// React to economy events. A new day starts a new round.
    pub fn observe(&mut self, event: &SimEvent) {
        if let SimEvent::DayAdvanced { day } = event {
            self.start(*day);
        }
    }

    /// Count down. Returns Some(success) on the tick the round expires.
    pub fn tick(
        &mut self,
        tick:    Tick,
        dt:      f64,
        economy: &mut EconomyStateMachine,
        hooks:   &mut [Box<dyn PreExpiryHook>],
    ) -> Option<bool> {
        if !self.role.is_authority() || self.state.phase != RoundPhase::Running {
            return None;
        }

        for hook in hooks.iter_mut() {
            hook.on_tick(tick, economy);
        }

        self.state.remaining -= dt.max(0.0);
        if self.state.remaining > 0.0 {
            return None;
        }
        self.state.remaining = 0.0;

        for hook in hooks.iter_mut() {
            log::debug!("tick={tick} round: pre-expiry flush by {}", hook.name());
            hook.before_expiry(economy);
        }

        let success = economy.target_reached();
        let day = self.state.day;
        self.state.phase = if success {
            RoundPhase::AwaitingAdvance
        } else {
            RoundPhase::Idle
        };
        self.outbox.push(SimEvent::RoundEvaluated { day, success });

        log::info!(
            "tick={tick} round: day {day} {} (earned {} of {})",
            if success { "succeeded" } else { "failed" },
            economy.current_money(),
            economy.target_money()
        );
        Some(success)
    }

    /// Leave AwaitingAdvance without advancing yet. Returns false, and
    /// changes nothing, from any other phase.
    pub fn take_advance(&mut self) -> bool {
        if !self.role.is_authority() {
            log::debug!("round: confirm_advance ignored on observer");
            return false;
        }
        if self.state.phase != RoundPhase::AwaitingAdvance {
            log::debug!("round: confirm_advance ignored in phase {:?}", self.state.phase);
            return false;
        }
        self.state.phase = RoundPhase::Idle;
        true
    }

    /// Advance the economy one day. The resulting DayAdvanced restarts
    /// the countdown through `observe`.
    pub fn confirm_advance(&mut self, economy: &mut EconomyStateMachine) -> bool {
        if !self.take_advance() {
            return false;
        }
        economy.advance_day();
        true
    }

    /// Session over: back to Idle wherever the round was.
    pub fn stop(&mut self) {
        if self.state.phase != RoundPhase::Idle {
            log::debug!("round: stopped in phase {:?}", self.state.phase);
        }
        self.state.phase = RoundPhase::Idle;
    }

    /// Forget the previous session entirely.
    pub fn reset(&mut self) {
        self.state = RoundState {
            day:       0,
            remaining: 0.0,
            total:     self.duration,
            phase:     RoundPhase::Idle,
        };
    }

    fn start(&mut self, day: Day) {
        if !self.role.is_authority() {
            return;
        }
        self.state = RoundState {
            day,
            remaining: self.duration,
            total:     self.duration,
            phase:     RoundPhase::Running,
        };
        self.outbox.push(SimEvent::RoundStarted {
            day,
            total_secs: self.duration,
        });
        log::debug!("round: day {day} running, {:.1}s on the clock", self.duration);
    }
}
