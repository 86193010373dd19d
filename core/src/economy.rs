//! Economy state machine — money, target and day progression.
//!
//! Owns EconomyState exclusively. Every mutating call checks the node's
//! role first and is a logged no-op anywhere but the authority.
//! Mutations push SimEvents into an outbox; the engine drains it
//! with `take_events()` after each call.
//!
//! Depends on: nothing. The round timer and replication mirror react
//! to the events, never to the state directly.

use crate::{
    config::EconomyConfig,
    event::SimEvent,
    types::{clamp_money, Day, Money, Role},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EconomyState {
    pub current_money:  Money,
    pub banked_money:   Money,
    pub target_money:   Money,
    pub current_day:    Day,
    pub target_reached: bool,
}

impl EconomyState {
    /// Fraction of today's target earned so far, in [0, 1].
    pub fn earnings_progress(&self) -> f64 {
        if self.target_money <= 0 {
            return 1.0;
        }
        (self.current_money as f64 / self.target_money as f64).clamp(0.0, 1.0)
    }
}

pub struct EconomyStateMachine {
    role:   Role,
    config: EconomyConfig,
    state:  EconomyState,
    outbox: Vec<SimEvent>,
}

impl EconomyStateMachine {
    pub fn new(role: Role, config: EconomyConfig) -> Self {
        let state = EconomyState {
            target_money: clamp_money(config.initial_target),
            ..EconomyState::default()
        };
        Self {
            role,
            config,
            state,
            outbox: Vec::new(),
        }
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn state(&self) -> &EconomyState {
        &self.state
    }

    pub fn current_money(&self) -> Money {
        self.state.current_money
    }

    pub fn banked_money(&self) -> Money {
        self.state.banked_money
    }

    pub fn target_money(&self) -> Money {
        self.state.target_money
    }

    pub fn current_day(&self) -> Day {
        self.state.current_day
    }

    pub fn target_reached(&self) -> bool {
        self.state.target_reached
    }

    pub fn earnings_progress(&self) -> f64 {
        self.state.earnings_progress()
    }

    pub fn config(&self) -> &EconomyConfig {
        &self.config
    }

    /// Drain events produced since the last call.
    pub fn take_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.outbox)
    }

    // ── Mutations (authority only) ─────────────────────────────

    pub fn add_money(&mut self, amount: Money) {
        if !self.authorized("add_money") {
            return;
        }
        let amount = clamp_money(amount);
        if amount == 0 {
            return;
        }
        self.state.current_money = clamp_money(self.state.current_money.saturating_add(amount));
        self.outbox.push(SimEvent::MoneyChanged {
            current_money: self.state.current_money,
        });
        log::debug!(
            "economy: +{amount} -> current={} target={}",
            self.state.current_money,
            self.state.target_money
        );
        self.evaluate_target();
    }

    pub fn remove_money(&mut self, amount: Money) {
        if !self.authorized("remove_money") {
            return;
        }
        let amount = clamp_money(amount);
        if amount == 0 {
            return;
        }
        self.state.current_money = clamp_money(self.state.current_money - amount);
        self.outbox.push(SimEvent::MoneyChanged {
            current_money: self.state.current_money,
        });
        log::debug!(
            "economy: -{amount} -> current={} target={}",
            self.state.current_money,
            self.state.target_money
        );
        self.evaluate_target();
    }

    /// Spend from the bank. Returns false, with nothing changed, when the
    /// balance does not cover `amount`.
    pub fn spend_banked(&mut self, amount: Money) -> bool {
        if !self.authorized("spend_banked") {
            return false;
        }
        if amount <= 0 {
            log::warn!("economy: rejected non-positive spend of {amount}");
            return false;
        }
        if amount > self.state.banked_money {
            log::debug!(
                "economy: insufficient funds, spend {amount} > banked {}",
                self.state.banked_money
            );
            return false;
        }
        self.state.banked_money -= amount;
        self.outbox.push(SimEvent::BankedMoneyChanged {
            banked_money: self.state.banked_money,
        });
        true
    }

    pub fn advance_day(&mut self) {
        self.advance_days(1);
    }

    pub fn advance_days(&mut self, days: u32) {
        if !self.authorized("advance_days") {
            return;
        }
        if days == 0 {
            log::warn!("economy: advance_days(0) ignored");
            return;
        }
        for _ in 0..days {
            self.advance_one_day();
        }
    }

    pub fn set_target(&mut self, value: Money) {
        if !self.authorized("set_target") {
            return;
        }
        self.state.target_money = clamp_money(value);
        self.outbox.push(SimEvent::TargetChanged {
            target_money: self.state.target_money,
        });
        self.evaluate_target();
    }

    /// Back to the configured starting point. Used at session start.
    pub fn reset_progress(&mut self) {
        if !self.authorized("reset_progress") {
            return;
        }
        self.state = EconomyState {
            target_money: clamp_money(self.config.initial_target),
            ..EconomyState::default()
        };
        self.outbox.push(SimEvent::ProgressReset {
            target_money: self.state.target_money,
        });
        log::info!("economy: progress reset, target={}", self.state.target_money);
    }

    // ── Internals ──────────────────────────────────────────────

    fn advance_one_day(&mut self) {
        let earned = self.state.current_money;
        if earned > 0 {
            self.state.banked_money = clamp_money(self.state.banked_money.saturating_add(earned));
            self.outbox.push(SimEvent::DailyEarningsBanked {
                banked_total: self.state.banked_money,
                amount_added: earned,
            });
        }

        self.state.current_money = 0;
        self.state.target_reached = false;
        self.state.current_day = self.state.current_day.saturating_add(1);
        let day = self.state.current_day;

        // Day 1 plays at the configured starting target.
        if self.config.growth.enabled && day > 1 {
            let step = self.config.growth.grow(self.state.target_money, day);
            if step.increase > 0 {
                self.state.target_money = step.target;
                self.outbox.push(SimEvent::TargetIncreased {
                    previous:     step.previous,
                    target_money: step.target,
                    increase:     step.increase,
                });
            }
        }

        self.outbox.push(SimEvent::DayAdvanced { day });
        log::info!(
            "economy: day {day} begins, banked={} target={} (earned {earned})",
            self.state.banked_money,
            self.state.target_money
        );
    }

    fn evaluate_target(&mut self) {
        let was = self.state.target_reached;
        let now = is_reached(&self.state);
        self.state.target_reached = now;
        match (was, now) {
            (false, true) => self.outbox.push(SimEvent::TargetReached {
                current_money: self.state.current_money,
                target_money:  self.state.target_money,
            }),
            (true, false) => self.outbox.push(SimEvent::TargetLost {
                current_money: self.state.current_money,
                target_money:  self.state.target_money,
            }),
            _ => {}
        }
    }

    fn authorized(&self, op: &str) -> bool {
        if self.role.is_authority() {
            return true;
        }
        log::debug!("economy: {op} ignored on observer");
        false
    }
}

fn is_reached(state: &EconomyState) -> bool {
    state.target_money == 0 || state.current_money >= state.target_money
}
