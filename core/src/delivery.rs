//! Delivery zone — a sample delivery collaborator.
//!
//! Packages dropped in the zone are held as pending and only paid into
//! the economy when the zone settles: every `settle_every_ticks` ticks,
//! and always in the round's pre-expiry flush. Without that flush a
//! package dropped in the last interval would miss its round.
//!
//! The zone is a cheap cloneable handle. The engine owns one clone as a
//! PreExpiryHook; gameplay code keeps another to drop packages.

use crate::{
    economy::EconomyStateMachine,
    round_timer::PreExpiryHook,
    types::{Money, Tick},
};
use std::{cell::RefCell, rc::Rc};

#[derive(Debug, Default)]
struct ZoneState {
    pending:       Vec<Money>,
    penalties:     Vec<Money>,
    settled_total: Money,
    settled_count: u64,
}

#[derive(Debug, Clone)]
pub struct DeliveryZone {
    name:               String,
    settle_every_ticks: Tick,
    inner:              Rc<RefCell<ZoneState>>,
}

impl DeliveryZone {
    /// `settle_every_ticks == 0` settles only at round expiry.
    pub fn new(name: impl Into<String>, settle_every_ticks: Tick) -> Self {
        Self {
            name: name.into(),
            settle_every_ticks,
            inner: Rc::new(RefCell::new(ZoneState::default())),
        }
    }

    pub fn deliver(&self, value: Money) {
        if value > 0 {
            self.inner.borrow_mut().pending.push(value);
        }
    }

    /// Queue a deduction, e.g. for a damaged package.
    pub fn penalize(&self, amount: Money) {
        if amount > 0 {
            self.inner.borrow_mut().penalties.push(amount);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    pub fn pending_value(&self) -> Money {
        self.inner.borrow().pending.iter().sum()
    }

    pub fn settled_total(&self) -> Money {
        self.inner.borrow().settled_total
    }

    pub fn settled_count(&self) -> u64 {
        self.inner.borrow().settled_count
    }

    /// Pay everything pending into the economy, one call per package.
    pub fn flush(&self, economy: &mut EconomyStateMachine) {
        let (pending, penalties) = {
            let mut state = self.inner.borrow_mut();
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.penalties),
            )
        };
        if pending.is_empty() && penalties.is_empty() {
            return;
        }
        for value in &pending {
            economy.add_money(*value);
        }
        for amount in &penalties {
            economy.remove_money(*amount);
        }
        let mut state = self.inner.borrow_mut();
        state.settled_total += pending.iter().sum::<Money>();
        state.settled_count += pending.len() as u64;
        log::debug!(
            "{}: settled {} package(s), {} penalty(ies)",
            self.name,
            pending.len(),
            penalties.len()
        );
    }
}

impl PreExpiryHook for DeliveryZone {
    fn name(&self) -> &str {
        &self.name
    }

    fn before_expiry(&mut self, economy: &mut EconomyStateMachine) {
        self.flush(economy);
    }

    fn on_tick(&mut self, tick: Tick, economy: &mut EconomyStateMachine) {
        if self.settle_every_ticks > 0 && tick % self.settle_every_ticks == 0 {
            self.flush(economy);
        }
    }
}
