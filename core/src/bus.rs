//! Event subscriptions for external collaborators.
//!
//! RULE: Every subscribe() hands back a SubscriptionId and is paired with
//! exactly one unsubscribe(). A subscriber name can be registered once;
//! registering it again is an error, not a second delivery.
//!
//! Subscribers see every event after the core components have applied it,
//! in the order the events were produced.

use crate::{
    error::{SimError, SimResult},
    event::SimEvent,
    types::Tick,
};
use std::any::Any;

/// The contract for anything outside the core that reacts to events,
/// e.g. a spawn collaborator computing its quota on DayAdvanced.
pub trait EventSubscriber {
    /// Unique stable name for this subscriber.
    fn name(&self) -> &'static str;

    fn on_event(&mut self, tick: Tick, event: &SimEvent);

    /// For downcasting in tests and tooling only.
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

#[derive(Default)]
pub struct EventBus {
    next_id:     u64,
    subscribers: Vec<(SubscriptionId, Box<dyn EventSubscriber>)>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn EventSubscriber>) -> SimResult<SubscriptionId> {
        let name = subscriber.name();
        if self.subscribers.iter().any(|(_, s)| s.name() == name) {
            return Err(SimError::DuplicateSubscriber { name: name.to_string() });
        }
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        log::debug!("bus: '{name}' subscribed as {}", id.0);
        self.subscribers.push((id, subscriber));
        Ok(id)
    }

    /// Remove a subscriber and hand it back.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> SimResult<Box<dyn EventSubscriber>> {
        let index = self
            .subscribers
            .iter()
            .position(|(sid, _)| *sid == id)
            .ok_or(SimError::UnknownSubscription { id: id.0 })?;
        let (_, subscriber) = self.subscribers.remove(index);
        log::debug!("bus: '{}' unsubscribed", subscriber.name());
        Ok(subscriber)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn publish(&mut self, tick: Tick, event: &SimEvent) {
        for (_, subscriber) in &mut self.subscribers {
            subscriber.on_event(tick, event);
        }
    }

    /// Typed read access to a registered subscriber.
    pub fn get<T: 'static>(&self, id: SubscriptionId) -> Option<&T> {
        self.subscribers
            .iter()
            .find(|(sid, _)| *sid == id)
            .and_then(|(_, s)| s.as_any().downcast_ref::<T>())
    }
}
