//! Scene-ready barrier — a countdown latch with a deadline.
//!
//! The authority opens a barrier when it starts a scene transition,
//! broadcasting `SceneChangePending`. Each observer answers with one
//! `SceneReady` once it has loaded. The barrier releases its continuation
//! when every expected, still-connected observer has acknowledged or the
//! deadline passes, whichever comes first.
//!
//! The continuation lives in an Option and is moved out on release, so it
//! can be handed back at most once. Anything arriving after that, a late
//! ack or a second poll, finds nothing pending and is discarded.
//!
//! Time is supplied by the caller (`now`, seconds); the engine checks the
//! deadline once per tick.

use crate::{
    net::{NetMessage, Recipient, Transport},
    types::{ConnectionId, SceneGeneration},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    AllAcknowledged,
    TimedOut,
}

/// A released barrier. Carries the continuation back to the caller.
#[derive(Debug)]
pub struct BarrierRelease<C> {
    pub generation:     SceneGeneration,
    pub scene:          String,
    pub reason:         ReleaseReason,
    pub continuation:   C,
    pub unacknowledged: Vec<ConnectionId>,
    pub waited_secs:    f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Recorded,
    Duplicate,
    /// No barrier pending, or the ack is for another generation.
    Stale,
    /// The sender was not expected for this generation.
    Unexpected,
}

struct PendingBarrier<C> {
    generation:   SceneGeneration,
    scene:        String,
    started_at:   f64,
    deadline:     f64,
    expected:     BTreeSet<ConnectionId>,
    acked:        BTreeSet<ConnectionId>,
    continuation: Option<C>,
}

impl<C> PendingBarrier<C> {
    fn complete(&self) -> bool {
        self.expected.iter().all(|id| self.acked.contains(id))
    }

    fn missing(&self) -> Vec<ConnectionId> {
        self.expected
            .iter()
            .copied()
            .filter(|id| !self.acked.contains(id))
            .collect()
    }
}

pub struct SceneReadyBarrier<C> {
    last_generation: SceneGeneration,
    pending:         Option<PendingBarrier<C>>,
    late_acks:       u64,
}

impl<C> Default for SceneReadyBarrier<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> SceneReadyBarrier<C> {
    pub fn new() -> Self {
        Self {
            last_generation: 0,
            pending:         None,
            late_acks:       0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_generation(&self) -> Option<SceneGeneration> {
        self.pending.as_ref().map(|p| p.generation)
    }

    pub fn last_generation(&self) -> SceneGeneration {
        self.last_generation
    }

    /// Acks discarded because nothing was pending for them.
    pub fn late_acks(&self) -> u64 {
        self.late_acks
    }

    pub fn acknowledged(&self) -> Vec<ConnectionId> {
        self.pending
            .as_ref()
            .map(|p| p.acked.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Open a barrier and announce the scene change.
    ///
    /// A barrier still pending is cancelled: its continuation is dropped
    /// without running. With nobody to wait for, the release comes back
    /// immediately.
    pub fn begin(
        &mut self,
        scene:        impl Into<String>,
        expected:     impl IntoIterator<Item = ConnectionId>,
        now:          f64,
        timeout_secs: f64,
        continuation: C,
        transport:    &mut dyn Transport,
    ) -> (SceneGeneration, Option<BarrierRelease<C>>) {
        if let Some(old) = self.pending.take() {
            log::warn!(
                "barrier: generation {} ({}) superseded before release, continuation dropped",
                old.generation,
                old.scene
            );
        }

        self.last_generation += 1;
        let generation = self.last_generation;
        let scene = scene.into();
        let expected: BTreeSet<ConnectionId> = expected.into_iter().collect();

        log::info!(
            "barrier: generation {generation} loading '{scene}', waiting on {} observer(s), timeout {timeout_secs:.1}s",
            expected.len()
        );
        transport.send(
            Recipient::Broadcast,
            NetMessage::SceneChangePending {
                generation,
                scene: scene.clone(),
            },
        );

        self.pending = Some(PendingBarrier {
            generation,
            scene,
            started_at: now,
            deadline: now + timeout_secs.max(0.0),
            expected,
            acked: BTreeSet::new(),
            continuation: Some(continuation),
        });

        let release = self.release_if_complete(now);
        (generation, release)
    }

    /// Record one observer's ack. Returns the release if this was the last
    /// one outstanding.
    pub fn acknowledge(
        &mut self,
        generation:    SceneGeneration,
        connection_id: ConnectionId,
        now:           f64,
    ) -> (AckOutcome, Option<BarrierRelease<C>>) {
        let pending = match self.pending.as_mut() {
            Some(p) if p.generation == generation => p,
            _ => {
                self.late_acks += 1;
                log::debug!(
                    "barrier: discarding ack from {connection_id} for generation {generation}, nothing pending"
                );
                return (AckOutcome::Stale, None);
            }
        };

        if !pending.expected.contains(&connection_id) {
            log::debug!("barrier: ack from unexpected peer {connection_id} ignored");
            return (AckOutcome::Unexpected, None);
        }
        if !pending.acked.insert(connection_id) {
            return (AckOutcome::Duplicate, None);
        }
        log::debug!(
            "barrier: generation {generation} ack from {connection_id} ({}/{})",
            pending.acked.len(),
            pending.expected.len()
        );

        (AckOutcome::Recorded, self.release_if_complete(now))
    }

    /// A peer left. It is no longer waited on.
    pub fn peer_disconnected(
        &mut self,
        connection_id: ConnectionId,
        now:           f64,
    ) -> Option<BarrierRelease<C>> {
        let pending = self.pending.as_mut()?;
        if pending.expected.remove(&connection_id) {
            log::info!(
                "barrier: generation {} no longer waiting on disconnected peer {connection_id}",
                pending.generation
            );
        }
        self.release_if_complete(now)
    }

    /// A peer came back while a scene change is pending. It is waited on
    /// again and gets the announcement it missed while away.
    pub fn peer_reconnected(&mut self, connection_id: ConnectionId, transport: &mut dyn Transport) -> bool {
        let pending = match self.pending.as_mut() {
            Some(p) => p,
            None => return false,
        };
        pending.expected.insert(connection_id);
        transport.send(
            Recipient::Connection(connection_id),
            NetMessage::SceneChangePending {
                generation: pending.generation,
                scene:      pending.scene.clone(),
            },
        );
        log::info!(
            "barrier: generation {} resent to reconnected peer {connection_id}",
            pending.generation
        );
        true
    }

    /// Deadline check. Called once per tick.
    pub fn poll(&mut self, now: f64) -> Option<BarrierRelease<C>> {
        let timed_out = self.pending.as_ref().is_some_and(|p| now >= p.deadline);
        if !timed_out {
            return None;
        }
        let release = self.release(now, ReleaseReason::TimedOut)?;
        log::warn!(
            "barrier: generation {} timed out after {:.2}s, unacknowledged: {:?}",
            release.generation,
            release.waited_secs,
            release.unacknowledged
        );
        Some(release)
    }

    /// Drop whatever is pending without running it.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(p) => {
                log::info!("barrier: generation {} cancelled", p.generation);
                true
            }
            None => false,
        }
    }

    fn release_if_complete(&mut self, now: f64) -> Option<BarrierRelease<C>> {
        let complete = self.pending.as_ref().is_some_and(PendingBarrier::complete);
        if !complete {
            return None;
        }
        let release = self.release(now, ReleaseReason::AllAcknowledged)?;
        log::info!(
            "barrier: generation {} released after {:.2}s, all observers ready",
            release.generation,
            release.waited_secs
        );
        Some(release)
    }

    fn release(&mut self, now: f64, reason: ReleaseReason) -> Option<BarrierRelease<C>> {
        let mut pending = self.pending.take()?;
        let continuation = pending.continuation.take()?;
        Some(BarrierRelease {
            generation: pending.generation,
            unacknowledged: pending.missing(),
            scene: pending.scene,
            reason,
            continuation,
            waited_secs: now - pending.started_at,
        })
    }
}
