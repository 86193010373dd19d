//! Session engine: one per node, authority or observer.
//!
//! Every component is constructed here and handed its collaborators
//! explicitly; there is no global lookup.
//!
//! PER-TICK ORDER on the authority (fixed, never reordered):
//!   1. Clock advance (simulation time stops while a barrier is pending)
//!   2. Barrier deadline check
//!   3. Round timer, including pre-expiry hooks on expiry
//!   4. Round failure → session end, if configured
//!   5. Progress sync to observers (throttled)
//!   6. UI push
//!
//! EVENT ROUTING, per event, in production order:
//!   round timer → replication mirror → event log → bus subscribers
//!
//! RULES:
//!   - Every mutating entry point is authority-only. On an observer the
//!     session requests are forwarded to the authority; everything else
//!     is a logged no-op.
//!   - Observers change nothing but their read-only projection.

use crate::{
    barrier::{BarrierRelease, SceneReadyBarrier},
    bus::{EventBus, EventSubscriber, SubscriptionId},
    clock::SessionClock,
    command::PlayerCommand,
    config::SessionConfig,
    economy::EconomyStateMachine,
    error::SimResult,
    event::{SessionEndReason, SimEvent},
    event_log::EventLog,
    net::{Envelope, LoopbackHub, NetMessage, NullTransport, Recipient, Transport},
    recovery::{EntityLocator, ReconnectRecovery, RecoveryReport, SpawnAnchor},
    replication::{
        ObserverProjection, ProjectionChange, ReplicatedField, ReplicatedSnapshot, ReplicationMirror,
    },
    round_timer::{PreExpiryHook, RoundState, RoundTimer},
    types::{ConnectionId, EntityId, Money, Role, SceneGeneration, SessionId, HOST_CONNECTION_ID},
    ui::{push_change, UiSink},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// What the authority does once a scene barrier releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneContinuation {
    /// Session start: day 0 → day 1.
    BeginFirstDay,
    /// Confirmed advance: banks the day and starts the next.
    AdvanceDay,
    /// Nothing beyond resuming the simulation clock.
    ResumeRound,
}

pub struct SessionEngine {
    pub session_id: SessionId,
    pub clock:      SessionClock,
    role:           Role,
    local_id:       ConnectionId,
    config:         SessionConfig,
    economy:        EconomyStateMachine,
    timer:          RoundTimer,
    mirror:         ReplicationMirror,
    barrier:        SceneReadyBarrier<SceneContinuation>,
    recovery:       ReconnectRecovery,
    projection:     ObserverProjection,
    transport:      Box<dyn Transport>,
    bus:            EventBus,
    hooks:          Vec<Box<dyn PreExpiryHook>>,
    ui:             Option<Box<dyn UiSink>>,
    entities:       Option<Box<dyn EntityLocator>>,
    log:            EventLog,
    // Observer-side scene and movement state.
    pending_scene:   Option<(SceneGeneration, String)>,
    acked_scenes:    BTreeSet<SceneGeneration>,
    position_resets: Vec<(EntityId, SpawnAnchor)>,
    gameplay_ui:     bool,
    ui_warned:       bool,
}

impl SessionEngine {
    pub fn new(
        session_id: SessionId,
        role:       Role,
        config:     SessionConfig,
        transport:  Box<dyn Transport>,
    ) -> SimResult<Self> {
        config.validate()?;
        let local_id = transport.local_id();
        let mut engine = Self {
            clock:      SessionClock::new(),
            economy:    EconomyStateMachine::new(role, config.economy.clone()),
            timer:      RoundTimer::new(role, config.round.duration_secs),
            mirror:     ReplicationMirror::new(role, config.round.progress_sync_interval_secs),
            barrier:    SceneReadyBarrier::new(),
            recovery:   ReconnectRecovery::new(config.recovery.clone()),
            projection: ObserverProjection::new(),
            bus:        EventBus::new(),
            hooks:      Vec::new(),
            ui:         None,
            entities:   None,
            log:        EventLog::new(),
            pending_scene:   None,
            acked_scenes:    BTreeSet::new(),
            position_resets: Vec::new(),
            gameplay_ui:     false,
            ui_warned:       false,
            session_id,
            role,
            local_id,
            config,
            transport,
        };
        let init = SimEvent::SessionInitialized {
            session_id: engine.session_id.clone(),
        };
        engine.dispatch("engine", vec![init])?;
        log::info!(
            "engine: session {} up as {:?} (connection {local_id})",
            engine.session_id,
            role
        );
        Ok(engine)
    }

    pub fn authority(session_id: SessionId, config: SessionConfig, hub: &LoopbackHub) -> SimResult<Self> {
        Self::new(
            session_id,
            Role::Authority,
            config,
            Box::new(hub.transport(HOST_CONNECTION_ID)),
        )
    }

    pub fn observer(
        session_id: SessionId,
        config:     SessionConfig,
        hub:        &LoopbackHub,
        id:         ConnectionId,
    ) -> SimResult<Self> {
        Self::new(session_id, Role::Observer, config, Box::new(hub.transport(id)))
    }

    /// Solo authority with test defaults and no network.
    pub fn build_test(session_id: SessionId) -> SimResult<Self> {
        Self::new(
            session_id,
            Role::Authority,
            SessionConfig::default_test(),
            Box::new(NullTransport::default()),
        )
    }

    // ── Wiring ─────────────────────────────────────────────────

    pub fn with_ui(mut self, ui: Box<dyn UiSink>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn with_entity_locator(mut self, locator: Box<dyn EntityLocator>) -> Self {
        self.entities = Some(locator);
        self
    }

    /// Hooks run in registration order.
    pub fn add_pre_expiry_hook(&mut self, hook: Box<dyn PreExpiryHook>) {
        self.hooks.push(hook);
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn EventSubscriber>) -> SimResult<SubscriptionId> {
        self.bus.subscribe(subscriber)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> SimResult<Box<dyn EventSubscriber>> {
        self.bus.unsubscribe(id)
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_id(&self) -> ConnectionId {
        self.local_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn economy(&self) -> &EconomyStateMachine {
        &self.economy
    }

    pub fn round(&self) -> &RoundState {
        self.timer.state()
    }

    pub fn timer(&self) -> &RoundTimer {
        &self.timer
    }

    /// The replicated view as this node sees it.
    pub fn snapshot(&self) -> &ReplicatedSnapshot {
        match self.role {
            Role::Authority => self.mirror.snapshot(),
            Role::Observer  => self.projection.snapshot(),
        }
    }

    pub fn mirror(&self) -> &ReplicationMirror {
        &self.mirror
    }

    pub fn projection(&self) -> &ObserverProjection {
        &self.projection
    }

    pub fn recovery(&self) -> &ReconnectRecovery {
        &self.recovery
    }

    pub fn session_started(&self) -> bool {
        self.snapshot().session_started
    }

    pub fn scene_barrier_pending(&self) -> Option<SceneGeneration> {
        self.barrier.pending_generation()
    }

    pub fn late_scene_acks(&self) -> u64 {
        self.barrier.late_acks()
    }

    /// Observer: the scene the authority asked us to load, if any.
    pub fn pending_scene(&self) -> Option<&(SceneGeneration, String)> {
        self.pending_scene.as_ref()
    }

    pub fn gameplay_ui_visible(&self) -> bool {
        self.gameplay_ui
    }

    /// Observer: position resets received, for the locomotion layer.
    pub fn take_position_resets(&mut self) -> Vec<(EntityId, SpawnAnchor)> {
        std::mem::take(&mut self.position_resets)
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // ── Frame update ───────────────────────────────────────────

    pub fn tick(&mut self, dt: f64) -> SimResult<()> {
        let (tick, sim_dt) = self.clock.advance(dt);

        if !self.role.is_authority() {
            self.projection.advance_local(dt);
            let remaining = self.projection.displayed_remaining();
            if let Some(ui) = self.ui.as_mut() {
                ui.set_round_countdown(remaining);
            }
            return Ok(());
        }

        if let Some(release) = self.barrier.poll(self.clock.elapsed) {
            self.finish_barrier(release)?;
        }

        if self.clock.paused || !self.mirror.session_started() {
            return Ok(());
        }

        let outcome = self.timer.tick(tick, sim_dt, &mut self.economy, &mut self.hooks);
        self.flush()?;

        if outcome == Some(false) && self.config.round.end_session_on_failure {
            self.end_session(SessionEndReason::RoundFailed)?;
        }

        if self.timer.is_running() {
            self.mirror.sync_round(
                self.timer.progress(),
                self.timer.day_night_progress(),
                self.clock.elapsed,
                self.transport.as_mut(),
            );
            self.sync_local_projection();
        }

        let remaining = self.timer.remaining();
        if let Some(ui) = self.ui.as_mut() {
            ui.set_round_countdown(remaining);
        }
        Ok(())
    }

    pub fn run_for(&mut self, secs: f64, dt: f64) -> SimResult<()> {
        if !(dt > 0.0) {
            log::warn!("engine: run_for with dt={dt} ignored");
            return Ok(());
        }
        let steps = (secs / dt).ceil().max(0.0) as u64;
        for _ in 0..steps {
            self.tick(dt)?;
        }
        Ok(())
    }

    // ── Economy entry points ───────────────────────────────────

    pub fn add_money(&mut self, amount: Money) -> SimResult<()> {
        self.economy.add_money(amount);
        self.flush()
    }

    pub fn remove_money(&mut self, amount: Money) -> SimResult<()> {
        self.economy.remove_money(amount);
        self.flush()
    }

    pub fn spend_banked(&mut self, amount: Money) -> SimResult<bool> {
        let spent = self.economy.spend_banked(amount);
        self.flush()?;
        Ok(spent)
    }

    pub fn set_target(&mut self, value: Money) -> SimResult<()> {
        self.economy.set_target(value);
        self.flush()
    }

    pub fn advance_day(&mut self) -> SimResult<()> {
        self.advance_days(1)
    }

    pub fn advance_days(&mut self, days: u32) -> SimResult<()> {
        self.economy.advance_days(days);
        self.flush()
    }

    pub fn reset_progress(&mut self) -> SimResult<()> {
        self.economy.reset_progress();
        self.flush()
    }

    // ── Session control ────────────────────────────────────────

    /// Start the session. Idempotent; observers forward to the authority.
    /// Returns true only on the call that actually started it.
    pub fn request_start(&mut self) -> SimResult<bool> {
        if !self.mirror.request_start(self.transport.as_mut()) {
            return Ok(false);
        }
        self.sync_local_projection();
        self.set_gameplay_ui(true);
        self.dispatch("session", vec![SimEvent::SessionStarted])?;

        self.timer.reset();
        self.economy.reset_progress();
        self.flush()?;

        match self.config.scenes.start_scene.clone() {
            Some(scene) => {
                let timeout = self.config.scenes.start_timeout_secs;
                self.begin_scene_transition(scene, SceneContinuation::BeginFirstDay, timeout)?;
            }
            None => self.run_continuation(SceneContinuation::BeginFirstDay)?,
        }
        log::info!(
            "tick={} engine: session {} started",
            self.clock.current_tick,
            self.session_id
        );
        Ok(true)
    }

    /// End the session. Idempotent; observers forward to the authority.
    pub fn request_end(&mut self) -> SimResult<bool> {
        self.end_session(SessionEndReason::Requested)
    }

    /// Move on from a won round. Valid only while awaiting advance.
    pub fn confirm_advance(&mut self) -> SimResult<bool> {
        if !self.role.is_authority() {
            log::debug!("engine: forwarding advance request to authority");
            self.transport.send(Recipient::Authority, NetMessage::RequestAdvance);
            return Ok(false);
        }
        if !self.mirror.session_started() || !self.timer.take_advance() {
            return Ok(false);
        }
        match self.config.scenes.day_scene.clone() {
            Some(scene) => {
                let timeout = self.config.scenes.advance_timeout_secs;
                self.begin_scene_transition(scene, SceneContinuation::AdvanceDay, timeout)?;
            }
            None => self.run_continuation(SceneContinuation::AdvanceDay)?,
        }
        Ok(true)
    }

    fn end_session(&mut self, reason: SessionEndReason) -> SimResult<bool> {
        if !self.mirror.request_end(self.transport.as_mut()) {
            return Ok(false);
        }
        self.sync_local_projection();
        self.set_gameplay_ui(false);
        if self.barrier.cancel() {
            self.set_round_paused(false);
        }
        self.timer.stop();
        self.dispatch("session", vec![SimEvent::SessionEnded { reason }])?;
        log::info!(
            "tick={} engine: session {} ended ({reason:?})",
            self.clock.current_tick,
            self.session_id
        );
        Ok(true)
    }

    // ── Scene transitions ──────────────────────────────────────

    /// Pause the simulation until every connected observer has loaded
    /// `scene` or the timeout passes, then run `continuation`.
    pub fn begin_scene_transition(
        &mut self,
        scene:        String,
        continuation: SceneContinuation,
        timeout_secs: Option<f64>,
    ) -> SimResult<Option<SceneGeneration>> {
        if !self.role.is_authority() {
            log::warn!("engine: scene transition to '{scene}' ignored on observer");
            return Ok(None);
        }
        let timeout = timeout_secs.unwrap_or(self.config.barrier.default_timeout_secs);
        let expected = self.recovery.connected_peers();

        self.set_round_paused(true);
        let (generation, release) = self.barrier.begin(
            scene.clone(),
            expected,
            self.clock.elapsed,
            timeout,
            continuation,
            self.transport.as_mut(),
        );
        self.dispatch("barrier", vec![SimEvent::SceneChangePending { generation, scene }])?;

        if let Some(release) = release {
            self.finish_barrier(release)?;
        }
        Ok(Some(generation))
    }

    /// Observer: local loading finished. Sends one ack per generation.
    pub fn scene_loaded(&mut self, generation: SceneGeneration) -> bool {
        if self.role.is_authority() {
            return false;
        }
        if !self.acked_scenes.insert(generation) {
            log::debug!("engine: scene generation {generation} already acknowledged");
            return false;
        }
        if self.pending_scene.as_ref().is_some_and(|(g, _)| *g == generation) {
            self.pending_scene = None;
        }
        self.transport
            .send(Recipient::Authority, NetMessage::SceneReady { generation });
        true
    }

    fn finish_barrier(&mut self, release: BarrierRelease<SceneContinuation>) -> SimResult<()> {
        self.set_round_paused(false);
        self.dispatch(
            "barrier",
            vec![SimEvent::SceneBarrierReleased {
                generation:     release.generation,
                reason:         release.reason,
                unacknowledged: release.unacknowledged,
            }],
        )?;
        self.run_continuation(release.continuation)
    }

    fn run_continuation(&mut self, continuation: SceneContinuation) -> SimResult<()> {
        if !self.mirror.session_started() {
            log::debug!("engine: {continuation:?} dropped, session not running");
            return Ok(());
        }
        match continuation {
            SceneContinuation::BeginFirstDay | SceneContinuation::AdvanceDay => {
                self.economy.advance_day();
                self.flush()
            }
            SceneContinuation::ResumeRound => Ok(()),
        }
    }

    // ── Peers ──────────────────────────────────────────────────

    pub fn peer_connected(&mut self, connection_id: ConnectionId) -> SimResult<Option<RecoveryReport>> {
        if !self.role.is_authority() || connection_id == HOST_CONNECTION_ID {
            return Ok(None);
        }
        let report = self.recovery.on_peer_connected(
            connection_id,
            self.entities.as_deref(),
            self.mirror.full_snapshot_message(),
            self.mirror.session_started(),
            self.transport.as_mut(),
        );
        self.barrier.peer_reconnected(connection_id, self.transport.as_mut());
        self.dispatch(
            "recovery",
            vec![SimEvent::PeerConnected {
                connection_id,
                spawn_slot: report.spawn_slot,
                reconnect:  report.reconnect,
            }],
        )?;
        Ok(Some(report))
    }

    pub fn peer_disconnected(&mut self, connection_id: ConnectionId) -> SimResult<()> {
        if !self.role.is_authority() {
            return Ok(());
        }
        if !self.recovery.on_peer_disconnected(connection_id) {
            return Ok(());
        }
        self.dispatch("recovery", vec![SimEvent::PeerDisconnected { connection_id }])?;
        if let Some(release) = self.barrier.peer_disconnected(connection_id, self.clock.elapsed) {
            self.finish_barrier(release)?;
        }
        Ok(())
    }

    // ── Inbound messages ───────────────────────────────────────

    pub fn handle_message(&mut self, envelope: Envelope) -> SimResult<()> {
        match self.role {
            Role::Authority => self.handle_as_authority(envelope),
            Role::Observer  => {
                self.handle_as_observer(envelope);
                Ok(())
            }
        }
    }

    fn handle_as_authority(&mut self, envelope: Envelope) -> SimResult<()> {
        let from = envelope.from;
        match envelope.message {
            NetMessage::RequestStart => {
                log::debug!("engine: start requested by peer {from}");
                self.request_start().map(|_| ())
            }
            NetMessage::RequestEnd => {
                log::debug!("engine: end requested by peer {from}");
                self.request_end().map(|_| ())
            }
            NetMessage::RequestAdvance => {
                log::debug!("engine: advance requested by peer {from}");
                self.confirm_advance().map(|_| ())
            }
            NetMessage::SceneReady { generation } => {
                self.recovery.note_scene_ack(from, generation);
                let (_, release) = self.barrier.acknowledge(generation, from, self.clock.elapsed);
                match release {
                    Some(release) => self.finish_barrier(release),
                    None => Ok(()),
                }
            }
            other => {
                log::warn!("engine: authority violation, peer {from} sent {}", other.kind());
                Ok(())
            }
        }
    }

    fn handle_as_observer(&mut self, envelope: Envelope) {
        if envelope.from != HOST_CONNECTION_ID {
            log::warn!(
                "engine: ignoring {} from non-authority peer {}",
                envelope.message.kind(),
                envelope.from
            );
            return;
        }
        match envelope.message {
            NetMessage::FieldUpdate { seq, field } => {
                let changes = self.projection.apply_field(seq, field);
                self.push_ui(&changes);
            }
            NetMessage::FullSnapshot { seq, snapshot } => {
                let changes = self.projection.apply_snapshot(seq, &snapshot);
                self.push_ui(&changes);
            }
            NetMessage::ResetPosition { entity, anchor } => {
                log::debug!("engine: entity {entity} reset to {:?}", anchor.position);
                self.position_resets.push((entity, anchor));
            }
            NetMessage::SetGameplayUi { visible } => self.show_gameplay_ui(visible),
            NetMessage::SceneChangePending { generation, .. } if self.acked_scenes.contains(&generation) => {
                log::debug!("engine: scene generation {generation} already loaded");
            }
            NetMessage::SceneChangePending { generation, scene } => {
                log::debug!("engine: authority wants scene '{scene}' (generation {generation})");
                self.pending_scene = Some((generation, scene));
            }
            other => {
                log::warn!("engine: observer received authority-bound {}", other.kind());
            }
        }
    }

    /// Apply a local command. Used by tooling.
    pub fn execute(&mut self, command: PlayerCommand) -> SimResult<()> {
        match command {
            PlayerCommand::RequestStart => self.request_start().map(|_| ()),
            PlayerCommand::RequestEnd => self.request_end().map(|_| ()),
            PlayerCommand::ConfirmAdvance => self.confirm_advance().map(|_| ()),
            PlayerCommand::AddMoney { amount } => self.add_money(amount),
            PlayerCommand::RemoveMoney { amount } => self.remove_money(amount),
            PlayerCommand::SpendBanked { amount } => self.spend_banked(amount).map(|_| ()),
            PlayerCommand::SetTarget { value } => self.set_target(value),
            PlayerCommand::AdvanceDays { days } => self.advance_days(days),
            PlayerCommand::ResetProgress => self.reset_progress(),
            PlayerCommand::SceneLoaded { generation } => {
                self.scene_loaded(generation);
                Ok(())
            }
            PlayerCommand::PeerConnected { connection_id } => {
                self.peer_connected(connection_id).map(|_| ())
            }
            PlayerCommand::PeerDisconnected { connection_id } => {
                self.peer_disconnected(connection_id)
            }
        }
    }

    // ── Internals ──────────────────────────────────────────────

    /// Authority: hold or release the round clock. Observers get the
    /// current progress first, then the flag, so their countdown stops
    /// on the authority's value.
    fn set_round_paused(&mut self, paused: bool) {
        if paused {
            self.clock.pause();
            if self.timer.is_running() {
                let progress = ReplicatedField::Progress(self.timer.progress() as f32);
                self.mirror.write(progress, self.transport.as_mut());
            }
        } else {
            self.clock.resume();
        }
        self.mirror
            .write(ReplicatedField::RoundPaused(paused), self.transport.as_mut());
        self.sync_local_projection();
    }

    /// Authority: gameplay UI follows the session phase on every node.
    fn set_gameplay_ui(&mut self, visible: bool) {
        self.show_gameplay_ui(visible);
        self.transport
            .send(Recipient::Broadcast, NetMessage::SetGameplayUi { visible });
    }

    fn show_gameplay_ui(&mut self, visible: bool) {
        self.gameplay_ui = visible;
        if let Some(ui) = self.ui.as_mut() {
            ui.set_gameplay_visible(visible);
        }
    }

    /// Route everything the economy and timer have produced.
    fn flush(&mut self) -> SimResult<()> {
        let events = self.economy.take_events();
        self.dispatch("economy", events)
    }

    fn dispatch(&mut self, source: &'static str, events: Vec<SimEvent>) -> SimResult<()> {
        let tick = self.clock.current_tick;
        let mut queue: VecDeque<(&'static str, SimEvent)> =
            events.into_iter().map(|e| (source, e)).collect();
        queue.extend(self.timer.take_events().into_iter().map(|e| ("round", e)));

        while let Some((source, event)) = queue.pop_front() {
            self.timer.observe(&event);
            self.mirror.apply_event(&event, self.transport.as_mut());
            self.log.append(&self.session_id, tick, source, &event)?;
            self.bus.publish(tick, &event);
            queue.extend(self.timer.take_events().into_iter().map(|e| ("round", e)));
        }

        self.sync_local_projection();
        Ok(())
    }

    /// Authority: feed the mirror's writes through the same projection
    /// observers use, so the host's UI sees exactly what they see.
    fn sync_local_projection(&mut self) {
        let writes = self.mirror.take_writes();
        if writes.is_empty() {
            return;
        }
        let changes: Vec<ProjectionChange> = writes
            .into_iter()
            .flat_map(|(seq, field)| self.projection.apply_field(seq, field))
            .collect();
        self.push_ui(&changes);
    }

    fn push_ui(&mut self, changes: &[ProjectionChange]) {
        if changes.is_empty() {
            return;
        }
        match self.ui.as_mut() {
            Some(ui) => {
                for change in changes {
                    push_change(ui.as_mut(), change, &self.projection);
                }
            }
            None if !self.ui_warned => {
                log::warn!("engine: no UI sink attached, replicated values not displayed");
                self.ui_warned = true;
            }
            None => {}
        }
    }
}

/// Deliver queued loopback messages until the network is quiet.
/// Returns how many envelopes were handled.
pub fn pump(hub: &LoopbackHub, nodes: &mut [&mut SessionEngine]) -> SimResult<usize> {
    const MAX_ROUNDS: usize = 64;
    let mut handled = 0;
    for _ in 0..MAX_ROUNDS {
        let mut progressed = false;
        for node in nodes.iter_mut() {
            for envelope in hub.drain(node.local_id()) {
                node.handle_message(envelope)?;
                handled += 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    Ok(handled)
}
