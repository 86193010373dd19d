//! Replication — the one-directional mirror of canonical session state.
//!
//! RULE: Only the authority writes the ReplicatedSnapshot. Observers hold
//! an ObserverProjection: a read-only copy refreshed from FieldUpdate and
//! FullSnapshot messages, never a live reference.
//!
//! Every write takes the next value of a single sequence counter and
//! records it as that field's version. Observers discard any update whose
//! sequence is not newer than the one they hold for the field, which makes
//! duplicate and reordered deliveries harmless.

use crate::{
    event::SimEvent,
    net::{NetMessage, Recipient, Transport},
    types::{Day, Money, Role},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    CurrentMoney,
    BankedMoney,
    TargetMoney,
    CurrentDay,
    Progress,
    DayNightProgress,
    RoundTotal,
    RoundPaused,
    SessionStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum ReplicatedField {
    CurrentMoney(Money),
    BankedMoney(Money),
    TargetMoney(Money),
    CurrentDay(Day),
    /// Fraction of the round countdown still remaining.
    Progress(f32),
    /// Fraction of the day elapsed, for lighting.
    DayNightProgress(f32),
    RoundTotal(f32),
    /// The authority's round clock is held, e.g. behind a scene barrier.
    RoundPaused(bool),
    SessionStarted(bool),
}

impl ReplicatedField {
    pub fn key(&self) -> FieldKey {
        match self {
            ReplicatedField::CurrentMoney(_)     => FieldKey::CurrentMoney,
            ReplicatedField::BankedMoney(_)      => FieldKey::BankedMoney,
            ReplicatedField::TargetMoney(_)      => FieldKey::TargetMoney,
            ReplicatedField::CurrentDay(_)       => FieldKey::CurrentDay,
            ReplicatedField::Progress(_)         => FieldKey::Progress,
            ReplicatedField::DayNightProgress(_) => FieldKey::DayNightProgress,
            ReplicatedField::RoundTotal(_)       => FieldKey::RoundTotal,
            ReplicatedField::RoundPaused(_)      => FieldKey::RoundPaused,
            ReplicatedField::SessionStarted(_)   => FieldKey::SessionStarted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedSnapshot {
    pub current_money:      Money,
    pub banked_money:       Money,
    pub target_money:       Money,
    pub current_day:        Day,
    pub progress:           f32,
    pub day_night_progress: f32,
    pub round_total:        f32,
    pub round_paused:       bool,
    pub session_started:    bool,
}

impl Default for ReplicatedSnapshot {
    fn default() -> Self {
        Self {
            current_money:      0,
            banked_money:       0,
            target_money:       0,
            current_day:        0,
            progress:           1.0,
            day_night_progress: 0.0,
            round_total:        0.0,
            round_paused:       false,
            session_started:    false,
        }
    }
}

impl ReplicatedSnapshot {
    pub fn fields(&self) -> [ReplicatedField; 9] {
        [
            ReplicatedField::CurrentMoney(self.current_money),
            ReplicatedField::BankedMoney(self.banked_money),
            ReplicatedField::TargetMoney(self.target_money),
            ReplicatedField::CurrentDay(self.current_day),
            ReplicatedField::Progress(self.progress),
            ReplicatedField::DayNightProgress(self.day_night_progress),
            ReplicatedField::RoundTotal(self.round_total),
            ReplicatedField::RoundPaused(self.round_paused),
            ReplicatedField::SessionStarted(self.session_started),
        ]
    }

    /// Write one field. Returns true if the value changed.
    pub fn set(&mut self, field: ReplicatedField) -> bool {
        fn assign<T: PartialEq>(slot: &mut T, value: T) -> bool {
            if *slot == value {
                return false;
            }
            *slot = value;
            true
        }
        match field {
            ReplicatedField::CurrentMoney(v)     => assign(&mut self.current_money, v),
            ReplicatedField::BankedMoney(v)      => assign(&mut self.banked_money, v),
            ReplicatedField::TargetMoney(v)      => assign(&mut self.target_money, v),
            ReplicatedField::CurrentDay(v)       => assign(&mut self.current_day, v),
            ReplicatedField::Progress(v)         => assign(&mut self.progress, v.clamp(0.0, 1.0)),
            ReplicatedField::DayNightProgress(v) => assign(&mut self.day_night_progress, v.clamp(0.0, 1.0)),
            ReplicatedField::RoundTotal(v)       => assign(&mut self.round_total, v.max(0.0)),
            ReplicatedField::RoundPaused(v)      => assign(&mut self.round_paused, v),
            ReplicatedField::SessionStarted(v)   => assign(&mut self.session_started, v),
        }
    }

    /// Countdown seconds implied by `progress` and `round_total`.
    pub fn round_remaining_secs(&self) -> f64 {
        self.progress as f64 * self.round_total as f64
    }
}

// ── Authority side ─────────────────────────────────────────────────

pub struct ReplicationMirror {
    role:               Role,
    snapshot:           ReplicatedSnapshot,
    seq:                u64,
    field_seq:          BTreeMap<FieldKey, u64>,
    sync_interval:      f64,
    last_progress_sync: Option<f64>,
    writes:             Vec<(u64, ReplicatedField)>,
}

impl ReplicationMirror {
    pub fn new(role: Role, progress_sync_interval_secs: f64) -> Self {
        Self {
            role,
            snapshot: ReplicatedSnapshot::default(),
            seq: 0,
            field_seq: BTreeMap::new(),
            sync_interval: progress_sync_interval_secs.max(0.0),
            last_progress_sync: None,
            writes: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> &ReplicatedSnapshot {
        &self.snapshot
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn field_seq(&self, key: FieldKey) -> u64 {
        self.field_seq.get(&key).copied().unwrap_or(0)
    }

    pub fn session_started(&self) -> bool {
        self.snapshot.session_started
    }

    /// Writes accepted since the last call, with their sequence numbers.
    pub fn take_writes(&mut self) -> Vec<(u64, ReplicatedField)> {
        std::mem::take(&mut self.writes)
    }

    pub fn full_snapshot_message(&self) -> NetMessage {
        NetMessage::FullSnapshot {
            seq:      self.seq,
            snapshot: self.snapshot,
        }
    }

    /// Write a field and broadcast it. Unchanged values are not sent.
    pub fn write(&mut self, field: ReplicatedField, transport: &mut dyn Transport) -> bool {
        if !self.role.is_authority() {
            log::debug!("replication: write of {:?} ignored on observer", field.key());
            return false;
        }
        if !self.snapshot.set(field) {
            return false;
        }
        self.seq += 1;
        self.field_seq.insert(field.key(), self.seq);
        self.writes.push((self.seq, field));
        transport.send(
            Recipient::Broadcast,
            NetMessage::FieldUpdate { seq: self.seq, field },
        );
        true
    }

    /// Mirror one economy, round or session event into the snapshot.
    pub fn apply_event(&mut self, event: &SimEvent, transport: &mut dyn Transport) {
        match event {
            SimEvent::MoneyChanged { current_money } => {
                self.write(ReplicatedField::CurrentMoney(*current_money), transport);
            }
            SimEvent::BankedMoneyChanged { banked_money } => {
                self.write(ReplicatedField::BankedMoney(*banked_money), transport);
            }
            SimEvent::DailyEarningsBanked { banked_total, .. } => {
                self.write(ReplicatedField::BankedMoney(*banked_total), transport);
                self.write(ReplicatedField::CurrentMoney(0), transport);
            }
            SimEvent::TargetIncreased { target_money, .. }
            | SimEvent::TargetChanged { target_money } => {
                self.write(ReplicatedField::TargetMoney(*target_money), transport);
            }
            SimEvent::DayAdvanced { day } => {
                self.write(ReplicatedField::CurrentMoney(0), transport);
                self.write(ReplicatedField::CurrentDay(*day), transport);
            }
            SimEvent::ProgressReset { target_money } => {
                self.write(ReplicatedField::CurrentMoney(0), transport);
                self.write(ReplicatedField::BankedMoney(0), transport);
                self.write(ReplicatedField::TargetMoney(*target_money), transport);
                self.write(ReplicatedField::CurrentDay(0), transport);
            }
            SimEvent::RoundStarted { total_secs, .. } => {
                self.write(ReplicatedField::RoundTotal(*total_secs as f32), transport);
                self.write(ReplicatedField::Progress(1.0), transport);
                self.write(ReplicatedField::DayNightProgress(0.0), transport);
            }
            SimEvent::RoundEvaluated { .. } => {
                self.write(ReplicatedField::Progress(0.0), transport);
                self.write(ReplicatedField::DayNightProgress(1.0), transport);
            }
            SimEvent::SessionStarted => {
                self.write(ReplicatedField::SessionStarted(true), transport);
            }
            SimEvent::SessionEnded { .. } => {
                self.write(ReplicatedField::SessionStarted(false), transport);
            }
            _ => {}
        }
    }

    /// Push the running countdown, at most once per sync interval.
    pub fn sync_round(
        &mut self,
        progress:   f64,
        day_night:  f64,
        now:        f64,
        transport:  &mut dyn Transport,
    ) {
        if let Some(last) = self.last_progress_sync {
            if now - last < self.sync_interval {
                return;
            }
        }
        self.last_progress_sync = Some(now);
        self.write(ReplicatedField::Progress(progress as f32), transport);
        self.write(ReplicatedField::DayNightProgress(day_night as f32), transport);
    }

    // ── Session control ────────────────────────────────────────

    /// Returns true only when this call started the session.
    /// Observers forward the request to the authority instead.
    pub fn request_start(&mut self, transport: &mut dyn Transport) -> bool {
        if !self.role.is_authority() {
            log::debug!("replication: forwarding start request to authority");
            transport.send(Recipient::Authority, NetMessage::RequestStart);
            return false;
        }
        if self.snapshot.session_started {
            log::debug!("replication: start requested but session already running");
            return false;
        }
        self.write(ReplicatedField::SessionStarted(true), transport)
    }

    /// Returns true only when this call ended the session.
    pub fn request_end(&mut self, transport: &mut dyn Transport) -> bool {
        if !self.role.is_authority() {
            log::debug!("replication: forwarding end request to authority");
            transport.send(Recipient::Authority, NetMessage::RequestEnd);
            return false;
        }
        if !self.snapshot.session_started {
            log::debug!("replication: end requested but no session running");
            return false;
        }
        self.write(ReplicatedField::SessionStarted(false), transport)
    }
}

// ── Observer side ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionChange {
    Field(ReplicatedField),
    /// session_started went false → true. The only field change allowed
    /// to trigger local behaviour.
    StartVisualSimulation,
}

#[derive(Debug, Clone, Default)]
pub struct ObserverProjection {
    snapshot:        ReplicatedSnapshot,
    field_seq:       BTreeMap<FieldKey, u64>,
    local_remaining: f64,
    visual_running:  bool,
    applied:         u64,
    discarded:       u64,
}

impl ObserverProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &ReplicatedSnapshot {
        &self.snapshot
    }

    pub fn field_seq(&self, key: FieldKey) -> u64 {
        self.field_seq.get(&key).copied().unwrap_or(0)
    }

    pub fn visual_simulation_running(&self) -> bool {
        self.visual_running
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Countdown shown to the player. Interpolated locally between
    /// updates and snapped to every authoritative progress value.
    pub fn displayed_remaining(&self) -> f64 {
        self.local_remaining
    }

    pub fn apply_field(&mut self, seq: u64, field: ReplicatedField) -> Vec<ProjectionChange> {
        let key = field.key();
        if seq <= self.field_seq(key) {
            self.discarded += 1;
            return Vec::new();
        }
        self.field_seq.insert(key, seq);
        self.applied += 1;

        let was_started = self.snapshot.session_started;
        if !self.snapshot.set(field) {
            return Vec::new();
        }

        let mut changes = vec![ProjectionChange::Field(field)];
        match field {
            ReplicatedField::SessionStarted(true) if !was_started => {
                self.visual_running = true;
                changes.push(ProjectionChange::StartVisualSimulation);
            }
            ReplicatedField::Progress(_) | ReplicatedField::RoundTotal(_) => {
                self.local_remaining = self.snapshot.round_remaining_secs();
            }
            _ => {}
        }
        changes
    }

    pub fn apply_snapshot(&mut self, seq: u64, snapshot: &ReplicatedSnapshot) -> Vec<ProjectionChange> {
        snapshot
            .fields()
            .into_iter()
            .flat_map(|field| self.apply_field(seq, field))
            .collect()
    }

    /// Local countdown between authoritative updates. Holds while the
    /// authority's round clock is paused.
    pub fn advance_local(&mut self, dt: f64) {
        let running = self.snapshot.session_started
            && !self.snapshot.round_paused
            && self.snapshot.progress > 0.0
            && self.snapshot.day_night_progress < 1.0;
        if running {
            self.local_remaining = (self.local_remaining - dt).max(0.0);
        }
    }
}
