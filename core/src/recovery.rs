//! Reconnect recovery — re-synchronizes a peer that joins mid-session.
//!
//! On every connect (first or repeat) the authority:
//!   1. looks up or creates the ConnectionRecord; new ids take the next
//!      round-robin spawn slot, which then never changes for that id
//!   2. finds the peer's controlled entity and sends it, to that peer
//!      only, back to the spawn anchor for its slot
//!   3. unicasts a full replicated snapshot
//!   4. unicasts the gameplay UI visibility for the current phase
//!
//! Recovery only ever unicasts. Other peers see nothing, so a reconnect
//! can be repeated without side effects elsewhere.

use crate::{
    config::RecoveryConfig,
    net::{NetMessage, Recipient, Transport},
    types::{ConnectionId, EntityId, SceneGeneration},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpawnAnchor {
    pub position:    [f32; 3],
    pub yaw_degrees: f32,
}

impl SpawnAnchor {
    pub fn new(position: [f32; 3], yaw_degrees: f32) -> Self {
        Self { position, yaw_degrees }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub connection_id:               ConnectionId,
    pub spawn_slot:                  usize,
    pub last_acked_scene_generation: Option<SceneGeneration>,
    pub connected:                   bool,
    pub connect_count:               u32,
}

/// Finds the entity a peer controls among the currently spawned ones.
pub trait EntityLocator {
    fn controlled_entity(&self, connection_id: ConnectionId) -> Option<EntityId>;
}

/// Minimal owner → entity table.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    owners: BTreeMap<ConnectionId, EntityId>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, owner: ConnectionId, entity: EntityId) {
        self.owners.insert(owner, entity);
    }

    pub fn despawn(&mut self, owner: ConnectionId) -> Option<EntityId> {
        self.owners.remove(&owner)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

impl EntityLocator for EntityRegistry {
    fn controlled_entity(&self, connection_id: ConnectionId) -> Option<EntityId> {
        self.owners.get(&connection_id).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryReport {
    pub connection_id:       ConnectionId,
    pub spawn_slot:          usize,
    pub reconnect:           bool,
    pub entity_reset:        Option<EntityId>,
    pub used_default_anchor: bool,
}

pub struct ReconnectRecovery {
    config:    RecoveryConfig,
    records:   BTreeMap<ConnectionId, ConnectionRecord>,
    next_slot: usize,
}

impl ReconnectRecovery {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            records: BTreeMap::new(),
            next_slot: 0,
        }
    }

    pub fn record(&self, connection_id: ConnectionId) -> Option<&ConnectionRecord> {
        self.records.get(&connection_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &ConnectionRecord> {
        self.records.values()
    }

    /// Peers currently connected, in id order.
    pub fn connected_peers(&self) -> Vec<ConnectionId> {
        self.records
            .values()
            .filter(|r| r.connected)
            .map(|r| r.connection_id)
            .collect()
    }

    /// Anchor for a slot, or the default anchor when the slot has none.
    /// The flag is true when the default was used.
    pub fn anchor_for_slot(&self, slot: usize) -> (SpawnAnchor, bool) {
        match self.config.spawn_anchors.get(slot) {
            Some(anchor) => (*anchor, false),
            None => (self.config.default_anchor, true),
        }
    }

    pub fn on_peer_connected(
        &mut self,
        connection_id:   ConnectionId,
        locator:         Option<&dyn EntityLocator>,
        snapshot:        NetMessage,
        session_started: bool,
        transport:       &mut dyn Transport,
    ) -> RecoveryReport {
        let (spawn_slot, reconnect) = self.assign_slot(connection_id);

        let (anchor, used_default_anchor) = self.anchor_for_slot(spawn_slot);
        if used_default_anchor {
            log::warn!(
                "recovery: no spawn anchor for slot {spawn_slot}, using default for peer {connection_id}"
            );
        }

        let entity_reset = match locator {
            Some(locator) => locator.controlled_entity(connection_id),
            None => {
                log::warn!("recovery: no entity locator, skipping position reset for peer {connection_id}");
                None
            }
        };
        if let Some(entity) = entity_reset {
            transport.send(
                Recipient::Connection(connection_id),
                NetMessage::ResetPosition { entity, anchor },
            );
        } else if locator.is_some() {
            log::debug!("recovery: peer {connection_id} has no spawned entity yet");
        }

        transport.send(Recipient::Connection(connection_id), snapshot);
        transport.send(
            Recipient::Connection(connection_id),
            NetMessage::SetGameplayUi { visible: session_started },
        );

        log::info!(
            "recovery: peer {connection_id} {} at slot {spawn_slot}",
            if reconnect { "reconnected" } else { "connected" }
        );

        RecoveryReport {
            connection_id,
            spawn_slot,
            reconnect,
            entity_reset,
            used_default_anchor,
        }
    }

    /// Returns true if the peer was known and connected.
    pub fn on_peer_disconnected(&mut self, connection_id: ConnectionId) -> bool {
        match self.records.get_mut(&connection_id) {
            Some(record) if record.connected => {
                record.connected = false;
                log::info!("recovery: peer {connection_id} disconnected, slot {} kept", record.spawn_slot);
                true
            }
            _ => false,
        }
    }

    pub fn note_scene_ack(&mut self, connection_id: ConnectionId, generation: SceneGeneration) {
        if let Some(record) = self.records.get_mut(&connection_id) {
            record.last_acked_scene_generation = Some(generation);
        }
    }

    fn assign_slot(&mut self, connection_id: ConnectionId) -> (usize, bool) {
        if let Some(record) = self.records.get_mut(&connection_id) {
            record.connected = true;
            record.connect_count += 1;
            return (record.spawn_slot, true);
        }
        let slot_count = self.config.effective_slot_count();
        let spawn_slot = self.next_slot % slot_count;
        self.next_slot = (self.next_slot + 1) % slot_count;
        self.records.insert(
            connection_id,
            ConnectionRecord {
                connection_id,
                spawn_slot,
                last_acked_scene_generation: None,
                connected: true,
                connect_count: 1,
            },
        );
        (spawn_slot, false)
    }
}
