//! Wire messages and the transport seam.
//!
//! RULE: Nodes share no memory. Everything that crosses a node boundary
//! is a NetMessage inside an Envelope, sent fire-and-forget through a
//! Transport. There is no request/response call between nodes.
//!
//! `LoopbackHub` is an in-memory network used by tests and the session
//! runner. It encodes every envelope to a JSON line and back, so the
//! serde contract is exercised on every hop.

use crate::{
    error::SimResult,
    recovery::SpawnAnchor,
    replication::{ReplicatedField, ReplicatedSnapshot},
    types::{ConnectionId, EntityId, SceneGeneration, HOST_CONNECTION_ID},
};
use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet, VecDeque},
    rc::Rc,
};

/// Every message a node can send.
/// Variants are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetMessage {
    // ── Authority → observers ──────────────────────
    FieldUpdate {
        seq:   u64,
        field: ReplicatedField,
    },
    FullSnapshot {
        seq:      u64,
        snapshot: ReplicatedSnapshot,
    },
    ResetPosition {
        entity: EntityId,
        anchor: SpawnAnchor,
    },
    SetGameplayUi {
        visible: bool,
    },
    SceneChangePending {
        generation: SceneGeneration,
        scene:      String,
    },

    // ── Observer → authority ───────────────────────
    RequestStart,
    RequestEnd,
    RequestAdvance,
    SceneReady {
        generation: SceneGeneration,
    },
}

impl NetMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            NetMessage::FieldUpdate { .. }        => "field_update",
            NetMessage::FullSnapshot { .. }       => "full_snapshot",
            NetMessage::ResetPosition { .. }      => "reset_position",
            NetMessage::SetGameplayUi { .. }      => "set_gameplay_ui",
            NetMessage::SceneChangePending { .. } => "scene_change_pending",
            NetMessage::RequestStart              => "request_start",
            NetMessage::RequestEnd                => "request_end",
            NetMessage::RequestAdvance            => "request_advance",
            NetMessage::SceneReady { .. }         => "scene_ready",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    /// Every connected peer except the sender.
    Broadcast,
    Connection(ConnectionId),
    Authority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from:    ConnectionId,
    pub to:      Recipient,
    pub message: NetMessage,
}

pub fn encode(envelope: &Envelope) -> SimResult<String> {
    Ok(serde_json::to_string(envelope)?)
}

pub fn decode(line: &str) -> SimResult<Envelope> {
    Ok(serde_json::from_str(line)?)
}

/// Outbound side of a node's network connection.
pub trait Transport {
    fn local_id(&self) -> ConnectionId;

    /// Fire-and-forget. Undeliverable messages are dropped by the network.
    fn send(&mut self, to: Recipient, message: NetMessage);
}

// ── Loopback network ───────────────────────────────────────────────

#[derive(Debug, Default)]
struct HubState {
    inboxes:   BTreeMap<ConnectionId, VecDeque<String>>,
    connected: BTreeSet<ConnectionId>,
    delivered: u64,
    dropped:   u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub delivered: u64,
    pub dropped:   u64,
}

/// Shared in-memory network. Cloning gives another handle to the same hub.
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    inner: Rc<RefCell<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node and hand back its transport.
    pub fn transport(&self, id: ConnectionId) -> LoopbackTransport {
        self.connect(id);
        LoopbackTransport {
            id,
            hub: self.clone(),
        }
    }

    pub fn connect(&self, id: ConnectionId) {
        let mut state = self.inner.borrow_mut();
        state.connected.insert(id);
        state.inboxes.entry(id).or_default();
    }

    /// Detach a node. Anything still queued for it is lost.
    pub fn disconnect(&self, id: ConnectionId) {
        let mut guard = self.inner.borrow_mut();
        let state = &mut *guard;
        state.connected.remove(&id);
        if let Some(inbox) = state.inboxes.get_mut(&id) {
            state.dropped += inbox.len() as u64;
            inbox.clear();
        }
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.inner.borrow().connected.contains(&id)
    }

    pub fn pending(&self, id: ConnectionId) -> usize {
        self.inner.borrow().inboxes.get(&id).map_or(0, VecDeque::len)
    }

    pub fn total_pending(&self) -> usize {
        self.inner.borrow().inboxes.values().map(VecDeque::len).sum()
    }

    pub fn stats(&self) -> HubStats {
        let state = self.inner.borrow();
        HubStats {
            delivered: state.delivered,
            dropped:   state.dropped,
        }
    }

    /// Take everything queued for `id`, in send order.
    pub fn drain(&self, id: ConnectionId) -> Vec<Envelope> {
        let lines: Vec<String> = {
            let mut state = self.inner.borrow_mut();
            match state.inboxes.get_mut(&id) {
                Some(inbox) => inbox.drain(..).collect(),
                None => Vec::new(),
            }
        };
        lines
            .iter()
            .filter_map(|line| match decode(line) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    log::warn!("net: dropping undecodable message for {id}: {e}");
                    None
                }
            })
            .collect()
    }

    fn route(&self, envelope: Envelope) {
        let line = match encode(&envelope) {
            Ok(line) => line,
            Err(e) => {
                log::warn!("net: cannot encode {}: {e}", envelope.message.kind());
                self.inner.borrow_mut().dropped += 1;
                return;
            }
        };

        let mut guard = self.inner.borrow_mut();
        let state = &mut *guard;
        if !state.connected.contains(&envelope.from) {
            state.dropped += 1;
            return;
        }
        let targets: Vec<ConnectionId> = match envelope.to {
            Recipient::Broadcast => state
                .connected
                .iter()
                .copied()
                .filter(|id| *id != envelope.from)
                .collect(),
            Recipient::Connection(id) => vec![id],
            Recipient::Authority => vec![HOST_CONNECTION_ID],
        };

        for target in targets {
            if !state.connected.contains(&target) {
                log::debug!(
                    "net: {} to {target} dropped, peer not connected",
                    envelope.message.kind()
                );
                state.dropped += 1;
                continue;
            }
            if let Some(inbox) = state.inboxes.get_mut(&target) {
                inbox.push_back(line.clone());
                state.delivered += 1;
            }
        }
    }
}

pub struct LoopbackTransport {
    id:  ConnectionId,
    hub: LoopbackHub,
}

impl LoopbackTransport {
    pub fn hub(&self) -> &LoopbackHub {
        &self.hub
    }
}

impl Transport for LoopbackTransport {
    fn local_id(&self) -> ConnectionId {
        self.id
    }

    fn send(&mut self, to: Recipient, message: NetMessage) {
        self.hub.route(Envelope {
            from: self.id,
            to,
            message,
        });
    }
}

/// Transport for a node with no network, e.g. a solo host.
#[derive(Debug, Default)]
pub struct NullTransport {
    pub sent: u64,
}

impl Transport for NullTransport {
    fn local_id(&self) -> ConnectionId {
        HOST_CONNECTION_ID
    }

    fn send(&mut self, _to: Recipient, _message: NetMessage) {
        self.sent += 1;
    }
}
