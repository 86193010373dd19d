//! Shared primitive types used across the entire session core.

/// A frame tick. One tick = one call to `SessionEngine::tick`.
pub type Tick = u64;

/// Whole-unit currency. Always clamped to `[0, MAX_MONEY]`.
pub type Money = i64;

/// Day index. 0 before the first advance.
pub type Day = u32;

/// Transport-level identity of a peer. Stable across reconnects.
pub type ConnectionId = u64;

/// Identity of a spawned, player-controlled entity.
pub type EntityId = u64;

/// Scene transition counter, one per barrier.
pub type SceneGeneration = u64;

/// The canonical session identifier.
pub type SessionId = String;

/// Upper clamp for every money value (the non-negative `i32` range).
pub const MAX_MONEY: Money = i32::MAX as Money;

/// Connection id the authoritative host uses for itself.
pub const HOST_CONNECTION_ID: ConnectionId = 0;

/// Fresh random session id.
pub fn new_session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string()
}

/// Clamp an arbitrary amount into the valid money range.
pub fn clamp_money(value: Money) -> Money {
    value.clamp(0, MAX_MONEY)
}

/// Which side of the session this node plays. Fixed at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Authority,
    Observer,
}

impl Role {
    pub fn is_authority(&self) -> bool {
        matches!(self, Role::Authority)
    }
}
