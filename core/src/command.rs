use serde::{Deserialize, Serialize};
use crate::types::{ConnectionId, Money, SceneGeneration};

/// Everything a local caller can ask a node to do.
/// Variants are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum PlayerCommand {
    // ── Session control ───────────────────────────
    RequestStart,
    RequestEnd,
    ConfirmAdvance,

    // ── Economy ───────────────────────────────────
    AddMoney { amount: Money },
    RemoveMoney { amount: Money },
    SpendBanked { amount: Money },
    SetTarget { value: Money },
    AdvanceDays { days: u32 },
    ResetProgress,

    // ── Scenes ────────────────────────────────────
    SceneLoaded { generation: SceneGeneration },

    // ── Peers (authority only) ────────────────────
    PeerConnected { connection_id: ConnectionId },
    PeerDisconnected { connection_id: ConnectionId },
}

impl PlayerCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            PlayerCommand::RequestStart            => "request_start",
            PlayerCommand::RequestEnd              => "request_end",
            PlayerCommand::ConfirmAdvance          => "confirm_advance",
            PlayerCommand::AddMoney { .. }         => "add_money",
            PlayerCommand::RemoveMoney { .. }      => "remove_money",
            PlayerCommand::SpendBanked { .. }      => "spend_banked",
            PlayerCommand::SetTarget { .. }        => "set_target",
            PlayerCommand::AdvanceDays { .. }      => "advance_days",
            PlayerCommand::ResetProgress           => "reset_progress",
            PlayerCommand::SceneLoaded { .. }      => "scene_loaded",
            PlayerCommand::PeerConnected { .. }    => "peer_connected",
            PlayerCommand::PeerDisconnected { .. } => "peer_disconnected",
        }
    }
}
