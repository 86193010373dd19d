use crate::{
    error::{SimError, SimResult},
    growth::{GrowthMode, TargetGrowthConfig},
    recovery::SpawnAnchor,
    types::Money,
};
use serde::{Deserialize, Serialize};

// ── Economy ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    /// Target for day 1, restored by every progress reset.
    pub initial_target: Money,
    pub growth:         TargetGrowthConfig,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            initial_target: 1000,
            growth:         TargetGrowthConfig::default(),
        }
    }
}

// ── Round timer ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    pub duration_secs:               f64,
    /// A failed round requests session end instead of idling.
    pub end_session_on_failure:      bool,
    /// Minimum spacing between replicated progress updates.
    pub progress_sync_interval_secs: f64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            duration_secs:               180.0,
            end_session_on_failure:      true,
            progress_sync_interval_secs: 0.25,
        }
    }
}

// ── Scene transitions ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarrierConfig {
    pub default_timeout_secs: f64,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self { default_timeout_secs: 5.0 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Loaded behind a barrier when the session starts. None = start in place.
    pub start_scene:          Option<String>,
    /// Loaded behind a barrier before each confirmed day advance.
    pub day_scene:            Option<String>,
    pub start_timeout_secs:   Option<f64>,
    pub advance_timeout_secs: Option<f64>,
}

// ── Reconnect recovery ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Spawn transform per slot. Slots are handed out round-robin.
    pub spawn_anchors:  Vec<SpawnAnchor>,
    /// Used when a slot has no anchor.
    pub default_anchor: SpawnAnchor,
    /// Number of round-robin slots. 0 = one per spawn anchor.
    pub slot_count:     usize,
}

impl RecoveryConfig {
    pub fn effective_slot_count(&self) -> usize {
        if self.slot_count > 0 {
            self.slot_count
        } else {
            self.spawn_anchors.len().max(1)
        }
    }
}

// ── Session ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub economy:  EconomyConfig,
    pub round:    RoundConfig,
    pub barrier:  BarrierConfig,
    pub scenes:   SceneConfig,
    pub recovery: RecoveryConfig,
}

impl SessionConfig {
    /// Load from a JSON file. Missing sections fall back to defaults.
    /// In tests, use SessionConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config = Self::from_json(&content)
            .map_err(|e| anyhow::anyhow!("Invalid session config {path}: {e}"))?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let config: SessionConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.economy.initial_target < 0 {
            return Err(SimError::InvalidConfig(format!(
                "economy.initial_target must be >= 0, got {}",
                self.economy.initial_target
            )));
        }
        if !(self.round.duration_secs > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "round.duration_secs must be > 0, got {}",
                self.round.duration_secs
            )));
        }
        if self.round.progress_sync_interval_secs < 0.0 {
            return Err(SimError::InvalidConfig(
                "round.progress_sync_interval_secs must be >= 0".into(),
            ));
        }
        if !(self.barrier.default_timeout_secs > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "barrier.default_timeout_secs must be > 0, got {}",
                self.barrier.default_timeout_secs
            )));
        }
        let growth = &self.economy.growth;
        if growth.base_increase < 0 || growth.percentage < 0.0 {
            return Err(SimError::InvalidConfig(
                "economy.growth increases must be non-negative".into(),
            ));
        }
        if let Some(cap) = growth.max_target {
            if cap < 0 {
                return Err(SimError::InvalidConfig(format!(
                    "economy.growth.max_target must be >= 0, got {cap}"
                )));
            }
        }
        Ok(())
    }

    /// Config with hardcoded defaults for use in tests.
    pub fn default_test() -> Self {
        Self {
            economy: EconomyConfig {
                initial_target: 1000,
                growth: TargetGrowthConfig {
                    enabled:       true,
                    mode:          GrowthMode::FixedAmount,
                    base_increase: 100,
                    percentage:    0.0,
                    day_curve:     None,
                    round_to_step: 1,
                    max_target:    None,
                },
            },
            round: RoundConfig {
                duration_secs:               60.0,
                end_session_on_failure:      true,
                progress_sync_interval_secs: 0.25,
            },
            barrier: BarrierConfig {
                default_timeout_secs: 5.0,
            },
            scenes: SceneConfig::default(),
            recovery: RecoveryConfig {
                spawn_anchors: vec![
                    SpawnAnchor::new([0.0, 0.0, 0.0], 0.0),
                    SpawnAnchor::new([2.0, 0.0, 0.0], 90.0),
                    SpawnAnchor::new([0.0, 0.0, 2.0], 180.0),
                    SpawnAnchor::new([2.0, 0.0, 2.0], 270.0),
                ],
                default_anchor: SpawnAnchor::default(),
                slot_count:     0,
            },
        }
    }
}
