//! Daily target growth.
//!
//! Applied once per day-advance, after the day counter has moved:
//!   1. raw increase from the mode (flat, percentage of target, or both)
//!   2. multiplied by the day-indexed scale curve, if any
//!   3. rounded to the configured step, floored at zero
//!   4. added to the target, which never grows past `max_target`

use crate::types::{clamp_money, Day, Money};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthMode {
    FixedAmount,
    Percentage,
    FixedPlusPercentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveKey {
    pub day:   f64,
    pub scale: f64,
}

/// Piecewise-linear scale over the day index.
/// Keys are kept sorted by day; outside the key range the end values hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<CurveKey>", into = "Vec<CurveKey>")]
pub struct DayCurve {
    keys: Vec<CurveKey>,
}

impl DayCurve {
    pub fn new(mut keys: Vec<CurveKey>) -> Self {
        keys.sort_by(|a, b| a.day.partial_cmp(&b.day).unwrap_or(std::cmp::Ordering::Equal));
        Self { keys }
    }

    pub fn keys(&self) -> &[CurveKey] {
        &self.keys
    }

    pub fn evaluate(&self, day: f64) -> f64 {
        let (first, last) = match (self.keys.first(), self.keys.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return 1.0,
        };
        if day <= first.day {
            return first.scale;
        }
        if day >= last.day {
            return last.scale;
        }
        for pair in self.keys.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if day >= a.day && day <= b.day {
                let span = b.day - a.day;
                if span <= f64::EPSILON {
                    return b.scale;
                }
                let t = (day - a.day) / span;
                return a.scale + (b.scale - a.scale) * t;
            }
        }
        last.scale
    }
}

impl From<Vec<CurveKey>> for DayCurve {
    fn from(keys: Vec<CurveKey>) -> Self {
        Self::new(keys)
    }
}

impl From<DayCurve> for Vec<CurveKey> {
    fn from(curve: DayCurve) -> Self {
        curve.keys
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetGrowthConfig {
    pub enabled:       bool,
    pub mode:          GrowthMode,
    /// Flat amount for `FixedAmount` and `FixedPlusPercentage`.
    pub base_increase: Money,
    /// Fraction of the current target, e.g. 0.1 for +10%.
    pub percentage:    f64,
    pub day_curve:     Option<DayCurve>,
    /// Round the increase to a multiple of this. Values <= 1 round to whole units.
    pub round_to_step: Money,
    pub max_target:    Option<Money>,
}

impl Default for TargetGrowthConfig {
    fn default() -> Self {
        Self {
            enabled:       true,
            mode:          GrowthMode::FixedAmount,
            base_increase: 100,
            percentage:    0.1,
            day_curve:     None,
            round_to_step: 1,
            max_target:    None,
        }
    }
}

/// Result of one growth step. `increase` is what was actually applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthStep {
    pub previous: Money,
    pub target:   Money,
    pub increase: Money,
}

impl TargetGrowthConfig {
    /// Increase before the cap is applied.
    pub fn raw_increase(&self, current_target: Money, day: Day) -> Money {
        let flat = self.base_increase as f64;
        let pct = current_target as f64 * self.percentage;
        let mut raw = match self.mode {
            GrowthMode::FixedAmount         => flat,
            GrowthMode::Percentage          => pct,
            GrowthMode::FixedPlusPercentage => flat + pct,
        };
        if let Some(curve) = &self.day_curve {
            raw *= curve.evaluate(day as f64);
        }
        round_to_step(raw, self.round_to_step).max(0)
    }

    /// Grow `current_target` for the day that has just begun.
    pub fn grow(&self, current_target: Money, day: Day) -> GrowthStep {
        let increase = self.raw_increase(current_target, day);
        let mut target = clamp_money(current_target.saturating_add(increase));
        if let Some(cap) = self.max_target {
            // The cap stops growth; it never lowers a target set above it.
            target = target.min(cap.max(current_target));
        }
        GrowthStep {
            previous: current_target,
            target,
            increase: target - current_target,
        }
    }
}

fn round_to_step(value: f64, step: Money) -> Money {
    if step <= 1 {
        return value.round() as Money;
    }
    ((value / step as f64).round() as Money).saturating_mul(step)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: GrowthMode) -> TargetGrowthConfig {
        TargetGrowthConfig {
            mode,
            ..TargetGrowthConfig::default()
        }
    }

    #[test]
    fn fixed_amount_adds_base_increase() {
        let step = config(GrowthMode::FixedAmount).grow(1000, 2);
        assert_eq!(step.target, 1100);
        assert_eq!(step.increase, 100);
    }

    #[test]
    fn percentage_adds_fraction_of_target() {
        let step = config(GrowthMode::Percentage).grow(1000, 2);
        assert_eq!(step.target, 1100);

        let mut cfg = config(GrowthMode::Percentage);
        cfg.percentage = 0.25;
        assert_eq!(cfg.grow(400, 2).target, 500);
    }

    #[test]
    fn fixed_plus_percentage_adds_both() {
        let mut cfg = config(GrowthMode::FixedPlusPercentage);
        cfg.base_increase = 50;
        cfg.percentage = 0.1;
        assert_eq!(cfg.grow(1000, 3).target, 1150);
    }

    #[test]
    fn day_curve_scales_increase() {
        let mut cfg = config(GrowthMode::FixedAmount);
        cfg.day_curve = Some(DayCurve::new(vec![
            CurveKey { day: 1.0, scale: 1.0 },
            CurveKey { day: 5.0, scale: 3.0 },
        ]));
        // day 3 sits halfway between the keys: scale 2.0
        assert_eq!(cfg.grow(1000, 3).increase, 200);
        // past the last key the end value holds
        assert_eq!(cfg.grow(1000, 9).increase, 300);
        assert_eq!(cfg.grow(1000, 0).increase, 100);
    }

    #[test]
    fn increase_rounds_to_step() {
        let mut cfg = config(GrowthMode::Percentage);
        cfg.percentage = 0.13;
        cfg.round_to_step = 50;
        // 130 -> nearest multiple of 50 is 150
        assert_eq!(cfg.grow(1000, 2).increase, 150);
    }

    #[test]
    fn cap_limits_growth_without_lowering() {
        let mut cfg = config(GrowthMode::FixedAmount);
        cfg.max_target = Some(1050);
        let step = cfg.grow(1000, 2);
        assert_eq!(step.target, 1050);
        assert_eq!(step.increase, 50);

        let above = cfg.grow(2000, 3);
        assert_eq!(above.target, 2000);
        assert_eq!(above.increase, 0);
    }

    #[test]
    fn negative_scale_never_shrinks_target() {
        let mut cfg = config(GrowthMode::FixedAmount);
        cfg.day_curve = Some(DayCurve::new(vec![CurveKey { day: 0.0, scale: -2.0 }]));
        assert_eq!(cfg.grow(1000, 4).target, 1000);
    }

    #[test]
    fn empty_curve_is_identity() {
        assert_eq!(DayCurve::default().evaluate(12.0), 1.0);
    }
}
