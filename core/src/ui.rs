//! UI sink, where replicated values end up on screen.
//!
//! RULE: Push-only. The core calls setters; it never reads UI state back.

use crate::{
    replication::{ObserverProjection, ProjectionChange, ReplicatedField},
    types::{Day, Money},
};

pub trait UiSink {
    fn set_day(&mut self, day: Day);
    fn set_target(&mut self, target: Money);
    fn set_earnings(&mut self, current: Money);
    fn set_banked(&mut self, banked: Money);
    fn set_round_countdown(&mut self, remaining_secs: f64);
    fn set_day_night_progress(&mut self, progress: f32);
    fn set_gameplay_visible(&mut self, visible: bool);

    /// The session just started; begin local-only visuals.
    fn start_visual_simulation(&mut self) {}
}

/// Forward one projection change to the sink.
pub fn push_change(ui: &mut dyn UiSink, change: &ProjectionChange, projection: &ObserverProjection) {
    match change {
        ProjectionChange::StartVisualSimulation => ui.start_visual_simulation(),
        ProjectionChange::Field(field) => match *field {
            ReplicatedField::CurrentMoney(v)     => ui.set_earnings(v),
            ReplicatedField::BankedMoney(v)      => ui.set_banked(v),
            ReplicatedField::TargetMoney(v)      => ui.set_target(v),
            ReplicatedField::CurrentDay(v)       => ui.set_day(v),
            ReplicatedField::DayNightProgress(v) => ui.set_day_night_progress(v),
            ReplicatedField::Progress(_) | ReplicatedField::RoundTotal(_) => {
                ui.set_round_countdown(projection.displayed_remaining())
            }
            ReplicatedField::RoundPaused(_) | ReplicatedField::SessionStarted(_) => {}
        },
    }
}
