//! Session clock — owns frame ticks, elapsed time and the simulation pause.
//!
//! Wall time (`elapsed`) always advances; barrier deadlines run on it.
//! Simulation time (`sim_elapsed`) stops while paused, which is how the
//! authority holds the round countdown during a scene transition.

use crate::types::Tick;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionClock {
    pub current_tick: Tick,
    pub elapsed:      f64,
    pub sim_elapsed:  f64,
    pub paused:       bool,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance one frame of `dt` seconds. Returns the new tick number and
    /// the simulation time that passed (0 while paused).
    pub fn advance(&mut self, dt: f64) -> (Tick, f64) {
        let dt = dt.max(0.0);
        self.current_tick += 1;
        self.elapsed += dt;
        let sim_dt = if self.paused { 0.0 } else { dt };
        self.sim_elapsed += sim_dt;
        (self.current_tick, sim_dt)
    }

    pub fn pause(&mut self)  { self.paused = true;  }
    pub fn resume(&mut self) { self.paused = false; }
}
