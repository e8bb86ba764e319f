//! Run state and tunable settings of the simulation

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default tick length in seconds
pub const DEFAULT_TIME_STEP: f32 = 0.1;

/// Default simulated-time limit in seconds
pub const DEFAULT_MAX_SIMULATION_TIME: f32 = 3600.0;

/// How long the paused runner waits between state checks
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long `stop` waits for the runner thread to exit
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on the wall-clock pause between two running ticks
pub const MAX_PACING_INTERVAL: Duration = Duration::from_secs(60);

/// Run state of the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimState {
    #[default]
    Stopped,
    Running,
    Paused,
    /// Only observable while a single step executes
    Step,
}

/// Simulation configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    /// Seconds of simulated time per tick
    pub time_step: f32,
    /// Seconds of simulated time before the runner stops on its own
    pub max_simulation_time: f32,
    /// Log every vehicle after every tick
    pub debug_mode: bool,
    /// 1.0 = real time, 2.0 = twice as fast
    pub real_time_factor: f32,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            time_step: DEFAULT_TIME_STEP,
            max_simulation_time: DEFAULT_MAX_SIMULATION_TIME,
            debug_mode: false,
            real_time_factor: 1.0,
        }
    }
}

impl SimSettings {
    /// Every field must be finite and strictly positive
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("time_step", self.time_step),
            ("real_time_factor", self.real_time_factor),
            ("max_simulation_time", self.max_simulation_time),
        ] {
            if !value.is_finite() || value <= 0.0 {
                bail!("{} must be a finite positive number, got {}", name, value);
            }
        }
        Ok(())
    }

    /// Wall-clock pause between ticks in the running loop, capped at
    /// [`MAX_PACING_INTERVAL`]
    pub fn pacing_interval(&self) -> Duration {
        Duration::try_from_secs_f32(self.time_step / self.real_time_factor)
            .map_or(MAX_PACING_INTERVAL, |interval| {
                interval.min(MAX_PACING_INTERVAL)
            })
    }

    /// Apply a partial update, rejecting it whole if the result is invalid
    pub fn apply(&mut self, update: &SettingsUpdate) -> Result<()> {
        let mut next = *self;
        if let Some(time_step) = update.time_step {
            next.time_step = time_step;
        }
        if let Some(real_time_factor) = update.real_time_factor {
            next.real_time_factor = real_time_factor;
        }
        if let Some(max_simulation_time) = update.max_simulation_time {
            next.max_simulation_time = max_simulation_time;
        }
        if let Some(debug_mode) = update.debug_mode {
            next.debug_mode = debug_mode;
        }
        next.validate()?;
        *self = next;
        Ok(())
    }
}

/// A partial settings change; `None` fields keep their current value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub time_step: Option<f32>,
    pub real_time_factor: Option<f32>,
    pub max_simulation_time: Option<f32>,
    pub debug_mode: Option<bool>,
}
