//! Snapshot subscribers notified at the end of every tick

use anyhow::Result;
use log::info;

use super::stats::SimStats;

/// Called synchronously by the model once per tick, after statistics are
/// recomputed. An error is logged by the model and does not affect the tick.
pub trait SimObserver: Send {
    fn on_tick(&mut self, stats: &SimStats) -> Result<()>;
}

impl<F> SimObserver for F
where
    F: FnMut(&SimStats) -> Result<()> + Send,
{
    fn on_tick(&mut self, stats: &SimStats) -> Result<()> {
        self(stats)
    }
}

/// Logs a one-line summary every `interval` ticks
pub struct StatsLogger {
    interval: u64,
    ticks: u64,
}

impl StatsLogger {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            ticks: 0,
        }
    }
}

impl SimObserver for StatsLogger {
    fn on_tick(&mut self, stats: &SimStats) -> Result<()> {
        self.ticks += 1;
        if self.ticks % self.interval == 0 {
            info!(
                "t={:.1}s active={} completed={} crashed={} mean_speed={:.2}m/s flow={:.1}veh/h density={:.2}veh/km",
                stats.current_time,
                stats.active_vehicles,
                stats.completed_vehicles,
                stats.crashed_vehicles,
                stats.average_speed,
                stats.total_flow,
                stats.average_density
            );
        }
        Ok(())
    }
}
