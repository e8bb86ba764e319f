//! Background runner that paces ticks in (scaled) real time
//!
//! The model lives behind one `Arc<Mutex<_>>`. The worker thread takes the
//! lock for exactly one tick and sleeps with the lock released, so API calls
//! from other threads interleave between ticks and never race with one.

use anyhow::Result;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::driver::DriverKind;
use super::lane::SimLane;
use super::model::SimModel;
use super::scenario::ScenarioSpec;
use super::settings::{SettingsUpdate, SimState, PAUSE_POLL_INTERVAL, STOP_JOIN_TIMEOUT};
use super::snapshot::SimSnapshot;
use super::types::{LaneId, LaneSide, RouteId, VehicleId};

/// A simulation model plus the thread that drives it
pub struct Simulation {
    model: Arc<Mutex<SimModel>>,
    worker: Option<JoinHandle<()>>,
    /// Stop flag of the current run; replaced on every start
    stop_flag: Arc<AtomicBool>,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_model(model: &Mutex<SimModel>) -> MutexGuard<'_, SimModel> {
    model.lock().unwrap_or_else(|poisoned| {
        warn!("Simulation lock was poisoned; continuing with the inner state");
        poisoned.into_inner()
    })
}

fn run_loop(model: Arc<Mutex<SimModel>>, stop_flag: Arc<AtomicBool>) {
    info!("Simulation runner started");
    loop {
        if stop_flag.load(Ordering::Acquire) {
            break;
        }

        let pause = {
            let mut model = lock_model(&model);
            match model.state() {
                SimState::Running => {
                    // The limit may have been reached by a step or lowered
                    // by a settings update since the last tick
                    if !model.reached_time_limit() {
                        model.tick();
                    }
                    if model.reached_time_limit() {
                        info!(
                            "Reached max simulation time of {:.1}s",
                            model.settings().max_simulation_time
                        );
                        model.stop();
                        break;
                    }
                    model.settings().pacing_interval()
                }
                SimState::Paused | SimState::Step => PAUSE_POLL_INTERVAL,
                SimState::Stopped => break,
            }
        };

        sleep_unless_stopped(pause, &stop_flag);
    }
    info!("Simulation runner exited");
}

/// Sleep for `duration` in short slices so a stop request is seen promptly
fn sleep_unless_stopped(duration: Duration, stop_flag: &AtomicBool) {
    let deadline = Instant::now() + duration;
    loop {
        if stop_flag.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(PAUSE_POLL_INTERVAL));
    }
}

impl Simulation {
    pub fn new() -> Self {
        Self::from_model(SimModel::new())
    }

    pub fn from_model(model: SimModel) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
            worker: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run `f` with exclusive access to the model
    pub fn with_model<R>(&self, f: impl FnOnce(&mut SimModel) -> R) -> R {
        let mut model = lock_model(&self.model);
        f(&mut model)
    }

    pub fn state(&self) -> SimState {
        self.with_model(|model| model.state())
    }

    pub fn is_worker_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// STOPPED -> RUNNING and spawn the worker. No-op from any other state.
    pub fn start(&mut self) -> bool {
        if self.state() != SimState::Stopped {
            return false;
        }
        // A previous worker must never observe the new run's RUNNING state
        self.retire_worker();
        if !self.with_model(|model| model.start()) {
            return false;
        }
        self.spawn_worker();
        true
    }

    /// RUNNING -> PAUSED
    pub fn pause(&self) -> bool {
        self.with_model(|model| model.pause())
    }

    /// PAUSED -> RUNNING, spawning a worker if none is alive (after a step
    /// from STOPPED, for instance)
    pub fn resume(&mut self) -> bool {
        if !self.with_model(|model| model.resume()) {
            return false;
        }
        if !self.is_worker_running() {
            self.spawn_worker();
        }
        true
    }

    /// Run a single tick from STOPPED or PAUSED
    pub fn step(&self) -> bool {
        self.with_model(|model| model.step())
    }

    /// Stop and wait (bounded) for the worker to exit
    pub fn stop(&mut self) -> bool {
        self.stop_flag.store(true, Ordering::Release);
        let stopped = self.with_model(|model| model.stop());
        self.join_worker();
        stopped
    }

    fn retire_worker(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        self.join_worker();
    }

    /// Stop and replace the model with a fresh one, keeping observers
    pub fn reset(&mut self) {
        self.stop();
        self.with_model(|model| {
            let observers = model.take_observers();
            *model = SimModel::new();
            for observer in observers {
                model.add_observer(observer);
            }
        });
        info!("Simulation reset");
    }

    /// Stop any run and replace the network with `spec`
    pub fn load_scenario(&mut self, spec: &ScenarioSpec) -> Result<()> {
        self.stop();
        self.with_model(|model| model.load_scenario(spec))
    }

    pub fn update_settings(&self, update: &SettingsUpdate) -> Result<()> {
        self.with_model(|model| model.update_settings(update))
    }

    pub fn snapshot(&self) -> SimSnapshot {
        self.with_model(|model| model.snapshot())
    }

    pub fn add_lane(&self, lane: SimLane) -> Result<LaneId> {
        self.with_model(|model| model.add_lane(lane))
    }

    pub fn remove_lane(&self, lane_id: LaneId) -> Result<()> {
        self.with_model(|model| model.remove_lane(lane_id))
    }

    pub fn connect(&self, lane_id: LaneId, side: LaneSide, other_id: LaneId) -> Result<()> {
        self.with_model(|model| model.connect(lane_id, side, other_id))
    }

    pub fn add_vehicle(
        &self,
        lane_id: LaneId,
        kind: DriverKind,
        initial_position: f32,
        route: Option<RouteId>,
    ) -> Result<VehicleId> {
        self.with_model(|model| model.add_vehicle(lane_id, kind, initial_position, route))
    }

    pub fn remove_vehicle(&self, vehicle_id: VehicleId) -> Result<()> {
        self.with_model(|model| model.remove_vehicle(vehicle_id))
    }

    fn spawn_worker(&mut self) {
        self.stop_flag = Arc::new(AtomicBool::new(false));
        let model = Arc::clone(&self.model);
        let stop_flag = Arc::clone(&self.stop_flag);
        self.worker = Some(thread::spawn(move || run_loop(model, stop_flag)));
    }

    fn join_worker(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    "Simulation runner did not exit within {:?}; detaching it",
                    STOP_JOIN_TIMEOUT
                );
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        if handle.join().is_err() {
            warn!("Simulation runner panicked");
        } else {
            debug!("Simulation runner joined");
        }
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.retire_worker();
    }
}
