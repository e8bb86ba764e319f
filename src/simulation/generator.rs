//! Traffic sources that insert vehicles while the simulation runs

use anyhow::Result;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::driver::DriverKind;
use super::model::SimModel;
use super::types::{LaneId, RouteId, MIN_LANE_CHANGE_GAP};

/// Called once per tick, after integration, with mutable access to the model
pub trait TrafficGenerator: Send {
    fn update(&mut self, dt: f32, model: &mut SimModel) -> Result<()>;
}

/// Inserts vehicles at the start of one lane with exponentially distributed
/// inter-arrival times
#[derive(Debug, Clone)]
pub struct LaneGenerator {
    pub lane: LaneId,
    /// Mean arrivals per second
    pub rate: f32,
    pub kind: DriverKind,
    pub initial_velocity: f32,
    pub route: Option<RouteId>,
    /// Seconds until the next arrival
    next_arrival: f32,
    spawned: u32,
    skipped: u32,
    rng: StdRng,
}

impl LaneGenerator {
    pub fn new(lane: LaneId, rate: f32, kind: DriverKind, seed: u64) -> Self {
        let mut generator = Self {
            lane,
            rate,
            kind,
            initial_velocity: 0.0,
            route: None,
            next_arrival: f32::INFINITY,
            spawned: 0,
            skipped: 0,
            rng: StdRng::seed_from_u64(seed),
        };
        generator.next_arrival = generator.sample_interval();
        generator
    }

    pub fn with_initial_velocity(mut self, velocity: f32) -> Self {
        self.initial_velocity = velocity.max(0.0);
        self
    }

    pub fn with_route(mut self, route: RouteId) -> Self {
        self.route = Some(route);
        self
    }

    /// Vehicles inserted so far
    pub fn spawned(&self) -> u32 {
        self.spawned
    }

    /// Arrivals dropped because the entrance was blocked
    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    fn sample_interval(&mut self) -> f32 {
        if !(self.rate > 0.0) {
            return f32::INFINITY;
        }
        let u: f32 = self.rng.random();
        -(1.0 - u).ln() / self.rate
    }

    /// True when the rearmost vehicle leaves at least the minimum gap at x = 0
    fn entrance_clear(&self, model: &SimModel) -> bool {
        let Some(lane) = model.lane(self.lane) else {
            return false;
        };
        match lane.vehicle_positions().next() {
            Some((x, vehicle_id)) => {
                let length = model.vehicle(vehicle_id).map(|v| v.length).unwrap_or(0.0);
                x - length >= MIN_LANE_CHANGE_GAP
            }
            None => true,
        }
    }
}

impl TrafficGenerator for LaneGenerator {
    fn update(&mut self, dt: f32, model: &mut SimModel) -> Result<()> {
        self.next_arrival -= dt;
        while self.next_arrival <= 0.0 {
            self.next_arrival += self.sample_interval();
            if self.entrance_clear(model) {
                let vehicle_id = model.add_vehicle(self.lane, self.kind, 0.0, self.route)?;
                model.set_vehicle_velocity(vehicle_id, self.initial_velocity)?;
                self.spawned += 1;
            } else {
                debug!("Entrance of lane {:?} blocked, arrival skipped", self.lane);
                self.skipped += 1;
            }
        }
        Ok(())
    }
}
