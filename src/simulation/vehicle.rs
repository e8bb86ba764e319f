//! Vehicle state and per-step integration
//!
//! Vehicles know nothing about the driver controlling them beyond an id used
//! for bookkeeping. Lane membership is owned by the lanes; the vehicle only
//! keeps the id of the lane it is on.

use anyhow::{bail, Result};

use super::types::{
    DriverId, Enclosure, LaneId, LatDirection, VehicleId, LANE_CHANGE_DURATION, VEHICLE_LENGTH,
    VEHICLE_WIDTH,
};

/// Outcome of integrating one vehicle over one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VehicleUpdateResult {
    /// Crashed vehicles never move
    Stationary,
    /// Position and velocity advanced on the same lane
    Moved,
    /// A lane change finished this step; the vehicle now belongs to `to`
    LaneChanged { from: LaneId, to: LaneId },
}

/// Cached ids of the six neighbors around a vehicle, rebuilt every tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Surroundings {
    pub front: Option<VehicleId>,
    pub back: Option<VehicleId>,
    pub left_front: Option<VehicleId>,
    pub left_back: Option<VehicleId>,
    pub right_front: Option<VehicleId>,
    pub right_back: Option<VehicleId>,
}

impl Surroundings {
    pub fn get(&self, area: Enclosure) -> Option<VehicleId> {
        match area {
            Enclosure::Front => self.front,
            Enclosure::Back => self.back,
            Enclosure::LeftFront => self.left_front,
            Enclosure::LeftBack => self.left_back,
            Enclosure::RightFront => self.right_front,
            Enclosure::RightBack => self.right_back,
        }
    }

    pub fn set(&mut self, area: Enclosure, vehicle: Option<VehicleId>) {
        let slot = match area {
            Enclosure::Front => &mut self.front,
            Enclosure::Back => &mut self.back,
            Enclosure::LeftFront => &mut self.left_front,
            Enclosure::LeftBack => &mut self.left_back,
            Enclosure::RightFront => &mut self.right_front,
            Enclosure::RightBack => &mut self.right_back,
        };
        *slot = vehicle;
    }
}

/// A lane change in progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneChange {
    pub direction: LatDirection,
    /// Neighbor lane on `direction` at the moment the change started
    pub target: LaneId,
    /// Progress per second
    pub rate: f32,
}

/// A vehicle in the traffic simulation
#[derive(Debug, Clone)]
pub struct SimVehicle {
    pub id: VehicleId,
    pub lane: LaneId,
    pub driver: Option<DriverId>,
    pub length: f32,
    pub width: f32,
    x: f32,
    y: f32,
    velocity: f32,
    acceleration: f32,
    crashed: bool,
    lane_change_progress: f32,
    lane_change: Option<LaneChange>,
    surroundings: Surroundings,
}

impl SimVehicle {
    pub fn new(id: VehicleId, lane: LaneId, initial_x: f32) -> Self {
        Self {
            id,
            lane,
            driver: None,
            length: VEHICLE_LENGTH,
            width: VEHICLE_WIDTH,
            x: initial_x.max(0.0),
            y: 0.0,
            velocity: 0.0,
            acceleration: 0.0,
            crashed: false,
            lane_change_progress: 0.0,
            lane_change: None,
            surroundings: Surroundings::default(),
        }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn acceleration(&self) -> f32 {
        self.acceleration
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed
    }

    pub fn lane_change_progress(&self) -> f32 {
        self.lane_change_progress
    }

    pub fn lane_change(&self) -> Option<&LaneChange> {
        self.lane_change.as_ref()
    }

    pub fn lane_change_direction(&self) -> Option<LatDirection> {
        self.lane_change.map(|change| change.direction)
    }

    pub fn is_changing_lane(&self) -> bool {
        self.lane_change.is_some()
    }

    pub fn surroundings(&self) -> &Surroundings {
        &self.surroundings
    }

    pub fn neighbor(&self, area: Enclosure) -> Option<VehicleId> {
        self.surroundings.get(area)
    }

    pub fn set_surroundings(&mut self, surroundings: Surroundings) {
        self.surroundings = surroundings;
    }

    pub fn set_velocity(&mut self, velocity: f32) {
        if !self.crashed {
            self.velocity = velocity.max(0.0);
        }
    }

    pub fn set_acceleration(&mut self, acceleration: f32) {
        if !self.crashed {
            self.acceleration = acceleration;
        }
    }

    /// Place the vehicle at a new longitudinal position (lane transfers)
    pub fn set_x(&mut self, x: f32) {
        self.x = x.max(0.0);
    }

    /// Net headway to `leader`: distance from our front to its rear, never negative
    pub fn gap_to(&self, leader: &SimVehicle) -> f32 {
        (leader.x - self.x - leader.length).max(0.0)
    }

    /// Begin moving towards `target`. Returns false if a change is already underway.
    pub fn start_lane_change(&mut self, direction: LatDirection, target: LaneId) -> bool {
        self.start_lane_change_with_duration(direction, target, LANE_CHANGE_DURATION)
    }

    pub fn start_lane_change_with_duration(
        &mut self,
        direction: LatDirection,
        target: LaneId,
        duration: f32,
    ) -> bool {
        if self.crashed || self.lane_change.is_some() || duration <= 0.0 {
            return false;
        }
        self.lane_change = Some(LaneChange {
            direction,
            target,
            rate: 1.0 / duration,
        });
        true
    }

    /// Drop an in-progress lane change and return to the lane centerline
    pub fn cancel_lane_change(&mut self) {
        self.lane_change = None;
        self.lane_change_progress = 0.0;
        self.y = 0.0;
    }

    pub fn crash(&mut self) {
        self.crashed = true;
        self.velocity = 0.0;
        self.acceleration = 0.0;
        self.cancel_lane_change();
    }

    /// Advance the vehicle by `dt` seconds.
    ///
    /// Lane-change progress is advanced first; on completion the vehicle's
    /// lane id switches to the change target and the caller is told so it can
    /// move the vehicle between lane lists. Longitudinal motion uses
    /// `dx = max(0, v·dt + a·dt²/2)` and `v = max(0, v + a·dt)`.
    pub fn integrate(&mut self, dt: f32) -> Result<VehicleUpdateResult> {
        if self.crashed {
            return Ok(VehicleUpdateResult::Stationary);
        }
        if !self.acceleration.is_finite() {
            bail!(
                "vehicle {:?} has non-finite acceleration {}",
                self.id,
                self.acceleration
            );
        }

        let mut result = VehicleUpdateResult::Moved;

        if let Some(change) = self.lane_change {
            self.lane_change_progress += change.rate * dt;
            if self.lane_change_progress >= 1.0 {
                let from = self.lane;
                self.lane = change.target;
                self.cancel_lane_change();
                result = VehicleUpdateResult::LaneChanged {
                    from,
                    to: change.target,
                };
            }
        }

        let dx = (self.velocity * dt + 0.5 * self.acceleration * dt * dt).max(0.0);
        self.velocity = (self.velocity + self.acceleration * dt).max(0.0);
        self.x += dx;

        if let Some(change) = self.lane_change {
            self.y += change.direction.sign() * change.rate * dt;
        }

        Ok(result)
    }
}
