//! Driver behavior models
//!
//! A driver reads the neighbor cache of the vehicle it controls and decides
//! on an acceleration and, for the IDM variant, whether to start a lane
//! change. Drivers never mutate the world themselves: `drive` returns a
//! [`DriverIntent`] that the model applies.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::lane_network::SimLaneNetwork;
use super::types::{
    DriverId, Enclosure, LaneId, LatDirection, RouteId, VehicleId, DEFAULT_SPEED_LIMIT, IDM_DELTA,
    LANE_CHANGE_THRESHOLD, MIN_LANE_CHANGE_GAP,
};
use super::vehicle::SimVehicle;

/// Temperament applied on top of the IDM defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverProfile {
    #[default]
    Normal,
    Aggressive,
    Cautious,
}

/// Which behavior model controls a vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Idm(DriverProfile),
    Simple,
}

impl Default for DriverKind {
    fn default() -> Self {
        DriverKind::Idm(DriverProfile::Normal)
    }
}

impl FromStr for DriverKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "IDM" | "NORMAL" => Ok(DriverKind::Idm(DriverProfile::Normal)),
            "AGGRESSIVE" => Ok(DriverKind::Idm(DriverProfile::Aggressive)),
            "CAUTIOUS" => Ok(DriverKind::Idm(DriverProfile::Cautious)),
            "SIMPLE" => Ok(DriverKind::Simple),
            other => bail!("Unknown driver type '{}'", other),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverKind::Idm(DriverProfile::Normal) => "IDM",
            DriverKind::Idm(DriverProfile::Aggressive) => "AGGRESSIVE",
            DriverKind::Idm(DriverProfile::Cautious) => "CAUTIOUS",
            DriverKind::Simple => "SIMPLE",
        };
        f.write_str(name)
    }
}

/// Parameters of the Intelligent Driver Model plus the lane-change heuristic
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdmParams {
    /// v0 [m/s]
    pub desired_speed: f32,
    /// T [s]
    pub time_headway: f32,
    /// s0 [m]
    pub min_spacing: f32,
    /// a [m/s²]
    pub max_acceleration: f32,
    /// b [m/s²]
    pub comfortable_deceleration: f32,
    pub politeness: f32,
    pub lane_change_threshold: f32,
    pub min_lane_change_gap: f32,
}

impl Default for IdmParams {
    fn default() -> Self {
        Self {
            desired_speed: DEFAULT_SPEED_LIMIT,
            time_headway: 1.5,
            min_spacing: 2.0,
            max_acceleration: 2.0,
            comfortable_deceleration: 3.0,
            politeness: 0.5,
            lane_change_threshold: LANE_CHANGE_THRESHOLD,
            min_lane_change_gap: MIN_LANE_CHANGE_GAP,
        }
    }
}

impl IdmParams {
    pub fn for_profile(profile: DriverProfile) -> Self {
        let defaults = Self::default();
        match profile {
            DriverProfile::Normal => defaults,
            DriverProfile::Aggressive => Self {
                desired_speed: defaults.desired_speed * 1.1,
                time_headway: 1.0,
                min_spacing: 1.5,
                max_acceleration: 2.5,
                comfortable_deceleration: 4.0,
                politeness: 0.2,
                ..defaults
            },
            DriverProfile::Cautious => Self {
                desired_speed: defaults.desired_speed * 0.9,
                time_headway: 2.5,
                min_spacing: 3.0,
                max_acceleration: 1.5,
                comfortable_deceleration: 2.0,
                politeness: 0.8,
                ..defaults
            },
        }
    }

    /// `a·(1 − (v/v0)^δ)`
    pub fn free_acceleration(&self, velocity: f32) -> f32 {
        self.max_acceleration * (1.0 - (velocity / self.desired_speed).powi(IDM_DELTA))
    }

    /// `s0 + v·T + v·Δv / (2·sqrt(a·b))`
    pub fn desired_gap(&self, velocity: f32, leader_velocity: f32) -> f32 {
        let approach = velocity - leader_velocity;
        self.min_spacing
            + velocity * self.time_headway
            + velocity * approach
                / (2.0 * (self.max_acceleration * self.comfortable_deceleration).sqrt())
    }

    /// IDM acceleration. `leader` is `(gap, leader_velocity)`.
    ///
    /// Without a leader this is exactly the free-flow term. With one, the
    /// result is floored at `-b`; a gap of zero or less makes the interaction
    /// term infinite, which lands on that floor.
    pub fn acceleration(&self, velocity: f32, leader: Option<(f32, f32)>) -> f32 {
        let Some((gap, leader_velocity)) = leader else {
            return self.free_acceleration(velocity);
        };

        let desired_gap = self.desired_gap(velocity, leader_velocity);
        let interaction = if gap > 0.0 {
            (desired_gap / gap).powi(2)
        } else {
            f32::INFINITY
        };
        let free = 1.0 - (velocity / self.desired_speed).powi(IDM_DELTA);
        (self.max_acceleration * (free - interaction)).max(-self.comfortable_deceleration)
    }
}

/// Parameters of the proportional speed keeper
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimpleParams {
    pub desired_speed: f32,
    pub reaction_time: f32,
    pub max_acceleration: f32,
    pub max_deceleration: f32,
}

impl Default for SimpleParams {
    fn default() -> Self {
        Self {
            desired_speed: 30.0,
            reaction_time: 1.0,
            max_acceleration: 2.0,
            max_deceleration: 3.0,
        }
    }
}

impl SimpleParams {
    /// Close the speed gap within one reaction time, within the accel/decel limits
    pub fn acceleration(&self, velocity: f32) -> f32 {
        let response = (self.desired_speed - velocity) / self.reaction_time.max(f32::EPSILON);
        response.clamp(-self.max_deceleration, self.max_acceleration)
    }
}

/// The behavior model with its tuned parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    Idm(IdmParams),
    Simple(SimpleParams),
}

impl Behavior {
    pub fn for_kind(kind: DriverKind) -> Self {
        match kind {
            DriverKind::Idm(profile) => Behavior::Idm(IdmParams::for_profile(profile)),
            DriverKind::Simple => Behavior::Simple(SimpleParams::default()),
        }
    }

    pub fn desired_speed(&self) -> f32 {
        match self {
            Behavior::Idm(params) => params.desired_speed,
            Behavior::Simple(params) => params.desired_speed,
        }
    }
}

/// What a driver wants done to its vehicle this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverIntent {
    pub acceleration: f32,
    pub lane_change: Option<(LatDirection, LaneId)>,
}

/// A driver controlling exactly one vehicle
#[derive(Debug, Clone)]
pub struct SimDriver {
    pub id: DriverId,
    pub vehicle: VehicleId,
    pub route: Option<RouteId>,
    pub kind: DriverKind,
    pub behavior: Behavior,
}

impl SimDriver {
    pub fn new(id: DriverId, vehicle: VehicleId, kind: DriverKind) -> Self {
        Self {
            id,
            vehicle,
            route: None,
            kind,
            behavior: Behavior::for_kind(kind),
        }
    }

    /// Decide this tick's acceleration and lane-change intent.
    ///
    /// Returns `Ok(None)` when the vehicle is gone or crashed. Errors mean the
    /// neighbor cache references something that no longer exists.
    pub fn drive(
        &self,
        network: &SimLaneNetwork,
        vehicles: &HashMap<VehicleId, SimVehicle>,
    ) -> Result<Option<DriverIntent>> {
        let Some(vehicle) = vehicles.get(&self.vehicle) else {
            return Ok(None);
        };
        if vehicle.is_crashed() {
            return Ok(None);
        }

        let leader = Self::cached_neighbor(vehicle, Enclosure::Front, vehicles)?;

        match &self.behavior {
            Behavior::Simple(params) => Ok(Some(DriverIntent {
                acceleration: params.acceleration(vehicle.velocity()),
                lane_change: None,
            })),
            Behavior::Idm(params) => {
                let acceleration = params.acceleration(
                    vehicle.velocity(),
                    leader.map(|leader| (vehicle.gap_to(leader), leader.velocity())),
                );
                let lane_change =
                    Self::consider_lane_change(params, vehicle, acceleration, network, vehicles)?;
                Ok(Some(DriverIntent {
                    acceleration,
                    lane_change,
                }))
            }
        }
    }

    fn cached_neighbor<'a>(
        vehicle: &SimVehicle,
        area: Enclosure,
        vehicles: &'a HashMap<VehicleId, SimVehicle>,
    ) -> Result<Option<&'a SimVehicle>> {
        match vehicle.neighbor(area) {
            Some(id) => vehicles
                .get(&id)
                .map(Some)
                .with_context(|| format!("Cached {:?} neighbor {:?} no longer exists", area, id)),
            None => Ok(None),
        }
    }

    /// Simplified MOBIL: left before right, first lane that brings more than
    /// the threshold and passes the gap check wins
    fn consider_lane_change(
        params: &IdmParams,
        vehicle: &SimVehicle,
        current_acceleration: f32,
        network: &SimLaneNetwork,
        vehicles: &HashMap<VehicleId, SimVehicle>,
    ) -> Result<Option<(LatDirection, LaneId)>> {
        if vehicle.is_changing_lane() {
            return Ok(None);
        }
        let lane = network
            .get_lane(vehicle.lane)
            .with_context(|| format!("Lane {:?} of vehicle {:?} not found", vehicle.lane, vehicle.id))?;

        let candidates = [
            (LatDirection::Left, lane.left_lane(), Enclosure::LeftFront),
            (LatDirection::Right, lane.right_lane(), Enclosure::RightFront),
        ];

        for (direction, target, front_area) in candidates {
            let Some(target) = target else {
                continue;
            };

            let target_leader = Self::cached_neighbor(vehicle, front_area, vehicles)?;
            let hypothetical = match target_leader {
                Some(leader) => {
                    let gap = leader.x() - vehicle.x() - leader.length;
                    if gap <= 0.0 {
                        continue;
                    }
                    params.acceleration(vehicle.velocity(), Some((gap, leader.velocity())))
                }
                None => params.acceleration(vehicle.velocity(), None),
            };

            let advantage = hypothetical - current_acceleration;
            if advantage > params.lane_change_threshold
                && network.is_safe_lane_change(vehicle, target, params.min_lane_change_gap, vehicles)
            {
                return Ok(Some((direction, target)));
            }
        }

        Ok(None)
    }
}
