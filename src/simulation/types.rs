//! Core types for the traffic simulation
//!
//! Identifiers, geometry, and the enumerations shared by every component.

use serde::{Deserialize, Serialize};

/// A unique identifier for simulation entities
/// This is a simple wrapper around a usize for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimId(pub usize);

/// A wrapper type for lane IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaneId(pub SimId);

/// A wrapper type for vehicle IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub SimId);

/// A wrapper type for driver IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverId(pub SimId);

/// A wrapper type for route IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(pub SimId);

impl LaneId {
    pub fn new(id: usize) -> Self {
        Self(SimId(id))
    }
}

impl VehicleId {
    pub fn new(id: usize) -> Self {
        Self(SimId(id))
    }
}

impl DriverId {
    pub fn new(id: usize) -> Self {
        Self(SimId(id))
    }
}

impl RouteId {
    pub fn new(id: usize) -> Self {
        Self(SimId(id))
    }
}

/// Hands out ids per entity kind.
///
/// Every counter starts at 1 and only ever moves forward. Explicitly chosen
/// ids (lanes and routes loaded from a scenario) bump the matching counter so
/// a later allocation can never collide with them.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next_lane: usize,
    next_vehicle: usize,
    next_driver: usize,
    next_route: usize,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next_lane: 1,
            next_vehicle: 1,
            next_driver: 1,
            next_route: 1,
        }
    }

    pub fn next_lane(&mut self) -> LaneId {
        let id = LaneId::new(self.next_lane);
        self.next_lane += 1;
        id
    }

    pub fn next_vehicle(&mut self) -> VehicleId {
        let id = VehicleId::new(self.next_vehicle);
        self.next_vehicle += 1;
        id
    }

    pub fn next_driver(&mut self) -> DriverId {
        let id = DriverId::new(self.next_driver);
        self.next_driver += 1;
        id
    }

    pub fn next_route(&mut self) -> RouteId {
        let id = RouteId::new(self.next_route);
        self.next_route += 1;
        id
    }

    pub fn reserve_lane(&mut self, id: LaneId) {
        self.next_lane = self.next_lane.max(id.0 .0 + 1);
    }

    pub fn reserve_route(&mut self, id: RouteId) {
        self.next_route = self.next_route.max(id.0 .0 + 1);
    }
}

/// A 2D point on the lane plane
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f32,
    pub y: f32,
}

impl Coordinate {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Coordinate) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn lerp(&self, other: &Coordinate, t: f32) -> Coordinate {
        Coordinate {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    /// Angle of the direction from this point to another, in radians
    pub fn heading_to(&self, other: &Coordinate) -> f32 {
        (other.y - self.y).atan2(other.x - self.x)
    }
}

/// Functional category of a lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaneType {
    #[default]
    Normal,
    Acceleration,
    Deceleration,
    Entrance,
    Exit,
}

/// One of the four directed links of a lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneSide {
    Upstream,
    Downstream,
    Left,
    Right,
}

impl LaneSide {
    /// The side the other lane must point back with
    pub fn opposite(self) -> LaneSide {
        match self {
            LaneSide::Upstream => LaneSide::Downstream,
            LaneSide::Downstream => LaneSide::Upstream,
            LaneSide::Left => LaneSide::Right,
            LaneSide::Right => LaneSide::Left,
        }
    }
}

/// Lateral direction of a lane change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LatDirection {
    Left,
    Right,
}

impl LatDirection {
    pub fn side(self) -> LaneSide {
        match self {
            LatDirection::Left => LaneSide::Left,
            LatDirection::Right => LaneSide::Right,
        }
    }

    /// Sign of the lateral offset: left is positive
    pub fn sign(self) -> f32 {
        match self {
            LatDirection::Left => 1.0,
            LatDirection::Right => -1.0,
        }
    }
}

/// The six neighbor slots cached around a vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Enclosure {
    Front,
    Back,
    LeftFront,
    LeftBack,
    RightFront,
    RightBack,
}

/// Default vehicle length in meters
pub const VEHICLE_LENGTH: f32 = 4.5;

/// Default vehicle width in meters
pub const VEHICLE_WIDTH: f32 = 2.0;

/// Seconds a lane change takes from start to completion
pub const LANE_CHANGE_DURATION: f32 = 3.0;

/// Minimum gap to the prospective leader and follower for a lane change
pub const MIN_LANE_CHANGE_GAP: f32 = 10.0;

/// Acceleration gain (m/s²) a lane change must bring before it is attempted
pub const LANE_CHANGE_THRESHOLD: f32 = 0.2;

/// Exponent of the IDM free-flow term
pub const IDM_DELTA: i32 = 4;

/// Default lane length in meters
pub const DEFAULT_LANE_LENGTH: f32 = 1000.0;

/// Default lane width in meters
pub const DEFAULT_LANE_WIDTH: f32 = 3.5;

/// Default speed limit in m/s (about 120 km/h)
pub const DEFAULT_SPEED_LIMIT: f32 = 33.33;
