//! Microscopic traffic simulation engine
//!
//! Lanes hold position-sorted vehicles, drivers decide accelerations and lane
//! changes, and the model advances everything in fixed time steps. The engine
//! has no UI or transport of its own; consumers read snapshots or register
//! observers.

mod driver;
mod generator;
mod lane;
mod lane_network;
mod model;
mod observer;
mod route;
mod runner;
mod scenario;
mod settings;
mod snapshot;
mod stats;
mod types;
mod vehicle;
mod vehicle_manager;

pub use driver::{
    Behavior, DriverIntent, DriverKind, DriverProfile, IdmParams, SimDriver, SimpleParams,
};
pub use generator::{LaneGenerator, TrafficGenerator};
pub use lane::{LaneLinks, SimLane};
pub use lane_network::{LaneEdge, SimLaneNetwork};
pub use model::SimModel;
pub use observer::{SimObserver, StatsLogger};
pub use route::Route;
pub use runner::Simulation;
pub use scenario::{ConnectionSpec, LaneSpec, RouteSpec, ScenarioSpec, VehicleSpec};
pub use settings::{
    SettingsUpdate, SimSettings, SimState, DEFAULT_MAX_SIMULATION_TIME, DEFAULT_TIME_STEP,
    MAX_PACING_INTERVAL, PAUSE_POLL_INTERVAL, STOP_JOIN_TIMEOUT,
};
pub use snapshot::{LaneConnections, LaneView, SimSnapshot, VehicleView};
pub use stats::SimStats;
pub use types::{
    Coordinate, DriverId, Enclosure, IdAllocator, LaneId, LaneSide, LaneType, LatDirection,
    RouteId, SimId, VehicleId, DEFAULT_LANE_LENGTH, DEFAULT_LANE_WIDTH, DEFAULT_SPEED_LIMIT,
    IDM_DELTA, LANE_CHANGE_DURATION, LANE_CHANGE_THRESHOLD, MIN_LANE_CHANGE_GAP, VEHICLE_LENGTH,
    VEHICLE_WIDTH,
};
pub use vehicle::{LaneChange, SimVehicle, Surroundings, VehicleUpdateResult};
pub use vehicle_manager::MoveReport;
