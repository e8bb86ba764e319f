//! Read-only, fully materialized views of the simulation for external consumers

use serde::Serialize;
use std::collections::HashMap;

use super::lane::SimLane;
use super::settings::{SimSettings, SimState};
use super::stats::SimStats;
use super::types::{Coordinate, DriverId, LaneId, LaneType, LatDirection, RouteId, VehicleId};
use super::vehicle::SimVehicle;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleView {
    pub id: VehicleId,
    pub lane_id: LaneId,
    pub driver_id: Option<DriverId>,
    pub route_id: Option<RouteId>,
    pub x: f32,
    pub y: f32,
    /// Position on the lane centerline in world coordinates
    pub position: Coordinate,
    pub heading: f32,
    pub velocity: f32,
    pub acceleration: f32,
    pub length: f32,
    pub width: f32,
    pub is_changing_lane: bool,
    pub lane_change_progress: f32,
    pub lane_change_direction: Option<LatDirection>,
    pub crashed: bool,
}

impl VehicleView {
    pub fn new(vehicle: &SimVehicle, lane: Option<&SimLane>, route_id: Option<RouteId>) -> Self {
        let (position, heading) = lane
            .map(|lane| {
                (
                    lane.coordinate_at_distance(vehicle.x()),
                    lane.heading_at_distance(vehicle.x()),
                )
            })
            .unwrap_or_default();

        Self {
            id: vehicle.id,
            lane_id: vehicle.lane,
            driver_id: vehicle.driver,
            route_id,
            x: vehicle.x(),
            y: vehicle.y(),
            position,
            heading,
            velocity: vehicle.velocity(),
            acceleration: vehicle.acceleration(),
            length: vehicle.length,
            width: vehicle.width,
            is_changing_lane: vehicle.is_changing_lane(),
            lane_change_progress: vehicle.lane_change_progress(),
            lane_change_direction: vehicle.lane_change_direction(),
            crashed: vehicle.is_crashed(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaneConnections {
    pub upstream: Option<LaneId>,
    pub downstream: Option<LaneId>,
    pub left: Option<LaneId>,
    pub right: Option<LaneId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneView {
    pub id: LaneId,
    pub lane_type: LaneType,
    pub length: f32,
    pub width: f32,
    pub speed_limit: f32,
    pub vehicle_count: usize,
    pub density: f32,
    pub average_speed: f32,
    pub flow: f32,
    pub coordinates: Vec<Coordinate>,
    pub connections: LaneConnections,
}

impl LaneView {
    pub fn new(lane: &SimLane, vehicles: &HashMap<VehicleId, SimVehicle>) -> Self {
        let links = lane.links();
        Self {
            id: lane.id,
            lane_type: lane.lane_type,
            length: lane.length,
            width: lane.width,
            speed_limit: lane.speed_limit,
            vehicle_count: lane.vehicle_count(),
            density: lane.density(),
            average_speed: lane.average_speed(vehicles),
            flow: lane.flow(vehicles),
            coordinates: lane.coordinates().to_vec(),
            connections: LaneConnections {
                upstream: links.upstream,
                downstream: links.downstream,
                left: links.left,
                right: links.right,
            },
        }
    }
}

/// Everything an external observer may want to know about one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimSnapshot {
    pub state: SimState,
    pub stats: SimStats,
    pub settings: SimSettings,
    pub vehicles: Vec<VehicleView>,
    pub lanes: Vec<LaneView>,
}
