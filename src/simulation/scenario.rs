//! In-memory description of a whole network, loadable in one go

use serde::{Deserialize, Serialize};

use super::settings::SimSettings;
use super::types::{Coordinate, LaneId, LaneType, RouteId, DEFAULT_LANE_LENGTH};

fn default_lane_length() -> f32 {
    DEFAULT_LANE_LENGTH
}

fn default_driver_type() -> String {
    "IDM".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneSpec {
    pub id: LaneId,
    #[serde(rename = "type", default)]
    pub lane_type: LaneType,
    #[serde(default = "default_lane_length")]
    pub length: f32,
    #[serde(default)]
    pub width: Option<f32>,
    #[serde(default)]
    pub speed_limit: Option<f32>,
    #[serde(default)]
    pub coordinates: Option<Vec<Coordinate>>,
}

impl LaneSpec {
    pub fn straight(id: usize, length: f32) -> Self {
        Self {
            id: LaneId::new(id),
            lane_type: LaneType::Normal,
            length,
            width: None,
            speed_limit: None,
            coordinates: None,
        }
    }
}

/// Links of one lane; every side present is connected with its reciprocal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub lane_id: LaneId,
    #[serde(default)]
    pub upstream: Option<LaneId>,
    #[serde(default)]
    pub downstream: Option<LaneId>,
    #[serde(default)]
    pub left: Option<LaneId>,
    #[serde(default)]
    pub right: Option<LaneId>,
}

impl ConnectionSpec {
    pub fn new(lane_id: LaneId) -> Self {
        Self {
            lane_id,
            upstream: None,
            downstream: None,
            left: None,
            right: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub id: RouteId,
    pub lane_sequence: Vec<LaneId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSpec {
    pub lane_id: LaneId,
    /// One of IDM, NORMAL, AGGRESSIVE, CAUTIOUS, SIMPLE
    #[serde(default = "default_driver_type")]
    pub driver_type: String,
    #[serde(default)]
    pub position: f32,
    #[serde(default)]
    pub velocity: Option<f32>,
    #[serde(default)]
    pub route_id: Option<RouteId>,
}

/// Lanes, their connections, routes, initial vehicles and settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioSpec {
    pub lanes: Vec<LaneSpec>,
    pub connections: Vec<ConnectionSpec>,
    pub routes: Vec<RouteSpec>,
    pub vehicles: Vec<VehicleSpec>,
    pub settings: Option<SimSettings>,
}

impl ScenarioSpec {
    /// Three parallel lanes, left to right, with `vehicles_per_lane` IDM
    /// vehicles spaced 50 m apart on each
    pub fn three_lane_motorway(length: f32, vehicles_per_lane: usize) -> Self {
        let lanes: Vec<LaneSpec> = (1..=3)
            .map(|id| LaneSpec {
                coordinates: Some(vec![
                    Coordinate::new(0.0, -(id as f32 - 1.0) * 3.5),
                    Coordinate::new(length, -(id as f32 - 1.0) * 3.5),
                ]),
                ..LaneSpec::straight(id, length)
            })
            .collect();

        let connections = vec![
            ConnectionSpec {
                right: Some(LaneId::new(2)),
                ..ConnectionSpec::new(LaneId::new(1))
            },
            ConnectionSpec {
                right: Some(LaneId::new(3)),
                ..ConnectionSpec::new(LaneId::new(2))
            },
        ];

        let vehicles = (1..=3)
            .flat_map(|lane| {
                (0..vehicles_per_lane).map(move |index| VehicleSpec {
                    lane_id: LaneId::new(lane),
                    driver_type: default_driver_type(),
                    position: 50.0 + 50.0 * lane as f32 + 50.0 * index as f32,
                    velocity: None,
                    route_id: None,
                })
            })
            .collect();

        Self {
            lanes,
            connections,
            routes: Vec::new(),
            vehicles,
            settings: None,
        }
    }
}
