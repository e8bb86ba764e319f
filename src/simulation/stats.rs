//! Aggregate statistics recomputed every tick

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::lane_network::SimLaneNetwork;
use super::types::VehicleId;
use super::vehicle::SimVehicle;

/// Simulation statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimStats {
    pub current_time: f32,
    /// Vehicles ever added
    pub total_vehicles: u32,
    pub active_vehicles: u32,
    /// Vehicles that left the network or were removed without crashing
    pub completed_vehicles: u32,
    /// Vehicles removed while crashed
    pub crashed_vehicles: u32,
    /// Mean velocity over all vehicles [m/s]
    pub average_speed: f32,
    /// Sum of per-lane flow [veh/h]
    pub total_flow: f32,
    /// Mean of per-lane density [veh/km]
    pub average_density: f32,
}

impl SimStats {
    pub fn record_added(&mut self) {
        self.total_vehicles += 1;
        self.active_vehicles += 1;
    }

    pub fn record_removed(&mut self, crashed: bool) {
        self.active_vehicles = self.active_vehicles.saturating_sub(1);
        if crashed {
            self.crashed_vehicles += 1;
        } else {
            self.completed_vehicles += 1;
        }
    }

    /// Recompute the per-tick aggregates from the current network state
    pub fn recompute(
        &mut self,
        network: &SimLaneNetwork,
        vehicles: &HashMap<VehicleId, SimVehicle>,
    ) {
        self.active_vehicles = vehicles.len() as u32;

        // Sum in id order so seeded runs reproduce to the last digit
        let mut ids: Vec<&VehicleId> = vehicles.keys().collect();
        ids.sort();
        self.average_speed = if ids.is_empty() {
            0.0
        } else {
            ids.iter()
                .filter_map(|id| vehicles.get(*id))
                .map(SimVehicle::velocity)
                .sum::<f32>()
                / ids.len() as f32
        };

        let lane_count = network.lane_count();
        let (total_flow, total_density) = network
            .lane_ids()
            .into_iter()
            .filter_map(|id| network.get_lane(id))
            .fold((0.0, 0.0), |(flow, density), lane| {
                (flow + lane.flow(vehicles), density + lane.density())
            });

        self.total_flow = total_flow;
        self.average_density = if lane_count > 0 {
            total_density / lane_count as f32
        } else {
            0.0
        };
    }
}
