//! Vehicle spawning, removal, and the per-tick driver and integration passes
//!
//! These functions work on the registries directly so the model can keep its
//! tick pipeline readable. Every pass visits entities in ascending id order so
//! runs are reproducible.

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use std::collections::HashMap;

use super::driver::{DriverKind, SimDriver};
use super::lane_network::SimLaneNetwork;
use super::types::{DriverId, LaneId, RouteId, VehicleId};
use super::vehicle::{SimVehicle, VehicleUpdateResult};

/// What happened to one vehicle during the integration pass
#[derive(Debug, Clone, PartialEq)]
pub struct MoveReport {
    pub vehicle: VehicleId,
    /// Lanes the vehicle left this tick, in order
    pub lanes_left: Vec<LaneId>,
    /// Past the end of a lane with nothing downstream
    pub exited: bool,
}

/// Build a vehicle and its driver without touching any registry.
///
/// # Arguments
/// * `vehicle_id` / `driver_id` - Pre-allocated ids
/// * `lane_id` - Lane the vehicle starts on; must exist
/// * `kind` - Behavior model of the driver
/// * `initial_position` - Distance along the lane in meters
/// * `route` - Optional route the driver follows
pub fn spawn_vehicle(
    vehicle_id: VehicleId,
    driver_id: DriverId,
    lane_id: LaneId,
    kind: DriverKind,
    initial_position: f32,
    route: Option<RouteId>,
    network: &SimLaneNetwork,
) -> Result<(SimVehicle, SimDriver)> {
    if !network.contains_lane(lane_id) {
        bail!("Lane {:?} not found", lane_id);
    }
    if !initial_position.is_finite() {
        bail!("Initial position {} is not a finite number", initial_position);
    }

    let mut vehicle = SimVehicle::new(vehicle_id, lane_id, initial_position);
    let mut driver = SimDriver::new(driver_id, vehicle_id, kind);
    driver.route = route;
    vehicle.driver = Some(driver_id);

    Ok((vehicle, driver))
}

/// Remove a vehicle from its lane, then its driver, then the vehicle itself
pub fn despawn_vehicle(
    vehicle_id: VehicleId,
    vehicles: &mut HashMap<VehicleId, SimVehicle>,
    drivers: &mut HashMap<DriverId, SimDriver>,
    network: &mut SimLaneNetwork,
) -> Result<SimVehicle> {
    let (lane_id, x, driver_id) = vehicles
        .get(&vehicle_id)
        .map(|v| (v.lane, v.x(), v.driver))
        .with_context(|| format!("Vehicle {:?} not found", vehicle_id))?;

    if let Some(lane) = network.get_lane_mut(lane_id) {
        lane.remove_vehicle(vehicle_id, x);
    }
    if let Some(driver_id) = driver_id {
        drivers.remove(&driver_id);
    }
    vehicles
        .remove(&vehicle_id)
        .with_context(|| format!("Vehicle {:?} not found", vehicle_id))
}

/// Write fresh neighbor caches for every vehicle on every lane
pub fn refresh_surroundings(
    network: &SimLaneNetwork,
    vehicles: &mut HashMap<VehicleId, SimVehicle>,
) {
    for lane_id in network.lane_ids() {
        for (vehicle_id, surroundings) in network.update_vehicle_surroundings(lane_id) {
            if let Some(vehicle) = vehicles.get_mut(&vehicle_id) {
                vehicle.set_surroundings(surroundings);
            }
        }
    }
}

/// Let every driver act on its vehicle.
///
/// A failing driver is logged and skipped; the rest still drive. Returns the
/// ids of the drivers that failed.
pub fn drive_all(
    network: &SimLaneNetwork,
    vehicles: &mut HashMap<VehicleId, SimVehicle>,
    drivers: &HashMap<DriverId, SimDriver>,
) -> Vec<DriverId> {
    let mut driver_ids: Vec<DriverId> = drivers.keys().copied().collect();
    driver_ids.sort();

    let mut failed = Vec::new();
    for driver_id in driver_ids {
        let Some(driver) = drivers.get(&driver_id) else {
            continue;
        };
        match driver.drive(network, vehicles) {
            Ok(Some(intent)) => {
                if let Some(vehicle) = vehicles.get_mut(&driver.vehicle) {
                    vehicle.set_acceleration(intent.acceleration);
                    if let Some((direction, target)) = intent.lane_change {
                        if vehicle.start_lane_change(direction, target) {
                            debug!(
                                "Vehicle {:?} starts changing {:?} to lane {:?}",
                                vehicle.id, direction, target
                            );
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Error in driver {:?}: {:#}", driver_id, e);
                failed.push(driver_id);
            }
        }
    }
    failed
}

/// Integrate every vehicle and keep lane lists in step with the new positions.
///
/// Handles lane-change completion and downstream transfers. Vehicles past the
/// end of a lane without a downstream lane are reported as exited but are not
/// removed here.
pub fn integrate_vehicles(
    dt: f32,
    vehicles: &mut HashMap<VehicleId, SimVehicle>,
    network: &mut SimLaneNetwork,
) -> Vec<MoveReport> {
    let mut vehicle_ids: Vec<VehicleId> = vehicles.keys().copied().collect();
    vehicle_ids.sort();

    let mut reports = Vec::new();
    for vehicle_id in vehicle_ids {
        let Some(vehicle) = vehicles.get_mut(&vehicle_id) else {
            continue;
        };
        match integrate_one(dt, vehicle, network) {
            Ok(report) => {
                if report.exited || !report.lanes_left.is_empty() {
                    reports.push(report);
                }
            }
            Err(e) => warn!("Error moving vehicle {:?}: {:#}", vehicle_id, e),
        }
    }
    reports
}

fn integrate_one(
    dt: f32,
    vehicle: &mut SimVehicle,
    network: &mut SimLaneNetwork,
) -> Result<MoveReport> {
    let old_x = vehicle.x();
    let old_lane = vehicle.lane;
    let mut report = MoveReport {
        vehicle: vehicle.id,
        lanes_left: Vec::new(),
        exited: false,
    };

    match vehicle.integrate(dt)? {
        VehicleUpdateResult::Stationary => return Ok(report),
        VehicleUpdateResult::Moved => {
            network
                .get_lane_mut(old_lane)
                .with_context(|| format!("Lane {:?} not found", old_lane))?
                .reposition_vehicle(vehicle.id, old_x, vehicle.x());
        }
        VehicleUpdateResult::LaneChanged { from, to } => {
            if !network.contains_lane(to) {
                vehicle.lane = from;
                if let Some(lane) = network.get_lane_mut(from) {
                    lane.reposition_vehicle(vehicle.id, old_x, vehicle.x());
                }
                bail!("Lane change target {:?} no longer exists", to);
            }
            if let Some(lane) = network.get_lane_mut(from) {
                lane.remove_vehicle(vehicle.id, old_x);
            }
            if let Some(lane) = network.get_lane_mut(to) {
                lane.insert_vehicle(vehicle.id, vehicle.x());
            }
            report.lanes_left.push(from);
        }
    }

    // Follow downstream links until the vehicle is on a lane that contains it
    loop {
        let lane_id = vehicle.lane;
        let (length, downstream) = {
            let lane = network
                .get_lane(lane_id)
                .with_context(|| format!("Lane {:?} not found", lane_id))?;
            (lane.length, lane.downstream_lane())
        };
        if vehicle.x() <= length {
            break;
        }
        match downstream.filter(|next| network.contains_lane(*next)) {
            Some(next) => {
                let x = vehicle.x();
                if let Some(lane) = network.get_lane_mut(lane_id) {
                    lane.remove_vehicle(vehicle.id, x);
                }
                vehicle.cancel_lane_change();
                vehicle.set_x(x - length);
                vehicle.lane = next;
                if let Some(lane) = network.get_lane_mut(next) {
                    lane.insert_vehicle(vehicle.id, vehicle.x());
                }
                report.lanes_left.push(lane_id);
            }
            None => {
                report.lanes_left.push(lane_id);
                report.exited = true;
                break;
            }
        }
    }

    Ok(report)
}

/// Mark vehicles whose front overlaps the rear of their leader as crashed.
/// Returns the newly crashed vehicles.
pub fn detect_collisions(
    network: &SimLaneNetwork,
    vehicles: &mut HashMap<VehicleId, SimVehicle>,
) -> Vec<VehicleId> {
    let mut crashed = Vec::new();
    for lane in network.lanes() {
        let ordered: Vec<(f32, VehicleId)> = lane.vehicle_positions().collect();
        for pair in ordered.windows(2) {
            let (follower_x, follower_id) = pair[0];
            let (leader_x, leader_id) = pair[1];
            let Some(leader_length) = vehicles.get(&leader_id).map(|v| v.length) else {
                continue;
            };
            if leader_x - leader_length < follower_x {
                for id in [follower_id, leader_id] {
                    if let Some(vehicle) = vehicles.get_mut(&id) {
                        if !vehicle.is_crashed() {
                            vehicle.crash();
                            crashed.push(id);
                        }
                    }
                }
            }
        }
    }
    crashed
}
