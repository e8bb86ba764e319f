//! A single lane: geometry, directed links, and the position-ordered list of
//! vehicles currently on it.

use anyhow::{bail, Result};
use ordered_float::OrderedFloat;
use sorted_vec::SortedVec;
use std::collections::HashMap;

use super::types::{
    Coordinate, LaneId, LaneSide, LaneType, VehicleId, DEFAULT_LANE_WIDTH, DEFAULT_SPEED_LIMIT,
};
use super::vehicle::SimVehicle;

/// Ids of the up to four lanes linked to a lane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneLinks {
    pub upstream: Option<LaneId>,
    pub downstream: Option<LaneId>,
    pub left: Option<LaneId>,
    pub right: Option<LaneId>,
}

impl LaneLinks {
    pub fn get(&self, side: LaneSide) -> Option<LaneId> {
        match side {
            LaneSide::Upstream => self.upstream,
            LaneSide::Downstream => self.downstream,
            LaneSide::Left => self.left,
            LaneSide::Right => self.right,
        }
    }

    fn slot(&mut self, side: LaneSide) -> &mut Option<LaneId> {
        match side {
            LaneSide::Upstream => &mut self.upstream,
            LaneSide::Downstream => &mut self.downstream,
            LaneSide::Left => &mut self.left,
            LaneSide::Right => &mut self.right,
        }
    }
}

/// A lane in the traffic simulation
#[derive(Debug, Clone)]
pub struct SimLane {
    pub id: LaneId,
    pub lane_type: LaneType,
    pub length: f32,
    pub width: f32,
    pub speed_limit: f32,
    coordinates: Vec<Coordinate>,
    links: LaneLinks,
    /// (x, vehicle) pairs, always ascending by x
    vehicles: SortedVec<(OrderedFloat<f32>, VehicleId)>,
}

impl SimLane {
    /// A straight lane from the origin along the x axis
    pub fn new(id: LaneId, lane_type: LaneType, length: f32) -> Self {
        Self {
            id,
            lane_type,
            length,
            width: DEFAULT_LANE_WIDTH,
            speed_limit: DEFAULT_SPEED_LIMIT,
            coordinates: vec![Coordinate::new(0.0, 0.0), Coordinate::new(length, 0.0)],
            links: LaneLinks::default(),
            vehicles: SortedVec::new(),
        }
    }

    pub fn with_coordinates(mut self, coordinates: Vec<Coordinate>) -> Self {
        self.coordinates = coordinates;
        self
    }

    pub fn with_width(mut self, width: f32) -> Self {
        self.width = width;
        self
    }

    pub fn with_speed_limit(mut self, speed_limit: f32) -> Self {
        self.speed_limit = speed_limit;
        self
    }

    /// Check the lane is usable before it enters a network
    pub fn validate(&self) -> Result<()> {
        if !(self.length > 0.0) {
            bail!("Lane {:?} has non-positive length {}", self.id, self.length);
        }
        if self.coordinates.len() < 2 {
            bail!(
                "Lane {:?} needs at least two centerline points, got {}",
                self.id,
                self.coordinates.len()
            );
        }
        Ok(())
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }

    pub fn links(&self) -> &LaneLinks {
        &self.links
    }

    pub fn link(&self, side: LaneSide) -> Option<LaneId> {
        self.links.get(side)
    }

    pub fn left_lane(&self) -> Option<LaneId> {
        self.links.left
    }

    pub fn right_lane(&self) -> Option<LaneId> {
        self.links.right
    }

    pub fn downstream_lane(&self) -> Option<LaneId> {
        self.links.downstream
    }

    pub fn upstream_lane(&self) -> Option<LaneId> {
        self.links.upstream
    }

    /// Raw link setter; reciprocal links are kept consistent by the network
    pub(crate) fn set_link(&mut self, side: LaneSide, lane: Option<LaneId>) {
        *self.links.slot(side) = lane;
    }

    /// Clear every link that points at `lane`
    pub(crate) fn unlink(&mut self, lane: LaneId) {
        for side in [
            LaneSide::Upstream,
            LaneSide::Downstream,
            LaneSide::Left,
            LaneSide::Right,
        ] {
            let slot = self.links.slot(side);
            if *slot == Some(lane) {
                *slot = None;
            }
        }
    }

    // ── Vehicle membership ────────────────────────────────────────────────

    pub fn insert_vehicle(&mut self, vehicle_id: VehicleId, x: f32) {
        self.vehicles.insert((OrderedFloat(x), vehicle_id));
    }

    /// Remove a vehicle recorded at `x`. Falls back to a scan by id if the
    /// recorded position is stale. Returns whether the vehicle was present.
    pub fn remove_vehicle(&mut self, vehicle_id: VehicleId, x: f32) -> bool {
        if self
            .vehicles
            .remove_item(&(OrderedFloat(x), vehicle_id))
            .is_some()
        {
            return true;
        }
        let before = self.vehicles.len();
        self.vehicles.retain(|(_, id)| *id != vehicle_id);
        self.vehicles.len() != before
    }

    /// Re-key a vehicle after it moved along the lane
    pub fn reposition_vehicle(&mut self, vehicle_id: VehicleId, old_x: f32, new_x: f32) {
        self.remove_vehicle(vehicle_id, old_x);
        self.insert_vehicle(vehicle_id, new_x);
    }

    pub fn contains_vehicle(&self, vehicle_id: VehicleId) -> bool {
        self.vehicles.iter().any(|(_, id)| *id == vehicle_id)
    }

    /// Vehicle ids ordered by ascending position
    pub fn vehicle_ids(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.vehicles.iter().map(|(_, id)| *id)
    }

    /// (position, id) pairs ordered by ascending position
    pub fn vehicle_positions(&self) -> impl Iterator<Item = (f32, VehicleId)> + '_ {
        self.vehicles.iter().map(|(x, id)| (x.into_inner(), *id))
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    // ── Spatial queries ───────────────────────────────────────────────────

    /// Nearest vehicle with x strictly greater than `position`
    pub fn leading_vehicle(&self, position: f32) -> Option<(f32, VehicleId)> {
        let index = self.vehicles.partition_point(|(x, _)| x.into_inner() <= position);
        self.vehicles
            .get(index)
            .map(|(x, id)| (x.into_inner(), *id))
    }

    /// Nearest vehicle with x strictly less than `position`
    pub fn following_vehicle(&self, position: f32) -> Option<(f32, VehicleId)> {
        let index = self.vehicles.partition_point(|(x, _)| x.into_inner() < position);
        if index == 0 {
            return None;
        }
        self.vehicles
            .get(index - 1)
            .map(|(x, id)| (x.into_inner(), *id))
    }

    /// Whether some vehicle sits exactly at `position`
    pub fn has_vehicle_at(&self, position: f32) -> bool {
        let index = self.vehicles.partition_point(|(x, _)| x.into_inner() < position);
        self.vehicles
            .get(index)
            .is_some_and(|(x, _)| x.into_inner() == position)
    }

    // ── Metrics ───────────────────────────────────────────────────────────

    /// Vehicles per kilometre
    pub fn density(&self) -> f32 {
        if self.length <= 0.0 {
            return 0.0;
        }
        self.vehicles.len() as f32 / self.length * 1000.0
    }

    /// Mean velocity of the vehicles on the lane (m/s)
    pub fn average_speed(&self, vehicles: &HashMap<VehicleId, SimVehicle>) -> f32 {
        let speeds: Vec<f32> = self
            .vehicle_ids()
            .filter_map(|id| vehicles.get(&id))
            .map(SimVehicle::velocity)
            .collect();
        if speeds.is_empty() {
            return 0.0;
        }
        speeds.iter().sum::<f32>() / speeds.len() as f32
    }

    /// Vehicles per hour: density (veh/km) × mean speed (m/s) × 3.6
    pub fn flow(&self, vehicles: &HashMap<VehicleId, SimVehicle>) -> f32 {
        if self.vehicles.is_empty() {
            return 0.0;
        }
        self.density() * self.average_speed(vehicles) * 3.6
    }

    // ── Geometry ──────────────────────────────────────────────────────────

    /// Locate `distance` on the centerline polyline. Returns the segment
    /// index and the fraction along it.
    fn locate(&self, distance: f32) -> (usize, f32) {
        let segments = self.coordinates.len().saturating_sub(1);
        if segments == 0 {
            return (0, 0.0);
        }
        let total: f32 = self
            .coordinates
            .windows(2)
            .map(|pair| pair[0].distance(&pair[1]))
            .sum();
        if total <= 0.0 || self.length <= 0.0 {
            return (0, 0.0);
        }

        let mut remaining = (distance / self.length).clamp(0.0, 1.0) * total;
        for (index, pair) in self.coordinates.windows(2).enumerate() {
            let segment_length = pair[0].distance(&pair[1]);
            if remaining <= segment_length || index == segments - 1 {
                let t = if segment_length > 0.0 {
                    (remaining / segment_length).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                return (index, t);
            }
            remaining -= segment_length;
        }
        (segments - 1, 1.0)
    }

    /// World coordinate of the point `distance` meters along the lane
    pub fn coordinate_at_distance(&self, distance: f32) -> Coordinate {
        let Some(first) = self.coordinates.first() else {
            return Coordinate::default();
        };
        if self.coordinates.len() < 2 {
            return *first;
        }
        let (index, t) = self.locate(distance);
        self.coordinates[index].lerp(&self.coordinates[index + 1], t)
    }

    /// Heading of the lane (radians) at `distance` meters along it
    pub fn heading_at_distance(&self, distance: f32) -> f32 {
        if self.coordinates.len() < 2 {
            return 0.0;
        }
        let (index, _) = self.locate(distance);
        self.coordinates[index].heading_to(&self.coordinates[index + 1])
    }
}
