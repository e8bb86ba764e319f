//! The lane arena: lanes addressed by id, link consistency, neighbor lookup,
//! lane-change safety, and route search.

use anyhow::{bail, Context, Result};
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use super::lane::SimLane;
use super::types::{LaneId, LaneSide, VehicleId};
use super::vehicle::{SimVehicle, Surroundings};

/// Edge data for the lane graph used by route search
#[derive(Debug, Clone, Copy)]
pub struct LaneEdge {
    pub weight: u32,
}

impl LaneEdge {
    /// Following a lane downstream costs its length
    pub fn downstream(lane: &SimLane) -> Self {
        let weight = (lane.length * 100.0) as u32;
        Self {
            weight: weight.max(1),
        }
    }

    /// Changing lane costs the lateral distance crossed
    pub fn lateral(lane: &SimLane) -> Self {
        let weight = (lane.width * 100.0) as u32;
        Self {
            weight: weight.max(1),
        }
    }
}

/// Owns every lane of the network
#[derive(Debug, Default)]
pub struct SimLaneNetwork {
    lanes: HashMap<LaneId, SimLane>,

    /// Route search graph, rebuilt lazily after topology changes
    graph: DiGraph<LaneId, LaneEdge>,

    /// Maps lane IDs to their node indices in the graph
    lane_to_node: HashMap<LaneId, NodeIndex>,

    graph_dirty: bool,

    /// Cached route search results
    path_cache: HashMap<LaneId, HashMap<LaneId, Vec<LaneId>>>,
}

impl SimLaneNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn topology_changed(&mut self) {
        self.graph_dirty = true;
        self.path_cache.clear();
    }

    /// Adds a lane. Its links are ignored; use [`SimLaneNetwork::connect`].
    pub fn add_lane(&mut self, mut lane: SimLane) -> Result<LaneId> {
        lane.validate()?;
        if self.lanes.contains_key(&lane.id) {
            bail!("Lane {:?} already exists", lane.id);
        }
        for side in [
            LaneSide::Upstream,
            LaneSide::Downstream,
            LaneSide::Left,
            LaneSide::Right,
        ] {
            lane.set_link(side, None);
        }
        let id = lane.id;
        self.lanes.insert(id, lane);
        self.topology_changed();
        Ok(id)
    }

    /// Removes a lane and every link pointing at it.
    /// The returned lane still lists the vehicles that were on it.
    pub fn remove_lane(&mut self, lane_id: LaneId) -> Result<SimLane> {
        let lane = self.lanes.remove(&lane_id).context("Lane not found")?;
        for other in self.lanes.values_mut() {
            other.unlink(lane_id);
        }
        self.topology_changed();
        Ok(lane)
    }

    pub fn get_lane(&self, lane_id: LaneId) -> Option<&SimLane> {
        self.lanes.get(&lane_id)
    }

    pub fn get_lane_mut(&mut self, lane_id: LaneId) -> Option<&mut SimLane> {
        self.lanes.get_mut(&lane_id)
    }

    pub fn contains_lane(&self, lane_id: LaneId) -> bool {
        self.lanes.contains_key(&lane_id)
    }

    pub fn lanes(&self) -> impl Iterator<Item = &SimLane> {
        self.lanes.values()
    }

    /// Lane ids in ascending order
    pub fn lane_ids(&self) -> Vec<LaneId> {
        let mut ids: Vec<LaneId> = self.lanes.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn clear(&mut self) {
        self.lanes.clear();
        self.topology_changed();
    }

    /// Link `lane_id`'s `side` to `other_id` and point `other_id` back.
    ///
    /// Any stale reciprocal link left behind by the previous neighbors on
    /// either end is cleared so links always come in matching pairs.
    pub fn connect(&mut self, lane_id: LaneId, side: LaneSide, other_id: LaneId) -> Result<()> {
        if lane_id == other_id {
            bail!("Lane {:?} cannot be linked to itself", lane_id);
        }
        let previous = self
            .lanes
            .get(&lane_id)
            .with_context(|| format!("Lane {:?} not found", lane_id))?
            .link(side);
        let other_previous = self
            .lanes
            .get(&other_id)
            .with_context(|| format!("Lane {:?} not found", other_id))?
            .link(side.opposite());

        if let Some(previous) = previous.filter(|id| *id != other_id) {
            if let Some(lane) = self.lanes.get_mut(&previous) {
                if lane.link(side.opposite()) == Some(lane_id) {
                    lane.set_link(side.opposite(), None);
                }
            }
        }
        if let Some(other_previous) = other_previous.filter(|id| *id != lane_id) {
            if let Some(lane) = self.lanes.get_mut(&other_previous) {
                if lane.link(side) == Some(other_id) {
                    lane.set_link(side, None);
                }
            }
        }

        if let Some(lane) = self.lanes.get_mut(&lane_id) {
            lane.set_link(side, Some(other_id));
        }
        if let Some(other) = self.lanes.get_mut(&other_id) {
            other.set_link(side.opposite(), Some(lane_id));
        }
        self.topology_changed();
        Ok(())
    }

    /// Remove the link on `side` of `lane_id` together with its reciprocal
    pub fn disconnect(&mut self, lane_id: LaneId, side: LaneSide) -> Result<()> {
        let lane = self
            .lanes
            .get_mut(&lane_id)
            .with_context(|| format!("Lane {:?} not found", lane_id))?;
        let Some(other_id) = lane.link(side) else {
            return Ok(());
        };
        lane.set_link(side, None);
        if let Some(other) = self.lanes.get_mut(&other_id) {
            if other.link(side.opposite()) == Some(lane_id) {
                other.set_link(side.opposite(), None);
            }
        }
        self.topology_changed();
        Ok(())
    }

    /// Neighbor slots for a vehicle at `x` on `lane_id`
    pub fn surroundings_at(&self, lane_id: LaneId, x: f32) -> Surroundings {
        let mut surroundings = Surroundings::default();
        let Some(lane) = self.lanes.get(&lane_id) else {
            return surroundings;
        };
        surroundings.front = lane.leading_vehicle(x).map(|(_, id)| id);
        surroundings.back = lane.following_vehicle(x).map(|(_, id)| id);

        if let Some(left) = lane.left_lane().and_then(|id| self.lanes.get(&id)) {
            surroundings.left_front = left.leading_vehicle(x).map(|(_, id)| id);
            surroundings.left_back = left.following_vehicle(x).map(|(_, id)| id);
        }
        if let Some(right) = lane.right_lane().and_then(|id| self.lanes.get(&id)) {
            surroundings.right_front = right.leading_vehicle(x).map(|(_, id)| id);
            surroundings.right_back = right.following_vehicle(x).map(|(_, id)| id);
        }
        surroundings
    }

    /// Neighbor slots for every vehicle on `lane_id`, in lane order
    pub fn update_vehicle_surroundings(&self, lane_id: LaneId) -> Vec<(VehicleId, Surroundings)> {
        let Some(lane) = self.lanes.get(&lane_id) else {
            return Vec::new();
        };
        lane.vehicle_positions()
            .map(|(x, id)| (id, self.surroundings_at(lane_id, x)))
            .collect()
    }

    /// Whether `vehicle` may move into `target_lane` at its current position.
    ///
    /// Fails when the prospective leader's rear or the prospective follower's
    /// front is closer than `min_gap`, or when a vehicle sits level with it.
    pub fn is_safe_lane_change(
        &self,
        vehicle: &SimVehicle,
        target_lane: LaneId,
        min_gap: f32,
        vehicles: &HashMap<VehicleId, SimVehicle>,
    ) -> bool {
        let Some(target) = self.lanes.get(&target_lane) else {
            return false;
        };
        let position = vehicle.x();

        if target.has_vehicle_at(position) {
            return false;
        }

        if let Some((leader_x, leader_id)) = target.leading_vehicle(position) {
            let leader_length = vehicles.get(&leader_id).map_or(0.0, |v| v.length);
            if leader_x - leader_length - position < min_gap {
                return false;
            }
        }

        if let Some((follower_x, _)) = target.following_vehicle(position) {
            if position - vehicle.length - follower_x < min_gap {
                return false;
            }
        }

        true
    }

    fn rebuild_graph(&mut self) {
        self.graph.clear();
        self.lane_to_node.clear();

        for lane_id in self.lane_ids() {
            let node = self.graph.add_node(lane_id);
            self.lane_to_node.insert(lane_id, node);
        }

        for lane in self.lanes.values() {
            let from = self.lane_to_node[&lane.id];
            if let Some(next) = lane.downstream_lane() {
                if let Some(&to) = self.lane_to_node.get(&next) {
                    self.graph.add_edge(from, to, LaneEdge::downstream(lane));
                }
            }
            for neighbor in [lane.left_lane(), lane.right_lane()].into_iter().flatten() {
                if let Some(&to) = self.lane_to_node.get(&neighbor) {
                    self.graph.add_edge(from, to, LaneEdge::lateral(lane));
                }
            }
        }

        self.graph_dirty = false;
    }

    /// Finds a lane sequence from `start` to `end` (both included) following
    /// downstream and lateral links, using A* with a null heuristic
    pub fn find_route(&mut self, start: LaneId, end: LaneId) -> Option<Vec<LaneId>> {
        if !self.lanes.contains_key(&start) || !self.lanes.contains_key(&end) {
            return None;
        }
        if start == end {
            return Some(vec![start]);
        }

        if let Some(path) = self.path_cache.get(&start).and_then(|paths| paths.get(&end)) {
            return Some(path.clone());
        }

        if self.graph_dirty || self.lane_to_node.len() != self.lanes.len() {
            self.rebuild_graph();
        }

        let start_node = *self.lane_to_node.get(&start)?;
        let end_node = *self.lane_to_node.get(&end)?;

        let (_, node_path) = astar(
            &self.graph,
            start_node,
            |node| node == end_node,
            |edge| edge.weight().weight,
            |_| 0,
        )?;

        let path: Vec<LaneId> = node_path
            .iter()
            .filter_map(|node| self.graph.node_weight(*node).copied())
            .collect();

        self.path_cache
            .entry(start)
            .or_default()
            .insert(end, path.clone());

        Some(path)
    }
}
