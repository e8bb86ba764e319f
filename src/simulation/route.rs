//! Routes through the lane network

use super::types::{LaneId, RouteId};

/// An ordered lane sequence plus a cursor that only moves forward
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub id: RouteId,
    lane_sequence: Vec<LaneId>,
    current_index: usize,
}

impl Route {
    pub fn new(id: RouteId, lane_sequence: Vec<LaneId>) -> Self {
        Self {
            id,
            lane_sequence,
            current_index: 0,
        }
    }

    pub fn lane_sequence(&self) -> &[LaneId] {
        &self.lane_sequence
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// The lane the route is currently heading for, if any remain
    pub fn current_target(&self) -> Option<LaneId> {
        self.lane_sequence.get(self.current_index).copied()
    }

    /// Move the cursor one lane forward, saturating at the sequence length
    pub fn advance(&mut self) {
        if self.current_index < self.lane_sequence.len() {
            self.current_index += 1;
        }
    }

    /// Advance if `lane` is the current target.
    /// Returns true when the cursor moved.
    pub fn on_lane_left(&mut self, lane: LaneId) -> bool {
        if self.current_target() == Some(lane) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current_index >= self.lane_sequence.len()
    }
}
