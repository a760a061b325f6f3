//! Interchangeable redispatch strategies, selected at configuration time.

use bevy_ecs::prelude::{Entity, Resource};
use h3o::CellIndex;

use crate::error::AssignmentError;
use crate::spatial::distance_km_between_cells;

use super::greedy::greedy_nearest_assignment;
use super::hungarian::min_cost_assignment;
use super::types::MatchResult;

/// Capability interface over request/vehicle matching policies.
pub trait RedispatchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pair open requests with divertable vehicles. Both slices carry the
    /// caller's iteration order, which fixes tie-breaking.
    fn assign(
        &self,
        requests: &[(Entity, CellIndex)],
        vehicles: &[(Entity, CellIndex)],
    ) -> Result<Vec<MatchResult>, AssignmentError>;
}

/// Exact minimum-cost assignment over haversine pickup distance.
#[derive(Debug, Default)]
pub struct ExactAssignment;

impl RedispatchStrategy for ExactAssignment {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn assign(
        &self,
        requests: &[(Entity, CellIndex)],
        vehicles: &[(Entity, CellIndex)],
    ) -> Result<Vec<MatchResult>, AssignmentError> {
        let pairs = min_cost_assignment(requests, vehicles, |&(_, req), &(_, veh)| {
            distance_km_between_cells(req, veh)
        })?;
        Ok(pairs
            .into_iter()
            .map(|(r, v)| MatchResult {
                request: requests[r].0,
                vehicle: vehicles[v].0,
            })
            .collect())
    }
}

/// Nearest-neighbour matching bounded by a grid-disk expansion radius.
#[derive(Debug)]
pub struct GreedyNearest {
    pub max_radius_k: u32,
}

impl RedispatchStrategy for GreedyNearest {
    fn name(&self) -> &'static str {
        "greedy-nearest"
    }

    fn assign(
        &self,
        requests: &[(Entity, CellIndex)],
        vehicles: &[(Entity, CellIndex)],
    ) -> Result<Vec<MatchResult>, AssignmentError> {
        Ok(greedy_nearest_assignment(requests, vehicles, self.max_radius_k))
    }
}

/// Resource holding the configured strategies and the fleet-size cutoff
/// between them.
#[derive(Resource)]
pub struct DispatchStrategies {
    exact_below_fleet_size: usize,
    exact: Box<dyn RedispatchStrategy>,
    greedy: Box<dyn RedispatchStrategy>,
}

impl DispatchStrategies {
    pub fn new(
        exact_below_fleet_size: usize,
        exact: Box<dyn RedispatchStrategy>,
        greedy: Box<dyn RedispatchStrategy>,
    ) -> Self {
        Self {
            exact_below_fleet_size,
            exact,
            greedy,
        }
    }

    /// Exact matching while the registered fleet is small enough for O(n³)
    /// at control-loop frequency; greedy otherwise.
    pub fn select(&self, fleet_size: usize) -> &dyn RedispatchStrategy {
        if fleet_size < self.exact_below_fleet_size {
            self.exact.as_ref()
        } else {
            self.greedy.as_ref()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{test_cell, test_neighbor_cell};

    fn entity(index: u32) -> Entity {
        Entity::from_raw(index)
    }

    #[test]
    fn cutoff_selects_between_strategies() {
        let strategies = DispatchStrategies::new(
            10,
            Box::new(ExactAssignment),
            Box::new(GreedyNearest { max_radius_k: 5 }),
        );
        assert_eq!(strategies.select(3).name(), "exact");
        assert_eq!(strategies.select(10).name(), "greedy-nearest");
    }

    #[test]
    fn exact_strategy_matches_all_of_the_smaller_side() {
        let requests = [(entity(1), test_cell())];
        let vehicles = [
            (entity(10), test_cell()),
            (entity(11), test_neighbor_cell()),
        ];
        let matches = ExactAssignment
            .assign(&requests, &vehicles)
            .expect("assignment");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].vehicle, entity(10), "zero-distance vehicle wins");
    }
}
