//! Greedy nearest-neighbour matching for imbalanced large-n control steps.
//!
//! Builds a bucket index over the larger side, iterates the smaller side and
//! pairs each element with its nearest remaining counterpart, removing both
//! on match. O(n · disk) instead of the exact matcher's O(n³).

use bevy_ecs::prelude::Entity;
use h3o::CellIndex;

use crate::spatial::CellBuckets;

use super::types::MatchResult;

/// Pair requests with vehicles by nearest-neighbour lookup.
///
/// Elements of the smaller side with no counterpart within `max_radius_k`
/// grid-disk rings stay unmatched. Empty inputs yield an empty mapping.
pub fn greedy_nearest_assignment(
    requests: &[(Entity, CellIndex)],
    vehicles: &[(Entity, CellIndex)],
    max_radius_k: u32,
) -> Vec<MatchResult> {
    if requests.is_empty() || vehicles.is_empty() {
        return Vec::new();
    }

    let requests_drive = requests.len() <= vehicles.len();
    let (smaller, larger) = if requests_drive {
        (requests, vehicles)
    } else {
        (vehicles, requests)
    };

    let mut remaining = CellBuckets::new();
    for &(entity, cell) in larger {
        remaining.insert(entity, cell);
    }

    let mut results = Vec::new();
    for &(entity, cell) in smaller {
        let Some((counterpart, _)) = remaining.nearest(cell, max_radius_k) else {
            continue;
        };
        remaining.remove(counterpart);
        results.push(if requests_drive {
            MatchResult {
                request: entity,
                vehicle: counterpart,
            }
        } else {
            MatchResult {
                request: counterpart,
                vehicle: entity,
            }
        });
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{test_cell, test_distant_cell, test_neighbor_cell};

    fn entity(index: u32) -> Entity {
        Entity::from_raw(index)
    }

    #[test]
    fn empty_sides_yield_no_matches() {
        let some = [(entity(1), test_cell())];
        assert!(greedy_nearest_assignment(&[], &some, 5).is_empty());
        assert!(greedy_nearest_assignment(&some, &[], 5).is_empty());
    }

    #[test]
    fn pairs_each_request_with_its_nearest_vehicle() {
        let requests = [(entity(1), test_cell())];
        let vehicles = [
            (entity(10), test_distant_cell()),
            (entity(11), test_neighbor_cell()),
        ];
        let matches = greedy_nearest_assignment(&requests, &vehicles, 5);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].request, entity(1));
        assert_eq!(matches[0].vehicle, entity(11));
    }

    #[test]
    fn a_matched_vehicle_is_not_reused() {
        let requests = [(entity(1), test_cell()), (entity(2), test_cell())];
        let vehicles = [(entity(10), test_neighbor_cell())];
        // vehicles side is smaller, so it drives the iteration
        let matches = greedy_nearest_assignment(&requests, &vehicles, 5);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].vehicle, entity(10));
    }

    #[test]
    fn radius_bound_excludes_distant_candidates() {
        let requests = [(entity(1), test_cell())];
        let vehicles = [(entity(10), test_distant_cell())];
        assert!(greedy_nearest_assignment(&requests, &vehicles, 0).is_empty());
        assert_eq!(greedy_nearest_assignment(&requests, &vehicles, 5).len(), 1);
    }
}
