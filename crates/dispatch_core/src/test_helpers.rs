//! Test helpers for common test setup and utilities.
//!
//! Shared across unit tests and benches to reduce duplication.

use h3o::CellIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::ServiceAreaBounds;

/// A standard test cell used across test files for consistency.
/// This is a valid H3 cell in the San Francisco Bay Area.
pub const TEST_CELL: u64 = 0x8a1fb46622dffff;

/// Get the test cell as a `CellIndex`.
///
/// # Panics
///
/// Panics if the test cell constant is invalid (should never happen).
pub fn test_cell() -> CellIndex {
    CellIndex::try_from(TEST_CELL).expect("TEST_CELL should be a valid H3 cell")
}

/// Get a neighbor cell of the test cell.
///
/// # Panics
///
/// Panics if no neighbor can be found (should never happen with a valid test cell).
pub fn test_neighbor_cell() -> CellIndex {
    test_cell()
        .grid_disk::<Vec<_>>(1)
        .into_iter()
        .find(|c| test_cell().grid_distance(*c) == Ok(1))
        .expect("test cell should have neighbors")
}

/// Get a distant cell from the test cell.
///
/// # Panics
///
/// Panics if no distant cell can be found (should never happen with a valid test cell).
pub fn test_distant_cell() -> CellIndex {
    test_cell()
        .grid_disk::<Vec<_>>(2)
        .into_iter()
        .find(|c| test_cell().grid_distance(*c) == Ok(2))
        .expect("test cell should have distant neighbors")
}

/// Bounding box covering the test cells (San Francisco Bay Area).
pub fn test_bounds() -> ServiceAreaBounds {
    ServiceAreaBounds::default()
}

/// Seeded random cells scattered across the test bounds, for fleet-scale
/// tests and benches.
///
/// # Panics
///
/// Panics if a sampled coordinate is invalid (should never happen inside the
/// test bounds).
pub fn scattered_cells(seed: u64, count: usize) -> Vec<CellIndex> {
    let bounds = test_bounds();
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let lat = rng.gen_range(bounds.lat_min..bounds.lat_max);
            let lng = rng.gen_range(bounds.lng_min..bounds.lng_max);
            h3o::LatLng::new(lat, lng)
                .expect("sampled coordinate should be valid")
                .to_cell(h3o::Resolution::Nine)
        })
        .collect()
}
