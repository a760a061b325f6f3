//! Spatial operations: H3-based geographic indexing and distance calculations.
//!
//! This module provides:
//!
//! - **GeoIndex**: Wrapper for H3 resolution configuration
//! - **Distance calculations**: Haversine distance between H3 cells, LRU-cached
//! - **CellBuckets**: cell → entity bucket index with ring-expansion nearest
//! - **SpatialIndex**: the vehicle-side and request-side buckets as one resource
//!
//! Default resolution is 9 (~240m cell size), suitable for city-scale fleets.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};

use bevy_ecs::prelude::{Entity, Resource};
use h3o::{CellIndex, Resolution};
use lru::LruCache;

#[derive(Debug, Clone, Copy)]
pub struct GeoIndex {
    resolution: Resolution,
}

impl GeoIndex {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn grid_disk(&self, origin: CellIndex, k: u32) -> Vec<CellIndex> {
        debug_assert_eq!(
            origin.resolution(),
            self.resolution,
            "origin resolution must match GeoIndex resolution"
        );
        origin.grid_disk::<Vec<_>>(k)
    }
}

impl Default for GeoIndex {
    fn default() -> Self {
        Self {
            resolution: Resolution::Nine,
        }
    }
}

/// Uncached distance calculation (internal use).
fn distance_km_between_cells_uncached(a: CellIndex, b: CellIndex) -> f64 {
    let a: h3o::LatLng = a.into();
    let b: h3o::LatLng = b.into();
    let (lat1, lon1) = (a.lat().to_radians(), a.lng().to_radians());
    let (lat2, lon2) = (b.lat().to_radians(), b.lng().to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    6371.0 * c
}

/// Global distance cache (50,000 entries, ~800KB memory).
fn get_distance_cache() -> &'static Mutex<LruCache<(CellIndex, CellIndex), f64>> {
    static CACHE: OnceLock<Mutex<LruCache<(CellIndex, CellIndex), f64>>> = OnceLock::new();
    CACHE.get_or_init(|| {
        Mutex::new(LruCache::new(
            NonZeroUsize::new(50_000).expect("cache size must be non-zero"),
        ))
    })
}

/// Calculate distance between two H3 cells with LRU caching.
pub fn distance_km_between_cells(a: CellIndex, b: CellIndex) -> f64 {
    // Use symmetric key (smaller cell first) to maximize cache hits
    let key = if a < b { (a, b) } else { (b, a) };

    let mut cache = match get_distance_cache().lock() {
        Ok(guard) => guard,
        // Fallback: compute without cache if mutex poisoned
        Err(_) => return distance_km_between_cells_uncached(key.0, key.1),
    };

    *cache.get_or_insert(key, || distance_km_between_cells_uncached(key.0, key.1))
}

/// Grid disk cache for nearest-neighbour ring expansion.
struct GridDiskCache {
    cache: Mutex<LruCache<(CellIndex, u32), Vec<CellIndex>>>,
}

impl GridDiskCache {
    fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(1_000).expect("cache size must be non-zero"),
            )),
        }
    }

    fn get_or_compute(&self, origin: CellIndex, k: u32) -> Vec<CellIndex> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(_) => return origin.grid_disk::<Vec<_>>(k),
        };
        cache
            .get_or_insert((origin, k), || origin.grid_disk::<Vec<_>>(k))
            .clone()
    }
}

static GRID_DISK_CACHE: OnceLock<GridDiskCache> = OnceLock::new();

/// Get grid disk with caching.
pub fn grid_disk_cached(origin: CellIndex, k: u32) -> Vec<CellIndex> {
    GRID_DISK_CACHE
        .get_or_init(GridDiskCache::new)
        .get_or_compute(origin, k)
}

/// Bucket index over one side of the fleet (vehicles or requests).
///
/// Maintains cell → entity buckets plus the reverse mapping so that online
/// insert/remove stays O(1) amortized at control-loop frequency. Nearest
/// queries expand grid disks ring by ring instead of scanning all entities.
#[derive(Debug, Clone, Default)]
pub struct CellBuckets {
    by_cell: HashMap<CellIndex, Vec<Entity>>,
    cell_of: HashMap<Entity, CellIndex>,
}

impl CellBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity at the given cell, relocating it if already present.
    pub fn insert(&mut self, entity: Entity, cell: CellIndex) {
        if let Some(old) = self.cell_of.get(&entity).copied() {
            if old == cell {
                return;
            }
            self.detach(entity, old);
        }
        self.by_cell.entry(cell).or_default().push(entity);
        self.cell_of.insert(entity, cell);
    }

    /// Remove an entity. Absent entities are a no-op; returns whether the
    /// entity was present (cancellation can race a match within one step).
    pub fn remove(&mut self, entity: Entity) -> bool {
        match self.cell_of.remove(&entity) {
            Some(cell) => {
                self.detach(entity, cell);
                true
            }
            None => false,
        }
    }

    fn detach(&mut self, entity: Entity, cell: CellIndex) {
        if let Some(entities) = self.by_cell.get_mut(&cell) {
            entities.retain(|&e| e != entity);
            if entities.is_empty() {
                self.by_cell.remove(&cell);
            }
        }
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.cell_of.contains_key(&entity)
    }

    pub fn cell_of(&self, entity: Entity) -> Option<CellIndex> {
        self.cell_of.get(&entity).copied()
    }

    pub fn len(&self) -> usize {
        self.cell_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cell_of.is_empty()
    }

    /// All entities located in the given cells, in bucket insertion order.
    pub fn in_cells(&self, cells: &[CellIndex]) -> Vec<Entity> {
        let mut result = Vec::new();
        for cell in cells {
            if let Some(entities) = self.by_cell.get(cell) {
                result.extend(entities.iter().copied());
            }
        }
        result
    }

    /// Nearest entity to `origin` within `max_k` grid-disk rings, by haversine
    /// distance among the first non-empty ring. Ties keep the first candidate
    /// in bucket order. Returns `None` on an empty index or when nothing lies
    /// within the expansion bound.
    pub fn nearest(&self, origin: CellIndex, max_k: u32) -> Option<(Entity, CellIndex)> {
        if self.is_empty() {
            return None;
        }
        for k in 0..=max_k {
            let disk = grid_disk_cached(origin, k);
            let mut best: Option<(Entity, CellIndex, f64)> = None;
            for cell in &disk {
                let Some(entities) = self.by_cell.get(cell) else {
                    continue;
                };
                let d = distance_km_between_cells(origin, *cell);
                for &entity in entities {
                    if best.map_or(true, |(_, _, best_d)| d < best_d) {
                        best = Some((entity, *cell, d));
                    }
                }
            }
            if let Some((entity, cell, _)) = best {
                return Some((entity, cell));
            }
        }
        None
    }
}

/// Spatial index resource: one bucket index per side of the matching problem.
#[derive(Debug, Default, Resource)]
pub struct SpatialIndex {
    vehicles: CellBuckets,
    requests: CellBuckets,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vehicles(&self) -> &CellBuckets {
        &self.vehicles
    }

    pub fn vehicles_mut(&mut self) -> &mut CellBuckets {
        &mut self.vehicles
    }

    pub fn requests(&self) -> &CellBuckets {
        &self.requests
    }

    pub fn requests_mut(&mut self) -> &mut CellBuckets {
        &mut self.requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{test_cell, test_distant_cell, test_neighbor_cell};

    fn entity(index: u32) -> Entity {
        Entity::from_raw(index)
    }

    #[test]
    fn insert_remove_contains() {
        let mut buckets = CellBuckets::new();
        buckets.insert(entity(1), test_cell());
        assert!(buckets.contains(entity(1)));
        assert_eq!(buckets.cell_of(entity(1)), Some(test_cell()));

        assert!(buckets.remove(entity(1)));
        assert!(!buckets.contains(entity(1)));
        assert!(!buckets.remove(entity(1)), "second remove is a no-op");
    }

    #[test]
    fn insert_relocates_an_existing_entity() {
        let mut buckets = CellBuckets::new();
        buckets.insert(entity(1), test_cell());
        buckets.insert(entity(1), test_neighbor_cell());

        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets.cell_of(entity(1)), Some(test_neighbor_cell()));
        assert!(buckets.in_cells(&[test_cell()]).is_empty());
    }

    #[test]
    fn nearest_prefers_the_closer_candidate() {
        let mut buckets = CellBuckets::new();
        buckets.insert(entity(1), test_distant_cell());
        buckets.insert(entity(2), test_neighbor_cell());

        let (found, _) = buckets.nearest(test_cell(), 5).expect("candidate within 5 rings");
        assert_eq!(found, entity(2));
    }

    #[test]
    fn nearest_on_empty_index_is_none() {
        let buckets = CellBuckets::new();
        assert!(buckets.nearest(test_cell(), 10).is_none());
    }

    #[test]
    fn nearest_respects_the_expansion_bound() {
        let mut buckets = CellBuckets::new();
        buckets.insert(entity(1), test_distant_cell());
        assert!(buckets.nearest(test_cell(), 0).is_none());
        assert!(buckets.nearest(test_cell(), 5).is_some());
    }
}
