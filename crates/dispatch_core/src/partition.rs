//! Static decomposition of the service area into a grid of blocks.
//!
//! Built once at startup from the bounding footprint and a rows × cols
//! granularity. Every location inside the footprint resolves to exactly one
//! block in O(1); construction fails with [`PartitionError`] when a sampled
//! block centroid does not resolve back to its own block (the chosen H3
//! resolution is too coarse for the grid).

use h3o::{CellIndex, LatLng, Resolution};

use crate::config::ServiceAreaBounds;
use crate::error::PartitionError;

/// Index of a block in the partition arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// Lat/lng envelope of one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockBounds {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lng_min: f64,
    pub lng_max: f64,
}

impl BlockBounds {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lng >= self.lng_min && lng <= self.lng_max
    }
}

/// One cell of the partition. Static for the simulation lifetime; the
/// per-cycle counters live in the rebalancing engine's arena, indexed by
/// [`BlockId`].
#[derive(Debug, Clone, Copy)]
pub struct Block {
    id: BlockId,
    bounds: BlockBounds,
    centroid: CellIndex,
}

impl Block {
    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn bounds(&self) -> &BlockBounds {
        &self.bounds
    }

    /// Envelope centre snapped to an H3 cell; used as the reposition target.
    pub fn centroid(&self) -> CellIndex {
        self.centroid
    }
}

#[derive(Debug, Clone)]
pub struct ServiceAreaPartition {
    rows: usize,
    cols: usize,
    area: ServiceAreaBounds,
    lat_step: f64,
    lng_step: f64,
    blocks: Vec<Block>,
    adjacency: Vec<Vec<BlockId>>,
}

impl ServiceAreaPartition {
    pub fn new(
        area: ServiceAreaBounds,
        rows: usize,
        cols: usize,
        resolution: Resolution,
    ) -> Result<Self, PartitionError> {
        if rows == 0 || cols == 0 {
            return Err(PartitionError::EmptyGrid { rows, cols });
        }
        if area.is_degenerate() {
            return Err(PartitionError::InvalidBounds(format!(
                "({}, {})..({}, {})",
                area.lat_min, area.lng_min, area.lat_max, area.lng_max
            )));
        }

        let lat_step = (area.lat_max - area.lat_min) / rows as f64;
        let lng_step = (area.lng_max - area.lng_min) / cols as f64;

        let mut blocks = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                let bounds = BlockBounds {
                    lat_min: area.lat_min + row as f64 * lat_step,
                    lat_max: area.lat_min + (row + 1) as f64 * lat_step,
                    lng_min: area.lng_min + col as f64 * lng_step,
                    lng_max: area.lng_min + (col + 1) as f64 * lng_step,
                };
                let centre_lat = (bounds.lat_min + bounds.lat_max) * 0.5;
                let centre_lng = (bounds.lng_min + bounds.lng_max) * 0.5;
                let centroid = LatLng::new(centre_lat, centre_lng)
                    .map_err(|e| PartitionError::InvalidBounds(e.to_string()))?
                    .to_cell(resolution);
                blocks.push(Block {
                    id: BlockId(row * cols + col),
                    bounds,
                    centroid,
                });
            }
        }

        // Moore neighbourhood: all surrounding cells, diagonals included.
        let mut adjacency = vec![Vec::new(); rows * cols];
        for row in 0..rows {
            for col in 0..cols {
                let id = row * cols + col;
                for dr in -1i64..=1 {
                    for dc in -1i64..=1 {
                        if dr == 0 && dc == 0 {
                            continue;
                        }
                        let nr = row as i64 + dr;
                        let nc = col as i64 + dc;
                        if nr < 0 || nc < 0 || nr >= rows as i64 || nc >= cols as i64 {
                            continue;
                        }
                        adjacency[id].push(BlockId((nr * cols as i64 + nc) as usize));
                    }
                }
            }
        }

        let partition = Self {
            rows,
            cols,
            area,
            lat_step,
            lng_step,
            blocks,
            adjacency,
        };

        // Consistency check: every block centroid, snapped to its H3 cell,
        // must resolve back to its own block.
        for block in &partition.blocks {
            let resolved = partition.block_for(block.centroid)?;
            if resolved != block.id {
                return Err(PartitionError::Inconsistent { block: block.id.0 });
            }
        }

        Ok(partition)
    }

    /// Resolves a location to its block in O(1).
    pub fn block_for(&self, cell: CellIndex) -> Result<BlockId, PartitionError> {
        let coord: LatLng = cell.into();
        self.block_for_coord(coord.lat(), coord.lng())
    }

    pub fn block_for_coord(&self, lat: f64, lng: f64) -> Result<BlockId, PartitionError> {
        if !self.area.contains(lat, lng) {
            return Err(PartitionError::OutOfArea { lat, lng });
        }
        // The upper boundary belongs to the last row/column.
        let row = (((lat - self.area.lat_min) / self.lat_step) as usize).min(self.rows - 1);
        let col = (((lng - self.area.lng_min) / self.lng_step) as usize).min(self.cols - 1);
        Ok(BlockId(row * self.cols + col))
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn all_blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn adjacent(&self, id: BlockId) -> &[BlockId] {
        &self.adjacency[id.0]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_bounds;

    fn partition(rows: usize, cols: usize) -> ServiceAreaPartition {
        ServiceAreaPartition::new(test_bounds(), rows, cols, Resolution::Nine)
            .expect("valid partition")
    }

    #[test]
    fn every_centroid_resolves_to_its_own_block() {
        let partition = partition(4, 5);
        assert_eq!(partition.len(), 20);
        for block in partition.all_blocks() {
            let resolved = partition.block_for(block.centroid()).expect("inside footprint");
            assert_eq!(resolved, block.id());
        }
    }

    #[test]
    fn adjacency_counts_match_grid_position() {
        let partition = partition(3, 3);
        // corner, edge, interior
        assert_eq!(partition.adjacent(BlockId(0)).len(), 3);
        assert_eq!(partition.adjacent(BlockId(1)).len(), 5);
        assert_eq!(partition.adjacent(BlockId(4)).len(), 8);
    }

    #[test]
    fn diagonal_blocks_are_adjacent() {
        let partition = partition(2, 2);
        assert!(partition.adjacent(BlockId(0)).contains(&BlockId(3)));
    }

    #[test]
    fn empty_grid_is_rejected() {
        let result = ServiceAreaPartition::new(test_bounds(), 0, 3, Resolution::Nine);
        assert_eq!(result.err(), Some(PartitionError::EmptyGrid { rows: 0, cols: 3 }));
    }

    #[test]
    fn degenerate_bounds_are_rejected() {
        let bounds = ServiceAreaBounds {
            lat_min: 37.0,
            lat_max: 37.0,
            lng_min: -122.0,
            lng_max: -121.0,
        };
        let result = ServiceAreaPartition::new(bounds, 2, 2, Resolution::Nine);
        assert!(matches!(result, Err(PartitionError::InvalidBounds(_))));
    }

    #[test]
    fn out_of_area_lookup_fails() {
        let partition = partition(2, 2);
        let result = partition.block_for_coord(0.0, 0.0);
        assert!(matches!(result, Err(PartitionError::OutOfArea { .. })));
    }
}
