//! Travel-time oracle seam to the surrounding simulation.
//!
//! The core never computes routes itself; it asks the oracle and treats
//! failures as transient (skip the affected pair, retry next cycle).

use std::fmt;

use bevy_ecs::prelude::Resource;
use h3o::CellIndex;

use crate::spatial::distance_km_between_cells;

/// Transient oracle failure. Recoverable; never aborts a control step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    Unavailable(String),
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleError::Unavailable(reason) => write!(f, "travel-time oracle unavailable: {reason}"),
        }
    }
}

impl std::error::Error for OracleError {}

/// External travel-time lookup between two locations at a given instant.
pub trait TravelTimeOracle: Send + Sync {
    /// Estimated travel time in seconds.
    fn travel_time(&self, from: CellIndex, to: CellIndex, at: u64) -> Result<f64, OracleError>;
}

/// Straight-line fallback oracle: haversine distance at a constant speed.
#[derive(Debug, Clone, Copy)]
pub struct HaversineOracle {
    speed_kmh: f64,
}

impl HaversineOracle {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }
}

impl Default for HaversineOracle {
    fn default() -> Self {
        Self { speed_kmh: 40.0 }
    }
}

impl TravelTimeOracle for HaversineOracle {
    fn travel_time(&self, from: CellIndex, to: CellIndex, _at: u64) -> Result<f64, OracleError> {
        let distance_km = distance_km_between_cells(from, to);
        Ok(distance_km / self.speed_kmh * 3600.0)
    }
}

/// Resource wrapper for the travel-time oracle trait object.
#[derive(Resource)]
pub struct OracleResource(pub Box<dyn TravelTimeOracle>);

impl OracleResource {
    pub fn new(oracle: Box<dyn TravelTimeOracle>) -> Self {
        Self(oracle)
    }
}

impl std::ops::Deref for OracleResource {
    type Target = dyn TravelTimeOracle;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{test_cell, test_distant_cell};

    #[test]
    fn haversine_oracle_scales_with_distance() {
        let oracle = HaversineOracle::default();
        let same = oracle.travel_time(test_cell(), test_cell(), 0).expect("same cell");
        let far = oracle
            .travel_time(test_cell(), test_distant_cell(), 0)
            .expect("distant cell");
        assert_eq!(same, 0.0);
        assert!(far > 0.0);
    }
}
