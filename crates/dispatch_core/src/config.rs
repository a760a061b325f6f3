//! Configuration surface of the dispatch core.

use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

/// Default bounding box: San Francisco Bay Area (approx).
const DEFAULT_LAT_MIN: f64 = 37.6;
const DEFAULT_LAT_MAX: f64 = 37.85;
const DEFAULT_LNG_MIN: f64 = -122.55;
const DEFAULT_LNG_MAX: f64 = -122.35;

/// Recognized control-loop options. All periods are whole simulation seconds.
#[derive(Debug, Clone, Serialize, Deserialize, Resource)]
#[serde(default)]
pub struct DispatchConfig {
    /// Interval between matching passes.
    pub match_period_secs: u64,
    /// Interval between rebalancing cycles.
    pub rebalance_period_secs: u64,
    /// Blocks whose |balance| is at or below this count are left alone.
    pub min_rebalance_threshold: u32,
    pub block_grid_rows: usize,
    pub block_grid_cols: usize,
    /// Exact (Hungarian) matching is used while the divertable fleet is
    /// smaller than this; greedy nearest-neighbour matching otherwise.
    pub use_exact_matching_below_fleet_size: usize,
    /// Grid-disk expansion bound for the greedy matcher, in H3 cells.
    pub greedy_match_radius_k: u32,
    /// Flows between blocks farther apart than this produce no directives.
    pub max_rebalance_distance_km: Option<f64>,
    /// Retention window for the historical-demand signal.
    pub demand_history_window_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            match_period_secs: 10,
            rebalance_period_secs: 300,
            min_rebalance_threshold: 0,
            block_grid_rows: 10,
            block_grid_cols: 10,
            use_exact_matching_below_fleet_size: 200,
            greedy_match_radius_k: 30,
            max_rebalance_distance_km: None,
            demand_history_window_secs: 3600,
        }
    }
}

/// Lat/lng envelope of the service area the partition is laid over.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServiceAreaBounds {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lng_min: f64,
    pub lng_max: f64,
}

impl ServiceAreaBounds {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lng >= self.lng_min && lng <= self.lng_max
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.lat_min < self.lat_max && self.lng_min < self.lng_max)
            || !self.lat_min.is_finite()
            || !self.lat_max.is_finite()
            || !self.lng_min.is_finite()
            || !self.lng_max.is_finite()
    }
}

impl Default for ServiceAreaBounds {
    fn default() -> Self {
        Self {
            lat_min: DEFAULT_LAT_MIN,
            lat_max: DEFAULT_LAT_MAX,
            lng_min: DEFAULT_LNG_MIN,
            lng_max: DEFAULT_LNG_MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_periods_are_positive() {
        let config = DispatchConfig::default();
        assert!(config.match_period_secs > 0);
        assert!(config.rebalance_period_secs >= config.match_period_secs);
    }

    #[test]
    fn degenerate_bounds_are_detected() {
        let bounds = ServiceAreaBounds {
            lat_min: 1.0,
            lat_max: 1.0,
            lng_min: 0.0,
            lng_max: 2.0,
        };
        assert!(bounds.is_degenerate());
        assert!(!ServiceAreaBounds::default().is_degenerate());
    }
}
