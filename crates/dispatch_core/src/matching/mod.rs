pub mod greedy;
pub mod hungarian;
pub mod strategy;
pub mod types;

pub use greedy::greedy_nearest_assignment;
pub use hungarian::min_cost_assignment;
pub use strategy::{DispatchStrategies, ExactAssignment, GreedyNearest, RedispatchStrategy};
pub use types::MatchResult;
