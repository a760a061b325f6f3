pub mod clock;
pub mod config;
pub mod controller;
pub mod ecs;
pub mod error;
pub mod matching;
pub mod menu;
pub mod oracle;
pub mod partition;
pub mod rebalancing;
pub mod spatial;
pub mod systems;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;
