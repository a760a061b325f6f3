use bevy_ecs::prelude::Entity;

/// One request/vehicle pairing produced by a matching pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub request: Entity,
    pub vehicle: Entity,
}
