//! Fleet entities: vehicle and request components, external ids, registries.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use bevy_ecs::prelude::{Component, Entity, Resource};
use h3o::CellIndex;

use crate::menu::Menu;

/// External identity of a fleet vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VehicleId(pub u64);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vehicle-{}", self.0)
    }
}

/// External identity of a transportation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request-{}", self.0)
    }
}

/// Request lifecycle. The terminal transitions (dropoff, cancellation)
/// retire the request from the controller, so terminal states are never
/// observable through its lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Unassigned,
    Assigned,
    PickedUp,
    DroppedOff,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Component)]
pub struct Request {
    pub id: RequestId,
    pub origin: CellIndex,
    pub destination: CellIndex,
    pub submitted_at: u64,
    pub state: RequestState,
    pub assigned_vehicle: Option<Entity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Component)]
pub struct Vehicle {
    pub id: VehicleId,
    /// Whether the vehicle may receive a new instruction at this instant.
    pub divertable: bool,
}

/// Current divertable location of a vehicle or origin of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Component)]
pub struct Position(pub CellIndex);

/// The vehicle's current itinerary. Replaced wholesale, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Component)]
pub struct Plan(pub Menu);

/// External id → entity lookup for both sides of the fleet.
#[derive(Debug, Default, Resource)]
pub struct FleetRegistry {
    vehicles: HashMap<VehicleId, Entity>,
    requests: HashMap<RequestId, Entity>,
}

impl FleetRegistry {
    pub fn vehicle(&self, id: VehicleId) -> Option<Entity> {
        self.vehicles.get(&id).copied()
    }

    pub fn request(&self, id: RequestId) -> Option<Entity> {
        self.requests.get(&id).copied()
    }

    pub fn insert_vehicle(&mut self, id: VehicleId, entity: Entity) {
        self.vehicles.insert(id, entity);
    }

    pub fn insert_request(&mut self, id: RequestId, entity: Entity) {
        self.requests.insert(id, entity);
    }

    pub fn remove_request(&mut self, id: RequestId) -> Option<Entity> {
        self.requests.remove(&id)
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }
}

/// Recent request origins, the historical-demand signal for rebalancing.
///
/// A ring of (submission time, origin cell) samples; `prune` drops everything
/// older than the configured retention window at cycle start.
#[derive(Debug, Default, Resource)]
pub struct DemandHistory {
    samples: VecDeque<(u64, CellIndex)>,
}

impl DemandHistory {
    pub fn record(&mut self, at: u64, origin: CellIndex) {
        self.samples.push_back((at, origin));
    }

    pub fn prune(&mut self, now: u64, window_secs: u64) {
        let cutoff = now.saturating_sub(window_secs);
        while let Some(&(at, _)) = self.samples.front() {
            if at >= cutoff {
                break;
            }
            self.samples.pop_front();
        }
    }

    pub fn cells(&self) -> impl Iterator<Item = CellIndex> + '_ {
        self.samples.iter().map(|&(_, cell)| cell)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
