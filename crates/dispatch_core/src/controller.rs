//! The dispatch controller: the external surface of the core.
//!
//! Owns the ECS world and the control schedule. The surrounding simulation
//! reports fleet changes through the lifecycle methods between steps and
//! drives time forward with [`DispatchController::step`]; each step drains
//! the control events due at or before the supplied instant. All lifecycle
//! methods apply synchronously.

use bevy_ecs::prelude::{Entity, Schedule, World};
use h3o::error::InvalidLatLng;
use h3o::{CellIndex, LatLng};

use crate::clock::{CurrentEvent, EventKind, SimulationClock};
use crate::config::{DispatchConfig, ServiceAreaBounds};
use crate::ecs::{
    DemandHistory, FleetRegistry, Plan, Position, Request, RequestId, RequestState, Vehicle,
    VehicleId,
};
use crate::error::PartitionError;
use crate::matching::{DispatchStrategies, ExactAssignment, GreedyNearest};
use crate::menu::{CourseKind, Menu};
use crate::oracle::{OracleResource, TravelTimeOracle};
use crate::partition::ServiceAreaPartition;
use crate::rebalancing::{LinearBalance, RebalancingEngine};
use crate::spatial::{GeoIndex, SpatialIndex};
use crate::systems::dispatch_schedule;

/// A newly submitted transportation request.
#[derive(Debug, Clone, Copy)]
pub struct RequestSubmission {
    pub id: RequestId,
    pub origin: CellIndex,
    pub destination: CellIndex,
}

pub struct DispatchController {
    world: World,
    schedule: Schedule,
    geo: GeoIndex,
}

impl DispatchController {
    /// Builds the controller over the given service area. The first matching
    /// pass fires one period after time zero, the first rebalancing cycle one
    /// rebalance period after.
    pub fn new(
        config: DispatchConfig,
        bounds: ServiceAreaBounds,
        oracle: Box<dyn TravelTimeOracle>,
    ) -> Result<Self, PartitionError> {
        let geo = GeoIndex::default();
        let partition = ServiceAreaPartition::new(
            bounds,
            config.block_grid_rows,
            config.block_grid_cols,
            geo.resolution(),
        )?;
        let engine = RebalancingEngine::new(
            partition,
            Box::new(LinearBalance::default()),
            f64::from(config.min_rebalance_threshold),
            config.max_rebalance_distance_km,
        );
        let strategies = DispatchStrategies::new(
            config.use_exact_matching_below_fleet_size,
            Box::new(ExactAssignment),
            Box::new(GreedyNearest {
                max_radius_k: config.greedy_match_radius_k,
            }),
        );

        let mut clock = SimulationClock::default();
        clock.schedule_at(config.match_period_secs, EventKind::MatchRun);
        clock.schedule_at(config.rebalance_period_secs, EventKind::RebalanceRun);

        let mut world = World::new();
        world.insert_resource(clock);
        world.insert_resource(config);
        world.insert_resource(SpatialIndex::new());
        world.insert_resource(FleetRegistry::default());
        world.insert_resource(DemandHistory::default());
        world.insert_resource(OracleResource::new(oracle));
        world.insert_resource(engine);
        world.insert_resource(strategies);

        Ok(Self {
            world,
            schedule: dispatch_schedule(),
            geo,
        })
    }

    /// Snaps a coordinate to the cell resolution used throughout the core.
    pub fn cell_for(&self, lat: f64, lng: f64) -> Result<CellIndex, InvalidLatLng> {
        Ok(LatLng::new(lat, lng)?.to_cell(self.geo.resolution()))
    }

    /// Drains every control event due at or before `now`, then advances the
    /// clock to `now`. Returns the number of events processed.
    pub fn step(&mut self, now: u64) -> usize {
        let mut processed = 0;
        loop {
            let event = self.world.resource_mut::<SimulationClock>().pop_due(now);
            let Some(event) = event else {
                break;
            };
            self.world.insert_resource(CurrentEvent(event));
            self.schedule.run(&mut self.world);
            processed += 1;
        }
        self.world.resource_mut::<SimulationClock>().advance_to(now);
        processed
    }

    /// Adds a vehicle to the fleet at the given location, divertable and with
    /// an empty itinerary.
    pub fn register_vehicle(&mut self, id: VehicleId, position: CellIndex) -> Entity {
        let entity = self
            .world
            .spawn((
                Vehicle {
                    id,
                    divertable: true,
                },
                Position(position),
                Plan(Menu::empty()),
            ))
            .id();
        self.world
            .resource_mut::<FleetRegistry>()
            .insert_vehicle(id, entity);
        self.world
            .resource_mut::<SpatialIndex>()
            .vehicles_mut()
            .insert(entity, position);
        entity
    }

    /// Records a new request. It becomes eligible at the next matching pass
    /// and immediately feeds the historical-demand signal.
    pub fn on_request_submitted(&mut self, submission: RequestSubmission) -> Entity {
        let now = self.world.resource::<SimulationClock>().now();
        let entity = self
            .world
            .spawn(Request {
                id: submission.id,
                origin: submission.origin,
                destination: submission.destination,
                submitted_at: now,
                state: RequestState::Unassigned,
                assigned_vehicle: None,
            })
            .id();
        self.world
            .resource_mut::<FleetRegistry>()
            .insert_request(submission.id, entity);
        self.world
            .resource_mut::<SpatialIndex>()
            .requests_mut()
            .insert(entity, submission.origin);
        self.world
            .resource_mut::<DemandHistory>()
            .record(now, submission.origin);
        entity
    }

    /// Cancels a request that has not been picked up yet, stripping its
    /// courses from the assigned vehicle's itinerary and retiring the
    /// request. Returns whether the cancellation took effect; cancelling an
    /// unknown, picked-up or already retired request is a no-op.
    pub fn on_request_cancelled(&mut self, id: RequestId) -> bool {
        let Some(entity) = self.world.resource::<FleetRegistry>().request(id) else {
            return false;
        };
        let Some(request) = self.world.get::<Request>(entity).copied() else {
            return false;
        };
        match request.state {
            RequestState::Unassigned | RequestState::Assigned => {}
            RequestState::PickedUp | RequestState::DroppedOff | RequestState::Cancelled => {
                return false;
            }
        }

        if let Some(vehicle_entity) = request.assigned_vehicle {
            if let Some(mut plan) = self.world.get_mut::<Plan>(vehicle_entity) {
                let stripped = plan.0.without_request(id);
                plan.0 = stripped;
            }
        }
        self.retire_request(id, entity);
        true
    }

    /// Marks an assigned request as picked up and removes the corresponding
    /// pickup course from the vehicle's itinerary.
    pub fn on_pickup_completed(&mut self, id: RequestId) -> bool {
        let Some(entity) = self.world.resource::<FleetRegistry>().request(id) else {
            return false;
        };
        let Some(request) = self.world.get::<Request>(entity).copied() else {
            return false;
        };
        if request.state != RequestState::Assigned {
            return false;
        }
        let Some(vehicle_entity) = request.assigned_vehicle else {
            return false;
        };

        if let Some(mut request) = self.world.get_mut::<Request>(entity) {
            request.state = RequestState::PickedUp;
        }
        if let Some(mut plan) = self.world.get_mut::<Plan>(vehicle_entity) {
            let remaining = plan
                .0
                .without_first(|c| c.kind == CourseKind::Pickup && c.request == Some(id));
            plan.0 = remaining;
        }
        true
    }

    /// Completes a picked-up request: removes the corresponding dropoff
    /// course from the vehicle's itinerary and retires the request. The id
    /// stops resolving afterwards.
    pub fn on_dropoff_completed(&mut self, id: RequestId) -> bool {
        let Some(entity) = self.world.resource::<FleetRegistry>().request(id) else {
            return false;
        };
        let Some(request) = self.world.get::<Request>(entity).copied() else {
            return false;
        };
        if request.state != RequestState::PickedUp {
            return false;
        }

        if let Some(vehicle_entity) = request.assigned_vehicle {
            if let Some(mut plan) = self.world.get_mut::<Plan>(vehicle_entity) {
                let remaining = plan
                    .0
                    .without_first(|c| c.kind == CourseKind::Dropoff && c.request == Some(id));
                plan.0 = remaining;
            }
        }
        self.retire_request(id, entity);
        true
    }

    // Terminal states end the controller's ownership of a request: the
    // registry entry, the open-request index slot and the entity all go.
    fn retire_request(&mut self, id: RequestId, entity: Entity) {
        self.world.resource_mut::<FleetRegistry>().remove_request(id);
        self.world
            .resource_mut::<SpatialIndex>()
            .requests_mut()
            .remove(entity);
        self.world.despawn(entity);
    }

    /// Updates a vehicle's location. Arriving at the target of a leading
    /// reposition course completes that course.
    pub fn on_vehicle_moved(&mut self, id: VehicleId, cell: CellIndex) -> bool {
        let Some(entity) = self.world.resource::<FleetRegistry>().vehicle(id) else {
            return false;
        };
        let Some(mut position) = self.world.get_mut::<Position>(entity) else {
            return false;
        };
        position.0 = cell;
        self.world
            .resource_mut::<SpatialIndex>()
            .vehicles_mut()
            .insert(entity, cell);

        if let Some(mut plan) = self.world.get_mut::<Plan>(entity) {
            let arrived = plan
                .0
                .courses()
                .first()
                .map_or(false, |c| c.kind == CourseKind::Reposition && c.target == cell);
            if arrived {
                let remaining = plan
                    .0
                    .without_first(|c| c.kind == CourseKind::Reposition && c.target == cell);
                plan.0 = remaining;
            }
        }
        true
    }

    /// Marks a vehicle as available for new instructions again, e.g. after
    /// finishing a maneuver that precluded redirection.
    pub fn on_vehicle_idle(&mut self, id: VehicleId) -> bool {
        self.set_divertable(id, true)
    }

    /// Marks a vehicle as (un)available for new instructions.
    pub fn set_divertable(&mut self, id: VehicleId, divertable: bool) -> bool {
        let Some(entity) = self.world.resource::<FleetRegistry>().vehicle(id) else {
            return false;
        };
        match self.world.get_mut::<Vehicle>(entity) {
            Some(mut vehicle) => {
                vehicle.divertable = divertable;
                true
            }
            None => false,
        }
    }

    pub fn current_menu(&self, id: VehicleId) -> Option<Menu> {
        let entity = self.world.resource::<FleetRegistry>().vehicle(id)?;
        self.world.get::<Plan>(entity).map(|plan| plan.0.clone())
    }

    pub fn vehicle_position(&self, id: VehicleId) -> Option<CellIndex> {
        let entity = self.world.resource::<FleetRegistry>().vehicle(id)?;
        self.world.get::<Position>(entity).map(|p| p.0)
    }

    pub fn request_state(&self, id: RequestId) -> Option<RequestState> {
        let entity = self.world.resource::<FleetRegistry>().request(id)?;
        self.world.get::<Request>(entity).map(|r| r.state)
    }

    pub fn now(&self) -> u64 {
        self.world.resource::<SimulationClock>().now()
    }

    /// When the next control event is due, so the external driver can pick
    /// its step instants.
    pub fn next_control_event_at(&self) -> Option<u64> {
        self.world.resource::<SimulationClock>().next_event_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu::Course;
    use crate::oracle::HaversineOracle;
    use crate::partition::BlockId;
    use crate::test_helpers::{test_bounds, test_cell, test_distant_cell, test_neighbor_cell};

    fn small_config() -> DispatchConfig {
        DispatchConfig {
            block_grid_rows: 2,
            block_grid_cols: 2,
            ..DispatchConfig::default()
        }
    }

    fn controller(config: DispatchConfig) -> DispatchController {
        DispatchController::new(config, test_bounds(), Box::new(HaversineOracle::default()))
            .expect("controller")
    }

    fn centroid(controller: &DispatchController, block: usize) -> CellIndex {
        controller
            .world
            .resource::<RebalancingEngine>()
            .partition()
            .block(BlockId(block))
            .centroid()
    }

    #[test]
    fn empty_grid_config_is_rejected() {
        let config = DispatchConfig {
            block_grid_rows: 0,
            ..DispatchConfig::default()
        };
        let result =
            DispatchController::new(config, test_bounds(), Box::new(HaversineOracle::default()));
        assert!(matches!(result, Err(PartitionError::EmptyGrid { .. })));
    }

    #[test]
    fn match_run_assigns_the_nearest_vehicle() {
        let mut controller = controller(small_config());
        controller.register_vehicle(VehicleId(1), test_cell());
        controller.register_vehicle(VehicleId(2), test_distant_cell());
        controller.on_request_submitted(RequestSubmission {
            id: RequestId(1),
            origin: test_neighbor_cell(),
            destination: test_distant_cell(),
        });

        assert_eq!(controller.request_state(RequestId(1)), Some(RequestState::Unassigned));
        controller.step(10);

        assert_eq!(controller.request_state(RequestId(1)), Some(RequestState::Assigned));
        let menu = controller.current_menu(VehicleId(1)).expect("menu");
        assert_eq!(
            menu.courses(),
            [
                Course::pickup(RequestId(1), test_neighbor_cell()),
                Course::dropoff(RequestId(1), test_distant_cell()),
            ]
        );
        let other = controller.current_menu(VehicleId(2)).expect("menu");
        assert!(other.is_empty(), "the distant vehicle stays idle");
    }

    #[test]
    fn pickup_and_dropoff_complete_the_itinerary() {
        let mut controller = controller(small_config());
        controller.register_vehicle(VehicleId(1), test_cell());
        controller.on_request_submitted(RequestSubmission {
            id: RequestId(1),
            origin: test_cell(),
            destination: test_distant_cell(),
        });
        controller.step(10);

        assert!(controller.on_pickup_completed(RequestId(1)));
        assert_eq!(controller.request_state(RequestId(1)), Some(RequestState::PickedUp));
        let menu = controller.current_menu(VehicleId(1)).expect("menu");
        assert_eq!(menu.courses(), [Course::dropoff(RequestId(1), test_distant_cell())]);
        assert_eq!(menu.onboard_count(), 1);

        assert!(controller.on_dropoff_completed(RequestId(1)));
        assert_eq!(controller.request_state(RequestId(1)), None, "retired id stops resolving");
        assert!(controller.current_menu(VehicleId(1)).expect("menu").is_empty());

        assert!(!controller.on_dropoff_completed(RequestId(1)), "second dropoff is a no-op");
    }

    #[test]
    fn cancellation_strips_the_assigned_itinerary() {
        let mut controller = controller(small_config());
        controller.register_vehicle(VehicleId(1), test_cell());
        controller.on_request_submitted(RequestSubmission {
            id: RequestId(1),
            origin: test_cell(),
            destination: test_distant_cell(),
        });
        controller.step(10);
        assert_eq!(controller.request_state(RequestId(1)), Some(RequestState::Assigned));

        assert!(controller.on_request_cancelled(RequestId(1)));
        assert_eq!(controller.request_state(RequestId(1)), None, "retired id stops resolving");
        assert!(controller.current_menu(VehicleId(1)).expect("menu").is_empty());

        assert!(!controller.on_request_cancelled(RequestId(1)), "second cancel is a no-op");
    }

    #[test]
    fn terminal_requests_are_retired() {
        let mut controller = controller(small_config());
        controller.register_vehicle(VehicleId(1), test_cell());

        // Dropped off: the full lifecycle releases the registry slot and the
        // entity; only the vehicle remains.
        controller.on_request_submitted(RequestSubmission {
            id: RequestId(1),
            origin: test_cell(),
            destination: test_distant_cell(),
        });
        assert_eq!(controller.world.resource::<FleetRegistry>().request_count(), 1);
        controller.step(10);
        controller.on_pickup_completed(RequestId(1));
        controller.on_dropoff_completed(RequestId(1));
        assert_eq!(controller.request_state(RequestId(1)), None);
        assert_eq!(controller.world.resource::<FleetRegistry>().request_count(), 0);

        // Cancelled: same release without the trip.
        controller.on_request_submitted(RequestSubmission {
            id: RequestId(2),
            origin: test_cell(),
            destination: test_distant_cell(),
        });
        controller.on_request_cancelled(RequestId(2));
        assert_eq!(controller.request_state(RequestId(2)), None);
        assert_eq!(controller.world.resource::<FleetRegistry>().request_count(), 0);
        assert_eq!(controller.world.resource::<FleetRegistry>().vehicle_count(), 1);
    }

    #[test]
    fn cancelling_an_unknown_request_is_a_noop() {
        let mut controller = controller(small_config());
        assert!(!controller.on_request_cancelled(RequestId(404)));
    }

    #[test]
    fn picked_up_requests_cannot_be_cancelled() {
        let mut controller = controller(small_config());
        controller.register_vehicle(VehicleId(1), test_cell());
        controller.on_request_submitted(RequestSubmission {
            id: RequestId(1),
            origin: test_cell(),
            destination: test_distant_cell(),
        });
        controller.step(10);
        controller.on_pickup_completed(RequestId(1));

        assert!(!controller.on_request_cancelled(RequestId(1)));
        assert_eq!(controller.request_state(RequestId(1)), Some(RequestState::PickedUp));
    }

    #[test]
    fn non_divertable_vehicles_are_never_matched() {
        let mut controller = controller(small_config());
        controller.register_vehicle(VehicleId(1), test_cell());
        assert!(controller.set_divertable(VehicleId(1), false));
        controller.on_request_submitted(RequestSubmission {
            id: RequestId(1),
            origin: test_cell(),
            destination: test_distant_cell(),
        });
        controller.step(10);

        assert_eq!(controller.request_state(RequestId(1)), Some(RequestState::Unassigned));
        assert!(controller.current_menu(VehicleId(1)).expect("menu").is_empty());

        // Becoming idle again makes the vehicle eligible at the next pass.
        assert!(controller.on_vehicle_idle(VehicleId(1)));
        controller.step(20);
        assert_eq!(controller.request_state(RequestId(1)), Some(RequestState::Assigned));
    }

    #[test]
    fn matching_wins_over_rebalancing_at_the_same_instant() {
        let config = DispatchConfig {
            match_period_secs: 300,
            rebalance_period_secs: 300,
            ..small_config()
        };
        let mut controller = controller(config);
        let origin = centroid(&controller, 0);
        controller.register_vehicle(VehicleId(1), centroid(&controller, 3));
        controller.on_request_submitted(RequestSubmission {
            id: RequestId(1),
            origin,
            destination: test_distant_cell(),
        });

        let processed = controller.step(300);
        assert_eq!(processed, 2, "both control events fire at t=300");

        // The match run claimed the vehicle before the rebalance cycle saw it.
        let menu = controller.current_menu(VehicleId(1)).expect("menu");
        assert!(menu.has_passenger_courses());
        assert_eq!(controller.request_state(RequestId(1)), Some(RequestState::Assigned));
    }

    #[test]
    fn rebalancing_repositions_toward_historical_demand() {
        let mut controller = controller(small_config());
        let demand_cell = centroid(&controller, 0);
        let vehicle_cell = centroid(&controller, 3);
        controller.register_vehicle(VehicleId(1), vehicle_cell);

        // The request is cancelled before the first matching pass; only the
        // historical-demand sample survives.
        controller.on_request_submitted(RequestSubmission {
            id: RequestId(1),
            origin: demand_cell,
            destination: test_distant_cell(),
        });
        controller.on_request_cancelled(RequestId(1));

        controller.step(300);
        let menu = controller.current_menu(VehicleId(1)).expect("menu");
        assert_eq!(menu.courses(), [Course::reposition(demand_cell)]);

        // A repeated cycle with unchanged state re-issues the same directive,
        // which is a no-op against the in-flight reposition.
        controller.step(600);
        let repeated = controller.current_menu(VehicleId(1)).expect("menu");
        assert_eq!(repeated.courses(), [Course::reposition(demand_cell)]);
    }

    #[test]
    fn arriving_at_the_reposition_target_clears_the_course() {
        let mut controller = controller(small_config());
        let demand_cell = centroid(&controller, 0);
        controller.register_vehicle(VehicleId(1), centroid(&controller, 3));
        controller.on_request_submitted(RequestSubmission {
            id: RequestId(1),
            origin: demand_cell,
            destination: test_distant_cell(),
        });
        controller.on_request_cancelled(RequestId(1));
        controller.step(300);
        assert!(!controller.current_menu(VehicleId(1)).expect("menu").is_empty());

        assert!(controller.on_vehicle_moved(VehicleId(1), demand_cell));
        assert_eq!(controller.vehicle_position(VehicleId(1)), Some(demand_cell));
        assert!(controller.current_menu(VehicleId(1)).expect("menu").is_empty());
    }

    #[test]
    fn step_advances_the_clock_past_quiet_stretches() {
        let mut controller = controller(small_config());
        assert_eq!(controller.next_control_event_at(), Some(10));
        assert_eq!(controller.step(5), 0);
        assert_eq!(controller.now(), 5);
        controller.step(25);
        assert_eq!(controller.now(), 25);
        assert_eq!(controller.next_control_event_at(), Some(30));
    }
}
