//! Rebalancing cycle: runs the block-based engine when RebalanceRun fires.
//!
//! Prunes the demand history, collects the idle fleet and the demand signals,
//! runs the engine and turns its directives into reposition itineraries.

use bevy_ecs::prelude::{Entity, Query, Res, ResMut};
use h3o::CellIndex;

use crate::clock::{CurrentEvent, EventKind, SimulationClock};
use crate::config::DispatchConfig;
use crate::ecs::{DemandHistory, Plan, Request, RequestState, Vehicle};
use crate::menu::{Course, CourseKind, Menu};
use crate::oracle::OracleResource;
use crate::rebalancing::{RebalanceInputs, RebalancingEngine};
use crate::spatial::SpatialIndex;

pub fn rebalance_run_system(
    mut clock: ResMut<SimulationClock>,
    event: Res<CurrentEvent>,
    config: Res<DispatchConfig>,
    engine: Res<RebalancingEngine>,
    oracle: Res<OracleResource>,
    spatial: Res<SpatialIndex>,
    mut history: ResMut<DemandHistory>,
    requests: Query<&Request>,
    mut vehicles: Query<(Entity, &Vehicle, &mut Plan)>,
) {
    if event.0.kind != EventKind::RebalanceRun {
        return;
    }

    let now = clock.now();
    history.prune(now, config.demand_history_window_secs);

    // Idle supply: divertable vehicles whose itinerary is empty or consists
    // only of an earlier reposition. Passenger-bound vehicles never move.
    let idle: Vec<(Entity, CellIndex)> = vehicles
        .iter()
        .filter(|(_, vehicle, plan)| vehicle.divertable && is_idle_plan(&plan.0))
        .filter_map(|(entity, _, _)| spatial.vehicles().cell_of(entity).map(|cell| (entity, cell)))
        .collect();
    let unassigned: Vec<CellIndex> = requests
        .iter()
        .filter(|request| request.state == RequestState::Unassigned)
        .map(|request| request.origin)
        .collect();
    let historical: Vec<CellIndex> = history.cells().collect();

    let directives = engine.rebalance(
        &RebalanceInputs {
            idle_vehicles: &idle,
            unassigned_requests: &unassigned,
            historical_demand: &historical,
        },
        oracle.0.as_ref(),
        now,
    );
    tracing::debug!(
        idle = idle.len(),
        unassigned = unassigned.len(),
        directives = directives.len(),
        "rebalance cycle"
    );

    for directive in directives {
        let Ok((_, vehicle, mut plan)) = vehicles.get_mut(directive.vehicle) else {
            continue;
        };
        // Eligibility can change within the same instant when a match run
        // fires first; re-check before overwriting the itinerary.
        if !vehicle.divertable || plan.0.has_passenger_courses() {
            continue;
        }
        let reposition = Course::reposition(directive.destination);
        if plan.0.courses() == [reposition] {
            continue; // already on its way, directive is a no-op
        }
        match Menu::of(vec![reposition]) {
            Ok(menu) => plan.0 = menu,
            Err(err) => {
                tracing::error!(%err, vehicle = %vehicle.id, "invalid reposition itinerary");
            }
        }
    }

    clock.schedule_in(config.rebalance_period_secs, EventKind::RebalanceRun);
}

fn is_idle_plan(menu: &Menu) -> bool {
    menu.courses()
        .iter()
        .all(|c| c.kind == CourseKind::Reposition)
}
