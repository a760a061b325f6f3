//! Matching pass: runs the configured redispatch strategy when MatchRun fires.
//!
//! Collects unassigned requests and divertable vehicles without passenger
//! courses, runs the strategy selected for the current fleet size, applies the
//! resulting pairings and schedules the next run.

use bevy_ecs::prelude::{Entity, Query, Res, ResMut};
use h3o::CellIndex;

use crate::clock::{CurrentEvent, EventKind, SimulationClock};
use crate::config::DispatchConfig;
use crate::ecs::{FleetRegistry, Plan, Request, RequestState, Vehicle};
use crate::matching::DispatchStrategies;
use crate::menu::{Course, Menu};
use crate::spatial::SpatialIndex;

pub fn match_run_system(
    mut clock: ResMut<SimulationClock>,
    event: Res<CurrentEvent>,
    config: Res<DispatchConfig>,
    strategies: Res<DispatchStrategies>,
    registry: Res<FleetRegistry>,
    mut spatial: ResMut<SpatialIndex>,
    mut requests: Query<(Entity, &mut Request)>,
    mut vehicles: Query<(Entity, &Vehicle, &mut Plan)>,
) {
    if event.0.kind != EventKind::MatchRun {
        return;
    }

    // A vehicle already repositioning is still up for grabs; a vehicle with
    // passenger courses is not.
    let open: Vec<(Entity, CellIndex)> = requests
        .iter()
        .filter(|(_, request)| {
            request.state == RequestState::Unassigned && request.assigned_vehicle.is_none()
        })
        .filter_map(|(entity, _)| spatial.requests().cell_of(entity).map(|cell| (entity, cell)))
        .collect();
    let eligible: Vec<(Entity, CellIndex)> = vehicles
        .iter()
        .filter(|(_, vehicle, plan)| vehicle.divertable && !plan.0.has_passenger_courses())
        .filter_map(|(entity, _, _)| spatial.vehicles().cell_of(entity).map(|cell| (entity, cell)))
        .collect();

    if !open.is_empty() && !eligible.is_empty() {
        let strategy = strategies.select(registry.vehicle_count());
        match strategy.assign(&open, &eligible) {
            Ok(matches) => {
                tracing::debug!(
                    strategy = strategy.name(),
                    requests = open.len(),
                    vehicles = eligible.len(),
                    matched = matches.len(),
                    "matching pass"
                );
                for m in matches {
                    let Ok((_, mut request)) = requests.get_mut(m.request) else {
                        continue;
                    };
                    let menu = match Menu::of(vec![
                        Course::pickup(request.id, request.origin),
                        Course::dropoff(request.id, request.destination),
                    ]) {
                        Ok(menu) => menu,
                        Err(err) => {
                            tracing::error!(%err, request = %request.id, "invalid pickup itinerary");
                            continue;
                        }
                    };
                    let Ok((_, _, mut plan)) = vehicles.get_mut(m.vehicle) else {
                        continue;
                    };
                    request.state = RequestState::Assigned;
                    request.assigned_vehicle = Some(m.vehicle);
                    plan.0 = menu;
                    // Matched requests leave the open-request index.
                    spatial.requests_mut().remove(m.request);
                }
            }
            Err(err) => {
                tracing::error!(%err, strategy = strategy.name(), "matching pass failed, retrying next run");
            }
        }
    }

    clock.schedule_in(config.match_period_secs, EventKind::MatchRun);
}
