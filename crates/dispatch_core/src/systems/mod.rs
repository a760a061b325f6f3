//! Event-reacting systems and the control schedule.
//!
//! Clock progression happens in the controller; each schedule run reacts to
//! exactly one [CurrentEvent]. Systems are gated on the event kind so only
//! the relevant one does work.

pub mod match_run;
pub mod rebalance_run;

use bevy_ecs::prelude::{Res, Schedule};
use bevy_ecs::schedule::{apply_deferred, IntoSystemConfigs};

use crate::clock::{CurrentEvent, EventKind};

fn is_match_run(event: Option<Res<CurrentEvent>>) -> bool {
    event.map(|e| e.0.kind == EventKind::MatchRun).unwrap_or(false)
}

fn is_rebalance_run(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::RebalanceRun)
        .unwrap_or(false)
}

/// Builds the control schedule: the periodic matching and rebalancing passes
/// plus [apply_deferred] so structural changes land before the next step.
pub fn dispatch_schedule() -> Schedule {
    let mut schedule = Schedule::default();
    schedule.add_systems(
        (
            match_run::match_run_system.run_if(is_match_run),
            rebalance_run::rebalance_run_system.run_if(is_rebalance_run),
            apply_deferred,
        )
            .chain(),
    );
    schedule
}
