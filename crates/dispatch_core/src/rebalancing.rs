//! Area-based rebalancing: per-block supply/demand accounting and the
//! iterative push/pull transfer algorithm.
//!
//! Each cycle resets the block counters, repopulates them from the current
//! fleet state, computes a signed balance per block (positive = vehicle
//! surplus, negative = shortage) and moves conceptual vehicle units between
//! adjacent blocks until no block exceeds the threshold. Transfers only flow
//! from a surplus block into a shortage neighbour, so every transfer strictly
//! reduces the summed |balance| of the pair and the loop terminates.
//! Concrete vehicles and target locations are chosen afterwards.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use bevy_ecs::prelude::{Entity, Resource};
use h3o::CellIndex;

use crate::oracle::TravelTimeOracle;
use crate::partition::{BlockId, ServiceAreaPartition};
use crate::spatial::distance_km_between_cells;

/// Scale factor turning |balance| into an integer priority key.
const BALANCE_SCALE: f64 = 1_000_000.0;

fn key_of(balance: f64) -> i64 {
    (balance.abs() * BALANCE_SCALE).round() as i64
}

/// Instruction for one vehicle to drive to the destination block's centroid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceDirective {
    pub vehicle: Entity,
    pub destination: CellIndex,
    pub from: BlockId,
    pub to: BlockId,
}

/// Policy hook computing a block's signed balance. Implementations must be
/// monotonically increasing in the idle-vehicle count and decreasing in the
/// demand signals.
pub trait BalancePolicy: Send + Sync {
    fn balance(
        &self,
        idle_vehicles: usize,
        unassigned_requests: usize,
        historical_demand: usize,
        fleet_idle: usize,
        fleet_demand: usize,
    ) -> f64;
}

/// Default weighting: idle supply minus weighted demand signals.
#[derive(Debug, Clone)]
pub struct LinearBalance {
    pub unassigned_weight: f64,
    pub historical_weight: f64,
}

impl Default for LinearBalance {
    fn default() -> Self {
        Self {
            unassigned_weight: 1.0,
            historical_weight: 0.25,
        }
    }
}

impl BalancePolicy for LinearBalance {
    fn balance(
        &self,
        idle_vehicles: usize,
        unassigned_requests: usize,
        historical_demand: usize,
        _fleet_idle: usize,
        _fleet_demand: usize,
    ) -> f64 {
        idle_vehicles as f64
            - self.unassigned_weight * unassigned_requests as f64
            - self.historical_weight * historical_demand as f64
    }
}

/// Per-cycle fleet state handed to the engine by the control loop.
#[derive(Debug, Clone, Copy)]
pub struct RebalanceInputs<'a> {
    /// Divertable vehicles with no passenger-bound courses.
    pub idle_vehicles: &'a [(Entity, CellIndex)],
    /// Origins of currently unassigned requests.
    pub unassigned_requests: &'a [CellIndex],
    /// Origins of recent requests inside the retention window.
    pub historical_demand: &'a [CellIndex],
}

#[derive(Resource)]
pub struct RebalancingEngine {
    partition: ServiceAreaPartition,
    policy: Box<dyn BalancePolicy>,
    min_threshold: f64,
    max_distance_km: Option<f64>,
}

impl RebalancingEngine {
    pub fn new(
        partition: ServiceAreaPartition,
        policy: Box<dyn BalancePolicy>,
        min_threshold: f64,
        max_distance_km: Option<f64>,
    ) -> Self {
        Self {
            partition,
            policy,
            min_threshold,
            max_distance_km,
        }
    }

    pub fn partition(&self) -> &ServiceAreaPartition {
        &self.partition
    }

    /// Runs one full rebalancing cycle and returns the directives.
    ///
    /// Vehicles whose oracle lookup fails are skipped for this cycle; the
    /// remaining pairs still produce directives.
    pub fn rebalance(
        &self,
        inputs: &RebalanceInputs<'_>,
        oracle: &dyn TravelTimeOracle,
        now: u64,
    ) -> Vec<RebalanceDirective> {
        let n = self.partition.len();
        let mut idle = vec![0usize; n];
        let mut unassigned = vec![0usize; n];
        let mut historical = vec![0usize; n];
        let mut free: Vec<Vec<(Entity, CellIndex)>> = vec![Vec::new(); n];

        for &(entity, cell) in inputs.idle_vehicles {
            match self.partition.block_for(cell) {
                Ok(block) => {
                    idle[block.0] += 1;
                    free[block.0].push((entity, cell));
                }
                Err(err) => {
                    tracing::warn!(%err, ?entity, "vehicle outside the partition, skipped for this cycle");
                }
            }
        }
        for &cell in inputs.unassigned_requests {
            match self.partition.block_for(cell) {
                Ok(block) => unassigned[block.0] += 1,
                Err(err) => tracing::debug!(%err, "request origin outside the partition"),
            }
        }
        for &cell in inputs.historical_demand {
            match self.partition.block_for(cell) {
                Ok(block) => historical[block.0] += 1,
                Err(err) => tracing::debug!(%err, "historical origin outside the partition"),
            }
        }

        let fleet_idle: usize = idle.iter().sum();
        let fleet_demand: usize = unassigned.iter().sum::<usize>() + historical.iter().sum::<usize>();

        let mut balances: Vec<f64> = (0..n)
            .map(|b| {
                self.policy
                    .balance(idle[b], unassigned[b], historical[b], fleet_idle, fleet_demand)
            })
            .collect();
        let mut available: Vec<usize> = free.iter().map(Vec::len).collect();

        let flows = self.plan_transfers(&mut balances, &mut available);
        self.directives_for(&flows, &free, oracle, now)
    }

    /// Iterative push/pull transfer planning over conceptual vehicle units.
    ///
    /// `balances` and `available` are the per-block arena, indexed by
    /// [`BlockId`]; both are updated in place. Returns the planned flows as
    /// (donor, receiver) → unit count. Exposed separately so the conservation
    /// and termination properties can be exercised directly.
    pub fn plan_transfers(
        &self,
        balances: &mut [f64],
        available: &mut [usize],
    ) -> BTreeMap<(usize, usize), usize> {
        debug_assert_eq!(balances.len(), self.partition.len());
        debug_assert_eq!(available.len(), self.partition.len());

        let mut queue: BTreeSet<(i64, usize)> = balances
            .iter()
            .enumerate()
            .map(|(block, &balance)| (key_of(balance), block))
            .collect();
        let mut settled = vec![false; balances.len()];
        let mut flows: BTreeMap<(usize, usize), usize> = BTreeMap::new();

        while let Some(&(key, block)) = queue.iter().next_back() {
            // Gate on the raw balance with the same predicate the transfer
            // loops use; the rounded key only orders the queue.
            if balances[block].abs() <= self.min_threshold {
                break;
            }
            // Remove the block and its neighbours before any balance changes;
            // their sort keys are about to move.
            queue.remove(&(key, block));
            for &neighbour in self.partition.adjacent(BlockId(block)) {
                queue.remove(&(key_of(balances[neighbour.0]), neighbour.0));
            }

            if balances[block] > self.min_threshold {
                while balances[block] > self.min_threshold && available[block] > 0 {
                    let Some(target) = self.lowest_shortage_neighbour(block, balances) else {
                        break;
                    };
                    available[block] -= 1;
                    balances[block] -= 1.0;
                    balances[target] += 1.0;
                    *flows.entry((block, target)).or_insert(0) += 1;
                }
            } else if balances[block] < -self.min_threshold {
                while balances[block] < -self.min_threshold {
                    let Some(source) = self.highest_surplus_neighbour(block, balances, available)
                    else {
                        break;
                    };
                    available[source] -= 1;
                    balances[source] -= 1.0;
                    balances[block] += 1.0;
                    *flows.entry((source, block)).or_insert(0) += 1;
                }
            }

            // The block is settled for this cycle even if it still carries
            // the largest |balance|; only unsettled neighbours re-enter.
            settled[block] = true;
            for &neighbour in self.partition.adjacent(BlockId(block)) {
                if !settled[neighbour.0] {
                    queue.insert((key_of(balances[neighbour.0]), neighbour.0));
                }
            }
        }

        flows
    }

    /// Receiver for a push: the adjacent block with the lowest balance among
    /// those in shortage. Ties keep the first block in adjacency order.
    fn lowest_shortage_neighbour(&self, block: usize, balances: &[f64]) -> Option<usize> {
        let mut best: Option<usize> = None;
        for &neighbour in self.partition.adjacent(BlockId(block)) {
            if balances[neighbour.0] >= 0.0 {
                continue;
            }
            if best.map_or(true, |b| balances[neighbour.0] < balances[b]) {
                best = Some(neighbour.0);
            }
        }
        best
    }

    /// Donor for a pull: the adjacent block with the highest balance among
    /// those in surplus that still have a vehicle to give.
    fn highest_surplus_neighbour(
        &self,
        block: usize,
        balances: &[f64],
        available: &[usize],
    ) -> Option<usize> {
        let mut best: Option<usize> = None;
        for &neighbour in self.partition.adjacent(BlockId(block)) {
            if balances[neighbour.0] <= 0.0 || available[neighbour.0] == 0 {
                continue;
            }
            if best.map_or(true, |b| balances[neighbour.0] > balances[b]) {
                best = Some(neighbour.0);
            }
        }
        best
    }

    /// Turns planned flows into concrete directives: per flow, the free
    /// vehicles of the donor block nearest to the destination centroid by
    /// oracle travel time, never selecting a vehicle twice in one cycle.
    fn directives_for(
        &self,
        flows: &BTreeMap<(usize, usize), usize>,
        free: &[Vec<(Entity, CellIndex)>],
        oracle: &dyn TravelTimeOracle,
        now: u64,
    ) -> Vec<RebalanceDirective> {
        let mut used: HashSet<Entity> = HashSet::new();
        let mut directives = Vec::new();

        for (&(from, to), &count) in flows {
            let origin = self.partition.block(BlockId(from)).centroid();
            let target = self.partition.block(BlockId(to)).centroid();
            if let Some(max_km) = self.max_distance_km {
                if distance_km_between_cells(origin, target) > max_km {
                    tracing::debug!(from, to, "rebalance flow exceeds the distance bound, dropped");
                    continue;
                }
            }

            let mut ranked: Vec<(Entity, f64)> = Vec::new();
            for &(entity, cell) in &free[from] {
                if used.contains(&entity) {
                    continue;
                }
                match oracle.travel_time(cell, target, now) {
                    Ok(time) => ranked.push((entity, time)),
                    Err(err) => {
                        tracing::warn!(%err, ?entity, "oracle failure, vehicle skipped for this cycle");
                    }
                }
            }
            ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            for (entity, _) in ranked.into_iter().take(count) {
                used.insert(entity);
                directives.push(RebalanceDirective {
                    vehicle: entity,
                    destination: target,
                    from: BlockId(from),
                    to: BlockId(to),
                });
            }
        }

        directives
    }
}
