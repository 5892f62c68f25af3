//! Placement engine — assigns containers to worker minions.
//!
//! A pass runs in three steps:
//! 1. Build the context: eligible workers, and each container either on a
//!    known worker or unassigned (assignments to vanished machines are
//!    cleared).
//! 2. Cleanup: re-validate every assignment against the containers already
//!    accepted on the same worker. First accepted stays; violators are
//!    evicted to the unassigned set.
//! 3. Placement: give each unassigned container to the emptiest worker that
//!    accepts it (min-heap on container count, ties by worker order).
//!
//! Only containers whose assignment changed are written back.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use keel_state::{Container, Minion, Placement, Role, StateResult, View};
use tracing::{debug, info, warn};

use crate::constraint::valid_placement;

/// Outcome counters for one placement pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlacementStats {
    /// Assignments dropped because the machine is gone or not a worker.
    pub orphaned: usize,
    /// Assignments dropped by the cleanup pass.
    pub evicted: usize,
    pub placed: usize,
    /// Containers no worker would accept.
    pub unplaceable: usize,
    /// Rows written back to the store.
    pub committed: usize,
}

#[derive(Debug)]
struct Worker {
    minion: Minion,
    /// Indices into `Context::containers`.
    containers: Vec<usize>,
}

struct Context {
    workers: Vec<Worker>,
    constraints: Vec<Placement>,
    containers: Vec<Container>,
    unassigned: Vec<usize>,
    stats: PlacementStats,
}

impl Context {
    fn new(minions: Vec<Minion>, constraints: Vec<Placement>, mut containers: Vec<Container>) -> Self {
        let workers: Vec<Worker> = minions
            .into_iter()
            .filter(|m| m.role == Role::Worker && !m.private_ip.is_empty())
            .map(|minion| Worker {
                minion,
                containers: Vec::new(),
            })
            .collect();
        let by_ip: HashMap<&str, usize> = workers
            .iter()
            .enumerate()
            .map(|(i, w)| (w.minion.private_ip.as_str(), i))
            .collect();

        let mut stats = PlacementStats::default();
        let mut unassigned = Vec::new();
        let mut assigned: Vec<(usize, usize)> = Vec::new();
        for (ci, c) in containers.iter_mut().enumerate() {
            if c.minion.is_empty() {
                unassigned.push(ci);
                continue;
            }
            match by_ip.get(c.minion.as_str()) {
                Some(&wi) => assigned.push((wi, ci)),
                None => {
                    debug!(stitch_id = %c.stitch_id, minion = %c.minion, "clearing assignment to unknown minion");
                    c.minion.clear();
                    stats.orphaned += 1;
                    unassigned.push(ci);
                }
            }
        }

        let mut ctx = Self {
            workers,
            constraints,
            containers,
            unassigned,
            stats,
        };
        for (wi, ci) in assigned {
            ctx.workers[wi].containers.push(ci);
        }

        // Similar containers end up adjacent, so placement spreads them.
        let containers = &ctx.containers;
        ctx.unassigned.sort_by(|&a, &b| {
            let (a, b) = (&containers[a], &containers[b]);
            (&a.image, &a.command, &a.stitch_id).cmp(&(&b.image, &b.command, &b.stitch_id))
        });
        ctx
    }

    fn fits(&self, wi: usize, peers: &[usize], ci: usize) -> bool {
        let peers: Vec<&Container> = peers.iter().map(|&pi| &self.containers[pi]).collect();
        valid_placement(
            &self.constraints,
            &self.workers[wi].minion,
            &peers,
            &self.containers[ci],
        )
    }

    fn cleanup_placements(&mut self) {
        for wi in 0..self.workers.len() {
            let assigned = std::mem::take(&mut self.workers[wi].containers);
            let mut valid = Vec::with_capacity(assigned.len());
            for ci in assigned {
                if self.fits(wi, &valid, ci) {
                    valid.push(ci);
                    continue;
                }
                let c = &mut self.containers[ci];
                info!(stitch_id = %c.stitch_id, minion = %c.minion, "evicting container violating placement rules");
                c.minion.clear();
                self.unassigned.push(ci);
                self.stats.evicted += 1;
            }
            self.workers[wi].containers = valid;
        }
    }

    fn place_unassigned(&mut self) {
        let mut heap: BinaryHeap<Reverse<(usize, usize)>> = self
            .workers
            .iter()
            .enumerate()
            .map(|(wi, w)| Reverse((w.containers.len(), wi)))
            .collect();

        for ci in std::mem::take(&mut self.unassigned) {
            let mut skipped = Vec::new();
            let mut chosen = None;
            while let Some(Reverse((count, wi))) = heap.pop() {
                if self.fits(wi, &self.workers[wi].containers, ci) {
                    chosen = Some(wi);
                    heap.push(Reverse((count + 1, wi)));
                    break;
                }
                skipped.push(Reverse((count, wi)));
            }
            heap.extend(skipped);

            match chosen {
                Some(wi) => {
                    let ip = self.workers[wi].minion.private_ip.clone();
                    let c = &mut self.containers[ci];
                    info!(stitch_id = %c.stitch_id, image = %c.image, minion = %ip, "placed container");
                    c.minion = ip;
                    self.workers[wi].containers.push(ci);
                    self.stats.placed += 1;
                }
                None => {
                    let c = &self.containers[ci];
                    warn!(stitch_id = %c.stitch_id, image = %c.image, "failed to place container");
                    self.unassigned.push(ci);
                    self.stats.unplaceable += 1;
                }
            }
        }
    }
}

/// Compute assignments without touching a store.
///
/// Returns every container (in input order) with its final `minion`.
pub fn schedule(
    minions: Vec<Minion>,
    constraints: Vec<Placement>,
    containers: Vec<Container>,
) -> (Vec<Container>, PlacementStats) {
    let mut ctx = Context::new(minions, constraints, containers);
    ctx.cleanup_placements();
    ctx.place_unassigned();
    (ctx.containers, ctx.stats)
}

/// Run a placement pass inside a transaction over the minion, container,
/// and placement tables, committing only changed assignments.
pub fn place_containers(view: &mut View<'_>) -> StateResult<PlacementStats> {
    let minions = view.select::<Minion>(|_| true)?;
    let constraints = view.select::<Placement>(|_| true)?;
    let containers = view.select::<Container>(|_| true)?;
    let before: HashMap<u64, String> = containers
        .iter()
        .map(|c| (c.id, c.minion.clone()))
        .collect();

    let (after, mut stats) = schedule(minions, constraints, containers);
    for c in &after {
        if before.get(&c.id) != Some(&c.minion) {
            view.commit(c)?;
            stats.committed += 1;
        }
    }
    Ok(stats)
}
