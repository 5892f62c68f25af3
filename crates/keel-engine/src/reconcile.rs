//! Desired-state reconciliation for one transaction.

use std::collections::BTreeMap;

use keel_core::{Policy, PolicyConnection, PolicyContainer, PolicyPlacement};
use keel_join::{hash_join, join};
use keel_state::{Connection, Container, Placement, Role, StateResult, View};

/// Row counts touched by one [`update_policy`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyStats {
    pub inserted: usize,
    pub removed: usize,
    pub updated: usize,
}

impl PolicyStats {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    fn add(&mut self, other: PolicyStats) {
        self.inserted += other.inserted;
        self.removed += other.removed;
        self.updated += other.updated;
    }
}

/// Make the store's connections match `policy`, and on masters its
/// placement rules and containers too.
///
/// Workers keep only connections: their container table describes what
/// runs locally, not what should exist.
pub fn update_policy(view: &mut View<'_>, role: Role, policy: &Policy) -> StateResult<PolicyStats> {
    let mut stats = update_connections(view, &policy.connections)?;
    if role == Role::Master {
        stats.add(update_placements(view, &policy.placements)?);
        stats.add(update_containers(view, &policy.containers)?);
    }
    Ok(stats)
}

type ConnectionKey = (String, String, u16, u16);

fn update_connections(view: &mut View<'_>, wanted: &[PolicyConnection]) -> StateResult<PolicyStats> {
    let current = view.select::<Connection>(|_| true)?;
    let joined = hash_join(
        wanted.to_vec(),
        current,
        |c: &PolicyConnection| -> ConnectionKey {
            (c.from.clone(), c.to.clone(), c.min_port, c.max_port)
        },
        |c: &Connection| -> ConnectionKey { (c.from.clone(), c.to.clone(), c.min_port, c.max_port) },
    );

    let mut stats = PolicyStats::default();
    for stale in &joined.right {
        view.remove(stale)?;
        stats.removed += 1;
    }
    for missing in joined.left {
        view.insert_row(Connection {
            from: missing.from,
            to: missing.to,
            min_port: missing.min_port,
            max_port: missing.max_port,
            ..Default::default()
        })?;
        stats.inserted += 1;
    }
    Ok(stats)
}

fn to_placement(p: &PolicyPlacement) -> Placement {
    Placement {
        target_label: p.target_label.clone(),
        exclusive: p.exclusive,
        other_label: p.other_label.clone(),
        provider: p.provider.clone(),
        size: p.size.clone(),
        region: p.region.clone(),
        floating_ip: p.floating_ip.clone(),
        ..Default::default()
    }
}

fn update_placements(view: &mut View<'_>, wanted: &[PolicyPlacement]) -> StateResult<PolicyStats> {
    let wanted: Vec<Placement> = wanted.iter().map(to_placement).collect();
    let current = view.select::<Placement>(|_| true)?;
    // Row ids are store-local; compare rules with the id zeroed.
    let key = |p: &Placement| Placement { id: 0, ..p.clone() };
    let joined = hash_join(wanted, current, key, key);

    let mut stats = PolicyStats::default();
    for stale in &joined.right {
        view.remove(stale)?;
        stats.removed += 1;
    }
    for missing in joined.left {
        view.insert_row(missing)?;
        stats.inserted += 1;
    }
    Ok(stats)
}

/// Labels present on one side only, counted with multiplicity.
fn label_distance(a: &[String], b: &[String]) -> i64 {
    let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
    for l in a {
        *counts.entry(l).or_default() += 1;
    }
    for l in b {
        *counts.entry(l).or_default() -= 1;
    }
    counts.values().map(|n| n.abs()).sum()
}

/// `-1` when the two cannot be the same container, otherwise how far
/// apart their labels and stitch ids are.
fn container_score(wanted: &PolicyContainer, current: &Container) -> i64 {
    if wanted.image != current.image
        || wanted.command != current.command
        || wanted.env != current.env
    {
        return -1;
    }
    let mut score = label_distance(&wanted.labels, &current.labels);
    if wanted.stitch_id != current.stitch_id {
        score += 1;
    }
    score
}

fn apply(wanted: PolicyContainer, row: &mut Container) {
    let mut labels = wanted.labels;
    labels.sort();
    row.labels = labels;
    row.stitch_id = wanted.stitch_id;
    row.image = wanted.image;
    row.command = wanted.command;
    row.env = wanted.env;
    row.filepath_to_content = wanted.filepath_to_content;
}

fn update_containers(view: &mut View<'_>, wanted: &[PolicyContainer]) -> StateResult<PolicyStats> {
    let current = view.select::<Container>(|_| true)?;
    let joined = join(wanted.to_vec(), current, container_score);

    let mut stats = PolicyStats::default();
    for stale in &joined.right {
        view.remove(stale)?;
        stats.removed += 1;
    }
    for missing in joined.left {
        let mut row = Container::default();
        apply(missing, &mut row);
        view.insert_row(row)?;
        stats.inserted += 1;
    }
    for pair in joined.pairs {
        let mut row = pair.right;
        apply(pair.left, &mut row);
        if view.commit(&row)? {
            stats.updated += 1;
        }
    }
    Ok(stats)
}
