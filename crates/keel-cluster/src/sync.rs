//! Leader-publishes / follower-mirrors replication of one table.
//!
//! Each replicated record type owns one distributed path. On every pass:
//!
//! 1. Read the value at the path (absent → empty).
//! 2. Leader: sort the local rows' published form, serialize, and write
//!    only if the result differs from what was read.
//! 3. Follower: parse the value, `hash_join` it against the local table on
//!    the keyed projection, then delete, insert, and update accordingly.
//!
//! Both directions are idempotent: a steady cluster makes no writes to
//! either store.

use std::hash::Hash;

use keel_join::hash_join;
use keel_state::{Minion, Row, TableType};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::context::ClusterContext;
use crate::error::{ClusterError, ClusterResult};
use crate::notify::join_notifiers;

/// A record type mirrored between the leader and its followers.
pub trait Replicated: Row + Send + Sync + 'static {
    /// Distributed path holding the serialized table.
    const PATH: &'static str;

    /// Form written to the distributed store. Sorted before publishing.
    type Published: Serialize + DeserializeOwned + Ord;

    /// Projection used to pair local rows with published ones.
    type Key: Hash + Eq;

    fn publish(&self) -> Self::Published;

    fn key(published: &Self::Published) -> Self::Key;

    /// Copy mirrored fields from `remote`, leaving local bookkeeping alone.
    fn apply_remote(&mut self, remote: &Self::Published);

    /// Whether the leader publishes this row at all.
    fn publishable(&self) -> bool {
        true
    }

    /// Whether a follower described by `me` keeps this published row.
    fn retain_remote(_remote: &Self::Published, _me: Option<&Minion>) -> bool {
        true
    }
}

/// Mutations made by one replication pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Writes to the distributed store.
    pub written: usize,
    pub inserted: usize,
    pub removed: usize,
    pub updated: usize,
}

impl SyncStats {
    pub fn is_noop(&self) -> bool {
        *self == SyncStats::default()
    }
}

/// Read the distributed value at `path`, treating a missing key as empty.
pub fn read_node(ctx: &ClusterContext, path: &str) -> ClusterResult<String> {
    match ctx.store.get(path) {
        Ok(value) => Ok(value),
        Err(e) if e.is_not_found() => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

/// Run one replication pass for `T`.
pub fn sync_once<T: Replicated>(ctx: &ClusterContext) -> ClusterResult<SyncStats> {
    let current = read_node(ctx, T::PATH)?;
    if ctx.conn.is_leader()? {
        publish::<T>(ctx, &current)
    } else {
        mirror::<T>(ctx, &current)
    }
}

/// Leader side: write the local table if it differs from `current`.
pub fn publish<T: Replicated>(ctx: &ClusterContext, current: &str) -> ClusterResult<SyncStats> {
    let mut rows: Vec<T::Published> = ctx
        .conn
        .select::<T>(T::publishable)?
        .iter()
        .map(T::publish)
        .collect();
    rows.sort();

    let encoded = serde_json::to_string_pretty(&rows).map_err(|e| ClusterError::Encode {
        path: T::PATH.to_string(),
        reason: e.to_string(),
    })?;
    if encoded == current {
        return Ok(SyncStats::default());
    }

    ctx.store.set(T::PATH, &encoded, None)?;
    debug!(path = T::PATH, rows = rows.len(), "published table");
    Ok(SyncStats {
        written: 1,
        ..Default::default()
    })
}

/// Follower side: make the local table match `current`.
///
/// A malformed value fails the pass without touching the local table.
pub fn mirror<T: Replicated>(ctx: &ClusterContext, current: &str) -> ClusterResult<SyncStats> {
    let mut remote: Vec<T::Published> = if current.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(current).map_err(|e| ClusterError::Decode {
            path: T::PATH.to_string(),
            reason: e.to_string(),
        })?
    };

    let me = ctx.conn.minion_self()?;
    remote.retain(|r| T::retain_remote(r, me.as_ref()));

    let stats = ctx.conn.transact(&[T::TABLE], |view| {
        let local = view.select::<T>(|_| true)?;
        let joined = hash_join(local, remote, |l| T::key(&l.publish()), T::key);
        let mut stats = SyncStats::default();

        for stale in &joined.left {
            view.remove(stale)?;
            stats.removed += 1;
        }

        for fresh in &joined.right {
            let mut row = view.insert::<T>()?;
            row.apply_remote(fresh);
            view.commit(&row)?;
            stats.inserted += 1;
        }

        for pair in &joined.pairs {
            let mut row = pair.left.clone();
            row.apply_remote(&pair.right);
            if view.commit(&row)? {
                stats.updated += 1;
            }
        }

        Ok(stats)
    })?;
    Ok(stats)
}

/// Replicate `T` until shutdown.
///
/// Wakes on local table changes, leadership changes, changes at the
/// distributed path, and at least once per sync tick.
pub async fn run<T: Replicated>(ctx: ClusterContext, mut shutdown: watch::Receiver<bool>) {
    let local = ctx
        .conn
        .trigger_tick(ctx.config.sync_tick(), &[T::TABLE, TableType::Leadership])
        .into_receiver();
    let remote = keel_kv::watch(ctx.store.clone(), T::PATH, ctx.config.watch_poll());
    let mut wake = join_notifiers(local, remote);
    info!(path = T::PATH, "replicator started");

    loop {
        tokio::select! {
            fired = wake.recv() => {
                if fired.is_none() {
                    break;
                }
                match sync_once::<T>(&ctx) {
                    Ok(stats) if stats.is_noop() => {}
                    Ok(stats) => debug!(path = T::PATH, ?stats, "replicated"),
                    Err(e) => warn!(path = T::PATH, error = %e, "failed to replicate"),
                }
            }
            _ = shutdown.changed() => {
                info!(path = T::PATH, "replicator shutting down");
                break;
            }
        }
    }
}
