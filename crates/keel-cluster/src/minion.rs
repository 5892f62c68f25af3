//! Minion membership.
//!
//! Unlike the leader-published tables, every node writes its own entry:
//! `/minion/nodes/<private_ip>/self`, with a TTL so that machines which
//! stop refreshing drop out of everyone's view. Each node then mirrors
//! all the other entries into its local minion table.

use keel_join::hash_join;
use keel_state::{Minion, Role, TableType};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::context::ClusterContext;
use crate::error::{ClusterError, ClusterResult};
use crate::sync::SyncStats;

/// Distributed directory holding one subtree per node.
pub const NODE_PATH: &str = "/minion/nodes";

/// Leaf name of a node's self-description.
pub const SELF_NODE: &str = "self";

/// The part of a minion row other nodes get to see.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishedMinion {
    pub role: Role,
    pub private_ip: String,
    pub public_ip: String,
    pub provider: String,
    pub size: String,
    pub region: String,
    pub floating_ip: String,
}

impl From<&Minion> for PublishedMinion {
    fn from(m: &Minion) -> Self {
        Self {
            role: m.role,
            private_ip: m.private_ip.clone(),
            public_ip: m.public_ip.clone(),
            provider: m.provider.clone(),
            size: m.size.clone(),
            region: m.region.clone(),
            floating_ip: m.floating_ip.clone(),
        }
    }
}

impl PublishedMinion {
    fn into_row(self) -> Minion {
        Minion {
            role: self.role,
            private_ip: self.private_ip,
            public_ip: self.public_ip,
            provider: self.provider,
            size: self.size,
            region: self.region,
            floating_ip: self.floating_ip,
            ..Default::default()
        }
    }
}

pub fn self_path(private_ip: &str) -> String {
    format!("{NODE_PATH}/{private_ip}/{SELF_NODE}")
}

/// Publish the local self row, renewing its TTL. Returns false when there
/// is nothing publishable yet.
pub fn write_self(ctx: &ClusterContext) -> ClusterResult<bool> {
    let Some(me) = ctx.conn.minion_self()? else {
        debug!("no self minion yet");
        return Ok(false);
    };
    if me.private_ip.is_empty() {
        debug!("self minion has no private IP yet");
        return Ok(false);
    }

    let encoded = serde_json::to_string_pretty(&PublishedMinion::from(&me)).map_err(|e| {
        ClusterError::Encode {
            path: self_path(&me.private_ip),
            reason: e.to_string(),
        }
    })?;
    ctx.store.set(
        &self_path(&me.private_ip),
        &encoded,
        Some(ctx.config.minion_timeout()),
    )?;
    Ok(true)
}

/// Mirror every other node's published entry into the local table.
pub fn read_peers(ctx: &ClusterContext) -> ClusterResult<SyncStats> {
    let tree = ctx.store.get_tree(NODE_PATH)?;
    let suffix = format!("/{SELF_NODE}");

    let mut published = Vec::new();
    for (path, value) in &tree {
        if !path.ends_with(&suffix) {
            continue;
        }
        match serde_json::from_str::<PublishedMinion>(value) {
            Ok(m) => published.push(m),
            Err(e) => warn!(%path, error = %e, "skipping malformed minion"),
        }
    }

    let stats = ctx.conn.transact(&[TableType::Minions], |view| {
        let rows = view.select::<Minion>(|_| true)?;
        let my_ip = rows
            .iter()
            .find(|m| m.is_self)
            .map(|m| m.private_ip.clone())
            .unwrap_or_default();
        let local: Vec<Minion> = rows.into_iter().filter(|m| !m.is_self).collect();
        let remote: Vec<PublishedMinion> = published
            .into_iter()
            .filter(|m| m.private_ip != my_ip)
            .collect();

        let joined = hash_join(
            local,
            remote,
            |m: &Minion| PublishedMinion::from(m),
            PublishedMinion::clone,
        );
        let mut stats = SyncStats::default();
        for gone in &joined.left {
            view.remove(gone)?;
            stats.removed += 1;
        }
        for new in joined.right {
            view.insert_row(new.into_row())?;
            stats.inserted += 1;
        }
        Ok(stats)
    })?;
    Ok(stats)
}

/// One membership pass: publish self, then mirror peers.
pub fn sync_minions_once(ctx: &ClusterContext) -> ClusterResult<SyncStats> {
    write_self(ctx)?;
    read_peers(ctx)
}

/// Keep membership in sync every half minion timeout until shutdown.
pub async fn run(ctx: ClusterContext, mut shutdown: watch::Receiver<bool>) {
    let period = ctx.config.minion_timeout() / 2;
    let mut trigger = ctx.conn.trigger_tick(period, &[TableType::Minions]);
    info!(period_secs = period.as_secs(), "minion sync started");

    loop {
        tokio::select! {
            fired = trigger.changed() => {
                if !fired {
                    break;
                }
                match sync_minions_once(&ctx) {
                    Ok(stats) if stats.is_noop() => {}
                    Ok(stats) => info!(?stats, "cluster membership changed"),
                    Err(e) => warn!(error = %e, "failed to sync minions"),
                }
            }
            _ = shutdown.changed() => {
                info!("minion sync shutting down");
                break;
            }
        }
    }
}
