//! Lease-based leader election.
//!
//! Masters race to create a TTL-bounded key at [`LEADER_KEY`] holding
//! their private IP. The holder refreshes it every half TTL; everyone else
//! keeps trying to create it and fails with "exists" while a leader is
//! live. The outcome is written to the local `Leadership` row, which the
//! replicators and the scheduler read to decide their role.
//!
//! A separate watch loop mirrors the lease value into `leader_ip` on every
//! node, workers included.

use std::time::Duration;

use keel_kv::KvError;
use keel_state::{Leadership, Role, StateResult, TableType, View};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::context::ClusterContext;
use crate::notify::join_notifiers;

/// Distributed path holding the current leader's address.
pub const LEADER_KEY: &str = "/leader";

/// Where this process stands in the election between two attempts.
///
/// An attempt is a single synchronous create or refresh, so there is no
/// in-flight state to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    Follower,
    Leader,
}

/// Result of one campaign attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignOutcome {
    /// Lease created or refreshed.
    Leader,
    /// Another process holds the lease.
    Follower,
    /// Unexpected store error; wait a full TTL before the next attempt.
    Backoff,
    /// Not a master, no private IP yet, or the leadership row is unusable.
    Ineligible,
}

pub struct Elector {
    ctx: ClusterContext,
    state: ElectionState,
}

impl Elector {
    pub fn new(ctx: ClusterContext) -> Self {
        Self {
            ctx,
            state: ElectionState::Follower,
        }
    }

    pub fn state(&self) -> ElectionState {
        self.state
    }

    /// Campaign every half TTL, backing off a full TTL after errors, while
    /// a watch loop mirrors the lease holder. Returns on shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let ttl = self.ctx.config.election_ttl();
        let watcher = tokio::spawn(watch_leader(self.ctx.clone(), shutdown.clone()));
        info!(ttl_secs = ttl.as_secs(), "elector started");

        loop {
            let wait = match self.campaign_once() {
                CampaignOutcome::Backoff => ttl,
                _ => campaign_interval(ttl),
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    info!("elector shutting down");
                    break;
                }
            }
        }

        let _ = watcher.await;
    }

    /// Make one attempt to take or keep the lease.
    pub fn campaign_once(&mut self) -> CampaignOutcome {
        let ip = match self.candidate_ip() {
            Ok(Some(ip)) => ip,
            Ok(None) => return CampaignOutcome::Ineligible,
            Err(e) => {
                warn!(error = %e, "failed to read election inputs");
                return CampaignOutcome::Ineligible;
            }
        };

        let was_leader = self.state == ElectionState::Leader;

        let ttl = Some(self.ctx.config.election_ttl());
        let attempt = if was_leader {
            self.ctx.store.refresh(LEADER_KEY, &ip, ttl)
        } else {
            self.ctx.store.create(LEADER_KEY, &ip, ttl)
        };

        let outcome = match attempt {
            Ok(()) => {
                if !was_leader {
                    info!(%ip, "acquired leadership");
                }
                self.record(true, Some(&ip));
                CampaignOutcome::Leader
            }
            Err(KvError::Exists(_)) => {
                self.record(false, None);
                CampaignOutcome::Follower
            }
            Err(e) => {
                warn!(%ip, error = %e, was_leader, "campaign failed, backing off");
                self.record(false, Some(""));
                CampaignOutcome::Backoff
            }
        };

        self.state = if outcome == CampaignOutcome::Leader {
            ElectionState::Leader
        } else {
            ElectionState::Follower
        };
        outcome
    }

    /// Private IP to campaign with, if this process may campaign at all.
    fn candidate_ip(&self) -> StateResult<Option<String>> {
        let Some(me) = self.ctx.conn.minion_self()? else {
            return Ok(None);
        };
        if me.role != Role::Master || me.private_ip.is_empty() {
            return Ok(None);
        }
        let rows = self.ctx.conn.select::<Leadership>(|_| true)?;
        if rows.len() > 1 {
            warn!(rows = rows.len(), "multiple leadership rows, not campaigning");
            return Ok(None);
        }
        ensure_row(&self.ctx)?;
        Ok(Some(me.private_ip))
    }

    fn record(&self, leader: bool, leader_ip: Option<&str>) {
        let result = self.ctx.conn.transact(&[TableType::Leadership], |view| {
            let mut row = leadership_row(view)?;
            row.leader = leader;
            if let Some(ip) = leader_ip {
                row.leader_ip = ip.to_string();
            }
            view.commit(&row)
        });
        if let Err(e) = result {
            warn!(error = %e, "failed to record election result");
        }
    }
}

/// Create the local leadership row if it does not exist yet.
pub fn ensure_row(ctx: &ClusterContext) -> StateResult<Leadership> {
    ctx.conn.transact(&[TableType::Leadership], leadership_row)
}

fn leadership_row(view: &mut View<'_>) -> StateResult<Leadership> {
    match view.leadership()? {
        Some(row) => Ok(row),
        None => view.insert::<Leadership>(),
    }
}

/// Copy the lease value into the local `leader_ip`. A missing lease means
/// no known leader.
pub fn watch_leader_once(ctx: &ClusterContext) -> bool {
    let leader_ip = match ctx.store.get(LEADER_KEY) {
        Ok(ip) => ip,
        Err(e) if e.is_not_found() => String::new(),
        Err(e) => {
            debug!(error = %e, "failed to read leader key");
            return false;
        }
    };

    let result = ctx.conn.transact(&[TableType::Leadership], |view| {
        let mut row = leadership_row(view)?;
        row.leader_ip = leader_ip.clone();
        view.commit(&row)
    });
    match result {
        Ok(changed) => {
            if changed {
                info!(leader = %leader_ip, "leader changed");
            }
            changed
        }
        Err(e) => {
            warn!(error = %e, "failed to record leader address");
            false
        }
    }
}

async fn watch_leader(ctx: ClusterContext, mut shutdown: watch::Receiver<bool>) {
    let tick = ctx
        .conn
        .trigger_tick(ctx.config.sync_tick(), &[TableType::Leadership])
        .into_receiver();
    let remote = keel_kv::watch(ctx.store.clone(), LEADER_KEY, ctx.config.watch_poll());
    let mut wake = join_notifiers(tick, remote);

    loop {
        tokio::select! {
            fired = wake.recv() => {
                if fired.is_none() {
                    break;
                }
                watch_leader_once(&ctx);
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Half of the lease TTL: how often a candidate campaigns.
pub fn campaign_interval(ttl: Duration) -> Duration {
    ttl / 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use keel_core::ClusterConfig;
    use keel_kv::{KvStore, MemoryKv};
    use keel_state::{Conn, Minion};

    fn test_ctx(kv: Arc<MemoryKv>, role: Role, ip: &str) -> ClusterContext {
        let conn = Conn::open_in_memory().unwrap();
        conn.transact(&[TableType::Minions], |view| {
            view.insert_row(Minion {
                role,
                private_ip: ip.to_string(),
                is_self: true,
                ..Default::default()
            })?;
            Ok(())
        })
        .unwrap();
        ClusterContext::new(conn, kv, ClusterConfig::default())
    }

    fn leadership(ctx: &ClusterContext) -> Leadership {
        ctx.conn.leadership().unwrap().unwrap()
    }

    #[test]
    fn first_master_wins() {
        let kv = Arc::new(MemoryKv::new());
        let ctx = test_ctx(kv.clone(), Role::Master, "10.0.0.1");
        let mut elector = Elector::new(ctx.clone());

        assert_eq!(elector.campaign_once(), CampaignOutcome::Leader);
        assert_eq!(elector.state(), ElectionState::Leader);
        assert_eq!(kv.get(LEADER_KEY).unwrap(), "10.0.0.1");

        let row = leadership(&ctx);
        assert!(row.leader);
        assert_eq!(row.leader_ip, "10.0.0.1");
    }

    #[test]
    fn second_master_follows() {
        let kv = Arc::new(MemoryKv::new());
        let mut a = Elector::new(test_ctx(kv.clone(), Role::Master, "10.0.0.1"));
        let b_ctx = test_ctx(kv.clone(), Role::Master, "10.0.0.2");
        let mut b = Elector::new(b_ctx.clone());

        assert_eq!(a.campaign_once(), CampaignOutcome::Leader);
        assert_eq!(b.campaign_once(), CampaignOutcome::Follower);
        assert!(!leadership(&b_ctx).leader);

        // The leader keeps the lease by refreshing.
        assert_eq!(a.campaign_once(), CampaignOutcome::Leader);
    }

    #[test]
    fn state_tracks_each_attempt() {
        let kv = Arc::new(MemoryKv::new());
        let mut elector = Elector::new(test_ctx(kv.clone(), Role::Master, "10.0.0.1"));
        assert_eq!(elector.state(), ElectionState::Follower);

        elector.campaign_once();
        assert_eq!(elector.state(), ElectionState::Leader);

        kv.set_available(false);
        elector.campaign_once();
        assert_eq!(elector.state(), ElectionState::Follower);

        // Back online: the lease is still ours, but a demoted process
        // creates rather than refreshes, and finds the key taken.
        kv.set_available(true);
        assert_eq!(elector.campaign_once(), CampaignOutcome::Follower);
        assert_eq!(elector.state(), ElectionState::Follower);
    }

    #[test]
    fn workers_never_campaign() {
        let kv = Arc::new(MemoryKv::new());
        let mut elector = Elector::new(test_ctx(kv.clone(), Role::Worker, "10.0.0.3"));
        assert_eq!(elector.campaign_once(), CampaignOutcome::Ineligible);
        assert!(kv.get(LEADER_KEY).unwrap_err().is_not_found());
    }

    #[test]
    fn master_without_ip_is_ineligible() {
        let kv = Arc::new(MemoryKv::new());
        let mut elector = Elector::new(test_ctx(kv, Role::Master, ""));
        assert_eq!(elector.campaign_once(), CampaignOutcome::Ineligible);
    }

    #[test]
    fn store_outage_demotes_and_backs_off() {
        let kv = Arc::new(MemoryKv::new());
        let ctx = test_ctx(kv.clone(), Role::Master, "10.0.0.1");
        let mut elector = Elector::new(ctx.clone());
        assert_eq!(elector.campaign_once(), CampaignOutcome::Leader);

        kv.set_available(false);
        assert_eq!(elector.campaign_once(), CampaignOutcome::Backoff);
        assert_eq!(elector.state(), ElectionState::Follower);
        let row = leadership(&ctx);
        assert!(!row.leader);
        assert!(row.leader_ip.is_empty());
    }

    #[test]
    fn lost_lease_is_not_refreshed() {
        let kv = Arc::new(MemoryKv::new());
        let mut a = Elector::new(test_ctx(kv.clone(), Role::Master, "10.0.0.1"));
        assert_eq!(a.campaign_once(), CampaignOutcome::Leader);

        // Someone else took the key while we were away.
        kv.set(LEADER_KEY, "10.0.0.9", None).unwrap();
        assert_eq!(a.campaign_once(), CampaignOutcome::Backoff);
        assert_eq!(kv.get(LEADER_KEY).unwrap(), "10.0.0.9");
    }

    #[test]
    fn watch_mirrors_leader_on_workers() {
        let kv = Arc::new(MemoryKv::new());
        let worker = test_ctx(kv.clone(), Role::Worker, "10.0.0.3");

        assert!(!watch_leader_once(&worker));
        assert!(leadership(&worker).leader_ip.is_empty());

        kv.set(LEADER_KEY, "10.0.0.1", None).unwrap();
        assert!(watch_leader_once(&worker));
        assert_eq!(leadership(&worker).leader_ip, "10.0.0.1");
        assert!(!leadership(&worker).leader);

        // No change, no write.
        assert!(!watch_leader_once(&worker));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_is_taken_over() {
        let kv = Arc::new(MemoryKv::new());
        let mut a = Elector::new(test_ctx(kv.clone(), Role::Master, "10.0.0.1"));
        let mut b = Elector::new(test_ctx(kv.clone(), Role::Master, "10.0.0.2"));

        assert_eq!(a.campaign_once(), CampaignOutcome::Leader);
        assert_eq!(b.campaign_once(), CampaignOutcome::Follower);

        // `a` stops refreshing; its lease runs out.
        tokio::time::advance(ClusterConfig::default().election_ttl() + Duration::from_secs(1))
            .await;
        assert_eq!(b.campaign_once(), CampaignOutcome::Leader);
        assert_eq!(kv.get(LEADER_KEY).unwrap(), "10.0.0.2");
        assert_eq!(campaign_interval(Duration::from_secs(30)), Duration::from_secs(15));
    }
}
