//! Policy loop.

use std::sync::Arc;
use std::time::Duration;

use keel_core::Policy;
use keel_state::{Conn, Role, StateResult, TableType};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::reconcile::{PolicyStats, update_policy};

const TRIGGERS: [TableType; 2] = [TableType::Minions, TableType::Leadership];

const TABLES: [TableType; 5] = [
    TableType::Minions,
    TableType::Leadership,
    TableType::Connections,
    TableType::Containers,
    TableType::Placements,
];

/// Applies a fixed policy to the local store. The leading master applies
/// all of it; workers apply only connections. Follower masters receive the
/// result through replication instead.
pub struct PolicyEngine {
    conn: Conn,
    policy: Arc<Policy>,
    tick: Duration,
}

impl PolicyEngine {
    pub fn new(conn: Conn, policy: Arc<Policy>, tick: Duration) -> Self {
        Self { conn, policy, tick }
    }

    /// One pass. `None` on a follower master or before the self row exists.
    pub fn run_once(&self) -> StateResult<Option<PolicyStats>> {
        self.conn.transact(&TABLES, |view| {
            let Some(me) = view.minion_self()? else {
                return Ok(None);
            };
            if me.role == Role::Master && !view.is_leader()? {
                return Ok(None);
            }
            update_policy(view, me.role, &self.policy).map(Some)
        })
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut trigger = self.conn.trigger_tick(self.tick, &TRIGGERS);
        info!(
            containers = self.policy.containers.len(),
            connections = self.policy.connections.len(),
            placements = self.policy.placements.len(),
            "policy engine started"
        );

        loop {
            tokio::select! {
                fired = trigger.changed() => {
                    if !fired {
                        break;
                    }
                    match self.run_once() {
                        Ok(None) => debug!("follower master, policy left to replication"),
                        Ok(Some(stats)) if stats.is_noop() => {}
                        Ok(Some(stats)) => info!(?stats, "applied policy"),
                        Err(e) => warn!(error = %e, "failed to apply policy"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("policy engine shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{PolicyConnection, PolicyContainer};
    use keel_state::{Connection, Container, Leadership, Minion};

    fn setup(leader: bool) -> Conn {
        setup_as(Role::Master, leader)
    }

    fn setup_as(role: Role, leader: bool) -> Conn {
        let conn = Conn::open_in_memory().unwrap();
        conn.transact(&TABLES, |view| {
            view.insert_row(Minion {
                role,
                private_ip: "10.0.0.1".to_string(),
                is_self: true,
                ..Default::default()
            })?;
            view.insert_row(Leadership {
                leader,
                ..Default::default()
            })?;
            Ok(())
        })
        .unwrap();
        conn
    }

    fn policy() -> Arc<Policy> {
        Arc::new(Policy {
            containers: vec![PolicyContainer {
                stitch_id: "1".to_string(),
                image: "nginx".to_string(),
                ..Default::default()
            }],
            connections: vec![PolicyConnection {
                from: "web".to_string(),
                to: "db".to_string(),
                min_port: 5432,
                max_port: 5432,
            }],
            ..Default::default()
        })
    }

    #[test]
    fn leader_applies_policy() {
        let conn = setup(true);
        let engine = PolicyEngine::new(conn.clone(), policy(), Duration::from_secs(60));
        let stats = engine.run_once().unwrap().unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(conn.select::<Container>(|_| true).unwrap().len(), 1);
    }

    #[test]
    fn follower_leaves_store_alone() {
        let conn = setup(false);
        let engine = PolicyEngine::new(conn.clone(), policy(), Duration::from_secs(60));
        assert!(engine.run_once().unwrap().is_none());
        assert!(conn.select::<Container>(|_| true).unwrap().is_empty());
    }

    #[test]
    fn worker_applies_only_connections() {
        let conn = setup_as(Role::Worker, false);
        let engine = PolicyEngine::new(conn.clone(), policy(), Duration::from_secs(60));
        let stats = engine.run_once().unwrap().unwrap();
        assert_eq!(stats.inserted, 1);

        let connections = conn.select::<Connection>(|_| true).unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].to, "db");
        assert!(conn.select::<Container>(|_| true).unwrap().is_empty());

        assert!(engine.run_once().unwrap().unwrap().is_noop());
    }

    #[tokio::test]
    async fn gaining_leadership_triggers_a_pass() {
        let conn = setup(false);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(
            PolicyEngine::new(conn.clone(), policy(), Duration::from_secs(3600)).run(rx),
        );

        conn.transact(&[TableType::Leadership], |view| {
            let mut row = view.select::<Leadership>(|_| true)?.remove(0);
            row.leader = true;
            view.commit(&row)
        })
        .unwrap();

        for _ in 0..100 {
            if !conn.select::<Container>(|_| true).unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(conn.select::<Container>(|_| true).unwrap().len(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
