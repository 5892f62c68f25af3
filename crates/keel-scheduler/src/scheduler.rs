//! Scheduling loop.
//!
//! Runs a placement pass whenever minions, containers, placement rules, or
//! leadership change, and on a fixed tick. Only the leading master places
//! containers; everyone else skips the pass.

use std::time::Duration;

use keel_state::{Conn, Role, TableType};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::SchedulerResult;
use crate::placer::{PlacementStats, place_containers};

const TABLES: [TableType; 4] = [
    TableType::Minions,
    TableType::Containers,
    TableType::Placements,
    TableType::Leadership,
];

pub struct Scheduler {
    conn: Conn,
    tick: Duration,
}

impl Scheduler {
    pub fn new(conn: Conn, tick: Duration) -> Self {
        Self { conn, tick }
    }

    /// One pass. `None` when this node is not the leading master.
    pub fn run_once(&self) -> SchedulerResult<Option<PlacementStats>> {
        let stats = self.conn.transact(&TABLES, |view| {
            let is_master = view.minion_self()?.is_some_and(|m| m.role == Role::Master);
            if !is_master || !view.is_leader()? {
                return Ok(None);
            }
            place_containers(view).map(Some)
        })?;
        Ok(stats)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut trigger = self.conn.trigger_tick(self.tick, &TABLES);
        info!(tick_secs = self.tick.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                fired = trigger.changed() => {
                    if !fired {
                        break;
                    }
                    match self.run_once() {
                        Ok(None) => debug!("not the leading master, skipping placement"),
                        Ok(Some(stats)) if stats == PlacementStats::default() => {}
                        Ok(Some(stats)) => info!(?stats, "placement pass complete"),
                        Err(e) => warn!(error = %e, "placement pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_state::{Container, Leadership, Minion};

    fn conn_with(role: Role, leader: bool) -> Conn {
        let conn = Conn::open_in_memory().unwrap();
        conn.transact(&TABLES, |view| {
            view.insert_row(Minion {
                role,
                private_ip: "10.0.0.1".to_string(),
                is_self: true,
                ..Default::default()
            })?;
            view.insert_row(Minion {
                role: Role::Worker,
                private_ip: "10.0.1.1".to_string(),
                ..Default::default()
            })?;
            view.insert_row(Leadership {
                leader,
                ..Default::default()
            })?;
            view.insert_row(Container {
                image: "nginx".to_string(),
                ..Default::default()
            })?;
            Ok(())
        })
        .unwrap();
        conn
    }

    fn assigned(conn: &Conn) -> Vec<String> {
        conn.select::<Container>(|_| true)
            .unwrap()
            .into_iter()
            .map(|c| c.minion)
            .collect()
    }

    #[test]
    fn leading_master_places() {
        let conn = conn_with(Role::Master, true);
        let stats = Scheduler::new(conn.clone(), Duration::from_secs(60))
            .run_once()
            .unwrap()
            .unwrap();
        assert_eq!(stats.placed, 1);
        assert_eq!(assigned(&conn), vec!["10.0.1.1".to_string()]);
    }

    #[test]
    fn follower_master_does_nothing() {
        let conn = conn_with(Role::Master, false);
        let result = Scheduler::new(conn.clone(), Duration::from_secs(60)).run_once().unwrap();
        assert!(result.is_none());
        assert_eq!(assigned(&conn), vec![String::new()]);
    }

    #[test]
    fn workers_never_schedule() {
        let conn = conn_with(Role::Worker, true);
        let result = Scheduler::new(conn.clone(), Duration::from_secs(60)).run_once().unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn loop_places_and_stops_on_shutdown() {
        let conn = conn_with(Role::Master, true);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Scheduler::new(conn.clone(), Duration::from_secs(60)).run(rx));

        for _ in 0..100 {
            if assigned(&conn) == vec!["10.0.1.1".to_string()] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(assigned(&conn), vec!["10.0.1.1".to_string()]);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
