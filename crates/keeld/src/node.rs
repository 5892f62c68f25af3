//! One simulated Keel node: a local store plus every loop a machine runs.

use std::sync::Arc;

use keel_cluster::{ClusterContext, Elector, minion, sync};
use keel_core::{KeelConfig, Policy};
use keel_engine::PolicyEngine;
use keel_kv::KvStore;
use keel_scheduler::Scheduler;
use keel_state::{
    Conn, Connection, Container, Hostname, Label, Leadership, Minion, Role, TableType,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Describes the machine a node pretends to be.
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    pub role: Role,
    pub private_ip: String,
    pub provider: String,
    pub region: String,
    pub size: String,
}

impl NodeSpec {
    pub fn new(role: Role, private_ip: impl Into<String>) -> Self {
        Self {
            role,
            private_ip: private_ip.into(),
            ..Default::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }
}

pub struct Node {
    pub spec: NodeSpec,
    pub ctx: ClusterContext,
}

impl Node {
    /// Open an in-memory store seeded with this node's self row and an
    /// empty leadership row listing `members`.
    pub fn new(
        spec: NodeSpec,
        store: Arc<dyn KvStore>,
        config: &KeelConfig,
        members: &[String],
    ) -> anyhow::Result<Self> {
        let conn = Conn::open_in_memory()?;
        conn.transact(&[TableType::Minions, TableType::Leadership], |view| {
            view.insert_row(Minion {
                role: spec.role,
                private_ip: spec.private_ip.clone(),
                provider: spec.provider.clone(),
                region: spec.region.clone(),
                size: spec.size.clone(),
                is_self: true,
                ..Default::default()
            })?;
            view.insert_row(Leadership {
                members: members.to_vec(),
                ..Default::default()
            })?;
            Ok(())
        })?;

        let ctx = ClusterContext::new(conn, store, config.cluster.clone());
        Ok(Self { spec, ctx })
    }

    pub fn conn(&self) -> &Conn {
        &self.ctx.conn
    }

    /// Spawn every loop this node runs. All of them exit once `shutdown`
    /// flips.
    pub fn spawn(&self, policy: Arc<Policy>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let ctx = &self.ctx;
        let mut handles = vec![
            tokio::spawn(Elector::new(ctx.clone()).run(shutdown.clone())),
            tokio::spawn(minion::run(ctx.clone(), shutdown.clone())),
            tokio::spawn(sync::run::<Container>(ctx.clone(), shutdown.clone())),
            tokio::spawn(sync::run::<Connection>(ctx.clone(), shutdown.clone())),
            tokio::spawn(sync::run::<Label>(ctx.clone(), shutdown.clone())),
            tokio::spawn(sync::run::<Hostname>(ctx.clone(), shutdown.clone())),
        ];

        if self.spec.role == Role::Master {
            let scheduler = Scheduler::new(ctx.conn.clone(), ctx.config.scheduler_tick());
            handles.push(tokio::spawn(scheduler.run(shutdown.clone())));
        }
        let engine = PolicyEngine::new(ctx.conn.clone(), policy, ctx.config.sync_tick());
        handles.push(tokio::spawn(engine.run(shutdown)));

        info!(role = ?self.spec.role, ip = %self.spec.private_ip, loops = handles.len(), "node started");
        handles
    }

    /// One-line view of what this node currently believes.
    pub fn summary(&self) -> anyhow::Result<NodeSummary> {
        let leadership = self.ctx.conn.leadership()?.unwrap_or_default();
        let containers = self.ctx.conn.select::<Container>(|_| true)?;
        let peers = self.ctx.conn.select::<Minion>(|m| !m.is_self)?.len();
        Ok(NodeSummary {
            leader: leadership.leader,
            leader_ip: leadership.leader_ip,
            peers,
            assigned: containers.iter().filter(|c| !c.minion.is_empty()).count(),
            containers: containers.len(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSummary {
    pub leader: bool,
    pub leader_ip: String,
    pub peers: usize,
    pub containers: usize,
    pub assigned: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_kv::MemoryKv;

    #[test]
    fn new_node_is_seeded() {
        let kv = Arc::new(MemoryKv::new());
        let node = Node::new(
            NodeSpec::new(Role::Master, "10.0.0.1").with_region("us-west-1"),
            kv,
            &KeelConfig::default(),
            &["10.0.0.1".to_string()],
        )
        .unwrap();

        let me = node.conn().minion_self().unwrap().unwrap();
        assert_eq!(me.private_ip, "10.0.0.1");
        assert_eq!(me.region, "us-west-1");
        let leadership = node.conn().leadership().unwrap().unwrap();
        assert!(!leadership.leader);
        assert_eq!(leadership.members, vec!["10.0.0.1".to_string()]);
        assert_eq!(node.summary().unwrap(), NodeSummary::default());
    }

    #[tokio::test]
    async fn workers_run_fewer_loops() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let config = KeelConfig::default();
        let master = Node::new(NodeSpec::new(Role::Master, "10.0.0.1"), kv.clone(), &config, &[])
            .unwrap();
        let worker = Node::new(NodeSpec::new(Role::Worker, "10.0.1.1"), kv, &config, &[]).unwrap();

        let (tx, rx) = watch::channel(false);
        let policy = Arc::new(Policy::default());
        let mut handles = master.spawn(policy.clone(), rx.clone());
        let master_loops = handles.len();
        handles.extend(worker.spawn(policy, rx));
        assert_eq!(master_loops, 8);
        assert_eq!(handles.len() - master_loops, 7);

        tx.send(true).unwrap();
        for h in handles {
            h.await.unwrap();
        }
    }
}
