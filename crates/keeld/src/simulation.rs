//! An in-process cluster: N masters and M workers sharing one store.

use std::sync::Arc;
use std::time::Duration;

use keel_core::KeelConfig;
use keel_kv::{KvStore, MemoryKv};
use keel_state::Role;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::node::{Node, NodeSpec};

pub struct Simulation {
    pub kv: Arc<MemoryKv>,
    pub nodes: Vec<Node>,
    config: KeelConfig,
}

pub fn master_ip(i: usize) -> String {
    format!("10.0.0.{}", i + 1)
}

pub fn worker_ip(i: usize) -> String {
    format!("10.0.1.{}", i + 1)
}

impl Simulation {
    pub fn new(config: KeelConfig, masters: usize, workers: usize) -> anyhow::Result<Self> {
        let specs = (0..masters)
            .map(|i| NodeSpec::new(Role::Master, master_ip(i)))
            .chain((0..workers).map(|i| NodeSpec::new(Role::Worker, worker_ip(i))));
        Self::with_specs(config, specs)
    }

    pub fn with_specs(
        config: KeelConfig,
        specs: impl IntoIterator<Item = NodeSpec>,
    ) -> anyhow::Result<Self> {
        let specs: Vec<NodeSpec> = specs.into_iter().collect();
        let members: Vec<String> = specs
            .iter()
            .filter(|s| s.role == Role::Master)
            .map(|s| s.private_ip.clone())
            .collect();

        let kv = Arc::new(MemoryKv::new());
        let store: Arc<dyn KvStore> = kv.clone();
        let nodes = specs
            .into_iter()
            .map(|spec| Node::new(spec, store.clone(), &config, &members))
            .collect::<anyhow::Result<Vec<_>>>()?;

        info!(masters = members.len(), nodes = nodes.len(), "simulated cluster built");
        Ok(Self { kv, nodes, config })
    }

    /// Spawn every node's loops.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let policy = Arc::new(self.config.policy.clone());
        self.nodes
            .iter()
            .flat_map(|node| node.spawn(policy.clone(), shutdown.clone()))
            .collect()
    }

    /// Nodes that currently believe they hold the lease.
    pub fn leaders(&self) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| n.conn().is_leader().unwrap_or(false))
            .collect()
    }

    /// Log every node's view each `period` until shutdown.
    pub async fn report(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for node in &self.nodes {
                        match node.summary() {
                            Ok(s) => info!(
                                ip = %node.spec.private_ip,
                                role = ?node.spec.role,
                                leader = s.leader,
                                leader_ip = %s.leader_ip,
                                peers = s.peers,
                                containers = s.containers,
                                assigned = s.assigned,
                                "node status"
                            ),
                            Err(e) => warn!(ip = %node.spec.private_ip, error = %e, "failed to read node status"),
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}
