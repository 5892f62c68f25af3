//! keel.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::policy::Policy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    pub cluster: ClusterConfig,
    pub policy: Policy,
}

/// Timings shared by every node's loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Leader lease TTL. Candidates campaign every half of it.
    pub election_ttl_secs: u64,
    /// Upper bound between two replicator passes.
    pub sync_tick_secs: u64,
    /// How often replicators poll their distributed path.
    pub watch_poll_ms: u64,
    /// TTL of each node's self-description in the distributed store.
    pub minion_timeout_secs: u64,
    pub scheduler_tick_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            election_ttl_secs: 30,
            sync_tick_secs: 60,
            watch_poll_ms: 1000,
            minion_timeout_secs: 30,
            scheduler_tick_secs: 60,
        }
    }
}

impl ClusterConfig {
    pub fn election_ttl(&self) -> Duration {
        Duration::from_secs(self.election_ttl_secs)
    }

    pub fn sync_tick(&self) -> Duration {
        Duration::from_secs(self.sync_tick_secs)
    }

    pub fn watch_poll(&self) -> Duration {
        Duration::from_millis(self.watch_poll_ms)
    }

    pub fn minion_timeout(&self) -> Duration {
        Duration::from_secs(self.minion_timeout_secs)
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_secs)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.election_ttl_secs < 2 {
            bail!("cluster.election_ttl_secs must be at least 2");
        }
        if self.minion_timeout_secs < 2 {
            bail!("cluster.minion_timeout_secs must be at least 2");
        }
        if self.sync_tick_secs == 0 || self.scheduler_tick_secs == 0 || self.watch_poll_ms == 0 {
            bail!("cluster tick intervals must be non-zero");
        }
        Ok(())
    }
}

impl KeelConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: KeelConfig = toml::from_str(content)?;
        config.cluster.validate()?;
        config.policy.validate()?;
        Ok(config)
    }
}
