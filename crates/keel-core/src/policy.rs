//! Compiled policy: the desired containers, connections, and placement
//! rules a cluster should converge to.
//!
//! Keel does not compile a policy language; it consumes these records
//! directly, typically from the `[policy]` section of `keel.toml`.

use std::collections::BTreeMap;

use anyhow::bail;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub containers: Vec<PolicyContainer>,
    pub connections: Vec<PolicyConnection>,
    pub placements: Vec<PolicyPlacement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyContainer {
    /// Stable identity assigned by the policy author.
    pub stitch_id: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: Vec<String>,
    pub filepath_to_content: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConnection {
    pub from: String,
    pub to: String,
    pub min_port: u16,
    pub max_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyPlacement {
    pub target_label: String,
    pub exclusive: bool,
    pub other_label: String,
    pub provider: String,
    pub size: String,
    pub region: String,
    pub floating_ip: String,
}

impl Policy {
    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        for c in &self.containers {
            if c.image.is_empty() {
                bail!("container {:?} has no image", c.stitch_id);
            }
        }
        for conn in &self.connections {
            if conn.min_port > conn.max_port {
                bail!(
                    "connection {} -> {} has min_port {} above max_port {}",
                    conn.from,
                    conn.to,
                    conn.min_port,
                    conn.max_port
                );
            }
        }
        for p in &self.placements {
            if p.target_label.is_empty() {
                bail!("placement rule without target_label");
            }
        }
        Ok(())
    }
}
