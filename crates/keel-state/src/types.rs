//! Record types held in the Keel state store.
//!
//! Each record carries a store-local [`RowId`] that is assigned on insert
//! and never serialized: it is the redb key, not part of the value, so it
//! never leaks into cross-node comparisons or published JSON.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::tables::TableType;

/// Store-local row identity. Never reused within one database.
pub type RowId = u64;

/// A record type stored in exactly one table.
pub trait Row: Serialize + DeserializeOwned + Clone + Debug + Default + PartialEq {
    const TABLE: TableType;

    fn id(&self) -> RowId;
    fn set_id(&mut self, id: RowId);
}

macro_rules! impl_row {
    ($ty:ty, $table:ident) => {
        impl Row for $ty {
            const TABLE: TableType = TableType::$table;

            fn id(&self) -> RowId {
                self.id
            }

            fn set_id(&mut self, id: RowId) {
                self.id = id;
            }
        }
    };
}

// ── Minion ─────────────────────────────────────────────────────────

/// Role a machine plays in the cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    None,
    Worker,
    Master,
}

/// A cluster machine. Exactly one row per store has `is_self` set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Minion {
    #[serde(skip)]
    pub id: RowId,
    pub role: Role,
    pub private_ip: String,
    pub public_ip: String,
    pub provider: String,
    pub size: String,
    pub region: String,
    pub floating_ip: String,
    /// Marks the row describing the local process.
    pub is_self: bool,
}

impl_row!(Minion, Minions);

// ── Container ──────────────────────────────────────────────────────

/// A desired container, plus the bookkeeping the local runtime keeps on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Container {
    #[serde(skip)]
    pub id: RowId,
    pub ip: String,
    /// Private IP of the worker this container is placed on; empty when
    /// unassigned.
    pub minion: String,
    pub stitch_id: String,
    pub image: String,
    pub image_id: String,
    pub command: Vec<String>,
    pub labels: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub filepath_to_content: BTreeMap<String, String>,

    pub docker_id: String,
    pub pid: u32,
    pub status: String,
}

impl_row!(Container, Containers);

// ── Connection ─────────────────────────────────────────────────────

/// Permitted traffic from one label to another over a port range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct Connection {
    #[serde(skip)]
    pub id: RowId,
    pub from: String,
    pub to: String,
    pub min_port: u16,
    pub max_port: u16,
}

impl_row!(Connection, Connections);

// ── Label ──────────────────────────────────────────────────────────

/// A label and the addresses of the containers carrying it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct Label {
    #[serde(skip)]
    pub id: RowId,
    pub label: String,
    pub ip: String,
    pub container_ips: Vec<String>,
    pub multi_host: bool,
}

impl_row!(Label, Labels);

// ── Hostname ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct Hostname {
    #[serde(skip)]
    pub id: RowId,
    pub hostname: String,
    pub ip: String,
}

impl_row!(Hostname, Hostnames);

// ── Placement ──────────────────────────────────────────────────────

/// A placement rule for containers carrying `target_label`.
///
/// Either `other_label` is set (a co-location rule against another label)
/// or one of the machine attributes is (`provider`, `size`, `region`,
/// `floating_ip`). `exclusive` selects must-not over must.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct Placement {
    #[serde(skip)]
    pub id: RowId,
    pub target_label: String,
    pub exclusive: bool,
    pub other_label: String,
    pub provider: String,
    pub size: String,
    pub region: String,
    pub floating_ip: String,
}

impl_row!(Placement, Placements);

// ── Leadership ─────────────────────────────────────────────────────

/// Election state of the local process. At most one row per store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Leadership {
    #[serde(skip)]
    pub id: RowId,
    /// Whether this process currently holds the lease.
    pub leader: bool,
    /// Address of the current lease holder, if known.
    pub leader_ip: String,
    /// Members of the distributed store cluster.
    pub members: Vec<String>,
}

impl_row!(Leadership, Leadership);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_not_serialized() {
        let c = Container {
            id: 42,
            stitch_id: "7".to_string(),
            image: "nginx".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains("42"));

        let back: Container = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 0);
        assert_eq!(back.image, "nginx");
    }

    #[test]
    fn missing_fields_default() {
        let m: Minion = serde_json::from_str(r#"{"role":"worker","private_ip":"10.0.0.1"}"#).unwrap();
        assert_eq!(m.role, Role::Worker);
        assert_eq!(m.private_ip, "10.0.0.1");
        assert!(m.provider.is_empty());
        assert!(!m.is_self);
    }

    #[test]
    fn row_tables() {
        assert_eq!(Container::TABLE, TableType::Containers);
        assert_eq!(Leadership::TABLE, TableType::Leadership);
    }
}
