//! redb table definitions for the Keel state store.
//!
//! Record tables use `u64` row ids as keys and `&[u8]` values
//! (JSON-serialized records). A separate metadata table holds the id
//! allocator so ids stay unique across restarts.

use std::fmt;

use redb::TableDefinition;

/// Record table definition: row id → JSON bytes.
pub type RecordTable = TableDefinition<'static, u64, &'static [u8]>;

pub const MINIONS: RecordTable = TableDefinition::new("minions");
pub const CONTAINERS: RecordTable = TableDefinition::new("containers");
pub const CONNECTIONS: RecordTable = TableDefinition::new("connections");
pub const LABELS: RecordTable = TableDefinition::new("labels");
pub const HOSTNAMES: RecordTable = TableDefinition::new("hostnames");
pub const PLACEMENTS: RecordTable = TableDefinition::new("placements");
pub const LEADERSHIP: RecordTable = TableDefinition::new("leadership");

/// Store metadata keyed by name.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key in [`META`] holding the next row id to hand out.
pub const NEXT_ID: &str = "next_id";

/// Tag naming one record table. Transactions and triggers are scoped by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableType {
    Minions,
    Containers,
    Connections,
    Labels,
    Hostnames,
    Placements,
    Leadership,
}

impl TableType {
    pub const ALL: [TableType; 7] = [
        TableType::Minions,
        TableType::Containers,
        TableType::Connections,
        TableType::Labels,
        TableType::Hostnames,
        TableType::Placements,
        TableType::Leadership,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TableType::Minions => "minions",
            TableType::Containers => "containers",
            TableType::Connections => "connections",
            TableType::Labels => "labels",
            TableType::Hostnames => "hostnames",
            TableType::Placements => "placements",
            TableType::Leadership => "leadership",
        }
    }

    pub(crate) fn definition(self) -> RecordTable {
        match self {
            TableType::Minions => MINIONS,
            TableType::Containers => CONTAINERS,
            TableType::Connections => CONNECTIONS,
            TableType::Labels => LABELS,
            TableType::Hostnames => HOSTNAMES,
            TableType::Placements => PLACEMENTS,
            TableType::Leadership => LEADERSHIP,
        }
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
