//! keel-state — per-node transactional store for Keel.
//!
//! Backed by [redb](https://docs.rs/redb). Holds the local copy of cluster
//! state: minions, containers, connections, labels, hostnames, placement
//! rules, and the leadership row.
//!
//! # Architecture
//!
//! Records are JSON-serialized into redb `&[u8]` value columns keyed by a
//! store-local `u64` row id. Ids come from a counter persisted alongside
//! the records, so they are never reused.
//!
//! Mutation happens inside [`Conn::transact`], scoped to an explicit list
//! of tables. Reconciliation loops wait on [`Trigger`]s instead of polling;
//! a trigger fires once per burst of committed changes.
//!
//! `Conn` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`) and is
//! shared by every loop in a node.

pub mod error;
pub mod store;
pub mod tables;
pub mod trigger;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{Conn, View};
pub use tables::TableType;
pub use trigger::Trigger;
pub use types::*;
