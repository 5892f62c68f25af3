//! keel-cluster — leader election and state replication.
//!
//! Every Keel node keeps a local [`keel_state::Conn`] and talks to one
//! shared [`keel_kv::KvStore`]. This crate runs the loops that keep the
//! two consistent across nodes:
//!
//! - [`elector`] — lease-based election among masters, plus a watch that
//!   tells every node who the leader is.
//! - [`sync`] — the generic publish/mirror pass, instantiated per table
//!   in [`records`] (containers, connections, labels, hostnames).
//! - [`minion`] — membership: each node publishes itself with a TTL and
//!   mirrors everyone else.
//!
//! # Architecture
//!
//! ```text
//!   leader                       distributed store                 follower
//!   Conn ── publish (if changed) ──▶ /containers ── mirror (hash_join) ──▶ Conn
//!                                    /connections
//!                                    /labels, /hostnames
//!   every node ── write_self (TTL) ─▶ /minion/nodes/<ip>/self ─▶ read_peers
//!   masters ── create/refresh ──────▶ /leader ─────────────────▶ watch_leader
//! ```
//!
//! Loops share nothing but the two stores, and each one is woken by a
//! coalesced trigger. Failures are logged and retried on the next pass.

pub mod context;
pub mod elector;
pub mod error;
pub mod minion;
pub mod notify;
pub mod records;
pub mod sync;

pub use context::ClusterContext;
pub use elector::{CampaignOutcome, ElectionState, Elector};
pub use error::{ClusterError, ClusterResult};
pub use notify::join_notifiers;
pub use sync::{Replicated, SyncStats, sync_once};
