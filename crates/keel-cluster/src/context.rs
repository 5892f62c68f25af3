//! Handles shared by every loop of one node.

use std::sync::Arc;

use keel_core::ClusterConfig;
use keel_kv::KvStore;
use keel_state::Conn;

/// The local store, the distributed store, and the timings a node's loops
/// run with. Cloned into each spawned task.
#[derive(Clone)]
pub struct ClusterContext {
    pub conn: Conn,
    pub store: Arc<dyn KvStore>,
    pub config: ClusterConfig,
}

impl ClusterContext {
    pub fn new(conn: Conn, store: Arc<dyn KvStore>, config: ClusterConfig) -> Self {
        Self {
            conn,
            store,
            config,
        }
    }
}
