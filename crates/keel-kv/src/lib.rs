//! keel-kv — the distributed key-value store Keel nodes coordinate through.
//!
//! The leader lease and every replicated table live under well-known
//! paths in one shared store. This crate defines the contract the rest of
//! Keel relies on ([`KvStore`]), a polling [`watch`], and [`MemoryKv`], an
//! in-process implementation with TTL support used for simulated clusters
//! and tests.
//!
//! Calls are synchronous: a loop blocks for the duration of one store
//! operation, which only delays that loop's own resource type.

pub mod error;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

pub use error::{KvError, KvResult};
pub use memory::MemoryKv;

/// Operations Keel needs from the distributed store.
pub trait KvStore: Send + Sync {
    /// Value at `path`, or [`KvError::NotFound`].
    fn get(&self, path: &str) -> KvResult<String>;

    /// Unconditionally write `value`, optionally expiring after `ttl`.
    fn set(&self, path: &str, value: &str, ttl: Option<Duration>) -> KvResult<()>;

    /// Write `value` only if no live key exists at `path`
    /// ([`KvError::Exists`] otherwise).
    fn create(&self, path: &str, value: &str, ttl: Option<Duration>) -> KvResult<()>;

    /// Reset the TTL of `path`, provided it still holds `value`
    /// ([`KvError::Mismatch`] or [`KvError::NotFound`] otherwise).
    fn refresh(&self, path: &str, value: &str, ttl: Option<Duration>) -> KvResult<()>;

    /// Every live key at or below `prefix`, with its value.
    fn get_tree(&self, prefix: &str) -> KvResult<BTreeMap<String, String>>;
}

/// Whether `key` is `prefix` itself or a descendant of it.
pub(crate) fn in_subtree(key: &str, prefix: &str) -> bool {
    match key.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

/// Poll the subtree at `path` every `poll` and notify when it changes.
///
/// Fires once as soon as the first read succeeds. Notifications are
/// coalesced into a capacity-one channel, and read errors are skipped
/// until the store answers again. Polling stops when the receiver is
/// dropped. Must be called from within a Tokio runtime.
pub fn watch(store: Arc<dyn KvStore>, path: &str, poll: Duration) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);
    let path = path.to_string();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll);
        let mut last: Option<BTreeMap<String, String>> = None;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.get_tree(&path) {
                        Ok(tree) if last.as_ref() != Some(&tree) => {
                            last = Some(tree);
                            let _ = tx.try_send(());
                        }
                        Ok(_) => {}
                        Err(e) => debug!(%path, error = %e, "watch poll failed"),
                    }
                }
                _ = tx.closed() => break,
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtree_matching() {
        assert!(in_subtree("/containers", "/containers"));
        assert!(in_subtree("/minion/nodes/a/self", "/minion/nodes"));
        assert!(in_subtree("/minion/nodes/a/self", "/minion/nodes/"));
        assert!(!in_subtree("/minion/nodesx", "/minion/nodes"));
        assert!(!in_subtree("/labels", "/containers"));
    }

    #[tokio::test(start_paused = true)]
    async fn watch_fires_on_change_only() {
        let kv = Arc::new(MemoryKv::new());
        let mut rx = watch(kv.clone(), "/containers", Duration::from_secs(1));

        // Initial notification.
        rx.recv().await.unwrap();

        // Quiet while nothing changes.
        let quiet = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(quiet.is_err());

        kv.set("/containers", "[]", None).unwrap();
        let fired = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(fired.is_ok());
    }
}
