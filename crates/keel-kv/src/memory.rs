//! In-memory [`KvStore`] with lease expiry.
//!
//! Shared by every node of a simulated cluster. Expired keys are dropped
//! lazily on access. Time comes from `tokio::time::Instant`, so tests can
//! pause and advance the clock to expire leases.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::error::{KvError, KvResult};
use crate::{KvStore, in_subtree};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires: Option<Instant>,
}

impl Entry {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires.is_none_or(|at| at > now)
    }
}

#[derive(Debug)]
pub struct MemoryKv {
    entries: Mutex<BTreeMap<String, Entry>>,
    available: AtomicBool,
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate losing (or regaining) connectivity. While unavailable every
    /// call fails with [`KvError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Run `f` over the live entries, after checking availability.
    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Entry>) -> KvResult<T>,
    ) -> KvResult<T> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(KvError::Unavailable("memory store offline".to_string()));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| KvError::Unavailable(e.to_string()))?;
        let now = Instant::now();
        entries.retain(|_, entry| entry.is_live(now));
        f(&mut entries)
    }
}

impl KvStore for MemoryKv {
    fn get(&self, path: &str) -> KvResult<String> {
        self.with_entries(|entries| {
            entries
                .get(path)
                .map(|entry| entry.value.clone())
                .ok_or_else(|| KvError::NotFound(path.to_string()))
        })
    }

    fn set(&self, path: &str, value: &str, ttl: Option<Duration>) -> KvResult<()> {
        self.with_entries(|entries| {
            entries.insert(path.to_string(), Entry::new(value, ttl));
            trace!(%path, "kv set");
            Ok(())
        })
    }

    fn create(&self, path: &str, value: &str, ttl: Option<Duration>) -> KvResult<()> {
        self.with_entries(|entries| {
            if entries.contains_key(path) {
                return Err(KvError::Exists(path.to_string()));
            }
            entries.insert(path.to_string(), Entry::new(value, ttl));
            trace!(%path, "kv create");
            Ok(())
        })
    }

    fn refresh(&self, path: &str, value: &str, ttl: Option<Duration>) -> KvResult<()> {
        self.with_entries(|entries| match entries.get(path) {
            None => Err(KvError::NotFound(path.to_string())),
            Some(entry) if entry.value != value => Err(KvError::Mismatch(path.to_string())),
            Some(_) => {
                entries.insert(path.to_string(), Entry::new(value, ttl));
                trace!(%path, "kv refresh");
                Ok(())
            }
        })
    }

    fn get_tree(&self, prefix: &str) -> KvResult<BTreeMap<String, String>> {
        self.with_entries(|entries| {
            Ok(entries
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .filter(|(key, _)| in_subtree(key, prefix))
                .map(|(key, entry)| (key.clone(), entry.value.clone()))
                .collect())
        })
    }
}
