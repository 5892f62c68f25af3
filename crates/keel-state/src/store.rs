//! Conn — redb-backed transactional store for Keel records.
//!
//! All mutation goes through [`Conn::transact`], which runs a closure
//! against a [`View`] of the declared tables inside one redb write
//! transaction. Returning `Err` from the closure discards every write.
//! After a successful commit, triggers subscribed to any table whose
//! contents actually changed are notified.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::{META, NEXT_ID, TableType};
use crate::trigger::{Trigger, TriggerRegistry, spawn_ticker};
use crate::types::{Leadership, Minion, Row, RowId};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn encode<T: Row>(row: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(row).map_err(|e| StateError::Encode {
        table: T::TABLE,
        reason: e.to_string(),
    })
}

fn decode<T: Row>(id: RowId, bytes: &[u8]) -> StateResult<T> {
    let mut row: T = serde_json::from_slice(bytes).map_err(|e| StateError::Decode {
        table: T::TABLE,
        id,
        reason: e.to_string(),
    })?;
    row.set_id(id);
    Ok(row)
}

/// Decode every row of `table` (ascending id) that satisfies `pred`.
fn scan<T, Tb, P>(table: &Tb, pred: P) -> StateResult<Vec<T>>
where
    T: Row,
    Tb: ReadableTable<u64, &'static [u8]>,
    P: Fn(&T) -> bool,
{
    let mut rows = Vec::new();
    for entry in table.iter().map_err(map_err!(Storage))? {
        let (key, value) = entry.map_err(map_err!(Storage))?;
        let row: T = decode(key.value(), value.value())?;
        if pred(&row) {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Handle to a Keel state store. Cheap to clone and shareable across tasks.
#[derive(Clone)]
pub struct Conn {
    db: Arc<Database>,
    triggers: Arc<TriggerRegistry>,
}

impl Conn {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let conn = Self::from_db(db)?;
        debug!(?path, "state store opened");
        Ok(conn)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let conn = Self::from_db(db)?;
        debug!("in-memory state store opened");
        Ok(conn)
    }

    fn from_db(db: Database) -> StateResult<Self> {
        let conn = Self {
            db: Arc::new(db),
            triggers: Arc::new(TriggerRegistry::default()),
        };
        conn.ensure_tables()?;
        Ok(conn)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in TableType::ALL {
            txn.open_table(table.definition()).map_err(map_err!(Table))?;
        }
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Transactions ───────────────────────────────────────────────

    /// Run `f` atomically over `tables`.
    ///
    /// `Ok` commits every write made through the view; `Err` aborts the
    /// transaction and returns the error unchanged. Touching a table not
    /// listed in `tables` fails with [`StateError::TableAccess`].
    pub fn transact<T, F>(&self, tables: &[TableType], f: F) -> StateResult<T>
    where
        F: FnOnce(&mut View<'_>) -> StateResult<T>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut view = View {
            txn: &txn,
            allowed: tables,
            changed: BTreeSet::new(),
        };

        match f(&mut view) {
            Ok(value) => {
                let changed = std::mem::take(&mut view.changed);
                txn.commit().map_err(map_err!(Transaction))?;
                if !changed.is_empty() {
                    self.triggers.notify(&changed);
                }
                Ok(value)
            }
            Err(e) => {
                txn.abort().map_err(map_err!(Transaction))?;
                Err(e)
            }
        }
    }

    /// Read rows matching `pred` from a consistent snapshot.
    pub fn select<T: Row>(&self, pred: impl Fn(&T) -> bool) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn
            .open_table(T::TABLE.definition())
            .map_err(map_err!(Table))?;
        scan(&table, pred)
    }

    /// The row describing the local process, if it has been created.
    pub fn minion_self(&self) -> StateResult<Option<Minion>> {
        Ok(self.select::<Minion>(|m| m.is_self)?.into_iter().next())
    }

    /// The local leadership row, if the elector has created it.
    pub fn leadership(&self) -> StateResult<Option<Leadership>> {
        Ok(self.select::<Leadership>(|_| true)?.into_iter().next())
    }

    /// Whether this process currently holds the leader lease.
    pub fn is_leader(&self) -> StateResult<bool> {
        Ok(self.leadership()?.is_some_and(|l| l.leader))
    }

    // ── Triggers ───────────────────────────────────────────────────

    /// Subscribe to changes in any of `tables`.
    pub fn trigger(&self, tables: &[TableType]) -> Trigger {
        let (trigger, _) = self.triggers.subscribe(tables);
        trigger
    }

    /// Like [`Conn::trigger`], but also fires once immediately and then
    /// every `interval`. Must be called from within a Tokio runtime.
    pub fn trigger_tick(&self, interval: Duration, tables: &[TableType]) -> Trigger {
        let (trigger, tx) = self.triggers.subscribe(tables);
        spawn_ticker(tx, interval);
        trigger
    }
}

/// Transactional view over a declared set of tables.
pub struct View<'a> {
    txn: &'a WriteTransaction,
    allowed: &'a [TableType],
    changed: BTreeSet<TableType>,
}

impl View<'_> {
    fn check(&self, table: TableType) -> StateResult<()> {
        if self.allowed.contains(&table) {
            Ok(())
        } else {
            Err(StateError::TableAccess(table))
        }
    }

    fn next_id(&mut self) -> StateResult<RowId> {
        let mut meta = self.txn.open_table(META).map_err(map_err!(Table))?;
        let id = meta
            .get(NEXT_ID)
            .map_err(map_err!(Storage))?
            .map(|guard| guard.value())
            .unwrap_or(1);
        meta.insert(NEXT_ID, id + 1).map_err(map_err!(Storage))?;
        Ok(id)
    }

    /// Rows of `T`'s table matching `pred`, ordered by id.
    pub fn select<T: Row>(&self, pred: impl Fn(&T) -> bool) -> StateResult<Vec<T>> {
        self.check(T::TABLE)?;
        let table = self
            .txn
            .open_table(T::TABLE.definition())
            .map_err(map_err!(Table))?;
        scan(&table, pred)
    }

    /// Insert a zero-value row with a fresh id and return it.
    pub fn insert<T: Row>(&mut self) -> StateResult<T> {
        self.insert_row(T::default())
    }

    /// Insert `row` under a fresh id, ignoring whatever id it carried.
    pub fn insert_row<T: Row>(&mut self, mut row: T) -> StateResult<T> {
        self.check(T::TABLE)?;
        let id = self.next_id()?;
        row.set_id(id);
        let bytes = encode(&row)?;
        {
            let mut table = self
                .txn
                .open_table(T::TABLE.definition())
                .map_err(map_err!(Table))?;
            table
                .insert(id, bytes.as_slice())
                .map_err(map_err!(Storage))?;
        }
        self.changed.insert(T::TABLE);
        Ok(row)
    }

    /// Write back a row previously obtained from this store.
    ///
    /// Returns whether the stored value changed. A commit that changes
    /// nothing neither writes nor fires triggers.
    pub fn commit<T: Row>(&mut self, row: &T) -> StateResult<bool> {
        self.check(T::TABLE)?;
        let bytes = encode(row)?;
        let mut table = self
            .txn
            .open_table(T::TABLE.definition())
            .map_err(map_err!(Table))?;
        let current = table
            .get(row.id())
            .map_err(map_err!(Storage))?
            .map(|guard| guard.value().to_vec());
        match current {
            None => Err(StateError::NotFound {
                table: T::TABLE,
                id: row.id(),
            }),
            Some(current) if current == bytes => Ok(false),
            Some(_) => {
                table
                    .insert(row.id(), bytes.as_slice())
                    .map_err(map_err!(Storage))?;
                drop(table);
                self.changed.insert(T::TABLE);
                Ok(true)
            }
        }
    }

    /// Delete a row. Returns true if it existed.
    pub fn remove<T: Row>(&mut self, row: &T) -> StateResult<bool> {
        self.check(T::TABLE)?;
        let existed = {
            let mut table = self
                .txn
                .open_table(T::TABLE.definition())
                .map_err(map_err!(Table))?;
            table
                .remove(row.id())
                .map_err(map_err!(Storage))?
                .is_some()
        };
        if existed {
            self.changed.insert(T::TABLE);
        }
        Ok(existed)
    }

    // ── Conveniences ───────────────────────────────────────────────

    pub fn minion_self(&self) -> StateResult<Option<Minion>> {
        Ok(self.select::<Minion>(|m| m.is_self)?.into_iter().next())
    }

    pub fn leadership(&self) -> StateResult<Option<Leadership>> {
        Ok(self.select::<Leadership>(|_| true)?.into_iter().next())
    }

    pub fn is_leader(&self) -> StateResult<bool> {
        Ok(self.leadership()?.is_some_and(|l| l.leader))
    }
}
