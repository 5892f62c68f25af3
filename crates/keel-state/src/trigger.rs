//! Change notifications for store tables.
//!
//! A [`Trigger`] is a capacity-one channel: any number of commits between
//! two reads collapse into a single pending notification. Dropping the
//! trigger unsubscribes it; closed senders are pruned on the next notify.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::tables::TableType;

/// Subscription to "one of these tables changed" events.
#[derive(Debug)]
pub struct Trigger {
    rx: mpsc::Receiver<()>,
}

impl Trigger {
    /// Wait for the next notification. Returns `false` once no sender can
    /// fire anymore.
    pub async fn changed(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Consume a pending notification without waiting.
    pub fn try_changed(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }

    /// Hand over the raw receiver, e.g. to merge it with other sources.
    pub fn into_receiver(self) -> mpsc::Receiver<()> {
        self.rx
    }
}

#[derive(Debug, Default)]
pub(crate) struct TriggerRegistry {
    senders: Mutex<HashMap<TableType, Vec<mpsc::Sender<()>>>>,
}

impl TriggerRegistry {
    /// Lock the subscriber lists, recovering from poison. No holder leaves
    /// them half-updated.
    fn senders(&self) -> MutexGuard<'_, HashMap<TableType, Vec<mpsc::Sender<()>>>> {
        self.senders.lock().unwrap_or_else(|poisoned| {
            warn!("trigger registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub(crate) fn subscribe(&self, tables: &[TableType]) -> (Trigger, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel(1);
        let mut senders = self.senders();
        for table in tables {
            senders.entry(*table).or_default().push(tx.clone());
        }
        (Trigger { rx }, tx)
    }

    pub(crate) fn notify<'a>(&self, tables: impl IntoIterator<Item = &'a TableType>) {
        let mut senders = self.senders();
        for table in tables {
            if let Some(list) = senders.get_mut(table) {
                list.retain(|tx| !tx.is_closed());
                for tx in list.iter() {
                    // Full means a notification is already pending.
                    let _ = tx.try_send(());
                }
                trace!(%table, subscribers = list.len(), "table changed");
            }
        }
    }
}

/// Fire `tx` immediately and then every `interval` until the receiver
/// goes away.
pub(crate) fn spawn_ticker(tx: mpsc::Sender<()>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = tx.try_send(());
                }
                _ = tx.closed() => break,
            }
        }
    });
}
