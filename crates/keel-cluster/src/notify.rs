//! Merging wake-up sources.

use tokio::sync::mpsc;

/// Merge two notification channels into one coalesced channel.
///
/// The merged channel holds one notification up front so the consumer
/// runs a first pass without waiting. It closes once both inputs have
/// closed.
pub fn join_notifiers(mut a: mpsc::Receiver<()>, mut b: mpsc::Receiver<()>) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);
    let _ = tx.try_send(());

    tokio::spawn(async move {
        let mut a_open = true;
        let mut b_open = true;
        while a_open || b_open {
            let fired = tokio::select! {
                got = a.recv(), if a_open => {
                    a_open = got.is_some();
                    a_open
                }
                got = b.recv(), if b_open => {
                    b_open = got.is_some();
                    b_open
                }
                _ = tx.closed() => break,
            };
            if fired {
                let _ = tx.try_send(());
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn initial_notification_then_either_source() {
        let (a_tx, a_rx) = mpsc::channel(1);
        let (b_tx, b_rx) = mpsc::channel(1);
        let mut merged = join_notifiers(a_rx, b_rx);

        assert!(merged.recv().await.is_some());

        a_tx.send(()).await.unwrap();
        assert!(merged.recv().await.is_some());

        b_tx.send(()).await.unwrap();
        assert!(merged.recv().await.is_some());
    }

    #[tokio::test]
    async fn closes_when_both_sources_close() {
        let (a_tx, a_rx) = mpsc::channel::<()>(1);
        let (b_tx, b_rx) = mpsc::channel::<()>(1);
        let mut merged = join_notifiers(a_rx, b_rx);
        assert!(merged.recv().await.is_some());

        drop(a_tx);
        drop(b_tx);
        let end = tokio::time::timeout(Duration::from_secs(1), merged.recv()).await;
        assert_eq!(end.unwrap(), None);
    }

    #[tokio::test]
    async fn bursts_coalesce() {
        let (a_tx, a_rx) = mpsc::channel(1);
        let (_b_tx, b_rx) = mpsc::channel::<()>(1);
        let mut merged = join_notifiers(a_rx, b_rx);

        for _ in 0..5 {
            let _ = a_tx.try_send(());
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut count = 0;
        while merged.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 1);
    }
}
