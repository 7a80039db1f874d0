//! New-block notifications by polling the chain head.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::queue::BlockQueue;
use crate::ledger::{CancelHandle, LedgerRpc};

/// Polls `eth_blockNumber` and queues every block up to the head.
pub struct BlockWatcher {
    ledger: Arc<dyn LedgerRpc>,
    interval: Duration,
}

impl BlockWatcher {
    pub fn new(ledger: Arc<dyn LedgerRpc>, interval: Duration) -> Self {
        Self { ledger, interval }
    }

    /// Runs until cancelled or the queue stops.
    ///
    /// Starts at `start`, or at the head seen on the first poll. Gaps
    /// between two polls are filled block by block. Returns the next block
    /// that would have been queued.
    pub async fn run(&self, start: Option<u64>, queue: &BlockQueue, cancel: &CancelHandle) -> u64 {
        let mut next = start;

        loop {
            match self.ledger.block_number().await {
                Ok(head) => {
                    let from = *next.get_or_insert(head);
                    if from <= head {
                        debug!(from, head, "queueing blocks");
                    }
                    for block in from..=head {
                        if !queue.enqueue(block) {
                            info!(block, "block queue closed, watcher stopping");
                            return block;
                        }
                    }
                    next = Some(from.max(head + 1));
                }
                Err(e) => warn!(error = %e, "could not read chain head"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        next.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::ingest::queue::BlockHandler;
    use crate::ledger::MemoryLedger;

    #[derive(Default)]
    struct Seen(Mutex<Vec<u64>>);

    #[async_trait]
    impl BlockHandler for Seen {
        async fn handle(&self, block: u64) {
            self.0.lock().unwrap().push(block);
        }
    }

    #[tokio::test]
    async fn test_fills_gaps_between_polls() {
        let ledger = Arc::new(MemoryLedger::new());
        let seen = Arc::new(Seen::default());
        let (queue, task) = BlockQueue::spawn(Arc::clone(&seen));
        let cancel = CancelHandle::new();

        let watcher = BlockWatcher::new(ledger.clone(), Duration::from_millis(10));
        let run = {
            let cancel = cancel.clone();
            async move {
                let next = watcher.run(Some(0), &queue, &cancel).await;
                drop(queue);
                next
            }
        };
        let driver = async {
            tokio::time::sleep(Duration::from_millis(25)).await;
            for _ in 0..3 {
                ledger.mine().unwrap();
            }
            tokio::time::sleep(Duration::from_millis(40)).await;
            cancel.cancel();
        };

        let (next, ()) = tokio::join!(run, driver);
        task.await.unwrap();

        assert_eq!(next, 4);
        assert_eq!(*seen.0.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_starts_at_head_without_start_block() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.mine().unwrap();
        ledger.mine().unwrap();

        let seen = Arc::new(Seen::default());
        let (queue, task) = BlockQueue::spawn(Arc::clone(&seen));
        let cancel = CancelHandle::new();
        cancel.cancel();

        let next = BlockWatcher::new(ledger, Duration::from_millis(10))
            .run(None, &queue, &cancel)
            .await;
        drop(queue);
        task.await.unwrap();

        assert_eq!(next, 3);
        assert_eq!(*seen.0.lock().unwrap(), vec![2]);
    }
}
