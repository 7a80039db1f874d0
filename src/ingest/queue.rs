//! Ordered block queue.
//!
//! One executor task owns the sorted pending set. Before every block it
//! drains all queued arrivals, so a block number enqueued out of order is
//! still processed in ascending position, and the executor only waits for
//! new work once the set is truly empty.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Work run for each block, one at a time.
#[async_trait]
pub trait BlockHandler: Send + Sync + 'static {
    async fn handle(&self, block: u64);
}

/// Producer side of the queue. Dropping every clone stops the executor
/// after it has drained what is already queued.
#[derive(Debug, Clone)]
pub struct BlockQueue {
    sender: mpsc::UnboundedSender<u64>,
}

impl BlockQueue {
    /// Starts the executor for `handler`.
    pub fn spawn<H: BlockHandler>(handler: Arc<H>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(drain(receiver, handler));
        (Self { sender }, task)
    }

    /// Queues `block`. Returns false if the executor has stopped.
    pub fn enqueue(&self, block: u64) -> bool {
        self.sender.send(block).is_ok()
    }
}

async fn drain<H: BlockHandler>(mut receiver: mpsc::UnboundedReceiver<u64>, handler: Arc<H>) {
    let mut pending = BTreeSet::new();
    let mut last_done: Option<u64> = None;

    loop {
        while let Ok(block) = receiver.try_recv() {
            pending.insert(block);
        }

        let Some(block) = pending.pop_first() else {
            match receiver.recv().await {
                Some(block) => {
                    pending.insert(block);
                    continue;
                }
                None => break,
            }
        };

        if last_done.is_some_and(|done| block <= done) {
            warn!(block, last = ?last_done, "block arrived after a later one was processed");
        }
        debug!(block, queued = pending.len(), "processing block");
        handler.handle(block).await;
        last_done = Some(last_done.map_or(block, |done| done.max(block)));
    }
}
