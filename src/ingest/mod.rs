//! Block ingestion.
//!
//! [`watcher::BlockWatcher`] discovers new block numbers, the
//! [`queue::BlockQueue`] executor runs them strictly in ascending order,
//! and [`pipeline::Pipeline`] processes each one with bounded concurrent
//! transaction fetches.

pub mod pipeline;
pub mod queue;
pub mod watcher;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::ledger::{CancelHandle, LedgerError, Poller};

pub use pipeline::{BlockReport, IngestError, Pipeline, ReceiveFailure};
pub use queue::{BlockHandler, BlockQueue};
pub use watcher::BlockWatcher;

/// Queue handler that processes each block and forwards its report.
///
/// A block that is not yet visible or whose fetches fail is retried by
/// `retry`; if it still fails it is skipped with a warning.
pub struct Ingestor {
    pipeline: Pipeline,
    reports: mpsc::UnboundedSender<BlockReport>,
    retry: Poller,
    cancel: CancelHandle,
}

impl Ingestor {
    pub fn new(
        pipeline: Pipeline,
        reports: mpsc::UnboundedSender<BlockReport>,
        retry: Poller,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            pipeline,
            reports,
            retry,
            cancel,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

#[async_trait]
impl BlockHandler for Ingestor {
    async fn handle(&self, block: u64) {
        let result = self
            .retry
            .until(&self.cancel, || async {
                match self.pipeline.process_block(block).await {
                    Ok(report) => Ok(Some(report)),
                    Err(IngestError::BlockNotFound(_)) => Ok(None),
                    Err(IngestError::Ledger(e)) => Err::<_, LedgerError>(e),
                }
            })
            .await;

        match result {
            Ok(report) => {
                // The receiver is gone only during shutdown.
                let _ = self.reports.send(report);
            }
            Err(e) => warn!(block, error = %e, "block skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::ingest::pipeline::tests::{broadcast_intents, send_batch};
    use crate::ledger::MemoryLedger;
    use crate::session::tests::session;
    use crate::session::InboundEvent;

    #[tokio::test]
    async fn test_ingestor_reports_blocks_in_order() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.mine().unwrap();
        ledger.mine().unwrap();

        let pipeline = Pipeline::new(Arc::new(session()), ledger, 4);
        let (reports_tx, mut reports) = mpsc::unbounded_channel();
        let ingestor = Ingestor::new(
            pipeline,
            reports_tx,
            Poller::new(Duration::from_millis(1), 2),
            CancelHandle::new(),
        );
        let (queue, task) = BlockQueue::spawn(Arc::new(ingestor));

        for block in [2, 0, 1, 7] {
            queue.enqueue(block);
        }
        drop(queue);
        task.await.unwrap();

        let mut seen = Vec::new();
        while let Ok(report) = reports.try_recv() {
            seen.push(report.block);
        }
        // Block 7 never appears and is skipped after its retries.
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failed_fetches_are_retried_and_reported_once() {
        let ledger = Arc::new(MemoryLedger::new());
        let (alice, bob) = (session(), Arc::new(session()));
        let (wallet, intents) = broadcast_intents(&alice, &bob).await;
        let block = send_batch(&ledger, &wallet, &intents).await;
        ledger.fail_next_fetches(30);

        let pipeline = Pipeline::new(Arc::clone(&bob), ledger, 4);
        let (reports_tx, mut reports) = mpsc::unbounded_channel();
        let ingestor = Ingestor::new(
            pipeline,
            reports_tx,
            Poller::new(Duration::from_millis(1), 5),
            CancelHandle::new(),
        );
        let (queue, task) = BlockQueue::spawn(Arc::new(ingestor));
        queue.enqueue(block);
        drop(queue);
        task.await.unwrap();

        let report = reports.try_recv().unwrap();
        assert_eq!(report.block, block);
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert!(matches!(
            report.events.as_slice(),
            [InboundEvent::PeerAnnounced { peer, .. }] if *peer == alice.address()
        ));
        assert!(reports.try_recv().is_err());
    }
}
