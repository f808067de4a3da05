//! Reprocessing of blocks recorded in `failed_blocks`.

use crate::{
    CycleOutcome, IngestError, IngestWorker, Metrics, RetryConfig,
    el::{
        fetch::{fetch_receipts, fetch_transactions},
        index_block,
    },
};
use async_trait::async_trait;
use std::sync::Arc;
use tally_rpc::ExecutionProvider;
use tally_storage::{BLOCKS_EL, BlockWriter, FailedBlockStore, IndexedBlock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Worker name of the [`RetryWorker`].
pub const FAILED_BLOCKS_RETRY: &str = "failed_blocks_retry";

/// Re-fetches and rewrites unresolved failed execution-layer blocks, least attempted first.
///
/// The worker never reads or moves the ingestion cursor and can run next to the pipeline. Like
/// the pipeline, it drops transactions whose body or receipt cannot be fetched and resolves the
/// block with the remaining ones.
#[derive(Debug)]
pub struct RetryWorker<E, S> {
    provider: E,
    store: Arc<S>,
    config: RetryConfig,
    cancel: CancellationToken,
}

impl<E, S> RetryWorker<E, S>
where
    E: ExecutionProvider,
    S: BlockWriter + FailedBlockStore,
{
    /// Creates a retry worker.
    pub const fn new(
        provider: E,
        store: Arc<S>,
        config: RetryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self { provider, store, config, cancel }
    }

    /// Retries the next batch of unresolved blocks.
    pub async fn run_once(&self) -> Result<CycleOutcome, IngestError> {
        let failed = self.store.unresolved(BLOCKS_EL, self.config.batch_size.max(1)).await?;
        if failed.is_empty() {
            debug!(target: "ingest::retry", "No failed blocks");
            return Ok(CycleOutcome::Idle);
        }

        let (mut resolved, mut pending) = (0u32, 0u32);
        for entry in failed {
            if self.cancel.is_cancelled() {
                break;
            }
            let height = entry.height;
            match self.reprocess(height).await {
                Ok((block, dropped)) => {
                    resolved += 1;
                    Metrics::record_retry("resolved");
                    info!(
                        target: "ingest::retry",
                        height,
                        attempts = entry.attempts,
                        transactions = block.transactions.len(),
                        dropped,
                        "Resolved failed block"
                    );
                }
                Err(err) if !err.kind().is_terminal() => {
                    pending += 1;
                    Metrics::record_retry("failed");
                    warn!(target: "ingest::retry", height, attempts = entry.attempts, %err, "Retry failed");
                    self.store.record_failure(BLOCKS_EL, height, &err.to_string()).await?;
                }
                Err(err) => return Err(err),
            }
        }

        info!(target: "ingest::retry", resolved, pending, "Finished retry batch");
        Ok(CycleOutcome::Progressed)
    }

    /// Rewrites block `height` and returns it with the number of dropped transactions.
    async fn reprocess(&self, height: u64) -> Result<(IndexedBlock, usize), IngestError> {
        let header = self.provider.block_header(height).await?;

        let transactions = fetch_transactions(
            &self.provider,
            height,
            &header.transaction_hashes,
            self.config.tx_concurrency,
        )
        .await;
        if transactions.missing > 0 {
            Metrics::record_dropped("transaction", transactions.missing);
        }

        let pairs = fetch_receipts(
            &self.provider,
            height,
            transactions.items,
            self.config.receipt_concurrency,
        )
        .await;
        if pairs.missing > 0 {
            Metrics::record_dropped("receipt", pairs.missing);
        }

        let block = index_block(&header, pairs.items);
        self.store.replace_block(BLOCKS_EL, &block).await?;
        Ok((block, transactions.missing + pairs.missing))
    }
}

#[async_trait]
impl<E, S> IngestWorker for RetryWorker<E, S>
where
    E: ExecutionProvider,
    S: BlockWriter + FailedBlockStore,
{
    fn name(&self) -> &'static str {
        FAILED_BLOCKS_RETRY
    }

    async fn run_cycle(&mut self) -> Result<CycleOutcome, IngestError> {
        self.run_once().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ElPipeline, PipelineConfig, StageProviders,
        test_utils::{MemoryExecution, MemoryStore},
    };
    use tally_storage::CursorStore;

    fn worker(
        chain: &MemoryExecution,
        store: &Arc<MemoryStore>,
    ) -> RetryWorker<MemoryExecution, MemoryStore> {
        RetryWorker::new(
            chain.clone(),
            Arc::clone(store),
            RetryConfig { batch_size: 10, tx_concurrency: 2, receipt_concurrency: 2 },
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_failed_block_does_not_stall_cursor_and_is_repaired() {
        let chain = MemoryExecution::with_chain(8, 3);
        chain.fail_header(4);
        let store = Arc::new(MemoryStore::default());
        let pipeline = ElPipeline::new(
            StageProviders::cloned(chain.clone()),
            Arc::clone(&store),
            PipelineConfig::default(),
            CancellationToken::new(),
        );

        pipeline.run_once().await.unwrap();
        assert_eq!(store.cursor(BLOCKS_EL).await.unwrap(), Some(8));
        assert_eq!(store.failed(BLOCKS_EL).len(), 1);
        assert!(store.block(4).is_none());

        let retry = worker(&chain, &store);
        assert_eq!(retry.run_once().await.unwrap(), CycleOutcome::Progressed);
        // Still unavailable: the entry stays and its attempts grow.
        assert_eq!(store.failed(BLOCKS_EL)[0].attempts, 2);

        chain.heal();
        retry.run_once().await.unwrap();

        assert!(store.failed(BLOCKS_EL).is_empty());
        let repaired = store.block(4).unwrap();
        let fresh = index_block(&chain.header(4).unwrap(), chain.items(4));
        assert_eq!(repaired, fresh);
        assert_eq!(store.cursor_value(BLOCKS_EL), Some(8));
        assert_eq!(retry.run_once().await.unwrap(), CycleOutcome::Idle);
    }

    #[tokio::test]
    async fn test_unavailable_receipt_is_dropped_and_block_resolved() {
        let chain = MemoryExecution::with_chain(3, 2);
        let store = Arc::new(MemoryStore::default());
        store.record_failure(BLOCKS_EL, 2, "header unavailable").await.unwrap();
        let lost = chain.header(2).unwrap().transaction_hashes[0];
        chain.fail_receipt(lost);

        worker(&chain, &store).run_once().await.unwrap();

        let block = store.block(2).unwrap();
        assert_eq!(block.block.transaction_count, 2);
        assert_eq!(block.transactions.len(), 1);
        assert!(block.transactions.iter().all(|tx| tx.hash != lost));
        assert!(store.failed(BLOCKS_EL).is_empty());
        assert_eq!(store.cursor_value(BLOCKS_EL), None);
    }

    #[tokio::test]
    async fn test_stuck_entries_do_not_starve_later_heights() {
        let chain = MemoryExecution::with_chain(3, 1);
        chain.fail_header(1);
        chain.fail_header(2);
        let store = Arc::new(MemoryStore::default());
        for height in 1..=3 {
            store.record_failure(BLOCKS_EL, height, "header unavailable").await.unwrap();
        }
        let retry = RetryWorker::new(
            chain.clone(),
            Arc::clone(&store),
            RetryConfig { batch_size: 2, tx_concurrency: 1, receipt_concurrency: 1 },
            CancellationToken::new(),
        );

        retry.run_once().await.unwrap();
        assert!(store.block(3).is_none());

        retry.run_once().await.unwrap();
        assert!(store.block(3).is_some());
        let open: Vec<_> = store.failed(BLOCKS_EL).iter().map(|f| (f.height, f.attempts)).collect();
        assert_eq!(open, vec![(1, 3), (2, 2)]);
    }

    #[tokio::test]
    async fn test_replace_drops_stale_rows() {
        let chain = MemoryExecution::with_chain(3, 3);
        let store = Arc::new(MemoryStore::default());
        let pipeline = ElPipeline::new(
            StageProviders::cloned(chain.clone()),
            Arc::clone(&store),
            PipelineConfig::default(),
            CancellationToken::new(),
        );
        // The receipt of one transaction is lost on the first pass.
        let lost = chain.header(2).unwrap().transaction_hashes[2];
        chain.fail_receipt(lost);
        pipeline.run_once().await.unwrap();
        assert_eq!(store.block(2).unwrap().transactions.len(), 2);

        store.record_failure(BLOCKS_EL, 2, "incomplete").await.unwrap();
        chain.heal();
        worker(&chain, &store).run_once().await.unwrap();

        assert_eq!(store.block(2).unwrap().transactions.len(), 3);
        assert!(store.failed(BLOCKS_EL).is_empty());
    }

    #[tokio::test]
    async fn test_fatal_replace_failure_aborts() {
        let chain = MemoryExecution::with_chain(3, 1);
        let store = Arc::new(MemoryStore::default());
        store.record_failure(BLOCKS_EL, 1, "x").await.unwrap();
        store.fail_write_fatally(1);

        let err = worker(&chain, &store).run_once().await.unwrap_err();
        assert!(err.kind().is_terminal());
        assert_eq!(store.failed(BLOCKS_EL)[0].attempts, 1);
    }
}
