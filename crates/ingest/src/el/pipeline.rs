//! The four-stage execution-layer ingestion pipeline.
//!
//! ```text
//!  headers ──▶ [queue] ──▶ transactions ──▶ [queue] ──▶ receipts ──▶ [queue] ──▶ writer
//! ```
//!
//! Each stage runs concurrently with the others and owns its own provider. Queues are FIFO and
//! bounded, so every stage sees heights in ascending order and a slow writer throttles the fetch
//! stages. Only the writer touches the store: it commits one block per transaction, in height
//! order, advancing the cursor with it.

use crate::{
    CycleOutcome, IngestError, IngestWorker, Metrics, PipelineConfig,
    el::{
        fetch::{fetch_receipts, fetch_transactions},
        index_block,
        queue::{QueueReceiver, QueueSender, queue},
    },
};
use async_trait::async_trait;
use futures::StreamExt;
use std::{sync::Arc, time::Instant};
use tally_rpc::ExecutionProvider;
use tally_storage::{BLOCKS_EL, BlockWriter, CursorStore, FailedBlockStore};
use tally_types::{BlockHeader, Receipt, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One execution-layer client per fetch stage.
#[derive(Debug, Clone)]
pub struct StageProviders<E> {
    /// Serves `eth_blockNumber` and header requests.
    pub headers: E,
    /// Serves transaction requests.
    pub transactions: E,
    /// Serves receipt requests.
    pub receipts: E,
}

impl<E: Clone> StageProviders<E> {
    /// Uses clones of the same provider for every stage.
    pub fn cloned(provider: E) -> Self {
        Self { headers: provider.clone(), transactions: provider.clone(), receipts: provider }
    }
}

/// A pipeline slot: either the data fetched so far for a height, or the reason it failed.
#[derive(Debug)]
enum Slot<T> {
    Ready(T),
    Failed { height: u64, error: String },
}

#[derive(Debug)]
struct WithTransactions {
    header: BlockHeader,
    transactions: Vec<Transaction>,
}

#[derive(Debug)]
struct WithReceipts {
    header: BlockHeader,
    items: Vec<(Transaction, Receipt)>,
}

#[derive(Debug, Default)]
struct WriteSummary {
    written: u64,
    failed: u64,
    transactions: u64,
    last: Option<u64>,
}

/// Execution-layer block ingestion from the cursor up to the chain head.
#[derive(Debug)]
pub struct ElPipeline<E, S> {
    providers: StageProviders<E>,
    store: Arc<S>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl<E, S> ElPipeline<E, S>
where
    E: ExecutionProvider,
    S: CursorStore + BlockWriter + FailedBlockStore,
{
    /// Creates a pipeline.
    pub const fn new(
        providers: StageProviders<E>,
        store: Arc<S>,
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self { providers, store, config, cancel }
    }

    /// Processes the next range of heights. Returns `Behind` if the chain head lies beyond it.
    pub async fn run_once(&self) -> Result<CycleOutcome, IngestError> {
        let head = self.providers.headers.block_number().await?;
        let start = match self.store.cursor(BLOCKS_EL).await? {
            Some(cursor) => cursor + 1,
            None => self.config.start_height,
        };
        if start > head {
            debug!(target: "ingest::pipeline", start, head, "No new blocks");
            return Ok(CycleOutcome::Idle);
        }
        let end = head.min(start.saturating_add(self.config.batch_size.max(1) - 1));

        let started = Instant::now();
        info!(target: "ingest::pipeline", start, end, head, "Processing block range");

        let depth = self.config.max_queue_depth;
        let poll = self.config.backpressure_poll;
        let (headers_tx, headers_rx) = queue("headers", depth, poll);
        let (txs_tx, txs_rx) = queue("transactions", depth, poll);
        let (receipts_tx, receipts_rx) = queue("receipts", depth, poll);

        let (_, _, _, summary) = tokio::join!(
            self.header_stage(start, end, headers_tx),
            self.transaction_stage(headers_rx, txs_tx),
            self.receipt_stage(txs_rx, receipts_tx),
            self.write_stage(receipts_rx),
        );
        let summary = summary?;

        info!(
            target: "ingest::pipeline",
            start,
            end,
            written = summary.written,
            failed = summary.failed,
            transactions = summary.transactions,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Processed block range"
        );

        if summary.last == Some(end) && end < head {
            Ok(CycleOutcome::Behind)
        } else {
            Ok(CycleOutcome::Progressed)
        }
    }

    /// Fetches headers for `start..=end`, up to `header_concurrency` in flight, in height order.
    async fn header_stage(&self, start: u64, end: u64, out: QueueSender<Slot<BlockHeader>>) {
        let provider = &self.providers.headers;
        let mut headers = futures::stream::iter(start..=end)
            .map(|height| async move { (height, provider.block_header(height).await) })
            .buffered(self.config.header_concurrency.max(1));

        while let Some((height, result)) = headers.next().await {
            if self.cancel.is_cancelled() {
                break;
            }
            let slot = match result {
                Ok(header) => Slot::Ready(header),
                Err(err) => {
                    warn!(target: "ingest::pipeline", height, %err, "Failed to fetch header");
                    Slot::Failed { height, error: err.to_string() }
                }
            };
            if out.send(slot, &self.cancel).await.is_err() {
                break;
            }
        }
    }

    async fn transaction_stage(
        &self,
        mut input: QueueReceiver<Slot<BlockHeader>>,
        out: QueueSender<Slot<WithTransactions>>,
    ) {
        while let Some(slot) = input.recv().await {
            if self.cancel.is_cancelled() {
                break;
            }
            let next = match slot {
                Slot::Ready(header) => {
                    let fetched = fetch_transactions(
                        &self.providers.transactions,
                        header.number,
                        &header.transaction_hashes,
                        self.config.tx_concurrency,
                    )
                    .await;
                    if fetched.missing > 0 {
                        Metrics::record_dropped("transaction", fetched.missing);
                    }
                    Slot::Ready(WithTransactions { header, transactions: fetched.items })
                }
                Slot::Failed { height, error } => Slot::Failed { height, error },
            };
            if out.send(next, &self.cancel).await.is_err() {
                break;
            }
        }
    }

    async fn receipt_stage(
        &self,
        mut input: QueueReceiver<Slot<WithTransactions>>,
        out: QueueSender<Slot<WithReceipts>>,
    ) {
        while let Some(slot) = input.recv().await {
            if self.cancel.is_cancelled() {
                break;
            }
            let next = match slot {
                Slot::Ready(WithTransactions { header, transactions }) => {
                    let fetched = fetch_receipts(
                        &self.providers.receipts,
                        header.number,
                        transactions,
                        self.config.receipt_concurrency,
                    )
                    .await;
                    if fetched.missing > 0 {
                        Metrics::record_dropped("receipt", fetched.missing);
                    }
                    Slot::Ready(WithReceipts { header, items: fetched.items })
                }
                Slot::Failed { height, error } => Slot::Failed { height, error },
            };
            if out.send(next, &self.cancel).await.is_err() {
                break;
            }
        }
    }

    /// Commits blocks in height order.
    ///
    /// A block that fails to be fetched or written is recorded in `failed_blocks` and the cursor
    /// moves past it in the same transaction.
    /// The stage aborts the cycle when the failure cannot be recorded, or when the write failure
    /// is fatal or a constraint violation.
    async fn write_stage(
        &self,
        mut input: QueueReceiver<Slot<WithReceipts>>,
    ) -> Result<WriteSummary, IngestError> {
        let mut summary = WriteSummary::default();

        loop {
            let slot = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                slot = input.recv() => match slot {
                    Some(slot) => slot,
                    None => break,
                },
            };

            match slot {
                Slot::Ready(WithReceipts { header, items }) => {
                    let height = header.number;
                    let block = index_block(&header, items);
                    match self.store.write_block(&block).await {
                        Ok(()) => {
                            Metrics::record_block_written(height);
                            summary.written += 1;
                            summary.transactions += block.transactions.len() as u64;
                            debug!(
                                target: "ingest::pipeline",
                                height,
                                transactions = block.transactions.len(),
                                "Wrote block"
                            );
                        }
                        Err(err) => {
                            let diagnostics = err.diagnostics().unwrap_or_default();
                            let err = IngestError::from(err);
                            let kind = err.kind();
                            Metrics::record_block_error("write");
                            error!(
                                target: "ingest::pipeline",
                                height,
                                %kind,
                                code = diagnostics.code.as_deref(),
                                constraint = diagnostics.constraint.as_deref(),
                                table = diagnostics.table.as_deref(),
                                detail = diagnostics.detail.as_deref(),
                                %err,
                                "Failed to write block"
                            );
                            self.store.record_skipped(BLOCKS_EL, height, &err.to_string()).await?;
                            summary.failed += 1;
                            if kind.is_terminal() {
                                return Err(err);
                            }
                        }
                    }
                    summary.last = Some(height);
                }
                Slot::Failed { height, error } => {
                    Metrics::record_block_error("fetch");
                    self.store.record_skipped(BLOCKS_EL, height, &error).await?;
                    summary.failed += 1;
                    summary.last = Some(height);
                }
            }
        }

        Ok(summary)
    }
}

#[async_trait]
impl<E, S> IngestWorker for ElPipeline<E, S>
where
    E: ExecutionProvider,
    S: CursorStore + BlockWriter + FailedBlockStore,
{
    fn name(&self) -> &'static str {
        BLOCKS_EL
    }

    async fn run_cycle(&mut self) -> Result<CycleOutcome, IngestError> {
        self.run_once().await
    }
}
