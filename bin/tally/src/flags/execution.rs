use crate::flags::EndpointList;
use clap::Args;
use std::time::Duration;
use tally_ingest::{PipelineConfig, RetryConfig};

/// Execution-layer pipeline arguments.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ExecutionArgs {
    /// Execution-layer JSON-RPC endpoints, separated by `,` or `;`.
    #[arg(id = "el.rpc", long = "el.rpc", env = "EL_RPC_URLS")]
    pub rpc: EndpointList,
    /// Headers fetched concurrently.
    #[arg(long = "el.header-concurrency", env = "EL_HEADER_CONCURRENCY", default_value_t = 24)]
    pub header_concurrency: usize,
    /// Transactions fetched concurrently per block.
    #[arg(long = "el.tx-concurrency", env = "EL_TX_CONCURRENCY", default_value_t = 24)]
    pub tx_concurrency: usize,
    /// Receipts fetched concurrently per block. Defaults to twice the transaction concurrency.
    #[arg(long = "el.receipt-concurrency", env = "EL_RECEIPT_CONCURRENCY")]
    pub receipt_concurrency: Option<usize>,
    /// Maximum heights processed per cycle.
    #[arg(id = "el.batch-size", long = "el.batch-size", env = "EL_BATCH_SIZE", default_value_t = 512)]
    pub batch_size: u64,
    /// Items a stage queue holds before its producer pauses.
    #[arg(long = "el.max-queue-depth", env = "EL_MAX_QUEUE_DEPTH", default_value_t = 100)]
    pub max_queue_depth: usize,
    /// Pause between attempts to enqueue into a full queue, in milliseconds.
    #[arg(long = "el.backpressure-poll-ms", env = "EL_BACKPRESSURE_POLL_MS", default_value_t = 50)]
    pub backpressure_poll_ms: u64,
    /// First height indexed when no cursor exists.
    #[arg(long = "el.start-height", env = "EL_START_HEIGHT", default_value_t = 1)]
    pub start_height: u64,
    /// Failed blocks retried per cycle.
    #[arg(long = "retry.batch-size", env = "RETRY_BATCH_SIZE", default_value_t = 10)]
    pub retry_batch_size: u32,
}

impl ExecutionArgs {
    /// Returns the pipeline configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            header_concurrency: self.header_concurrency,
            tx_concurrency: self.tx_concurrency,
            receipt_concurrency: self.receipt_concurrency(),
            batch_size: self.batch_size,
            max_queue_depth: self.max_queue_depth,
            backpressure_poll: Duration::from_millis(self.backpressure_poll_ms),
            start_height: self.start_height,
        }
    }

    /// Returns the retry worker configuration.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            batch_size: self.retry_batch_size,
            tx_concurrency: self.tx_concurrency,
            receipt_concurrency: self.receipt_concurrency(),
        }
    }

    fn receipt_concurrency(&self) -> usize {
        self.receipt_concurrency.unwrap_or(self.tx_concurrency.saturating_mul(2))
    }
}
