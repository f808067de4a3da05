//! Tuning knobs of the ingestion workers.

use std::time::Duration;

/// Extra pool connections on top of the pipeline stage widths, for the consensus, snapshot and
/// retry workers.
pub const POOL_HEADROOM: u32 = 8;

/// Configuration of the execution-layer pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Headers fetched concurrently.
    pub header_concurrency: usize,
    /// Transactions fetched concurrently per block.
    pub tx_concurrency: usize,
    /// Receipts fetched concurrently per block.
    pub receipt_concurrency: usize,
    /// Maximum heights processed per cycle.
    pub batch_size: u64,
    /// Items a stage queue holds before its producer pauses.
    pub max_queue_depth: usize,
    /// Pause between attempts to enqueue into a full queue.
    pub backpressure_poll: Duration,
    /// First height indexed when no cursor exists.
    pub start_height: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            header_concurrency: 24,
            tx_concurrency: 24,
            receipt_concurrency: 48,
            batch_size: 512,
            max_queue_depth: 100,
            backpressure_poll: Duration::from_millis(50),
            start_height: 1,
        }
    }
}

impl PipelineConfig {
    /// Default size of the shared connection pool: the sum of the stage widths plus
    /// [`POOL_HEADROOM`].
    pub fn pool_size(&self) -> u32 {
        let stages = self.header_concurrency + self.tx_concurrency + self.receipt_concurrency;
        u32::try_from(stages).unwrap_or(u32::MAX).saturating_add(POOL_HEADROOM)
    }
}

/// Configuration of the consensus-layer absence worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsenceConfig {
    /// Maximum heights processed, and committed together, per cycle.
    pub batch_size: u64,
    /// Heights between validator-set refreshes.
    pub refresh_interval: u64,
}

impl Default for AbsenceConfig {
    fn default() -> Self {
        Self { batch_size: 100, refresh_interval: 1000 }
    }
}

/// Configuration of the failed-block retry worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Failed blocks retried per cycle.
    pub batch_size: u32,
    /// Transactions fetched concurrently per block.
    pub tx_concurrency: usize,
    /// Receipts fetched concurrently per block.
    pub receipt_concurrency: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { batch_size: 10, tx_concurrency: 24, receipt_concurrency: 48 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size() {
        assert_eq!(PipelineConfig::default().pool_size(), 24 + 24 + 48 + 8);
        let narrow = PipelineConfig {
            header_concurrency: 1,
            tx_concurrency: 2,
            receipt_concurrency: 4,
            ..Default::default()
        };
        assert_eq!(narrow.pool_size(), 15);
    }
}
