use std::time::Duration;

/// Metric identifiers and recording helpers for the ingestion workers.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Counter of execution-layer blocks committed.
    pub const BLOCKS_WRITTEN_TOTAL: &'static str = "tally_blocks_written_total";
    /// Counter of blocks that could not be written, labelled by failure kind.
    pub const BLOCK_WRITE_ERRORS_TOTAL: &'static str = "tally_block_write_errors_total";
    /// Counter of transactions or receipts dropped from a persisted block.
    pub const ITEMS_DROPPED_TOTAL: &'static str = "tally_items_dropped_total";
    /// Gauge of items waiting in a pipeline queue.
    pub const QUEUE_DEPTH: &'static str = "tally_queue_depth";
    /// Counter of sends that found their queue full.
    pub const QUEUE_THROTTLED_TOTAL: &'static str = "tally_queue_throttled_total";
    /// Gauge of the last height committed per cursor module.
    pub const CURSOR_HEIGHT: &'static str = "tally_cursor_height";
    /// Counter of consensus heights processed by the absence worker.
    pub const ABSENCE_HEIGHTS_TOTAL: &'static str = "tally_absence_heights_total";
    /// Counter of validator-set cache refreshes.
    pub const VALIDATOR_SET_REFRESH_TOTAL: &'static str = "tally_validator_set_refresh_total";
    /// Counter of failed-block retries, labelled by result.
    pub const BLOCK_RETRIES_TOTAL: &'static str = "tally_block_retries_total";
    /// Histogram of worker cycle durations.
    pub const WORKER_CYCLE_DURATION_SECONDS: &'static str = "tally_worker_cycle_duration_seconds";
    /// Counter of worker cycles, labelled by outcome.
    pub const WORKER_CYCLES_TOTAL: &'static str = "tally_worker_cycles_total";
    /// Gauge of consecutive failed cycles per worker.
    pub const WORKER_CONSECUTIVE_FAILURES: &'static str = "tally_worker_consecutive_failures";

    /// Describes and zeroes the ingestion metrics.
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    fn describe() {
        metrics::describe_counter!(
            Self::BLOCKS_WRITTEN_TOTAL,
            metrics::Unit::Count,
            "Execution-layer blocks committed to the store",
        );
        metrics::describe_counter!(
            Self::BLOCK_WRITE_ERRORS_TOTAL,
            metrics::Unit::Count,
            "Blocks that failed to be fetched or written",
        );
        metrics::describe_counter!(
            Self::ITEMS_DROPPED_TOTAL,
            metrics::Unit::Count,
            "Transactions or receipts omitted from a persisted block",
        );
        metrics::describe_gauge!(
            Self::QUEUE_DEPTH,
            metrics::Unit::Count,
            "Items waiting in a pipeline stage queue",
        );
        metrics::describe_counter!(
            Self::QUEUE_THROTTLED_TOTAL,
            metrics::Unit::Count,
            "Sends paused because the stage queue reached its maximum depth",
        );
        metrics::describe_gauge!(
            Self::CURSOR_HEIGHT,
            metrics::Unit::Count,
            "Last height committed per cursor module",
        );
        metrics::describe_counter!(
            Self::ABSENCE_HEIGHTS_TOTAL,
            metrics::Unit::Count,
            "Consensus heights with computed absence data",
        );
        metrics::describe_counter!(
            Self::VALIDATOR_SET_REFRESH_TOTAL,
            metrics::Unit::Count,
            "Validator-set cache refreshes",
        );
        metrics::describe_counter!(
            Self::BLOCK_RETRIES_TOTAL,
            metrics::Unit::Count,
            "Failed-block retries by result",
        );
        metrics::describe_histogram!(
            Self::WORKER_CYCLE_DURATION_SECONDS,
            metrics::Unit::Seconds,
            "Duration of a worker cycle",
        );
        metrics::describe_counter!(
            Self::WORKER_CYCLES_TOTAL,
            metrics::Unit::Count,
            "Worker cycles by outcome",
        );
        metrics::describe_gauge!(
            Self::WORKER_CONSECUTIVE_FAILURES,
            metrics::Unit::Count,
            "Consecutive failed cycles of a worker",
        );
    }

    fn zero() {
        metrics::counter!(Self::BLOCKS_WRITTEN_TOTAL).increment(0);
        metrics::counter!(Self::ABSENCE_HEIGHTS_TOTAL).increment(0);
        metrics::counter!(Self::VALIDATOR_SET_REFRESH_TOTAL).increment(0);
    }

    pub(crate) fn record_block_written(height: u64) {
        metrics::counter!(Self::BLOCKS_WRITTEN_TOTAL).increment(1);
        metrics::gauge!(Self::CURSOR_HEIGHT, "module" => tally_storage::BLOCKS_EL)
            .set(height as f64);
    }

    pub(crate) fn record_block_error(kind: &'static str) {
        metrics::counter!(Self::BLOCK_WRITE_ERRORS_TOTAL, "kind" => kind).increment(1);
    }

    pub(crate) fn record_dropped(item: &'static str, count: usize) {
        metrics::counter!(Self::ITEMS_DROPPED_TOTAL, "item" => item).increment(count as u64);
    }

    pub(crate) fn set_queue_depth(stage: &'static str, depth: usize) {
        metrics::gauge!(Self::QUEUE_DEPTH, "stage" => stage).set(depth as f64);
    }

    pub(crate) fn record_throttled(stage: &'static str) {
        metrics::counter!(Self::QUEUE_THROTTLED_TOTAL, "stage" => stage).increment(1);
    }

    pub(crate) fn record_absence_batch(heights: u64, cursor: u64) {
        metrics::counter!(Self::ABSENCE_HEIGHTS_TOTAL).increment(heights);
        metrics::gauge!(Self::CURSOR_HEIGHT, "module" => tally_storage::CL_ABSENCES)
            .set(cursor as f64);
    }

    pub(crate) fn record_validator_refresh() {
        metrics::counter!(Self::VALIDATOR_SET_REFRESH_TOTAL).increment(1);
    }

    pub(crate) fn record_retry(result: &'static str) {
        metrics::counter!(Self::BLOCK_RETRIES_TOTAL, "result" => result).increment(1);
    }

    pub(crate) fn record_cycle(
        worker: &'static str,
        outcome: &'static str,
        elapsed: Duration,
        consecutive_failures: u32,
    ) {
        metrics::histogram!(Self::WORKER_CYCLE_DURATION_SECONDS, "worker" => worker)
            .record(elapsed.as_secs_f64());
        metrics::counter!(Self::WORKER_CYCLES_TOTAL, "worker" => worker, "outcome" => outcome)
            .increment(1);
        metrics::gauge!(Self::WORKER_CONSECUTIVE_FAILURES, "worker" => worker)
            .set(consecutive_failures as f64);
    }
}
