//! Periodic execution of ingestion workers with consecutive-failure gating.

use crate::{FailureKind, IngestError, Metrics, WorkerError};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Result of a successful cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing to do.
    Idle,
    /// Work was done and the worker caught up.
    Progressed,
    /// Work was done and more is immediately available.
    Behind,
}

/// A unit of ingestion run repeatedly by a [`WorkerRunner`].
///
/// Implementations check their cancellation token at every loop boundary and return early once
/// it is cancelled, after finishing the unit of work in flight.
#[async_trait]
pub trait IngestWorker: Send {
    /// Name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Runs one cycle.
    async fn run_cycle(&mut self) -> Result<CycleOutcome, IngestError>;
}

/// Drives an [`IngestWorker`] on a fixed interval.
///
/// Retryable failures increment a consecutive-failure counter and the cycle is retried after the
/// interval. Reaching the threshold stops the worker with [`WorkerError::CircuitOpen`]. Fatal and
/// constraint-violation failures stop it immediately with [`WorkerError::Fatal`]. A successful
/// cycle resets the counter.
#[derive(Debug)]
pub struct WorkerRunner<W> {
    worker: W,
    interval: Duration,
    failure_threshold: u32,
    cancel: CancellationToken,
}

impl<W: IngestWorker> WorkerRunner<W> {
    /// Creates a runner.
    pub const fn new(
        worker: W,
        interval: Duration,
        failure_threshold: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self { worker, interval, failure_threshold, cancel }
    }

    /// Runs cycles until cancelled or stopped by a failure.
    pub async fn run(mut self) -> Result<(), WorkerError> {
        let worker = self.worker.name();
        let threshold = self.failure_threshold.max(1);
        let mut failures = 0u32;
        info!(target: "ingest::worker", worker, interval = ?self.interval, "Started worker");

        while !self.cancel.is_cancelled() {
            let started = Instant::now();
            let result = self.worker.run_cycle().await;
            let elapsed = started.elapsed();

            let outcome = match result {
                Ok(outcome) => {
                    if failures > 0 {
                        info!(target: "ingest::worker", worker, failures, "Worker recovered");
                    }
                    failures = 0;
                    Metrics::record_cycle(worker, "success", elapsed, failures);
                    outcome
                }
                Err(err) => match err.kind() {
                    FailureKind::Retryable => {
                        failures += 1;
                        Metrics::record_cycle(worker, "retryable", elapsed, failures);
                        warn!(
                            target: "ingest::worker",
                            worker,
                            failures,
                            threshold,
                            %err,
                            "Cycle failed"
                        );
                        if failures >= threshold {
                            error!(target: "ingest::worker", worker, failures, "Failure threshold reached, stopping worker");
                            return Err(WorkerError::CircuitOpen { worker, failures, last: err });
                        }
                        CycleOutcome::Idle
                    }
                    kind => {
                        Metrics::record_cycle(worker, "fatal", elapsed, failures);
                        error!(target: "ingest::worker", worker, %kind, %err, "Unrecoverable failure");
                        return Err(WorkerError::Fatal { worker, kind, source: err });
                    }
                },
            };

            if outcome == CycleOutcome::Behind {
                continue;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(target: "ingest::worker", worker, "Stopped worker");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::transient_storage_error;
    use mockall::{Sequence, mock};
    use tally_storage::StorageError;

    mock! {
        Worker {}

        #[async_trait]
        impl IngestWorker for Worker {
            fn name(&self) -> &'static str;
            async fn run_cycle(&mut self) -> Result<CycleOutcome, IngestError>;
        }
    }

    fn transient() -> IngestError {
        IngestError::Storage(transient_storage_error())
    }

    fn runner(worker: MockWorker, threshold: u32) -> WorkerRunner<MockWorker> {
        WorkerRunner::new(worker, Duration::from_secs(15), threshold, CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_circuit_after_threshold() {
        let mut worker = MockWorker::new();
        worker.expect_name().return_const("blocks_el");
        worker.expect_run_cycle().times(3).returning(|| Err(transient()));

        let err = runner(worker, 3).run().await.unwrap_err();
        assert!(matches!(err, WorkerError::CircuitOpen { failures: 3, worker: "blocks_el", .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_counter() {
        let mut worker = MockWorker::new();
        worker.expect_name().return_const("cl_absences");
        let mut seq = Sequence::new();
        for _ in 0..2 {
            worker
                .expect_run_cycle()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|| Err(transient()));
            worker
                .expect_run_cycle()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|| Ok(CycleOutcome::Progressed));
        }
        worker.expect_run_cycle().times(3).in_sequence(&mut seq).returning(|| Err(transient()));

        let err = runner(worker, 3).run().await.unwrap_err();
        assert!(matches!(err, WorkerError::CircuitOpen { failures: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_stops_immediately() {
        let mut worker = MockWorker::new();
        worker.expect_name().return_const("retry");
        worker.expect_run_cycle().times(1).returning(|| {
            Err(IngestError::Storage(StorageError::OutOfRange { column: "blocks.height", value: 0 }))
        });

        let err = runner(worker, 5).run().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, WorkerError::Fatal { kind: FailureKind::Fatal, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_between_cycles() {
        let cancel = CancellationToken::new();
        let mut worker = MockWorker::new();
        worker.expect_name().return_const("snapshot");
        let token = cancel.clone();
        worker.expect_run_cycle().times(2).returning(move || {
            if token.is_cancelled() {
                return Ok(CycleOutcome::Idle);
            }
            Ok(CycleOutcome::Progressed)
        });

        let handle = tokio::spawn(
            WorkerRunner::new(worker, Duration::from_secs(10), 5, cancel.clone()).run(),
        );
        tokio::time::sleep(Duration::from_secs(15)).await;
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_behind_skips_the_interval() {
        let cancel = CancellationToken::new();
        let mut worker = MockWorker::new();
        worker.expect_name().return_const("blocks_el");
        let mut seq = Sequence::new();
        worker
            .expect_run_cycle()
            .times(3)
            .in_sequence(&mut seq)
            .returning(|| Ok(CycleOutcome::Behind));
        let token = cancel.clone();
        worker.expect_run_cycle().times(1).in_sequence(&mut seq).returning(move || {
            token.cancel();
            Ok(CycleOutcome::Progressed)
        });

        let started = tokio::time::Instant::now();
        WorkerRunner::new(worker, Duration::from_secs(60), 5, cancel).run().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
