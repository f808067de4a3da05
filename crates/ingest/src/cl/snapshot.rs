//! Daily validator-set snapshots taken at the first block of each UTC day.

use crate::{CycleOutcome, IngestError, IngestWorker};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;
use tally_rpc::ConsensusProvider;
use tally_storage::{SnapshotEntry, SnapshotStore, ValidatorSnapshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Worker name of the [`SnapshotWorker`].
pub const VALIDATOR_SNAPSHOT: &str = "validator_snapshot";

/// Records the validator set at the first block of the current UTC day, once per day.
#[derive(Debug)]
pub struct SnapshotWorker<C, S> {
    consensus: C,
    store: Arc<S>,
    cancel: CancellationToken,
}

impl<C, S> SnapshotWorker<C, S>
where
    C: ConsensusProvider,
    S: SnapshotStore,
{
    /// Creates a snapshot worker.
    pub const fn new(consensus: C, store: Arc<S>, cancel: CancellationToken) -> Self {
        Self { consensus, store, cancel }
    }

    /// Writes today's snapshot if it does not exist yet.
    pub async fn run_once(&self) -> Result<CycleOutcome, IngestError> {
        let status = self.consensus.status().await?;
        let day = status.latest_time.date_naive();
        if self.store.has_snapshot(day).await? {
            debug!(target: "ingest::snapshot", %day, "Snapshot already taken");
            return Ok(CycleOutcome::Idle);
        }

        let midnight = day.and_time(NaiveTime::MIN).and_utc();
        let Some(boundary) =
            self.find_boundary(status.earliest_height, status.latest_height, midnight).await?
        else {
            return Ok(CycleOutcome::Idle);
        };
        let boundary_time = self.consensus.block(boundary).await?.header.time;
        if boundary == status.earliest_height && boundary > 1 {
            warn!(
                target: "ingest::snapshot",
                %day,
                boundary,
                "Earliest retained block is past midnight, using it as the boundary"
            );
        }

        let validators = self.consensus.validators(boundary).await?;
        if validators.is_empty() {
            return Err(IngestError::EmptyValidatorSet(boundary));
        }
        let snapshot = snapshot(day, boundary, boundary_time, validators);
        let entries = snapshot.entries.len();

        if self.store.write_snapshot(&snapshot).await? {
            info!(target: "ingest::snapshot", %day, boundary, entries, "Wrote validator snapshot");
            Ok(CycleOutcome::Progressed)
        } else {
            debug!(target: "ingest::snapshot", %day, "Snapshot written concurrently");
            Ok(CycleOutcome::Idle)
        }
    }

    /// Binary-searches `earliest..=latest` for the first height whose block time is at or after
    /// `midnight`. Returns `None` if cancelled.
    async fn find_boundary(
        &self,
        earliest: u64,
        latest: u64,
        midnight: DateTime<Utc>,
    ) -> Result<Option<u64>, IngestError> {
        let (mut lo, mut hi) = (earliest.min(latest), latest);
        while lo < hi {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            let mid = lo + (hi - lo) / 2;
            if self.consensus.block(mid).await?.header.time >= midnight {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(Some(lo))
    }
}

fn snapshot(
    day: NaiveDate,
    boundary_height: u64,
    boundary_time: DateTime<Utc>,
    validators: Vec<tally_types::Validator>,
) -> ValidatorSnapshot {
    let entries = validators
        .into_iter()
        .enumerate()
        .map(|(index, v)| SnapshotEntry {
            index: index as u32,
            address: v.address,
            voting_power: v.voting_power,
        })
        .collect();
    ValidatorSnapshot { day, boundary_height, boundary_time, entries }
}

#[async_trait]
impl<C, S> IngestWorker for SnapshotWorker<C, S>
where
    C: ConsensusProvider,
    S: SnapshotStore,
{
    fn name(&self) -> &'static str {
        VALIDATOR_SNAPSHOT
    }

    async fn run_cycle(&mut self) -> Result<CycleOutcome, IngestError> {
        self.run_once().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemoryConsensus, MemoryStore, validator};

    fn worker(
        consensus: &MemoryConsensus,
        store: &Arc<MemoryStore>,
    ) -> SnapshotWorker<MemoryConsensus, MemoryStore> {
        SnapshotWorker::new(consensus.clone(), Arc::clone(store), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_boundary_is_first_block_of_the_day() {
        // One block per hour starting at 2024-03-01T20:00:00Z.
        let start = DateTime::parse_from_rfc3339("2024-03-01T20:00:00Z").unwrap().to_utc();
        let consensus = MemoryConsensus::with_times(
            12,
            vec![validator("AAAA", 10), validator("BBBB", 20)],
            start,
            3600,
        );
        let store = Arc::new(MemoryStore::default());

        let outcome = worker(&consensus, &store).run_once().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Progressed);
        let day = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let snapshot = store.snapshot(day).unwrap();
        assert_eq!(snapshot.boundary_height, 5);
        assert_eq!(snapshot.boundary_time.to_rfc3339(), "2024-03-02T00:00:00+00:00");
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.entries[1].index, 1);
        assert_eq!(snapshot.entries[1].voting_power, 20);
        assert_eq!(consensus.validator_queries(), vec![5]);
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let start = DateTime::parse_from_rfc3339("2024-03-01T22:30:00Z").unwrap().to_utc();
        let consensus = MemoryConsensus::with_times(8, vec![validator("AAAA", 10)], start, 1800);
        let store = Arc::new(MemoryStore::default());
        let worker = worker(&consensus, &store);

        assert_eq!(worker.run_once().await.unwrap(), CycleOutcome::Progressed);
        assert_eq!(worker.run_once().await.unwrap(), CycleOutcome::Idle);
        assert_eq!(store.snapshot_count(), 1);
        assert_eq!(consensus.validator_queries().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_validator_set_is_an_error() {
        let start = DateTime::parse_from_rfc3339("2024-03-01T22:30:00Z").unwrap().to_utc();
        let consensus = MemoryConsensus::with_times(8, Vec::new(), start, 1800);
        let store = Arc::new(MemoryStore::default());

        let err = worker(&consensus, &store).run_once().await.unwrap_err();
        assert!(matches!(err, IngestError::EmptyValidatorSet(_)));
        assert_eq!(store.snapshot_count(), 0);
    }
}
