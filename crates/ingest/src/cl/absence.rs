//! Validator absence tracking from consensus-layer commits.

use crate::{AbsenceConfig, CycleOutcome, IngestError, IngestWorker, Metrics, cl::ValidatorSet};
use async_trait::async_trait;
use std::{sync::Arc, time::Instant};
use tally_rpc::ConsensusProvider;
use tally_storage::{
    AbsenceStore, AbsentValidator, BLOCKS_EL, BlockAbsence, CL_ABSENCES, CursorStore, Percentage,
};
use tally_types::{BlockIdFlag, Commit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Derives the absence columns of block `height` from the commit carried by block `height + 1`.
///
/// Absent signatures carry no address, so they are resolved by their position in the validator
/// set. Returns the absence and whether every absent validator was found in `validators`.
/// Unresolved validators are recorded with zero voting power.
pub fn compute_absence(
    validators: &ValidatorSet,
    height: u64,
    proposer_address: &str,
    commit: &Commit,
) -> (BlockAbsence, bool) {
    let mut resolved = true;
    let absent: Vec<AbsentValidator> = commit
        .signatures
        .iter()
        .enumerate()
        .filter(|(_, sig)| sig.block_id_flag == BlockIdFlag::Absent)
        .map(|(index, sig)| {
            let validator = if sig.validator_address.is_empty() {
                validators.at(index)
            } else {
                validators.get(&sig.validator_address)
            };
            match validator {
                Some(v) => AbsentValidator { address: v.address.clone(), voting_power: v.voting_power },
                None => {
                    resolved = false;
                    AbsentValidator { address: sig.validator_address.clone(), voting_power: 0 }
                }
            }
        })
        .collect();

    let missing_voting_power = absent.iter().map(|v| v.voting_power).sum();
    let total_voting_power = validators.total_power();
    let absence = BlockAbsence {
        height,
        proposer_address: proposer_address.to_string(),
        missing_count: absent.len() as u32,
        missing_voting_power,
        total_voting_power,
        missing_percentage: Percentage::of(missing_voting_power, total_voting_power),
        commit_round: commit.round,
        absent,
    };
    (absence, resolved)
}

/// Walks consensus heights below both the chain head and the execution-layer cursor and fills the
/// absence columns of the matching block rows.
#[derive(Debug)]
pub struct AbsenceWorker<C, S> {
    consensus: C,
    store: Arc<S>,
    config: AbsenceConfig,
    cancel: CancellationToken,
    validators: Option<ValidatorSet>,
}

impl<C, S> AbsenceWorker<C, S>
where
    C: ConsensusProvider,
    S: CursorStore + AbsenceStore,
{
    /// Creates a worker with an empty validator-set cache.
    pub const fn new(
        consensus: C,
        store: Arc<S>,
        config: AbsenceConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self { consensus, store, config, cancel, validators: None }
    }

    /// Processes and commits the next batch of heights.
    pub async fn run_once(&mut self) -> Result<CycleOutcome, IngestError> {
        let Some(el_cursor) = self.store.cursor(BLOCKS_EL).await? else {
            debug!(target: "ingest::absence", "Execution layer has not indexed any block yet");
            return Ok(CycleOutcome::Idle);
        };
        let status = self.consensus.status().await?;
        let start = match self.store.cursor(CL_ABSENCES).await? {
            Some(cursor) => cursor + 1,
            None => status.earliest_height,
        };
        let bound = status.latest_height.saturating_sub(1).min(el_cursor.saturating_sub(1));
        if start > bound {
            debug!(target: "ingest::absence", start, bound, "No new heights");
            return Ok(CycleOutcome::Idle);
        }
        let end = bound.min(start.saturating_add(self.config.batch_size.max(1) - 1));

        let started = Instant::now();
        let mut absences = Vec::new();
        let mut last = None;
        for height in start..=end {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(absence) = self.process_height(height).await? {
                absences.push(absence);
            }
            last = Some(height);
        }
        let Some(cursor) = last else {
            return Ok(CycleOutcome::Idle);
        };

        let updated = self.store.commit_absences(&absences, cursor).await?;
        Metrics::record_absence_batch(absences.len() as u64, cursor);
        info!(
            target: "ingest::absence",
            start,
            end = cursor,
            heights = absences.len(),
            updated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Committed absence batch"
        );
        if (updated as usize) < absences.len() {
            warn!(
                target: "ingest::absence",
                start,
                end = cursor,
                missing = absences.len() - updated as usize,
                "Some heights have no block row"
            );
        }

        if cursor == end && end < bound {
            Ok(CycleOutcome::Behind)
        } else {
            Ok(CycleOutcome::Progressed)
        }
    }

    /// Returns `None` if block `height + 1` carries no commit.
    ///
    /// A failed fetch of either block fails the whole batch so the cursor never passes a height
    /// whose commit was not read.
    async fn process_height(&mut self, height: u64) -> Result<Option<BlockAbsence>, IngestError> {
        let next = height + 1;
        let interval = self.config.refresh_interval.max(1);
        if self.validators.as_ref().is_none_or(|set| set.is_stale(next, interval)) {
            self.refresh(next).await?;
        }

        let (block, successor) =
            tokio::join!(self.consensus.block(height), self.consensus.block(next));
        let block = block?;
        let Some(commit) = successor?.last_commit else {
            debug!(target: "ingest::absence", height, "Next block carries no commit, skipping height");
            return Ok(None);
        };

        let proposer = block.header.proposer_address;
        let (mut absence, mut resolved) = self.compute(height, &proposer, &commit);
        if !resolved && self.validators.as_ref().is_some_and(|set| set.height() != next) {
            self.refresh(next).await?;
            (absence, resolved) = self.compute(height, &proposer, &commit);
        }
        if !resolved {
            warn!(target: "ingest::absence", height, "Absent validator not in validator set");
        }
        Ok(Some(absence))
    }

    fn compute(&self, height: u64, proposer: &str, commit: &Commit) -> (BlockAbsence, bool) {
        match &self.validators {
            Some(set) => compute_absence(set, height, proposer, commit),
            None => compute_absence(&ValidatorSet::new(0, Vec::new()), height, proposer, commit),
        }
    }

    async fn refresh(&mut self, height: u64) -> Result<(), IngestError> {
        let validators = self.consensus.validators(height).await?;
        if validators.is_empty() {
            return Err(IngestError::EmptyValidatorSet(height));
        }
        debug!(target: "ingest::absence", height, validators = validators.len(), "Refreshed validator set");
        Metrics::record_validator_refresh();
        self.validators = Some(ValidatorSet::new(height, validators));
        Ok(())
    }
}

#[async_trait]
impl<C, S> IngestWorker for AbsenceWorker<C, S>
where
    C: ConsensusProvider,
    S: CursorStore + AbsenceStore,
{
    fn name(&self) -> &'static str {
        CL_ABSENCES
    }

    async fn run_cycle(&mut self) -> Result<CycleOutcome, IngestError> {
        self.run_once().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemoryConsensus, MemoryStore, commit, validator};

    fn abc() -> Vec<tally_types::Validator> {
        vec![validator("AAAA", 100), validator("BBBB", 200), validator("CCCC", 700)]
    }

    #[test]
    fn test_absence_math() {
        let set = ValidatorSet::new(11, abc());
        let commit = commit(10, &[BlockIdFlag::Commit, BlockIdFlag::Absent, BlockIdFlag::Commit]);

        let (absence, resolved) = compute_absence(&set, 10, "CCCC", &commit);

        assert!(resolved);
        assert_eq!(absence.missing_count, 1);
        assert_eq!(absence.missing_voting_power.to_string(), "200");
        assert_eq!(absence.total_voting_power, 1000);
        assert_eq!(absence.missing_percentage.to_string(), "20.00");
        assert_eq!(
            absence.absent,
            vec![AbsentValidator { address: "BBBB".into(), voting_power: 200 }]
        );
    }

    #[test]
    fn test_nil_votes_are_not_absences() {
        let set = ValidatorSet::new(11, abc());
        let commit = commit(10, &[BlockIdFlag::Nil, BlockIdFlag::Commit, BlockIdFlag::Commit]);
        let (absence, _) = compute_absence(&set, 10, "AAAA", &commit);
        assert_eq!(absence.missing_count, 0);
        assert_eq!(absence.missing_percentage.to_string(), "0.00");
    }

    #[test]
    fn test_unknown_position_is_unresolved() {
        let set = ValidatorSet::new(11, abc());
        let commit = commit(
            10,
            &[BlockIdFlag::Commit, BlockIdFlag::Commit, BlockIdFlag::Commit, BlockIdFlag::Absent],
        );
        let (absence, resolved) = compute_absence(&set, 10, "AAAA", &commit);
        assert!(!resolved);
        assert_eq!(absence.missing_count, 1);
        assert_eq!(absence.missing_voting_power, 0);
    }

    fn worker(
        consensus: &MemoryConsensus,
        store: &Arc<MemoryStore>,
        config: AbsenceConfig,
    ) -> AbsenceWorker<MemoryConsensus, MemoryStore> {
        AbsenceWorker::new(consensus.clone(), Arc::clone(store), config, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_batch_is_bounded_by_el_cursor_and_head() {
        let consensus = MemoryConsensus::with_chain(20, abc());
        consensus.set_flags(6, &[BlockIdFlag::Commit, BlockIdFlag::Absent, BlockIdFlag::Commit]);
        let store = Arc::new(MemoryStore::with_blocks(1..=8));
        store.set_cursor(BLOCKS_EL, 8);

        let outcome = worker(&consensus, &store, AbsenceConfig::default()).run_once().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Progressed);
        assert_eq!(store.cursor_value(CL_ABSENCES), Some(7));
        assert_eq!(store.absence_heights(), (1..=7).collect::<Vec<_>>());
        let absence = store.absence(6).unwrap();
        assert_eq!(absence.missing_count, 1);
        assert_eq!(absence.missing_voting_power, 200);
        assert_eq!(absence.missing_percentage.to_string(), "20.00");
        assert_eq!(store.absence(5).unwrap().missing_count, 0);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_proposer_is_only_backfilled() {
        let consensus = MemoryConsensus::with_chain(5, abc());
        let store = Arc::new(MemoryStore::with_blocks(1..=5));
        store.set_cursor(BLOCKS_EL, 5);
        store.set_proposer(2, "EXISTING");

        worker(&consensus, &store, AbsenceConfig::default()).run_once().await.unwrap();

        assert_eq!(store.proposer(2).as_deref(), Some("EXISTING"));
        assert_eq!(store.proposer(3).as_deref(), Some(MemoryConsensus::PROPOSER));
    }

    #[tokio::test]
    async fn test_successor_without_commit_skips_height() {
        let consensus = MemoryConsensus::with_chain(10, abc());
        consensus.drop_commit(10);
        let store = Arc::new(MemoryStore::with_blocks(1..=10));
        store.set_cursor(BLOCKS_EL, 10);

        worker(&consensus, &store, AbsenceConfig::default()).run_once().await.unwrap();

        assert!(store.absence(9).is_none());
        assert!(store.absence(8).is_some());
        assert_eq!(store.cursor_value(CL_ABSENCES), Some(9));
    }

    #[tokio::test]
    async fn test_failed_successor_fetch_is_retried_next_cycle() {
        let consensus = MemoryConsensus::with_chain(10, abc());
        consensus.set_flags(5, &[BlockIdFlag::Commit, BlockIdFlag::Absent, BlockIdFlag::Commit]);
        consensus.fail_block_once(6);
        let store = Arc::new(MemoryStore::with_blocks(1..=10));
        store.set_cursor(BLOCKS_EL, 10);
        let mut worker = worker(&consensus, &store, AbsenceConfig::default());

        let err = worker.run_once().await.unwrap_err();
        assert!(!err.kind().is_terminal());
        assert_eq!(store.cursor_value(CL_ABSENCES), None);
        assert_eq!(store.commit_count(), 0);

        assert_eq!(worker.run_once().await.unwrap(), CycleOutcome::Progressed);
        let absence = store.absence(5).unwrap();
        assert_eq!(absence.missing_count, 1);
        assert_eq!(absence.missing_voting_power.to_string(), "200");
        assert_eq!(store.cursor_value(CL_ABSENCES), Some(9));
    }

    #[tokio::test]
    async fn test_failed_block_fetch_withholds_cursor() {
        let consensus = MemoryConsensus::with_chain(10, abc());
        consensus.remove_block(3);
        let store = Arc::new(MemoryStore::with_blocks(1..=10));
        store.set_cursor(BLOCKS_EL, 10);

        let err = worker(&consensus, &store, AbsenceConfig::default()).run_once().await.unwrap_err();

        assert!(!err.kind().is_terminal());
        assert_eq!(store.cursor_value(CL_ABSENCES), None);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_validator_set_refresh_interval() {
        let consensus = MemoryConsensus::with_chain(30, abc());
        let store = Arc::new(MemoryStore::with_blocks(1..=30));
        store.set_cursor(BLOCKS_EL, 30);
        let config = AbsenceConfig { batch_size: 100, refresh_interval: 10 };

        worker(&consensus, &store, config).run_once().await.unwrap();

        // Fetched at 2 for height 1, then at 12 and 22.
        assert_eq!(consensus.validator_queries(), vec![2, 12, 22]);
        assert_eq!(store.cursor_value(CL_ABSENCES), Some(29));
    }

    #[tokio::test]
    async fn test_unresolved_absence_triggers_one_refresh() {
        let consensus = MemoryConsensus::with_chain(6, abc());
        let mut grown = abc();
        grown.push(validator("DDDD", 1000));
        consensus.set_validators_from(4, grown);
        consensus.set_flags(
            4,
            &[BlockIdFlag::Commit, BlockIdFlag::Commit, BlockIdFlag::Commit, BlockIdFlag::Absent],
        );
        let store = Arc::new(MemoryStore::with_blocks(1..=6));
        store.set_cursor(BLOCKS_EL, 6);

        let config = AbsenceConfig { batch_size: 100, refresh_interval: 1000 };
        worker(&consensus, &store, config).run_once().await.unwrap();

        let absence = store.absence(4).unwrap();
        assert_eq!(absence.missing_voting_power, 1000);
        assert_eq!(absence.total_voting_power, 2000);
        assert_eq!(absence.missing_percentage.to_string(), "50.00");
        assert_eq!(consensus.validator_queries(), vec![2, 5]);
    }

    #[tokio::test]
    async fn test_batches_resume_from_cursor() {
        let consensus = MemoryConsensus::with_chain(30, abc());
        let store = Arc::new(MemoryStore::with_blocks(1..=30));
        store.set_cursor(BLOCKS_EL, 30);
        let mut worker =
            worker(&consensus, &store, AbsenceConfig { batch_size: 10, refresh_interval: 1000 });

        assert_eq!(worker.run_once().await.unwrap(), CycleOutcome::Behind);
        assert_eq!(store.cursor_value(CL_ABSENCES), Some(10));
        assert_eq!(worker.run_once().await.unwrap(), CycleOutcome::Behind);
        assert_eq!(worker.run_once().await.unwrap(), CycleOutcome::Progressed);
        assert_eq!(store.cursor_value(CL_ABSENCES), Some(29));
        assert_eq!(worker.run_once().await.unwrap(), CycleOutcome::Idle);
    }
}
