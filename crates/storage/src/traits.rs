use crate::{BlockAbsence, FailedBlock, IndexedBlock, StorageError, ValidatorSnapshot};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Reads persisted ingestion cursors.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Returns the last processed height of `module`, or `None` if it never advanced.
    async fn cursor(&self, module: &str) -> Result<Option<u64>, StorageError>;
}

/// Persists execution-layer blocks.
///
/// Both operations run inside a single database transaction: either every row of the block is
/// written or none is.
#[async_trait]
pub trait BlockWriter: Send + Sync {
    /// Upserts the block, its transactions and created contracts, then advances the
    /// [`BLOCKS_EL`](crate::BLOCKS_EL) cursor to the block height. The cursor never moves backwards.
    async fn write_block(&self, block: &IndexedBlock) -> Result<(), StorageError>;

    /// Replaces the execution-layer rows of a previously failed block and resolves its
    /// `failed_blocks` entry for `module`. Consensus-derived block columns and the cursor are
    /// left untouched.
    async fn replace_block(&self, module: &str, block: &IndexedBlock) -> Result<(), StorageError>;
}

/// Bookkeeping of blocks whose processing failed.
#[async_trait]
pub trait FailedBlockStore: Send + Sync {
    /// Records a failure of `height`. Repeated failures increment the attempt count.
    async fn record_failure(&self, module: &str, height: u64, error: &str)
    -> Result<(), StorageError>;

    /// Records a failure of `height` and advances the `module` cursor to it in the same
    /// transaction, so forward ingestion never revisits the height.
    async fn record_skipped(&self, module: &str, height: u64, error: &str)
    -> Result<(), StorageError>;

    /// Returns up to `limit` unresolved entries of `module`, fewest attempts first and then lowest
    /// height, so entries that keep failing do not starve later ones.
    async fn unresolved(&self, module: &str, limit: u32) -> Result<Vec<FailedBlock>, StorageError>;
}

/// Persists consensus-layer absence data.
#[async_trait]
pub trait AbsenceStore: Send + Sync {
    /// Writes the consensus columns of existing block rows, upserts the proposers in the validator
    /// registry and advances the [`CL_ABSENCES`](crate::CL_ABSENCES) cursor to `cursor`, in one
    /// transaction.
    ///
    /// Returns the number of block rows updated. Heights without a block row are not inserted.
    async fn commit_absences(
        &self,
        absences: &[BlockAbsence],
        cursor: u64,
    ) -> Result<u64, StorageError>;
}

/// Persists daily validator-set snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns true if a snapshot exists for `day`.
    async fn has_snapshot(&self, day: NaiveDate) -> Result<bool, StorageError>;

    /// Inserts a snapshot. Returns false if one already existed for the day, leaving it unchanged.
    async fn write_snapshot(&self, snapshot: &ValidatorSnapshot) -> Result<bool, StorageError>;
}

/// Full storage backend used by the indexer.
pub trait Store:
    CursorStore + BlockWriter + FailedBlockStore + AbsenceStore + SnapshotStore
{
}

impl<T> Store for T where
    T: CursorStore + BlockWriter + FailedBlockStore + AbsenceStore + SnapshotStore
{
}
