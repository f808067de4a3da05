//! Persistence layer of the tally indexer.
//!
//! The ingestion workers only depend on the traits in this crate. [`PgStore`] implements them on
//! top of a PostgreSQL pool; every block, absence batch and snapshot is written in its own
//! transaction together with the cursor it advances.
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod error;
pub use error::{Diagnostics, ErrorClass, StorageError, classify_sqlstate};

mod models;
pub use models::{
    AbsentValidator, BLOCKS_EL, BlockAbsence, BlockRow, CL_ABSENCES, ClientIdentity, ContractRow,
    FailedBlock, FeeStats, IndexedBlock, Percentage, SnapshotEntry, TransactionRow,
    ValidatorSnapshot,
};

mod traits;
pub use traits::{
    AbsenceStore, BlockWriter, CursorStore, FailedBlockStore, SnapshotStore, Store,
};

mod postgres;
pub use postgres::{PgStore, SCHEMA};
