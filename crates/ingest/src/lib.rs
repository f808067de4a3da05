//! Ingestion workers of the tally indexer.
//!
//! Four independent workers keep the store in sync with the chain:
//!
//! - [`ElPipeline`] streams execution-layer blocks through a four-stage producer/consumer pipeline
//!   and commits them in height order together with the `blocks_el` cursor.
//! - [`AbsenceWorker`] derives validator absences from consensus-layer commits and fills the
//!   consensus columns of blocks already written by the pipeline.
//! - [`SnapshotWorker`] records the validator set at the first block of every UTC day.
//! - [`RetryWorker`] reprocesses blocks recorded in `failed_blocks` without touching any cursor.
//!
//! Each worker is driven by a [`WorkerRunner`] which classifies cycle failures and stops the
//! worker once it failed too often in a row, or immediately on fatal errors.
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod config;
pub use config::{AbsenceConfig, POOL_HEADROOM, PipelineConfig, RetryConfig};

mod error;
pub use error::{FailureKind, IngestError, WorkerError};

mod metrics;
pub use metrics::Metrics;

mod worker;
pub use worker::{CycleOutcome, IngestWorker, WorkerRunner};

pub mod el;
pub use el::{ElPipeline, StageProviders};

pub mod cl;
pub use cl::{AbsenceWorker, SnapshotWorker, VALIDATOR_SNAPSHOT};

mod retry;
pub use retry::{FAILED_BLOCKS_RETRY, RetryWorker};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
