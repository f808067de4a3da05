//! Consensus-layer workers.

mod validators;
pub use validators::ValidatorSet;

mod absence;
pub use absence::{AbsenceWorker, compute_absence};

mod snapshot;
pub use snapshot::{SnapshotWorker, VALIDATOR_SNAPSHOT};
