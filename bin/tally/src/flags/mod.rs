//! CLI flags of the tally binary.

mod endpoints;
pub use endpoints::EndpointList;

mod database;
pub use database::DatabaseArgs;

mod execution;
pub use execution::ExecutionArgs;

mod consensus;
pub use consensus::ConsensusArgs;

mod schedule;
pub use schedule::ScheduleArgs;
