//! Execution-layer ingestion.

mod client;
pub use client::decode_client;

mod derive;
pub use derive::{TRANSFER_TOPIC, fee_stats, index_block, priority_fee_per_gas, transfer_counts};

pub(crate) mod fetch;

mod pipeline;
pub use pipeline::{ElPipeline, StageProviders};

mod queue;
