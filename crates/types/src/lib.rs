//! Chain data types shared by the tally indexer crates.
//!
//! Execution-layer data is converted into these types at the RPC boundary so that the ingestion
//! pipeline and the storage layer never depend on a particular RPC client library. Consensus-layer
//! types mirror the CometBFT JSON-RPC responses the indexer consumes.

mod execution;
pub use execution::{BlockHeader, Receipt, Transaction, TxPayload};

mod consensus;
pub use consensus::{
    BlockIdFlag, CometBlock, CometHeader, Commit, CommitSig, NodeStatus, RpcEnvelope,
    StatusResult, SyncInfo, Validator, ValidatorsPage,
};

mod serde_str;
