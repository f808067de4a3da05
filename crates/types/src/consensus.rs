//! CometBFT JSON-RPC response types consumed by the consensus-layer workers.

use crate::serde_str;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_repr::Deserialize_repr;

/// The JSON-RPC envelope wrapping every CometBFT HTTP response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcEnvelope<T> {
    /// The response payload.
    pub result: T,
}

/// Payload of `/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResult {
    /// Sync progress of the node.
    pub sync_info: SyncInfo,
}

/// The `sync_info` section of `/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncInfo {
    /// Highest committed height.
    #[serde(deserialize_with = "serde_str::u64")]
    pub latest_block_height: u64,
    /// Time of the highest committed block.
    pub latest_block_time: DateTime<Utc>,
    /// Lowest height still served by the node.
    #[serde(deserialize_with = "serde_str::u64", default)]
    pub earliest_block_height: u64,
}

/// Height bounds reported by a consensus node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    /// Highest committed height.
    pub latest_height: u64,
    /// Time of the highest committed block.
    pub latest_time: DateTime<Utc>,
    /// Lowest height the node still serves.
    pub earliest_height: u64,
}

impl From<SyncInfo> for NodeStatus {
    fn from(info: SyncInfo) -> Self {
        Self {
            latest_height: info.latest_block_height,
            latest_time: info.latest_block_time,
            earliest_height: info.earliest_block_height.max(1),
        }
    }
}

/// Payload of `/block?height=`.
#[derive(Debug, Clone, Deserialize)]
pub struct CometBlock {
    /// The block header.
    pub header: CometHeader,
    /// Commit for the previous height, absent on the first block.
    #[serde(default)]
    pub last_commit: Option<Commit>,
}

/// The header fields used by the indexer.
#[derive(Debug, Clone, Deserialize)]
pub struct CometHeader {
    /// Block height.
    #[serde(deserialize_with = "serde_str::u64")]
    pub height: u64,
    /// Block time.
    pub time: DateTime<Utc>,
    /// Hex address of the proposing validator.
    pub proposer_address: String,
}

/// Commit signatures for a height, carried by the next block.
#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    /// The committed height.
    #[serde(deserialize_with = "serde_str::u64")]
    pub height: u64,
    /// Consensus round the commit was reached in.
    #[serde(default)]
    pub round: u32,
    /// One entry per validator, ordered by validator-set index.
    #[serde(default)]
    pub signatures: Vec<CommitSig>,
}

/// A single validator's vote in a commit.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitSig {
    /// Vote outcome.
    pub block_id_flag: BlockIdFlag,
    /// Hex address of the validator, empty for absent votes.
    #[serde(default)]
    pub validator_address: String,
}

/// Outcome of a validator's vote in a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize_repr)]
#[repr(u8)]
pub enum BlockIdFlag {
    /// Unknown flag.
    Unknown = 0,
    /// The validator did not vote.
    Absent = 1,
    /// The validator voted for the block.
    Commit = 2,
    /// The validator voted nil.
    Nil = 3,
}

/// Payload of `/validators?height=&per_page=&page=`.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorsPage {
    /// Height the set applies to.
    #[serde(deserialize_with = "serde_str::u64")]
    pub block_height: u64,
    /// Validators on this page.
    pub validators: Vec<Validator>,
    /// Number of validators on this page.
    #[serde(deserialize_with = "serde_str::u64")]
    pub count: u64,
    /// Total number of validators in the set.
    #[serde(deserialize_with = "serde_str::u64")]
    pub total: u64,
}

/// A member of the validator set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Validator {
    /// Hex address of the validator.
    pub address: String,
    /// Voting power at the queried height.
    #[serde(deserialize_with = "serde_str::u64")]
    pub voting_power: u64,
    /// Proposer priority at the queried height.
    #[serde(deserialize_with = "serde_str::i64", default)]
    pub proposer_priority: i64,
}
