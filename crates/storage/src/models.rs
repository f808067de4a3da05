//! Rows persisted by the indexer.

use alloy_primitives::{Address, B256, Bytes, U256};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tally_types::TxPayload;

/// Cursor module of the execution-layer block pipeline.
pub const BLOCKS_EL: &str = "blocks_el";

/// Cursor module of the consensus-layer absence worker.
pub const CL_ABSENCES: &str = "cl_absences";

/// Execution client that produced a block, decoded from its extra data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Client name, lowercased, or `unknown`.
    pub kind: String,
    /// Client version, if present.
    pub version: Option<String>,
    /// Printable form of the extra data.
    pub raw: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self { kind: ClientIdentity::UNKNOWN.to_string(), version: None, raw: String::new() }
    }
}

impl ClientIdentity {
    /// Kind recorded when the extra data is not recognized.
    pub const UNKNOWN: &'static str = "unknown";
}

/// Gas price statistics over the persisted transactions of a block, in wei per gas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeeStats {
    /// Sum of effective gas prices.
    pub total_effective_price: U256,
    /// Mean effective gas price, truncated.
    pub avg_effective_price: U256,
    /// Sum of priority fees per gas.
    pub total_priority_fee: U256,
    /// Mean priority fee per gas, truncated.
    pub avg_priority_fee: U256,
}

/// Execution-layer columns of a `blocks` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRow {
    /// Block height.
    pub height: u64,
    /// Block hash.
    pub hash: B256,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Block time.
    pub timestamp: DateTime<Utc>,
    /// Fee recipient.
    pub miner: Address,
    /// Base fee per gas, absent before London.
    pub base_fee_per_gas: Option<u64>,
    /// Gas used by the block.
    pub gas_used: u64,
    /// Block gas limit.
    pub gas_limit: u64,
    /// Number of transactions in the block header.
    pub transaction_count: u64,
    /// Decoded client identity.
    pub client: ClientIdentity,
    /// Fee aggregates over the persisted transactions.
    pub fees: FeeStats,
}

/// A `transactions` row: the transaction joined with its receipt and derived fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRow {
    /// Transaction hash.
    pub hash: B256,
    /// Height of the including block.
    pub block_height: u64,
    /// Position in the block.
    pub transaction_index: u64,
    /// Sender.
    pub from: Address,
    /// Recipient, `None` for contract creation.
    pub to: Option<Address>,
    /// Transferred value in wei.
    pub value: U256,
    /// Sender nonce.
    pub nonce: u64,
    /// Gas limit.
    pub gas_limit: u64,
    /// Legacy gas price.
    pub gas_price: Option<u128>,
    /// EIP-1559 fee cap.
    pub max_fee_per_gas: Option<u128>,
    /// EIP-1559 tip cap.
    pub max_priority_fee_per_gas: Option<u128>,
    /// EIP-2718 type byte.
    pub tx_type: u8,
    /// Call data.
    pub input: Bytes,
    /// Type-specific payload, stored as JSON.
    pub payload: TxPayload,
    /// Whether the transaction deploys a contract.
    pub is_contract_creation: bool,
    /// Address of the created contract.
    pub contract_address: Option<Address>,
    /// Execution outcome, `true` on success.
    pub status: bool,
    /// Gas used by the transaction.
    pub gas_used: u64,
    /// Cumulative gas used in the block up to and including it.
    pub cumulative_gas_used: u64,
    /// Price per gas actually paid.
    pub effective_gas_price: u128,
    /// `max(effective_gas_price - base_fee, 0)`.
    pub priority_fee_per_gas: u128,
    /// Logs matching the ERC-20 `Transfer` event.
    pub erc20_transfers: u32,
    /// Logs matching the ERC-721 `Transfer` event.
    pub erc721_transfers: u32,
}

/// A `contracts` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractRow {
    /// Contract address.
    pub address: Address,
    /// Deployer.
    pub creator: Address,
    /// Deploying transaction.
    pub transaction_hash: B256,
    /// Creation height.
    pub block_height: u64,
}

/// Everything written for a single execution-layer block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedBlock {
    /// The block row.
    pub block: BlockRow,
    /// Persisted transactions, in block order.
    pub transactions: Vec<TransactionRow>,
    /// Contracts created in the block.
    pub contracts: Vec<ContractRow>,
}

impl IndexedBlock {
    /// Returns the block height.
    pub const fn height(&self) -> u64 {
        self.block.height
    }
}

/// Percentage with two decimal places, stored as basis points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Percentage(u32);

impl Percentage {
    /// Returns `part / total * 100`, rounded half up to two decimal places. Zero if `total` is zero.
    pub fn of(part: u64, total: u64) -> Self {
        if total == 0 {
            return Self(0);
        }
        let scaled = (part as u128 * 20_000 + total as u128) / (2 * total as u128);
        Self(u32::try_from(scaled).unwrap_or(u32::MAX))
    }

    /// Returns the value in hundredths of a percent.
    pub const fn basis_points(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// A validator that did not sign a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsentValidator {
    /// Validator address, hex as reported by the consensus node.
    pub address: String,
    /// Voting power at the height.
    pub voting_power: u64,
}

/// Consensus-derived columns of a `blocks` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAbsence {
    /// Block height.
    pub height: u64,
    /// Proposer of the block, written only where the row has none yet.
    pub proposer_address: String,
    /// Number of absent validators.
    pub missing_count: u32,
    /// Summed voting power of the absent validators.
    pub missing_voting_power: u64,
    /// Total voting power of the validator set.
    pub total_voting_power: u64,
    /// `missing_voting_power / total_voting_power * 100`.
    pub missing_percentage: Percentage,
    /// Round of the commit that finalized the block.
    pub commit_round: u32,
    /// Absent validators in validator-set order.
    pub absent: Vec<AbsentValidator>,
}

/// One validator of a daily snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Position in the validator set.
    pub index: u32,
    /// Validator address.
    pub address: String,
    /// Voting power at the boundary height.
    pub voting_power: u64,
}

/// The validator set at the first block of a UTC day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSnapshot {
    /// UTC calendar day.
    pub day: NaiveDate,
    /// First height at or after midnight.
    pub boundary_height: u64,
    /// Time of the boundary block.
    pub boundary_time: DateTime<Utc>,
    /// Validator set in index order.
    pub entries: Vec<SnapshotEntry>,
}

/// An open `failed_blocks` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedBlock {
    /// Cursor module the block belongs to.
    pub module: String,
    /// Block height.
    pub height: u64,
    /// Number of failed attempts so far.
    pub attempts: u32,
    /// Error of the last attempt.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(200, 1000, "20.00")]
    #[case(0, 1000, "0.00")]
    #[case(1000, 1000, "100.00")]
    #[case(1, 3, "33.33")]
    #[case(2, 3, "66.67")]
    #[case(1, 8, "12.50")]
    #[case(1, 20_000, "0.01")]
    #[case(1, 20_001, "0.00")]
    #[case(5, 0, "0.00")]
    fn test_percentage_rounding(#[case] part: u64, #[case] total: u64, #[case] expected: &str) {
        assert_eq!(Percentage::of(part, total).to_string(), expected);
    }

    #[test]
    fn test_percentage_large_powers() {
        let total = u64::MAX;
        assert_eq!(Percentage::of(total / 2, total).basis_points(), 5000);
    }

    #[test]
    fn test_absent_validator_json() {
        let absent = vec![AbsentValidator { address: "AB12".into(), voting_power: 200 }];
        assert_eq!(
            serde_json::to_string(&absent).unwrap(),
            r#"[{"address":"AB12","voting_power":200}]"#
        );
    }
}
