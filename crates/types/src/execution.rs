//! Execution-layer block, transaction and receipt types.

use alloy_eips::{eip2930::AccessList, eip7702::SignedAuthorization};
use alloy_primitives::{Address, B256, Bytes, Log, U256};
use serde::{Deserialize, Serialize};

/// A block header together with the hashes of the transactions it includes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockHeader {
    /// Block height.
    pub number: u64,
    /// Block hash as reported by the source node.
    pub hash: B256,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Fee recipient of the block.
    pub beneficiary: Address,
    /// EIP-1559 base fee, absent on pre-London blocks.
    pub base_fee_per_gas: Option<u64>,
    /// Total gas used by the block.
    pub gas_used: u64,
    /// Block gas limit.
    pub gas_limit: u64,
    /// Raw `extraData` field, carries the client identity.
    pub extra_data: Bytes,
    /// Hashes of the included transactions, in block order.
    pub transaction_hashes: Vec<B256>,
}

/// A transaction body as returned by `eth_getTransactionByHash`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    /// Transaction hash.
    pub hash: B256,
    /// Height of the block including the transaction.
    pub block_number: Option<u64>,
    /// Position inside the block.
    pub transaction_index: Option<u64>,
    /// Recovered sender.
    pub from: Address,
    /// Recipient, `None` for contract creations.
    pub to: Option<Address>,
    /// Transferred value in wei.
    pub value: U256,
    /// Sender nonce.
    pub nonce: u64,
    /// Gas limit of the transaction.
    pub gas_limit: u64,
    /// Legacy gas price, only set for legacy and EIP-2930 transactions.
    pub gas_price: Option<u128>,
    /// Max fee per gas for dynamic fee transactions.
    pub max_fee_per_gas: Option<u128>,
    /// Max priority fee per gas for dynamic fee transactions.
    pub max_priority_fee_per_gas: Option<u128>,
    /// EIP-2718 transaction type.
    pub tx_type: u8,
    /// Calldata or init code.
    pub input: Bytes,
    /// Type specific payload.
    pub payload: TxPayload,
}

impl Transaction {
    /// Returns true if the transaction deploys a contract.
    pub const fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }
}

/// Type specific part of a transaction. At most one variant applies per transaction type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxPayload {
    /// Legacy transactions carry no typed payload.
    #[default]
    None,
    /// EIP-2930 and EIP-1559 transactions.
    AccessList {
        /// The declared access list.
        access_list: AccessList,
    },
    /// EIP-4844 blob transactions.
    Blob {
        /// The declared access list.
        access_list: AccessList,
        /// Max fee per blob gas.
        max_fee_per_blob_gas: u128,
        /// Versioned hashes of the carried blobs.
        blob_versioned_hashes: Vec<B256>,
    },
    /// EIP-7702 set-code transactions.
    Delegation {
        /// The declared access list.
        access_list: AccessList,
        /// Signed delegation authorizations.
        authorizations: Vec<SignedAuthorization>,
    },
}

impl TxPayload {
    /// Builds the payload matching `tx_type` out of the optional typed fields of a transaction.
    pub fn from_parts(
        tx_type: u8,
        access_list: Option<AccessList>,
        blob: Option<(u128, Vec<B256>)>,
        authorizations: Option<Vec<SignedAuthorization>>,
    ) -> Self {
        let access_list = access_list.unwrap_or_default();
        match tx_type {
            1 | 2 => Self::AccessList { access_list },
            3 => {
                let (max_fee_per_blob_gas, blob_versioned_hashes) = blob.unwrap_or_default();
                Self::Blob { access_list, max_fee_per_blob_gas, blob_versioned_hashes }
            }
            4 => Self::Delegation { access_list, authorizations: authorizations.unwrap_or_default() },
            _ => Self::None,
        }
    }

    /// Returns true if there is no typed payload.
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// The execution outcome of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Receipt {
    /// Hash of the transaction the receipt belongs to.
    pub transaction_hash: B256,
    /// Whether execution succeeded.
    pub status: bool,
    /// Gas used by this transaction.
    pub gas_used: u64,
    /// Gas used by the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Price actually paid per unit of gas.
    pub effective_gas_price: u128,
    /// Address of the deployed contract, if any.
    pub contract_address: Option<Address>,
    /// Emitted logs.
    pub logs: Vec<Log>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_variant_follows_tx_type() {
        assert!(TxPayload::from_parts(0, None, None, None).is_none());
        assert!(matches!(
            TxPayload::from_parts(2, Some(AccessList::default()), None, None),
            TxPayload::AccessList { .. }
        ));
        assert!(matches!(
            TxPayload::from_parts(3, None, Some((7, vec![B256::ZERO])), None),
            TxPayload::Blob { max_fee_per_blob_gas: 7, .. }
        ));
        assert!(matches!(
            TxPayload::from_parts(4, None, None, Some(vec![])),
            TxPayload::Delegation { .. }
        ));
    }

    #[test]
    fn test_payload_json_is_tagged() {
        let payload = TxPayload::from_parts(3, None, Some((1, vec![B256::repeat_byte(1)])), None);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "blob");
        assert_eq!(json["blob_versioned_hashes"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_contract_creation() {
        let tx = Transaction { to: None, ..Default::default() };
        assert!(tx.is_contract_creation());
        let tx = Transaction { to: Some(Address::ZERO), ..Default::default() };
        assert!(!tx.is_contract_creation());
    }
}
