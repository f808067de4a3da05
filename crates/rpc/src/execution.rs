//! Execution-layer reads over an alloy [`RootProvider`] per endpoint.

use crate::{FailoverClient, RpcError, Role};
use alloy_consensus::Transaction as _;
use alloy_eips::{BlockNumberOrTag, Typed2718};
use alloy_primitives::B256;
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types_eth::{Block, TransactionReceipt};
use alloy_transport::TransportError;
use async_trait::async_trait;
use tally_types::{BlockHeader, Receipt, Transaction, TxPayload};
use thiserror::Error;
use url::Url;

/// Read access to an execution-layer node.
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    /// Returns the current chain head height.
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Returns the header of the block at `number`, with its transaction hashes.
    async fn block_header(&self, number: u64) -> Result<BlockHeader, RpcError>;

    /// Returns the transaction with the given hash.
    async fn transaction(&self, hash: B256) -> Result<Transaction, RpcError>;

    /// Returns the receipt of the transaction with the given hash.
    async fn receipt(&self, hash: B256) -> Result<Receipt, RpcError>;
}

/// Failover client over execution-layer JSON-RPC endpoints.
pub type ExecutionClient = FailoverClient<RootProvider>;

/// Builds an [`ExecutionClient`] with one HTTP provider per URL.
pub fn execution_client(urls: &[Url]) -> Result<ExecutionClient, RpcError> {
    FailoverClient::connect(Role::Execution, urls, |url| RootProvider::new_http(url.clone()))
}

/// Failure of a single endpoint call. A `null` result counts as a failure so that a lagging
/// endpoint hands the request over to the next one.
#[derive(Debug, Error)]
enum CallError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{0} not found")]
    NotFound(&'static str),
}

#[async_trait]
impl ExecutionProvider for ExecutionClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        self.request("eth_blockNumber", |provider| async move { provider.get_block_number().await })
            .await
    }

    async fn block_header(&self, number: u64) -> Result<BlockHeader, RpcError> {
        self.request("eth_getBlockByNumber", |provider| async move {
            let block = provider
                .get_block_by_number(BlockNumberOrTag::Number(number))
                .await?
                .ok_or(CallError::NotFound("block"))?;
            Ok::<_, CallError>(header_from_rpc(block))
        })
        .await
    }

    async fn transaction(&self, hash: B256) -> Result<Transaction, RpcError> {
        self.request("eth_getTransactionByHash", |provider| async move {
            let tx = provider
                .get_transaction_by_hash(hash)
                .await?
                .ok_or(CallError::NotFound("transaction"))?;
            Ok::<_, CallError>(transaction_from_rpc(tx))
        })
        .await
    }

    async fn receipt(&self, hash: B256) -> Result<Receipt, RpcError> {
        self.request("eth_getTransactionReceipt", |provider| async move {
            let receipt = provider
                .get_transaction_receipt(hash)
                .await?
                .ok_or(CallError::NotFound("receipt"))?;
            Ok::<_, CallError>(receipt_from_rpc(receipt))
        })
        .await
    }
}

fn header_from_rpc(block: Block) -> BlockHeader {
    let alloy_rpc_types_eth::Header { hash, inner, .. } = block.header;
    BlockHeader {
        number: inner.number,
        hash,
        parent_hash: inner.parent_hash,
        timestamp: inner.timestamp,
        beneficiary: inner.beneficiary,
        base_fee_per_gas: inner.base_fee_per_gas,
        gas_used: inner.gas_used,
        gas_limit: inner.gas_limit,
        extra_data: inner.extra_data,
        transaction_hashes: block.transactions.hashes().collect(),
    }
}

fn transaction_from_rpc(tx: alloy_rpc_types_eth::Transaction) -> Transaction {
    let envelope = &*tx.inner;
    let tx_type = envelope.ty();
    let blob = envelope.max_fee_per_blob_gas().map(|fee| {
        (fee, envelope.blob_versioned_hashes().map(<[B256]>::to_vec).unwrap_or_default())
    });

    Transaction {
        hash: *envelope.tx_hash(),
        block_number: tx.block_number,
        transaction_index: tx.transaction_index,
        from: tx.inner.signer(),
        to: envelope.to(),
        value: envelope.value(),
        nonce: envelope.nonce(),
        gas_limit: envelope.gas_limit(),
        gas_price: envelope.gas_price(),
        max_fee_per_gas: envelope.is_dynamic_fee().then(|| envelope.max_fee_per_gas()),
        max_priority_fee_per_gas: envelope.max_priority_fee_per_gas(),
        tx_type,
        input: envelope.input().clone(),
        payload: TxPayload::from_parts(
            tx_type,
            envelope.access_list().cloned(),
            blob,
            envelope.authorization_list().map(<[_]>::to_vec),
        ),
    }
}

fn receipt_from_rpc(receipt: TransactionReceipt) -> Receipt {
    Receipt {
        transaction_hash: receipt.transaction_hash,
        status: receipt.inner.status(),
        gas_used: receipt.gas_used,
        cumulative_gas_used: receipt.inner.cumulative_gas_used(),
        effective_gas_price: receipt.effective_gas_price,
        contract_address: receipt.contract_address,
        logs: receipt.inner.logs().iter().map(|log| log.inner.clone()).collect(),
    }
}
