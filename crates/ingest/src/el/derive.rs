//! Rows and derived columns built from fetched execution-layer data.

use crate::el::decode_client;
use alloy_primitives::{B256, Log, U256, b256};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tally_storage::{BlockRow, ContractRow, FeeStats, IndexedBlock, TransactionRow};
use tally_types::{BlockHeader, Receipt, Transaction};

/// `keccak256("Transfer(address,address,uint256)")`, shared by ERC-20 and ERC-721.
pub const TRANSFER_TOPIC: B256 =
    b256!("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// Counts `(erc20, erc721)` transfer events. ERC-721 indexes the token id as a fourth topic.
pub fn transfer_counts(logs: &[Log]) -> (u32, u32) {
    logs.iter().filter(|log| log.topics().first() == Some(&TRANSFER_TOPIC)).fold(
        (0, 0),
        |(erc20, erc721), log| match log.topics().len() {
            3 => (erc20 + 1, erc721),
            4 => (erc20, erc721 + 1),
            _ => (erc20, erc721),
        },
    )
}

/// Returns `max(effective_gas_price - base_fee, 0)`.
pub fn priority_fee_per_gas(effective_gas_price: u128, base_fee: Option<u64>) -> u128 {
    effective_gas_price.saturating_sub(u128::from(base_fee.unwrap_or_default()))
}

/// Aggregates gas prices over the given transactions.
pub fn fee_stats(transactions: &[TransactionRow]) -> FeeStats {
    if transactions.is_empty() {
        return FeeStats::default();
    }
    let count = U256::from(transactions.len());
    let (total_effective_price, total_priority_fee) =
        transactions.iter().fold((U256::ZERO, U256::ZERO), |(effective, priority), tx| {
            (
                effective + U256::from(tx.effective_gas_price),
                priority + U256::from(tx.priority_fee_per_gas),
            )
        });
    FeeStats {
        total_effective_price,
        avg_effective_price: total_effective_price / count,
        total_priority_fee,
        avg_priority_fee: total_priority_fee / count,
    }
}

/// Builds the rows of a block from its header and the transactions that were fetched together
/// with their receipts. Transactions missing from `items` are simply not persisted.
pub fn index_block(header: &BlockHeader, items: Vec<(Transaction, Receipt)>) -> IndexedBlock {
    let positions: HashMap<B256, u64> =
        header.transaction_hashes.iter().enumerate().map(|(i, hash)| (*hash, i as u64)).collect();

    let mut transactions: Vec<TransactionRow> = items
        .into_iter()
        .map(|(tx, receipt)| {
            let transaction_index = positions
                .get(&tx.hash)
                .copied()
                .or(tx.transaction_index)
                .unwrap_or_default();
            transaction_row(header, transaction_index, tx, receipt)
        })
        .collect();
    transactions.sort_by_key(|tx| tx.transaction_index);

    let contracts = transactions
        .iter()
        .filter(|tx| tx.status)
        .filter_map(|tx| {
            tx.contract_address.map(|address| ContractRow {
                address,
                creator: tx.from,
                transaction_hash: tx.hash,
                block_height: header.number,
            })
        })
        .collect();

    let block = BlockRow {
        height: header.number,
        hash: header.hash,
        parent_hash: header.parent_hash,
        timestamp: block_time(header.timestamp),
        miner: header.beneficiary,
        base_fee_per_gas: header.base_fee_per_gas,
        gas_used: header.gas_used,
        gas_limit: header.gas_limit,
        transaction_count: header.transaction_hashes.len() as u64,
        client: decode_client(&header.extra_data),
        fees: fee_stats(&transactions),
    };

    IndexedBlock { block, transactions, contracts }
}

fn transaction_row(
    header: &BlockHeader,
    transaction_index: u64,
    tx: Transaction,
    receipt: Receipt,
) -> TransactionRow {
    let (erc20_transfers, erc721_transfers) = transfer_counts(&receipt.logs);
    let is_contract_creation = tx.is_contract_creation();
    TransactionRow {
        hash: tx.hash,
        block_height: header.number,
        transaction_index,
        from: tx.from,
        to: tx.to,
        value: tx.value,
        nonce: tx.nonce,
        gas_limit: tx.gas_limit,
        gas_price: tx.gas_price,
        max_fee_per_gas: tx.max_fee_per_gas,
        max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
        tx_type: tx.tx_type,
        input: tx.input,
        payload: tx.payload,
        is_contract_creation,
        contract_address: receipt.contract_address.filter(|_| is_contract_creation),
        status: receipt.status,
        gas_used: receipt.gas_used,
        cumulative_gas_used: receipt.cumulative_gas_used,
        effective_gas_price: receipt.effective_gas_price,
        priority_fee_per_gas: priority_fee_per_gas(
            receipt.effective_gas_price,
            header.base_fee_per_gas,
        ),
        erc20_transfers,
        erc721_transfers,
    }
}

fn block_time(timestamp: u64) -> DateTime<Utc> {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{block_header, receipt, transaction};
    use alloy_primitives::{Address, Bytes, LogData, address};
    use rstest::rstest;

    fn log(topics: usize) -> Log {
        let mut all = vec![TRANSFER_TOPIC];
        all.extend((1..topics).map(|i| B256::with_last_byte(i as u8)));
        Log { address: Address::ZERO, data: LogData::new_unchecked(all, Bytes::new()) }
    }

    #[test]
    fn test_transfer_counts() {
        let other = Log {
            address: Address::ZERO,
            data: LogData::new_unchecked(vec![B256::ZERO; 3], Bytes::new()),
        };
        let logs = vec![log(3), log(4), log(3), log(2), other];
        assert_eq!(transfer_counts(&logs), (2, 1));
    }

    #[rstest]
    #[case(30, Some(10), 20)]
    #[case(10, Some(30), 0)]
    #[case(7, None, 7)]
    fn test_priority_fee(#[case] effective: u128, #[case] base: Option<u64>, #[case] expected: u128) {
        assert_eq!(priority_fee_per_gas(effective, base), expected);
    }

    #[test]
    fn test_index_block_orders_and_derives() {
        let hashes = [B256::with_last_byte(1), B256::with_last_byte(2), B256::with_last_byte(3)];
        let mut header = block_header(9, &hashes);
        header.base_fee_per_gas = Some(100);

        let deployer = address!("0x00000000000000000000000000000000000000aa");
        let created = address!("0x00000000000000000000000000000000000000cc");
        let mut deploy = transaction(hashes[2], 9, 2);
        deploy.from = deployer;
        deploy.to = None;
        let mut deploy_receipt = receipt(hashes[2]);
        deploy_receipt.effective_gas_price = 150;
        deploy_receipt.contract_address = Some(created);

        let mut first_receipt = receipt(hashes[0]);
        first_receipt.effective_gas_price = 250;
        first_receipt.logs = vec![log(3), log(4)];

        // The second transaction's receipt is missing and its row is dropped.
        let indexed = index_block(
            &header,
            vec![(deploy, deploy_receipt), (transaction(hashes[0], 9, 0), first_receipt)],
        );

        assert_eq!(indexed.block.transaction_count, 3);
        let order: Vec<_> = indexed.transactions.iter().map(|tx| tx.transaction_index).collect();
        assert_eq!(order, vec![0, 2]);

        let first = &indexed.transactions[0];
        assert_eq!(first.priority_fee_per_gas, 150);
        assert_eq!((first.erc20_transfers, first.erc721_transfers), (1, 1));
        assert!(!first.is_contract_creation);

        let deployed = &indexed.transactions[1];
        assert!(deployed.is_contract_creation);
        assert_eq!(deployed.priority_fee_per_gas, 50);
        assert_eq!(
            indexed.contracts,
            vec![ContractRow {
                address: created,
                creator: deployer,
                transaction_hash: hashes[2],
                block_height: 9,
            }]
        );

        assert_eq!(indexed.block.fees.total_effective_price, U256::from(400));
        assert_eq!(indexed.block.fees.avg_effective_price, U256::from(200));
        assert_eq!(indexed.block.fees.total_priority_fee, U256::from(200));
        assert_eq!(indexed.block.fees.avg_priority_fee, U256::from(100));
    }

    #[test]
    fn test_reverted_deployment_creates_no_contract() {
        let hash = B256::with_last_byte(1);
        let header = block_header(3, &[hash]);
        let mut tx = transaction(hash, 3, 0);
        tx.to = None;
        let mut failed = receipt(hash);
        failed.status = false;
        failed.contract_address = Some(Address::with_last_byte(5));

        let indexed = index_block(&header, vec![(tx, failed)]);
        assert!(indexed.contracts.is_empty());
        assert!(indexed.transactions[0].is_contract_creation);
    }

    #[test]
    fn test_indexing_is_deterministic() {
        let hash = B256::with_last_byte(4);
        let header = block_header(12, &[hash]);
        let build = || index_block(&header, vec![(transaction(hash, 12, 0), receipt(hash))]);
        assert_eq!(build(), build());
    }
}
