//! Chunked transaction and receipt fetching shared by the pipeline and the retry worker.

use alloy_primitives::B256;
use futures::future::join_all;
use tally_rpc::ExecutionProvider;
use tally_types::{Receipt, Transaction};
use tracing::warn;

/// Items fetched for one block, with the number of items that could not be fetched.
#[derive(Debug)]
pub(crate) struct Fetched<T> {
    pub(crate) items: Vec<T>,
    pub(crate) missing: usize,
}

/// Fetches the transactions of block `height`, `width` at a time, in hash order.
pub(crate) async fn fetch_transactions<E>(
    provider: &E,
    height: u64,
    hashes: &[B256],
    width: usize,
) -> Fetched<Transaction>
where
    E: ExecutionProvider + ?Sized,
{
    let mut items = Vec::with_capacity(hashes.len());
    let mut missing = 0;

    for chunk in hashes.chunks(width.max(1)) {
        let results = join_all(chunk.iter().map(|hash| provider.transaction(*hash))).await;
        for (hash, result) in chunk.iter().zip(results) {
            match result {
                Ok(tx) => items.push(tx),
                Err(err) => {
                    missing += 1;
                    warn!(target: "ingest::pipeline", height, %hash, %err, "Dropping transaction");
                }
            }
        }
    }

    Fetched { items, missing }
}

/// Fetches the receipts of `transactions`, `width` at a time, and pairs each transaction with the
/// receipt of the same hash. Transactions without a matching receipt are dropped.
pub(crate) async fn fetch_receipts<E>(
    provider: &E,
    height: u64,
    transactions: Vec<Transaction>,
    width: usize,
) -> Fetched<(Transaction, Receipt)>
where
    E: ExecutionProvider + ?Sized,
{
    let mut items = Vec::with_capacity(transactions.len());
    let mut missing = 0;
    let mut pending = transactions.into_iter().peekable();

    while pending.peek().is_some() {
        let chunk: Vec<Transaction> = pending.by_ref().take(width.max(1)).collect();
        let results = join_all(chunk.iter().map(|tx| provider.receipt(tx.hash))).await;
        for (tx, result) in chunk.into_iter().zip(results) {
            match result {
                Ok(receipt) if receipt.transaction_hash == tx.hash => items.push((tx, receipt)),
                Ok(receipt) => {
                    missing += 1;
                    warn!(
                        target: "ingest::pipeline",
                        height,
                        hash = %tx.hash,
                        receipt = %receipt.transaction_hash,
                        "Dropping transaction with mismatched receipt"
                    );
                }
                Err(err) => {
                    missing += 1;
                    warn!(target: "ingest::pipeline", height, hash = %tx.hash, %err, "Dropping transaction without receipt");
                }
            }
        }
    }

    Fetched { items, missing }
}
