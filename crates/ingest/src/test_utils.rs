//! In-memory providers and store for testing the ingestion workers.

use crate::el::index_block;
use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};
use tally_rpc::{ConsensusProvider, EndpointFailure, ExecutionProvider, Role, RpcError};
use tally_storage::{
    AbsenceStore, BlockAbsence, BlockWriter, CursorStore, FailedBlock, FailedBlockStore,
    IndexedBlock, SnapshotStore, StorageError, ValidatorSnapshot,
};
use tally_types::{
    BlockHeader, BlockIdFlag, CometBlock, CometHeader, Commit, CommitSig, NodeStatus, Receipt,
    Transaction, TxPayload, Validator,
};

/// A storage error classified as transient.
pub fn transient_storage_error() -> StorageError {
    StorageError::Database(sqlx::Error::PoolTimedOut)
}

/// An RPC error as returned when every endpoint failed.
pub fn unavailable(role: Role, method: &'static str) -> RpcError {
    RpcError::Exhausted {
        role,
        method,
        failures: vec![EndpointFailure { url: "memory://node".into(), error: "unavailable".into() }],
    }
}

/// A header at `number` listing `hashes`.
pub fn block_header(number: u64, hashes: &[B256]) -> BlockHeader {
    BlockHeader {
        number,
        hash: keccak256(format!("block-{number}")),
        parent_hash: keccak256(format!("block-{}", number.saturating_sub(1))),
        timestamp: 1_700_000_000 + number * 2,
        beneficiary: Address::with_last_byte(0xfe),
        base_fee_per_gas: Some(100),
        gas_used: 21_000 * hashes.len() as u64,
        gas_limit: 30_000_000,
        extra_data: Bytes::from_static(b"reth/v1.1.0/linux"),
        transaction_hashes: hashes.to_vec(),
    }
}

/// A plain value transfer at position `index` of block `number`.
pub fn transaction(hash: B256, number: u64, index: u64) -> Transaction {
    Transaction {
        hash,
        block_number: Some(number),
        transaction_index: Some(index),
        from: Address::with_last_byte(0xaa),
        to: Some(Address::with_last_byte(0xbb)),
        value: U256::from(1_000 + index),
        nonce: index,
        gas_limit: 21_000,
        gas_price: None,
        max_fee_per_gas: Some(300),
        max_priority_fee_per_gas: Some(10),
        tx_type: 2,
        input: Bytes::new(),
        payload: TxPayload::default(),
    }
}

/// A successful receipt for `hash`.
pub fn receipt(hash: B256) -> Receipt {
    Receipt {
        transaction_hash: hash,
        status: true,
        gas_used: 21_000,
        cumulative_gas_used: 21_000,
        effective_gas_price: 110,
        contract_address: None,
        logs: Vec::new(),
    }
}

/// A validator with `address` and `voting_power`.
pub fn validator(address: &str, voting_power: u64) -> Validator {
    Validator { address: address.to_string(), voting_power, proposer_priority: 0 }
}

/// A round-0 commit for `height` with one signature per flag. Absent signatures carry no address.
pub fn commit(height: u64, flags: &[BlockIdFlag]) -> Commit {
    let addresses: Vec<String> = (0..flags.len()).map(|i| format!("VAL{i}")).collect();
    Commit { height, round: 0, signatures: signatures(flags, |i| addresses.get(i).cloned()) }
}

fn signatures(flags: &[BlockIdFlag], address: impl Fn(usize) -> Option<String>) -> Vec<CommitSig> {
    flags
        .iter()
        .enumerate()
        .map(|(i, flag)| CommitSig {
            block_id_flag: *flag,
            validator_address: match flag {
                | BlockIdFlag::Absent => String::new(),
                | _ => address(i).unwrap_or_default(),
            },
        })
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("test state poisoned")
}

#[derive(Debug, Default)]
struct ExecutionState {
    head: u64,
    headers: BTreeMap<u64, BlockHeader>,
    transactions: HashMap<B256, Transaction>,
    receipts: HashMap<B256, Receipt>,
    failing_headers: HashSet<u64>,
    failing_transactions: HashSet<B256>,
    failing_receipts: HashSet<B256>,
    offline: bool,
}

/// An execution node serving a generated chain. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryExecution {
    state: Arc<Mutex<ExecutionState>>,
}

impl MemoryExecution {
    /// A chain of `blocks` blocks starting at height 1, each with `transactions` transfers.
    pub fn with_chain(blocks: u64, transactions: u64) -> Self {
        let mut state = ExecutionState { head: blocks, ..Default::default() };
        for number in 1..=blocks {
            let hashes: Vec<B256> =
                (0..transactions).map(|i| keccak256(format!("tx-{number}-{i}"))).collect();
            for (index, hash) in hashes.iter().enumerate() {
                let index = index as u64;
                state.transactions.insert(*hash, transaction(*hash, number, index));
                let mut receipt = receipt(*hash);
                receipt.cumulative_gas_used = 21_000 * (index + 1);
                receipt.effective_gas_price = 110 + index as u128;
                state.receipts.insert(*hash, receipt);
            }
            state.headers.insert(number, block_header(number, &hashes));
        }
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// Returns the header at `number`.
    pub fn header(&self, number: u64) -> Option<BlockHeader> {
        lock(&self.state).headers.get(&number).cloned()
    }

    /// Returns the transactions of block `number` paired with their receipts, in block order.
    pub fn items(&self, number: u64) -> Vec<(Transaction, Receipt)> {
        let state = lock(&self.state);
        let Some(header) = state.headers.get(&number) else { return Vec::new() };
        header
            .transaction_hashes
            .iter()
            .filter_map(|hash| {
                Some((state.transactions.get(hash)?.clone(), state.receipts.get(hash)?.clone()))
            })
            .collect()
    }

    /// Makes header requests for `number` fail.
    pub fn fail_header(&self, number: u64) {
        lock(&self.state).failing_headers.insert(number);
    }

    /// Makes transaction requests for `hash` fail.
    pub fn fail_transaction(&self, hash: B256) {
        lock(&self.state).failing_transactions.insert(hash);
    }

    /// Makes receipt requests for `hash` fail.
    pub fn fail_receipt(&self, hash: B256) {
        lock(&self.state).failing_receipts.insert(hash);
    }

    /// Makes every request fail while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        lock(&self.state).offline = offline;
    }

    /// Clears every injected failure.
    pub fn heal(&self) {
        let mut state = lock(&self.state);
        state.failing_headers.clear();
        state.failing_transactions.clear();
        state.failing_receipts.clear();
        state.offline = false;
    }
}

#[async_trait]
impl ExecutionProvider for MemoryExecution {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let state = lock(&self.state);
        if state.offline {
            return Err(unavailable(Role::Execution, "eth_blockNumber"));
        }
        Ok(state.head)
    }

    async fn block_header(&self, number: u64) -> Result<BlockHeader, RpcError> {
        let state = lock(&self.state);
        if state.offline || state.failing_headers.contains(&number) {
            return Err(unavailable(Role::Execution, "eth_getBlockByNumber"));
        }
        state
            .headers
            .get(&number)
            .cloned()
            .ok_or_else(|| unavailable(Role::Execution, "eth_getBlockByNumber"))
    }

    async fn transaction(&self, hash: B256) -> Result<Transaction, RpcError> {
        let state = lock(&self.state);
        if state.offline || state.failing_transactions.contains(&hash) {
            return Err(unavailable(Role::Execution, "eth_getTransactionByHash"));
        }
        state
            .transactions
            .get(&hash)
            .cloned()
            .ok_or_else(|| unavailable(Role::Execution, "eth_getTransactionByHash"))
    }

    async fn receipt(&self, hash: B256) -> Result<Receipt, RpcError> {
        let state = lock(&self.state);
        if state.offline || state.failing_receipts.contains(&hash) {
            return Err(unavailable(Role::Execution, "eth_getTransactionReceipt"));
        }
        state
            .receipts
            .get(&hash)
            .cloned()
            .ok_or_else(|| unavailable(Role::Execution, "eth_getTransactionReceipt"))
    }
}

#[derive(Debug)]
struct ConsensusState {
    latest: u64,
    genesis_time: DateTime<Utc>,
    block_interval: TimeDelta,
    validators: BTreeMap<u64, Vec<Validator>>,
    flags: HashMap<u64, Vec<BlockIdFlag>>,
    removed: HashSet<u64>,
    flaky: HashSet<u64>,
    without_commit: HashSet<u64>,
    validator_queries: Vec<u64>,
}

impl ConsensusState {
    fn validators_at(&self, height: u64) -> Vec<Validator> {
        self.validators.range(..=height).next_back().map(|(_, set)| set.clone()).unwrap_or_default()
    }

    fn time_at(&self, height: u64) -> DateTime<Utc> {
        self.genesis_time + self.block_interval * (height.saturating_sub(1) as i32)
    }

    /// The commit for `height`, signed by the set that block `height + 1` reports.
    fn commit(&self, height: u64) -> Commit {
        let validators = self.validators_at(height + 1);
        let flags = self
            .flags
            .get(&height)
            .cloned()
            .unwrap_or_else(|| vec![BlockIdFlag::Commit; validators.len()]);
        let signatures = signatures(&flags, |i| validators.get(i).map(|v| v.address.clone()));
        Commit { height, round: 0, signatures }
    }
}

/// A consensus node serving a generated chain. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryConsensus {
    state: Arc<Mutex<ConsensusState>>,
}

impl MemoryConsensus {
    /// Proposer of every generated block.
    pub const PROPOSER: &'static str = "F00DF00DF00DF00DF00DF00DF00DF00DF00DF00D";

    /// A chain of `latest` blocks, one every two seconds from 2024-01-01T00:00:00Z, where
    /// `validators` sign every block.
    pub fn with_chain(latest: u64, validators: Vec<Validator>) -> Self {
        let genesis = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|day| day.and_hms_opt(0, 0, 0))
            .expect("valid date")
            .and_utc();
        Self::with_times(latest, validators, genesis, 2)
    }

    /// A chain of `latest` blocks, the first at `genesis_time` and one every `interval_secs`.
    pub fn with_times(
        latest: u64,
        validators: Vec<Validator>,
        genesis_time: DateTime<Utc>,
        interval_secs: i64,
    ) -> Self {
        let state = ConsensusState {
            latest,
            genesis_time,
            block_interval: TimeDelta::seconds(interval_secs),
            validators: BTreeMap::from([(0, validators)]),
            flags: HashMap::new(),
            removed: HashSet::new(),
            flaky: HashSet::new(),
            without_commit: HashSet::new(),
            validator_queries: Vec::new(),
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// Overrides the commit flags for `height`, in validator-set order.
    pub fn set_flags(&self, height: u64, flags: &[BlockIdFlag]) {
        lock(&self.state).flags.insert(height, flags.to_vec());
    }

    /// Replaces the validator set from `height` onwards.
    pub fn set_validators_from(&self, height: u64, validators: Vec<Validator>) {
        lock(&self.state).validators.insert(height, validators);
    }

    /// Makes block `height` unavailable.
    pub fn remove_block(&self, height: u64) {
        lock(&self.state).removed.insert(height);
    }

    /// Fails the next request for block `height`, then serves it again.
    pub fn fail_block_once(&self, height: u64) {
        lock(&self.state).flaky.insert(height);
    }

    /// Serves block `height` without a last commit.
    pub fn drop_commit(&self, height: u64) {
        lock(&self.state).without_commit.insert(height);
    }

    /// Heights the validator set was requested at, in request order.
    pub fn validator_queries(&self) -> Vec<u64> {
        lock(&self.state).validator_queries.clone()
    }
}

#[async_trait]
impl ConsensusProvider for MemoryConsensus {
    async fn status(&self) -> Result<NodeStatus, RpcError> {
        let state = lock(&self.state);
        Ok(NodeStatus {
            latest_height: state.latest,
            latest_time: state.time_at(state.latest),
            earliest_height: 1,
        })
    }

    async fn block(&self, height: u64) -> Result<CometBlock, RpcError> {
        let mut state = lock(&self.state);
        if height == 0 || height > state.latest || state.removed.contains(&height) {
            return Err(unavailable(Role::Consensus, "block"));
        }
        if state.flaky.remove(&height) {
            return Err(unavailable(Role::Consensus, "block"));
        }
        Ok(CometBlock {
            header: CometHeader {
                height,
                time: state.time_at(height),
                proposer_address: Self::PROPOSER.to_string(),
            },
            last_commit: (height > 1 && !state.without_commit.contains(&height))
                .then(|| state.commit(height - 1)),
        })
    }

    async fn validators(&self, height: u64) -> Result<Vec<Validator>, RpcError> {
        let mut state = lock(&self.state);
        state.validator_queries.push(height);
        if height > state.latest {
            return Err(unavailable(Role::Consensus, "validators"));
        }
        Ok(state.validators_at(height))
    }
}

#[derive(Debug, Default)]
struct StoreState {
    cursors: HashMap<String, u64>,
    cursor_history: HashMap<String, Vec<u64>>,
    blocks: BTreeMap<u64, IndexedBlock>,
    write_log: Vec<u64>,
    failing_writes: HashMap<u64, bool>,
    failed: BTreeMap<(String, u64), FailedBlock>,
    absences: BTreeMap<u64, BlockAbsence>,
    proposers: HashMap<u64, String>,
    absence_commits: usize,
    snapshots: BTreeMap<NaiveDate, ValidatorSnapshot>,
}

impl StoreState {
    fn advance(&mut self, module: &str, height: u64) {
        let cursor = self.cursors.entry(module.to_string()).or_default();
        *cursor = (*cursor).max(height);
        let cursor = *cursor;
        self.cursor_history.entry(module.to_string()).or_default().push(cursor);
    }

    fn record(&mut self, module: &str, height: u64, error: &str) {
        let entry = self.failed.entry((module.to_string(), height)).or_insert_with(|| {
            FailedBlock { module: module.to_string(), height, attempts: 0, last_error: None }
        });
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
    }

    fn check_write(&self, height: u64) -> Result<(), StorageError> {
        match self.failing_writes.get(&height) {
            | Some(true) => Err(StorageError::OutOfRange { column: "blocks.height", value: height }),
            | Some(false) => Err(transient_storage_error()),
            | None => Ok(()),
        }
    }
}

/// A [`Store`](tally_storage::Store) keeping everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// A store holding empty block rows for `heights`, as left by the execution-layer pipeline.
    pub fn with_blocks(heights: impl IntoIterator<Item = u64>) -> Self {
        let mut state = StoreState::default();
        for height in heights {
            state.blocks.insert(height, index_block(&block_header(height, &[]), Vec::new()));
        }
        Self { state: Mutex::new(state) }
    }

    /// Sets a cursor directly.
    pub fn set_cursor(&self, module: &str, height: u64) {
        lock(&self.state).cursors.insert(module.to_string(), height);
    }

    /// Returns the cursor of `module`.
    pub fn cursor_value(&self, module: &str) -> Option<u64> {
        lock(&self.state).cursors.get(module).copied()
    }

    /// Returns every value the cursor of `module` took through writes.
    pub fn cursor_history(&self, module: &str) -> Vec<u64> {
        lock(&self.state).cursor_history.get(module).cloned().unwrap_or_default()
    }

    /// Heights passed to successful [`BlockWriter::write_block`] calls, in call order.
    pub fn write_log(&self) -> Vec<u64> {
        lock(&self.state).write_log.clone()
    }

    /// Returns the stored block at `height`.
    pub fn block(&self, height: u64) -> Option<IndexedBlock> {
        lock(&self.state).blocks.get(&height).cloned()
    }

    /// Makes writes of `height` fail with a transient error.
    pub fn fail_write(&self, height: u64) {
        lock(&self.state).failing_writes.insert(height, false);
    }

    /// Makes writes of `height` fail with a fatal error.
    pub fn fail_write_fatally(&self, height: u64) {
        lock(&self.state).failing_writes.insert(height, true);
    }

    /// Unresolved failures of `module`, lowest height first.
    pub fn failed(&self, module: &str) -> Vec<FailedBlock> {
        lock(&self.state).failed.values().filter(|f| f.module == module).cloned().collect()
    }

    /// Returns the absence data written for `height`.
    pub fn absence(&self, height: u64) -> Option<BlockAbsence> {
        lock(&self.state).absences.get(&height).cloned()
    }

    /// Heights with absence data.
    pub fn absence_heights(&self) -> Vec<u64> {
        lock(&self.state).absences.keys().copied().collect()
    }

    /// Number of [`AbsenceStore::commit_absences`] calls.
    pub fn commit_count(&self) -> usize {
        lock(&self.state).absence_commits
    }

    /// Sets the proposer of `height`.
    pub fn set_proposer(&self, height: u64, proposer: &str) {
        lock(&self.state).proposers.insert(height, proposer.to_string());
    }

    /// Returns the proposer of `height`.
    pub fn proposer(&self, height: u64) -> Option<String> {
        lock(&self.state).proposers.get(&height).cloned()
    }

    /// Returns the snapshot of `day`.
    pub fn snapshot(&self, day: NaiveDate) -> Option<ValidatorSnapshot> {
        lock(&self.state).snapshots.get(&day).cloned()
    }

    /// Number of stored snapshots.
    pub fn snapshot_count(&self) -> usize {
        lock(&self.state).snapshots.len()
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn cursor(&self, module: &str) -> Result<Option<u64>, StorageError> {
        Ok(self.cursor_value(module))
    }
}

#[async_trait]
impl BlockWriter for MemoryStore {
    async fn write_block(&self, block: &IndexedBlock) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        let height = block.height();
        state.check_write(height)?;
        state.blocks.insert(height, block.clone());
        state.write_log.push(height);
        state.advance(tally_storage::BLOCKS_EL, height);
        Ok(())
    }

    async fn replace_block(&self, module: &str, block: &IndexedBlock) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        let height = block.height();
        state.check_write(height)?;
        state.blocks.insert(height, block.clone());
        state.failed.remove(&(module.to_string(), height));
        Ok(())
    }
}

#[async_trait]
impl FailedBlockStore for MemoryStore {
    async fn record_failure(
        &self,
        module: &str,
        height: u64,
        error: &str,
    ) -> Result<(), StorageError> {
        lock(&self.state).record(module, height, error);
        Ok(())
    }

    async fn record_skipped(
        &self,
        module: &str,
        height: u64,
        error: &str,
    ) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        state.record(module, height, error);
        state.advance(module, height);
        Ok(())
    }

    async fn unresolved(&self, module: &str, limit: u32) -> Result<Vec<FailedBlock>, StorageError> {
        let mut failed = self.failed(module);
        failed.sort_by_key(|entry| (entry.attempts, entry.height));
        failed.truncate(limit as usize);
        Ok(failed)
    }
}

#[async_trait]
impl AbsenceStore for MemoryStore {
    async fn commit_absences(
        &self,
        absences: &[BlockAbsence],
        cursor: u64,
    ) -> Result<u64, StorageError> {
        let mut state = lock(&self.state);
        let mut updated = 0;
        for absence in absences {
            if !state.blocks.contains_key(&absence.height) {
                continue;
            }
            state.absences.insert(absence.height, absence.clone());
            if !absence.proposer_address.is_empty() {
                state
                    .proposers
                    .entry(absence.height)
                    .or_insert_with(|| absence.proposer_address.clone());
            }
            updated += 1;
        }
        state.advance(tally_storage::CL_ABSENCES, cursor);
        state.absence_commits += 1;
        Ok(updated)
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn has_snapshot(&self, day: NaiveDate) -> Result<bool, StorageError> {
        Ok(lock(&self.state).snapshots.contains_key(&day))
    }

    async fn write_snapshot(&self, snapshot: &ValidatorSnapshot) -> Result<bool, StorageError> {
        let mut state = lock(&self.state);
        if state.snapshots.contains_key(&snapshot.day) {
            return Ok(false);
        }
        state.snapshots.insert(snapshot.day, snapshot.clone());
        Ok(true)
    }
}
