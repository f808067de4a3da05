//! PostgreSQL implementation of the storage traits.

use crate::{
    AbsenceStore, BLOCKS_EL, BlockAbsence, BlockWriter, CL_ABSENCES, CursorStore, FailedBlock,
    FailedBlockStore, IndexedBlock, SnapshotStore, StorageError, ValidatorSnapshot,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool, Postgres, Transaction, postgres::PgPoolOptions};
use std::fmt::LowerHex;
use tracing::debug;

/// Idempotent DDL of every table the indexer writes.
pub const SCHEMA: &str = include_str!("../schema.sql");

/// Store backed by a PostgreSQL connection pool.
///
/// Every unit of work acquires its own connection from the pool and returns it when the
/// transaction commits, rolls back or is dropped.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wraps an existing pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool of at most `max_connections` connections to `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self { pool })
    }

    /// Creates missing tables and indexes.
    pub async fn apply_schema(&self) -> Result<(), StorageError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Returns the underlying pool.
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CursorStore for PgStore {
    async fn cursor(&self, module: &str) -> Result<Option<u64>, StorageError> {
        let height: Option<i64> = sqlx::query_scalar(
            "SELECT last_processed_height FROM ingest_cursors WHERE module = $1",
        )
        .bind(module)
        .fetch_optional(&self.pool)
        .await?;
        Ok(height.map(|h| h.max(0) as u64))
    }
}

#[async_trait]
impl BlockWriter for PgStore {
    async fn write_block(&self, block: &IndexedBlock) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        upsert_block(&mut tx, block).await?;
        advance_cursor(&mut tx, BLOCKS_EL, block.height()).await?;
        tx.commit().await?;
        debug!(target: "storage", height = block.height(), "Committed block");
        Ok(())
    }

    async fn replace_block(&self, module: &str, block: &IndexedBlock) -> Result<(), StorageError> {
        let height = to_i64("blocks.height", block.height())?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM transactions WHERE block_height = $1")
            .bind(height)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM contracts WHERE block_height = $1")
            .bind(height)
            .execute(&mut *tx)
            .await?;
        upsert_block(&mut tx, block).await?;
        sqlx::query("DELETE FROM failed_blocks WHERE module = $1 AND block_height = $2")
            .bind(module)
            .bind(height)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl FailedBlockStore for PgStore {
    async fn record_failure(
        &self,
        module: &str,
        height: u64,
        error: &str,
    ) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await?;
        insert_failure(&mut conn, module, height, error).await
    }

    async fn record_skipped(
        &self,
        module: &str,
        height: u64,
        error: &str,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        insert_failure(&mut tx, module, height, error).await?;
        advance_cursor(&mut tx, module, height).await?;
        tx.commit().await?;
        debug!(target: "storage", module, height, "Skipped failed block");
        Ok(())
    }

    async fn unresolved(&self, module: &str, limit: u32) -> Result<Vec<FailedBlock>, StorageError> {
        let rows: Vec<(String, i64, i32, Option<String>)> = sqlx::query_as(
            "SELECT module, block_height, attempts, last_error
             FROM failed_blocks
             WHERE module = $1 AND resolved_at IS NULL
             ORDER BY attempts ASC, block_height ASC
             LIMIT $2",
        )
        .bind(module)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(module, height, attempts, last_error)| FailedBlock {
                module,
                height: height.max(0) as u64,
                attempts: attempts.max(0) as u32,
                last_error,
            })
            .collect())
    }
}

#[async_trait]
impl AbsenceStore for PgStore {
    async fn commit_absences(
        &self,
        absences: &[BlockAbsence],
        cursor: u64,
    ) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;

        for absence in absences {
            let height = to_i64("blocks.height", absence.height)?;
            let absent = serde_json::to_value(&absence.absent).map_err(|source| {
                StorageError::Encode { column: "blocks.absent_validators", source }
            })?;
            let result = sqlx::query(
                "UPDATE blocks SET
                    proposer_address = COALESCE(proposer_address, NULLIF($2, '')),
                    missing_validator_count = $3,
                    missing_voting_power = $4::NUMERIC,
                    total_voting_power = $5::NUMERIC,
                    missing_percentage = $6::NUMERIC,
                    commit_round = $7,
                    absent_validators = $8
                 WHERE height = $1",
            )
            .bind(height)
            .bind(&absence.proposer_address)
            .bind(to_i32("blocks.missing_validator_count", u64::from(absence.missing_count))?)
            .bind(absence.missing_voting_power.to_string())
            .bind(absence.total_voting_power.to_string())
            .bind(absence.missing_percentage.to_string())
            .bind(to_i32("blocks.commit_round", u64::from(absence.commit_round))?)
            .bind(absent)
            .execute(&mut *tx)
            .await?;
            updated += result.rows_affected();

            if !absence.proposer_address.is_empty() {
                sqlx::query(
                    "INSERT INTO validators (address, first_seen_height, last_proposed_height)
                     VALUES ($1, $2, $2)
                     ON CONFLICT (address) DO UPDATE SET
                        first_seen_height =
                            LEAST(validators.first_seen_height, EXCLUDED.first_seen_height),
                        last_proposed_height =
                            GREATEST(validators.last_proposed_height, EXCLUDED.last_proposed_height)",
                )
                .bind(&absence.proposer_address)
                .bind(height)
                .execute(&mut *tx)
                .await?;
            }
        }

        advance_cursor(&mut tx, CL_ABSENCES, cursor).await?;
        tx.commit().await?;
        Ok(updated)
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn has_snapshot(&self, day: NaiveDate) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM validator_set_daily_snapshots WHERE day = $1)",
        )
        .bind(day)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn write_snapshot(&self, snapshot: &ValidatorSnapshot) -> Result<bool, StorageError> {
        let boundary =
            to_i64("validator_set_daily_snapshots.boundary_block", snapshot.boundary_height)?;
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for entry in &snapshot.entries {
            let result = sqlx::query(
                "INSERT INTO validator_set_daily_snapshots
                    (day, boundary_block, boundary_time, validator_index, address, voting_power)
                 VALUES ($1, $2, $3, $4, $5, $6::NUMERIC)
                 ON CONFLICT (day, validator_index) DO NOTHING",
            )
            .bind(snapshot.day)
            .bind(boundary)
            .bind(snapshot.boundary_time)
            .bind(to_i32("validator_set_daily_snapshots.validator_index", u64::from(entry.index))?)
            .bind(&entry.address)
            .bind(entry.voting_power.to_string())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted > 0)
    }
}

async fn insert_failure(
    conn: &mut PgConnection,
    module: &str,
    height: u64,
    error: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO failed_blocks (module, block_height, attempts, last_error)
         VALUES ($1, $2, 1, $3)
         ON CONFLICT (module, block_height) DO UPDATE SET
            attempts = failed_blocks.attempts + 1,
            last_error = EXCLUDED.last_error,
            updated_at = now(),
            resolved_at = NULL",
    )
    .bind(module)
    .bind(to_i64("failed_blocks.block_height", height)?)
    .bind(error)
    .execute(conn)
    .await?;
    Ok(())
}

async fn advance_cursor(
    tx: &mut Transaction<'_, Postgres>,
    module: &str,
    height: u64,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO ingest_cursors (module, last_processed_height, updated_at)
         VALUES ($1, $2, now())
         ON CONFLICT (module) DO UPDATE SET
            last_processed_height =
                GREATEST(ingest_cursors.last_processed_height, EXCLUDED.last_processed_height),
            updated_at = now()",
    )
    .bind(module)
    .bind(to_i64("ingest_cursors.last_processed_height", height)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Upserts the execution-layer rows of a block. Consensus columns are never written here.
async fn upsert_block(
    tx: &mut Transaction<'_, Postgres>,
    indexed: &IndexedBlock,
) -> Result<(), StorageError> {
    let block = &indexed.block;
    let height = to_i64("blocks.height", block.height)?;

    sqlx::query(
        "INSERT INTO blocks (
            height, hash, parent_hash, block_time, miner, base_fee_per_gas, gas_used, gas_limit,
            transaction_count, client_kind, client_version, client_raw,
            total_effective_gas_price, avg_effective_gas_price, total_priority_fee, avg_priority_fee
         ) VALUES (
            $1, $2, $3, $4, $5, $6::NUMERIC, $7, $8, $9, $10, $11, $12,
            $13::NUMERIC, $14::NUMERIC, $15::NUMERIC, $16::NUMERIC
         )
         ON CONFLICT (height) DO UPDATE SET
            hash = EXCLUDED.hash,
            parent_hash = EXCLUDED.parent_hash,
            block_time = EXCLUDED.block_time,
            miner = EXCLUDED.miner,
            base_fee_per_gas = EXCLUDED.base_fee_per_gas,
            gas_used = EXCLUDED.gas_used,
            gas_limit = EXCLUDED.gas_limit,
            transaction_count = EXCLUDED.transaction_count,
            client_kind = EXCLUDED.client_kind,
            client_version = EXCLUDED.client_version,
            client_raw = EXCLUDED.client_raw,
            total_effective_gas_price = EXCLUDED.total_effective_gas_price,
            avg_effective_gas_price = EXCLUDED.avg_effective_gas_price,
            total_priority_fee = EXCLUDED.total_priority_fee,
            avg_priority_fee = EXCLUDED.avg_priority_fee",
    )
    .bind(height)
    .bind(hex(&block.hash))
    .bind(hex(&block.parent_hash))
    .bind(block.timestamp)
    .bind(hex(&block.miner))
    .bind(block.base_fee_per_gas.map(|fee| fee.to_string()))
    .bind(to_i64("blocks.gas_used", block.gas_used)?)
    .bind(to_i64("blocks.gas_limit", block.gas_limit)?)
    .bind(to_i32("blocks.transaction_count", block.transaction_count)?)
    .bind(&block.client.kind)
    .bind(&block.client.version)
    .bind(&block.client.raw)
    .bind(block.fees.total_effective_price.to_string())
    .bind(block.fees.avg_effective_price.to_string())
    .bind(block.fees.total_priority_fee.to_string())
    .bind(block.fees.avg_priority_fee.to_string())
    .execute(&mut **tx)
    .await?;

    for row in &indexed.transactions {
        let payload = serde_json::to_value(&row.payload)
            .map_err(|source| StorageError::Encode { column: "transactions.payload", source })?;
        sqlx::query(
            "INSERT INTO transactions (
                hash, block_height, transaction_index, from_address, to_address, value, nonce,
                gas_limit, gas_price, max_fee_per_gas, max_priority_fee_per_gas, tx_type, input,
                payload, is_contract_creation, contract_address, status, gas_used,
                cumulative_gas_used, effective_gas_price, priority_fee_per_gas,
                erc20_transfer_count, erc721_transfer_count
             ) VALUES (
                $1, $2, $3, $4, $5, $6::NUMERIC, $7, $8, $9::NUMERIC, $10::NUMERIC, $11::NUMERIC,
                $12, $13, $14, $15, $16, $17, $18, $19, $20::NUMERIC, $21::NUMERIC, $22, $23
             )
             ON CONFLICT (hash) DO UPDATE SET
                block_height = EXCLUDED.block_height,
                transaction_index = EXCLUDED.transaction_index,
                from_address = EXCLUDED.from_address,
                to_address = EXCLUDED.to_address,
                value = EXCLUDED.value,
                nonce = EXCLUDED.nonce,
                gas_limit = EXCLUDED.gas_limit,
                gas_price = EXCLUDED.gas_price,
                max_fee_per_gas = EXCLUDED.max_fee_per_gas,
                max_priority_fee_per_gas = EXCLUDED.max_priority_fee_per_gas,
                tx_type = EXCLUDED.tx_type,
                input = EXCLUDED.input,
                payload = EXCLUDED.payload,
                is_contract_creation = EXCLUDED.is_contract_creation,
                contract_address = EXCLUDED.contract_address,
                status = EXCLUDED.status,
                gas_used = EXCLUDED.gas_used,
                cumulative_gas_used = EXCLUDED.cumulative_gas_used,
                effective_gas_price = EXCLUDED.effective_gas_price,
                priority_fee_per_gas = EXCLUDED.priority_fee_per_gas,
                erc20_transfer_count = EXCLUDED.erc20_transfer_count,
                erc721_transfer_count = EXCLUDED.erc721_transfer_count",
        )
        .bind(hex(&row.hash))
        .bind(height)
        .bind(to_i32("transactions.transaction_index", row.transaction_index)?)
        .bind(hex(&row.from))
        .bind(row.to.as_ref().map(hex))
        .bind(row.value.to_string())
        .bind(to_i64("transactions.nonce", row.nonce)?)
        .bind(to_i64("transactions.gas_limit", row.gas_limit)?)
        .bind(row.gas_price.map(|v| v.to_string()))
        .bind(row.max_fee_per_gas.map(|v| v.to_string()))
        .bind(row.max_priority_fee_per_gas.map(|v| v.to_string()))
        .bind(i16::from(row.tx_type))
        .bind(row.input.as_ref())
        .bind(payload)
        .bind(row.is_contract_creation)
        .bind(row.contract_address.as_ref().map(hex))
        .bind(row.status)
        .bind(to_i64("transactions.gas_used", row.gas_used)?)
        .bind(to_i64("transactions.cumulative_gas_used", row.cumulative_gas_used)?)
        .bind(row.effective_gas_price.to_string())
        .bind(row.priority_fee_per_gas.to_string())
        .bind(to_i32("transactions.erc20_transfer_count", u64::from(row.erc20_transfers))?)
        .bind(to_i32("transactions.erc721_transfer_count", u64::from(row.erc721_transfers))?)
        .execute(&mut **tx)
        .await?;
    }

    for contract in &indexed.contracts {
        sqlx::query(
            "INSERT INTO contracts (address, creator_address, transaction_hash, block_height)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (address) DO UPDATE SET
                creator_address = EXCLUDED.creator_address,
                transaction_hash = EXCLUDED.transaction_hash,
                block_height = EXCLUDED.block_height",
        )
        .bind(hex(&contract.address))
        .bind(hex(&contract.creator))
        .bind(hex(&contract.transaction_hash))
        .bind(height)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Lowercase `0x`-prefixed hex.
fn hex<T: LowerHex>(value: &T) -> String {
    format!("{value:#x}")
}

fn to_i64(column: &'static str, value: u64) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| StorageError::OutOfRange { column, value })
}

fn to_i32(column: &'static str, value: u64) -> Result<i32, StorageError> {
    i32::try_from(value).map_err(|_| StorageError::OutOfRange { column, value })
}
