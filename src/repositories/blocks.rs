use ethers::types::H256;
use sqlx::PgConnection;

use crate::error::{IndexerError, IndexerResult};
use crate::repositories::{hash_bytes, opt_hash_bytes};
use crate::types::{u256_to_decimal, ChainBlock, BlockDetails};

/// Number and hash of a committed block, as needed for linkage checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub number: u64,
    pub hash: H256,
}

#[derive(sqlx::FromRow)]
struct StoredBlockRow {
    number: i64,
    hash: Vec<u8>,
}

impl TryFrom<StoredBlockRow> for StoredBlock {
    type Error = IndexerError;

    fn try_from(row: StoredBlockRow) -> Result<Self, Self::Error> {
        if row.hash.len() != 32 {
            return Err(IndexerError::Other(format!(
                "stored block {} has a malformed hash",
                row.number
            )));
        }
        Ok(StoredBlock {
            number: row.number as u64,
            hash: H256::from_slice(&row.hash),
        })
    }
}

pub async fn insert(
    conn: &mut PgConnection,
    block: &ChainBlock,
    details: &BlockDetails,
) -> IndexerResult<()> {
    let hash = block
        .hash
        .ok_or_else(|| IndexerError::Other("cannot store a pending block".into()))?;
    sqlx::query(
        r#"
        INSERT INTO blocks (
            number, hash, parent_hash, timestamp, nonce, gas_limit, gas_used,
            base_fee_per_gas, extra_data, miner, l1_batch_number, l1_tx_count,
            l2_tx_count, root_hash, commit_tx_hash, committed_at, prove_tx_hash,
            proven_at, execute_tx_hash, executed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20)
        "#,
    )
    .bind(details.number as i64)
    .bind(hash_bytes(hash))
    .bind(hash_bytes(block.parent_hash))
    .bind(details.timestamp_utc())
    .bind(block.nonce.map(|n| n.as_bytes().to_vec()))
    .bind(u256_to_decimal(block.gas_limit))
    .bind(u256_to_decimal(block.gas_used))
    .bind(block.base_fee_per_gas.map(u256_to_decimal))
    .bind(block.extra_data.to_vec())
    .bind(block.author.map(|a| a.as_bytes().to_vec()))
    .bind(details.l1_batch_number.map(|n| n as i64))
    .bind(details.l1_tx_count as i32)
    .bind(details.l2_tx_count as i32)
    .bind(opt_hash_bytes(details.root_hash))
    .bind(opt_hash_bytes(details.commit_tx_hash))
    .bind(details.committed_at)
    .bind(opt_hash_bytes(details.prove_tx_hash))
    .bind(details.proven_at)
    .bind(opt_hash_bytes(details.execute_tx_hash))
    .bind(details.executed_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Newest committed block, optionally capped at `to_block` so a bounded
/// ingestion window never observes blocks beyond its end.
pub async fn get_last_block(
    conn: &mut PgConnection,
    to_block: Option<u64>,
) -> IndexerResult<Option<StoredBlock>> {
    let row: Option<StoredBlockRow> = sqlx::query_as(
        r#"
        SELECT number, hash FROM blocks
        WHERE $1::BIGINT IS NULL OR number <= $1
        ORDER BY number DESC
        LIMIT 1
        "#,
    )
    .bind(to_block.map(|n| n as i64))
    .fetch_optional(conn)
    .await?;
    row.map(StoredBlock::try_from).transpose()
}

pub async fn get_block(
    conn: &mut PgConnection,
    number: u64,
) -> IndexerResult<Option<StoredBlock>> {
    let row: Option<StoredBlockRow> =
        sqlx::query_as("SELECT number, hash FROM blocks WHERE number = $1")
            .bind(number as i64)
            .fetch_optional(conn)
            .await?;
    row.map(StoredBlock::try_from).transpose()
}

pub async fn get_earliest_block_number(conn: &mut PgConnection) -> IndexerResult<Option<u64>> {
    let number: Option<i64> = sqlx::query_scalar("SELECT MIN(number) FROM blocks")
        .fetch_one(conn)
        .await?;
    Ok(number.map(|n| n as u64))
}

/// Numbers of the oldest stored blocks whose batch is not yet executed on
/// L1, in ascending order.
pub async fn get_unfinalized_block_numbers(
    conn: &mut PgConnection,
    limit: i64,
) -> IndexerResult<Vec<u64>> {
    let numbers: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT number FROM blocks
        WHERE execute_tx_hash IS NULL
        ORDER BY number ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(numbers.into_iter().map(|n| n as u64).collect())
}

/// Refreshes the L1 finality coordinates of an already stored block as its
/// batch moves through commit, prove and execute.
pub async fn update_finality(
    conn: &mut PgConnection,
    details: &BlockDetails,
) -> IndexerResult<()> {
    sqlx::query(
        r#"
        UPDATE blocks SET
            l1_batch_number = $2,
            commit_tx_hash = $3,
            committed_at = $4,
            prove_tx_hash = $5,
            proven_at = $6,
            execute_tx_hash = $7,
            executed_at = $8
        WHERE number = $1
        "#,
    )
    .bind(details.number as i64)
    .bind(details.l1_batch_number.map(|n| n as i64))
    .bind(opt_hash_bytes(details.commit_tx_hash))
    .bind(details.committed_at)
    .bind(opt_hash_bytes(details.prove_tx_hash))
    .bind(details.proven_at)
    .bind(opt_hash_bytes(details.execute_tx_hash))
    .bind(details.executed_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Newest block whose batch has been executed on L1. Blocks at or below it
/// cannot be reorganized away.
pub async fn get_last_executed_block_number(
    conn: &mut PgConnection,
) -> IndexerResult<Option<u64>> {
    let number: Option<i64> =
        sqlx::query_scalar("SELECT MAX(number) FROM blocks WHERE execute_tx_hash IS NOT NULL")
            .fetch_one(conn)
            .await?;
    Ok(number.map(|n| n as u64))
}

/// Deletes every block above `last_correct_block`. Transactions, receipts,
/// logs, transfers and balances go with them through FK cascades.
pub async fn delete_from(
    conn: &mut PgConnection,
    last_correct_block: u64,
) -> IndexerResult<u64> {
    let result = sqlx::query("DELETE FROM blocks WHERE number > $1")
        .bind(last_correct_block as i64)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}
