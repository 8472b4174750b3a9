use ethers::types::H256;
use sqlx::PgConnection;

use crate::error::IndexerResult;
use crate::repositories::{addr_bytes, hash_bytes, opt_addr_bytes, u64_of};
use crate::types::{u256_to_decimal, BlockDetails, ChainReceipt, ChainTransaction, TransactionDetails};

/// Inserts the merged transaction row: base transaction fields plus
/// chain-level details and the receipt status.
pub async fn insert(
    conn: &mut PgConnection,
    tx: &ChainTransaction,
    details: &TransactionDetails,
    block_details: &BlockDetails,
    receipt_status: i32,
) -> IndexerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            hash, from_address, to_address, nonce, transaction_index, gas_limit,
            gas_price, max_fee_per_gas, max_priority_fee_per_gas, data, value,
            chain_id, block_number, block_hash, type, l1_batch_number, fee,
            gas_per_pubdata, is_l1_originated, received_at, receipt_status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21)
        "#,
    )
    .bind(hash_bytes(tx.hash))
    .bind(addr_bytes(tx.from))
    .bind(opt_addr_bytes(tx.to))
    .bind(tx.nonce.as_u64() as i64)
    .bind(u64_of(tx.transaction_index) as i32)
    .bind(u256_to_decimal(tx.gas))
    .bind(tx.gas_price.map(u256_to_decimal).unwrap_or_else(|| "0".into()))
    .bind(tx.max_fee_per_gas.map(u256_to_decimal))
    .bind(tx.max_priority_fee_per_gas.map(u256_to_decimal))
    .bind(tx.input.to_vec())
    .bind(u256_to_decimal(tx.value))
    .bind(tx.chain_id.map(|id| id.as_u64() as i64))
    .bind(block_details.number as i64)
    .bind(tx.block_hash.map(hash_bytes).unwrap_or_default())
    .bind(tx.transaction_type.map_or(0, |t| t.as_u64() as i32))
    .bind(block_details.l1_batch_number.map(|n| n as i64))
    .bind(u256_to_decimal(details.fee))
    .bind(details.gas_per_pubdata.map(u256_to_decimal))
    .bind(details.is_l1_originated)
    .bind(details.received_at)
    .bind(receipt_status)
    .execute(conn)
    .await?;
    Ok(())
}

/// Records the failure reason extracted from a call trace.
pub async fn update_failure_reason(
    conn: &mut PgConnection,
    hash: H256,
    error: Option<String>,
    revert_reason: Option<String>,
) -> IndexerResult<()> {
    sqlx::query("UPDATE transactions SET error = $2, revert_reason = $3 WHERE hash = $1")
        .bind(hash_bytes(hash))
        .bind(error)
        .bind(revert_reason)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn insert_receipt(
    conn: &mut PgConnection,
    receipt: &ChainReceipt,
) -> IndexerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO transaction_receipts (
            transaction_hash, block_number, from_address, to_address,
            contract_address, gas_used, cumulative_gas_used,
            effective_gas_price, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(hash_bytes(receipt.transaction_hash))
    .bind(u64_of(receipt.block_number))
    .bind(addr_bytes(receipt.from))
    .bind(opt_addr_bytes(receipt.to))
    .bind(opt_addr_bytes(receipt.contract_address))
    .bind(receipt.gas_used.map(u256_to_decimal))
    .bind(u256_to_decimal(receipt.cumulative_gas_used))
    .bind(receipt.effective_gas_price.map(u256_to_decimal))
    .bind(receipt.status.map(|s| s.as_u64() as i32))
    .execute(conn)
    .await?;
    Ok(())
}
