use sqlx::PgConnection;

use crate::error::IndexerResult;
use crate::repositories::{addr_bytes, opt_hash_bytes};
use crate::types::{u256_to_decimal, Transfer};

/// Inserts transfers plus one `address_transfers` row per distinct side, so
/// per-address history reads never scan both transfer columns.
pub async fn insert_many(conn: &mut PgConnection, transfers: &[Transfer]) -> IndexerResult<()> {
    for transfer in transfers {
        let fields = transfer
            .fields
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|error| crate::error::IndexerError::Other(error.to_string()))?;
        let number: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO transfers (
                from_address, to_address, block_number, transaction_hash,
                transaction_index, timestamp, amount, token_address, token_type,
                type, is_fee_or_refund, is_internal, log_index, fields
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING number
            "#,
        )
        .bind(addr_bytes(transfer.from))
        .bind(addr_bytes(transfer.to))
        .bind(transfer.block_number as i64)
        .bind(opt_hash_bytes(transfer.transaction_hash))
        .bind(transfer.transaction_index as i32)
        .bind(transfer.timestamp)
        .bind(transfer.amount.map(u256_to_decimal))
        .bind(addr_bytes(transfer.token_address))
        .bind(transfer.token_type.as_str())
        .bind(transfer.r#type.as_str())
        .bind(transfer.is_fee_or_refund)
        .bind(transfer.is_internal)
        .bind(transfer.log_index as i32)
        .bind(fields)
        .fetch_one(&mut *conn)
        .await?;

        let mut sides = vec![transfer.from];
        if transfer.to != transfer.from {
            sides.push(transfer.to);
        }
        for address in sides {
            sqlx::query(
                r#"
                INSERT INTO address_transfers (
                    address, transfer_number, block_number, timestamp,
                    token_address, token_type, is_fee_or_refund, is_internal,
                    log_index
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(addr_bytes(address))
            .bind(number)
            .bind(transfer.block_number as i64)
            .bind(transfer.timestamp)
            .bind(addr_bytes(transfer.token_address))
            .bind(transfer.token_type.as_str())
            .bind(transfer.is_fee_or_refund)
            .bind(transfer.is_internal)
            .bind(transfer.log_index as i32)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}
