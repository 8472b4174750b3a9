use sqlx::PgConnection;

use crate::error::IndexerResult;
use crate::repositories::{addr_bytes, hash_bytes};
use crate::types::ContractAddress;

/// Upserts a deployed contract address. Logs can replay out of order across
/// reverts, so a row is only overwritten by a deployment observed at a
/// strictly newer (block_number, log_index).
pub async fn upsert(
    conn: &mut PgConnection,
    contract: &ContractAddress,
    bytecode: &[u8],
) -> IndexerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO addresses (
            address, bytecode, created_in_block_number, creator_tx_hash,
            creator_address, created_in_log_index
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (address) DO UPDATE SET
            bytecode = EXCLUDED.bytecode,
            created_in_block_number = EXCLUDED.created_in_block_number,
            creator_tx_hash = EXCLUDED.creator_tx_hash,
            creator_address = EXCLUDED.creator_address,
            created_in_log_index = EXCLUDED.created_in_log_index
        WHERE
            EXCLUDED.created_in_block_number > addresses.created_in_block_number
            OR (
                EXCLUDED.created_in_block_number = addresses.created_in_block_number
                AND EXCLUDED.created_in_log_index > addresses.created_in_log_index
            )
        "#,
    )
    .bind(addr_bytes(contract.address))
    .bind(bytecode)
    .bind(contract.block_number as i64)
    .bind(hash_bytes(contract.transaction_hash))
    .bind(addr_bytes(contract.creator_address))
    .bind(contract.log_index as i32)
    .execute(conn)
    .await?;
    Ok(())
}
