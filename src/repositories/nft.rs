use sqlx::PgConnection;

use crate::error::IndexerResult;
use crate::repositories::addr_bytes;
use crate::types::{u256_to_decimal, Transfer};

/// Maintains current NFT ownership from ERC721 transfers. Ownership follows
/// the newest (block_number, log_index) observation, same rule as addresses
/// and tokens.
pub async fn upsert_owner(conn: &mut PgConnection, transfer: &Transfer) -> IndexerResult<()> {
    let Some(fields) = &transfer.fields else {
        return Ok(());
    };
    sqlx::query(
        r#"
        INSERT INTO nft_items (token_address, token_id, owner, block_number, log_index)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (token_address, token_id) DO UPDATE SET
            owner = EXCLUDED.owner,
            block_number = EXCLUDED.block_number,
            log_index = EXCLUDED.log_index
        WHERE
            EXCLUDED.block_number > nft_items.block_number
            OR (
                EXCLUDED.block_number = nft_items.block_number
                AND EXCLUDED.log_index > nft_items.log_index
            )
        "#,
    )
    .bind(addr_bytes(transfer.token_address))
    .bind(u256_to_decimal(fields.token_id))
    .bind(addr_bytes(transfer.to))
    .bind(transfer.block_number as i64)
    .bind(transfer.log_index as i32)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn delete_from(conn: &mut PgConnection, last_correct_block: u64) -> IndexerResult<()> {
    sqlx::query("DELETE FROM nft_items WHERE block_number > $1")
        .bind(last_correct_block as i64)
        .execute(conn)
        .await?;
    Ok(())
}
