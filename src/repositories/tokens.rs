use ethers::types::Address;
use sqlx::PgConnection;

use crate::error::{IndexerError, IndexerResult};
use crate::repositories::{addr_bytes, opt_addr_bytes, opt_hash_bytes};
use crate::types::Token;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TokenRow {
    pub l2_address: Vec<u8>,
    pub l1_address: Option<Vec<u8>>,
    pub symbol: String,
    pub name: Option<String>,
    pub decimals: i32,
    pub block_number: Option<i64>,
    pub icon_url: Option<String>,
}

/// Upserts a token. A stored row is only replaced by a deployment observed
/// at a strictly newer (block_number, log_index); the statically configured
/// base token row has no block number and loses to any on-chain observation.
pub async fn upsert(conn: &mut PgConnection, token: &Token) -> IndexerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO tokens (
            l2_address, l1_address, symbol, name, decimals, block_number,
            transaction_hash, log_index, icon_url
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (l2_address) DO UPDATE SET
            l1_address = EXCLUDED.l1_address,
            symbol = EXCLUDED.symbol,
            name = EXCLUDED.name,
            decimals = EXCLUDED.decimals,
            block_number = EXCLUDED.block_number,
            transaction_hash = EXCLUDED.transaction_hash,
            log_index = EXCLUDED.log_index,
            icon_url = EXCLUDED.icon_url
        WHERE
            tokens.block_number IS NULL
            OR EXCLUDED.block_number > tokens.block_number
            OR (
                EXCLUDED.block_number = tokens.block_number
                AND EXCLUDED.log_index > tokens.log_index
            )
        "#,
    )
    .bind(addr_bytes(token.l2_address))
    .bind(opt_addr_bytes(token.l1_address))
    .bind(&token.symbol)
    .bind(&token.name)
    .bind(token.decimals as i32)
    .bind(token.block_number.map(|n| n as i64))
    .bind(opt_hash_bytes(token.transaction_hash))
    .bind(token.log_index.map(|i| i as i32))
    .bind(&token.icon_url)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get(conn: &mut PgConnection, l2_address: Address) -> IndexerResult<Option<TokenRow>> {
    let row = sqlx::query_as(
        r#"
        SELECT l2_address, l1_address, symbol, name, decimals, block_number, icon_url
        FROM tokens WHERE l2_address = $1
        "#,
    )
    .bind(addr_bytes(l2_address))
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// By-value correction of the base token row when the stored metadata
/// drifts from configuration. The only place a Token row is updated without
/// a newer deployment.
pub async fn update_token_values(conn: &mut PgConnection, token: &Token) -> IndexerResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE tokens
        SET l1_address = $2, symbol = $3, name = $4, decimals = $5, icon_url = $6
        WHERE l2_address = $1
        "#,
    )
    .bind(addr_bytes(token.l2_address))
    .bind(opt_addr_bytes(token.l1_address))
    .bind(&token.symbol)
    .bind(&token.name)
    .bind(token.decimals as i32)
    .bind(&token.icon_url)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(IndexerError::Other(format!(
            "no token row to update for {:#x}",
            token.l2_address
        )));
    }
    Ok(())
}

/// Tokens and addresses have no FK to blocks: reverts must prune them
/// explicitly.
pub async fn delete_from(conn: &mut PgConnection, last_correct_block: u64) -> IndexerResult<()> {
    sqlx::query("DELETE FROM tokens WHERE block_number > $1")
        .bind(last_correct_block as i64)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM addresses WHERE created_in_block_number > $1")
        .bind(last_correct_block as i64)
        .execute(conn)
        .await?;
    Ok(())
}
