use ethers::types::{Address, U256};
use sqlx::PgConnection;

use crate::error::IndexerResult;
use crate::repositories::addr_bytes;
use crate::types::{u256_to_decimal, TokenType};

/// Appends one ledger row per (address, token) that changed in the block.
pub async fn insert_many(
    conn: &mut PgConnection,
    block_number: u64,
    balances: &[(Address, Address, TokenType, U256)],
) -> IndexerResult<()> {
    for (address, token_address, token_type, balance) in balances {
        sqlx::query(
            r#"
            INSERT INTO balances (address, token_address, block_number, token_type, balance)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (address, token_address, block_number)
            DO UPDATE SET token_type = EXCLUDED.token_type, balance = EXCLUDED.balance
            "#,
        )
        .bind(addr_bytes(*address))
        .bind(addr_bytes(*token_address))
        .bind(block_number as i64)
        .bind(token_type.as_str())
        .bind(u256_to_decimal(*balance))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Within `(from, to]`, keeps only the newest row per (address, token) and
/// drops the older ones. Rows outside the window are untouched.
pub async fn delete_old_balances(
    conn: &mut PgConnection,
    from_block: u64,
    to_block: u64,
) -> IndexerResult<()> {
    sqlx::query(
        r#"
        DELETE FROM balances
        USING (
            SELECT address, token_address, MAX(block_number) AS block_number
            FROM balances
            WHERE block_number > $1 AND block_number <= $2
            GROUP BY (address, token_address)
        ) AS latest_balances_to_leave
        WHERE
            balances.address = latest_balances_to_leave.address
            AND balances.token_address = latest_balances_to_leave.token_address
            AND balances.block_number < latest_balances_to_leave.block_number
        "#,
    )
    .bind(from_block as i64)
    .bind(to_block as i64)
    .execute(conn)
    .await?;
    Ok(())
}

/// Removes zero-balance rows in `(from, to]` along with any older rows for
/// the same (address, token), so a drained account stops occupying space.
pub async fn delete_zero_balances(
    conn: &mut PgConnection,
    from_block: u64,
    to_block: u64,
) -> IndexerResult<()> {
    sqlx::query(
        r#"
        DELETE FROM balances
        USING (
            SELECT address, token_address, block_number
            FROM balances
            WHERE block_number > $1 AND block_number <= $2 AND balance = '0'
        ) AS zero_balances
        WHERE
            balances.address = zero_balances.address
            AND balances.token_address = zero_balances.token_address
            AND balances.block_number <= zero_balances.block_number
        "#,
    )
    .bind(from_block as i64)
    .bind(to_block as i64)
    .execute(conn)
    .await?;
    Ok(())
}

/// The cleaner's progress watermark lives in a Postgres sequence so it
/// survives restarts without another table.
pub async fn get_delete_balances_from_block(conn: &mut PgConnection) -> IndexerResult<u64> {
    let value: i64 = sqlx::query_scalar("SELECT last_value FROM balances_cleaner_from_block_seq")
        .fetch_one(conn)
        .await?;
    Ok(value as u64)
}

pub async fn set_delete_balances_from_block(
    conn: &mut PgConnection,
    from_block: u64,
) -> IndexerResult<()> {
    sqlx::query("SELECT setval('balances_cleaner_from_block_seq', $1, false)")
        .bind(from_block as i64)
        .execute(conn)
        .await?;
    Ok(())
}
