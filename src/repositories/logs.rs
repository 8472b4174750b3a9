use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::error::IndexerResult;
use crate::repositories::{addr_bytes, opt_hash_bytes, u64_of};
use crate::types::ChainLog;

pub async fn insert_many(
    conn: &mut PgConnection,
    logs: &[ChainLog],
    timestamp: DateTime<Utc>,
) -> IndexerResult<()> {
    for log in logs {
        let topics: Vec<Vec<u8>> = log.topics.iter().map(|t| t.as_bytes().to_vec()).collect();
        sqlx::query(
            r#"
            INSERT INTO logs (
                address, topics, data, block_number, transaction_hash,
                transaction_index, log_index, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(addr_bytes(log.address))
        .bind(topics)
        .bind(log.data.to_vec())
        .bind(u64_of(log.block_number))
        .bind(opt_hash_bytes(log.transaction_hash))
        .bind(u64_of(log.transaction_index) as i32)
        .bind(log.log_index.map_or(0, |i| i.as_u64() as i32))
        .bind(timestamp)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
