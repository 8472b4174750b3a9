use sqlx::PgConnection;

use crate::error::IndexerResult;

/// Tables whose rows are folded into materialized counters. Each carries a
/// monotonically growing `number` column used as the fold watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountedTable {
    Transactions,
    Transfers,
}

impl CountedTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            CountedTable::Transactions => "transactions",
            CountedTable::Transfers => "transfers",
        }
    }
}

/// A counter delta: how many rows of `table_name` match `query_string`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    pub table_name: String,
    pub query_string: String,
    pub count: i64,
}

/// The slice of a countable row the counter criteria look at.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CountableRecord {
    pub number: i64,
    pub block_number: i64,
    pub from_address: Vec<u8>,
    pub to_address: Option<Vec<u8>>,
}

pub async fn get_last_processed_record_number(
    conn: &mut PgConnection,
    table: CountedTable,
) -> IndexerResult<i64> {
    let number: Option<i64> = sqlx::query_scalar(
        "SELECT last_processed_record_number FROM counter_states WHERE table_name = $1",
    )
    .bind(table.table_name())
    .fetch_optional(conn)
    .await?;
    Ok(number.unwrap_or(-1))
}

pub async fn get_next_records(
    conn: &mut PgConnection,
    table: CountedTable,
    after_number: i64,
    limit: i64,
) -> IndexerResult<Vec<CountableRecord>> {
    let query = format!(
        r#"
        SELECT number, block_number, from_address, to_address
        FROM {}
        WHERE number > $1
        ORDER BY number ASC
        LIMIT $2
        "#,
        table.table_name()
    );
    let records = sqlx::query_as(&query)
        .bind(after_number)
        .bind(limit)
        .fetch_all(conn)
        .await?;
    Ok(records)
}

/// Records already folded into counters that a revert is about to delete.
pub async fn get_reverted_records(
    conn: &mut PgConnection,
    table: CountedTable,
    last_correct_block: u64,
    from_number: i64,
    to_number: i64,
    limit: i64,
) -> IndexerResult<Vec<CountableRecord>> {
    let query = format!(
        r#"
        SELECT number, block_number, from_address, to_address
        FROM {}
        WHERE block_number > $1 AND number BETWEEN $2 AND $3
        ORDER BY number ASC
        LIMIT $4
        "#,
        table.table_name()
    );
    let records = sqlx::query_as(&query)
        .bind(last_correct_block as i64)
        .bind(from_number)
        .bind(to_number)
        .bind(limit)
        .fetch_all(conn)
        .await?;
    Ok(records)
}

/// Applies counter increments and advances the watermark atomically with
/// them; the caller supplies the enclosing transaction.
pub async fn increment_counters(
    conn: &mut PgConnection,
    table: CountedTable,
    counters: &[Counter],
    last_processed_record_number: i64,
) -> IndexerResult<()> {
    for counter in counters {
        sqlx::query(
            r#"
            INSERT INTO counters (table_name, query_string, count)
            VALUES ($1, $2, $3)
            ON CONFLICT (table_name, query_string)
            DO UPDATE SET count = counters.count + EXCLUDED.count
            "#,
        )
        .bind(&counter.table_name)
        .bind(&counter.query_string)
        .bind(counter.count)
        .execute(&mut *conn)
        .await?;
    }
    sqlx::query(
        r#"
        INSERT INTO counter_states (table_name, last_processed_record_number)
        VALUES ($1, $2)
        ON CONFLICT (table_name)
        DO UPDATE SET last_processed_record_number = EXCLUDED.last_processed_record_number
        "#,
    )
    .bind(table.table_name())
    .bind(last_processed_record_number)
    .execute(conn)
    .await?;
    Ok(())
}

/// The watermark is deliberately not moved back: new rows always get higher
/// numbers, so decrementing the folded counts is enough.
pub async fn decrement_counters(
    conn: &mut PgConnection,
    counters: &[Counter],
) -> IndexerResult<()> {
    for counter in counters {
        sqlx::query(
            r#"
            UPDATE counters SET count = count - $3
            WHERE table_name = $1 AND query_string = $2
            "#,
        )
        .bind(&counter.table_name)
        .bind(&counter.query_string)
        .bind(counter.count)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
