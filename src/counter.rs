use std::collections::BTreeMap;
use std::fmt::Write as _;

use sqlx::PgConnection;

use crate::error::IndexerResult;
use crate::repositories::counters::{self, CountableRecord, CountedTable, Counter};
use crate::uow::UnitOfWork;

/// A criteria is a list of condition field sets; a `"a|b"` set folds both
/// fields of a record into the same counter dimension.
pub type CriteriaList = &'static [&'static [&'static str]];

/// Both counted tables expose the same dimension: rows touching an address
/// on either side.
pub const ADDRESS_CRITERIA: CriteriaList = &[&["from|to"]];

/// Form-encodes a query component the way `URLSearchParams` does: the `|`
/// inside condition field set names must survive as `%7C`.
fn encode_form_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'*' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

/// Renders filters as a sorted, form-encoded query string. The sorting makes
/// the string canonical so the same filters always hit the same counter row.
pub fn get_query_string(filters: &BTreeMap<String, String>) -> String {
    filters
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                encode_form_component(key),
                encode_form_component(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn record_field_value(record: &CountableRecord, field: &str) -> String {
    match field {
        "from" => format!("0x{}", hex::encode(&record.from_address)),
        "to" => record
            .to_address
            .as_ref()
            .map_or_else(|| "null".to_string(), |a| format!("0x{}", hex::encode(a))),
        "blockNumber" => record.block_number.to_string(),
        _ => "null".to_string(),
    }
}

/// Folds a batch of records into counter deltas.
///
/// For each criteria, every record contributes one count per distinct
/// combination of its condition field set values; a record whose `from` and
/// `to` are the same address is counted once for `"from|to"`, not twice.
/// The unconditional total (empty query string) always comes first.
pub fn calculate_counters(
    table_name: &str,
    records: &[CountableRecord],
    criteria_list: CriteriaList,
) -> Vec<Counter> {
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();

    for criteria in criteria_list {
        for record in records {
            let mut combinations: Vec<BTreeMap<String, String>> = Vec::new();
            for condition_field_set in *criteria {
                let to_extend = std::mem::take(&mut combinations);
                let mut seen_values: Vec<String> = Vec::new();

                for field in condition_field_set.split('|') {
                    let value = record_field_value(record, field);
                    if seen_values.contains(&value) {
                        continue;
                    }
                    seen_values.push(value.clone());
                    if to_extend.is_empty() {
                        let mut combination = BTreeMap::new();
                        combination.insert(condition_field_set.to_string(), value.clone());
                        combinations.push(combination);
                    }
                    for base in &to_extend {
                        let mut combination = base.clone();
                        combination.insert(condition_field_set.to_string(), value.clone());
                        combinations.push(combination);
                    }
                }
            }
            for combination in &combinations {
                *counts.entry(get_query_string(combination)).or_insert(0) += 1;
            }
        }
    }

    let mut result = vec![Counter {
        table_name: table_name.to_string(),
        query_string: String::new(),
        count: records.len() as i64,
    }];
    for (query_string, count) in counts {
        result.push(Counter {
            table_name: table_name.to_string(),
            query_string,
            count,
        });
    }
    result
}

/// Incrementally folds one table's rows into materialized counters, batch
/// by batch, carrying its watermark in `counter_states`.
pub struct CounterProcessor {
    uow: UnitOfWork,
    table: CountedTable,
    criteria: CriteriaList,
    records_batch_size: i64,
    last_processed_record_number: Option<i64>,
}

impl CounterProcessor {
    pub fn new(
        uow: UnitOfWork,
        table: CountedTable,
        criteria: CriteriaList,
        records_batch_size: i64,
    ) -> Self {
        Self {
            uow,
            table,
            criteria,
            records_batch_size,
            last_processed_record_number: None,
        }
    }

    /// Folds the next batch. Returns true when a full batch was processed
    /// and more rows are likely waiting. On error the cached watermark is
    /// dropped so the next attempt re-reads it from the database.
    pub async fn process_next_batch(&mut self) -> IndexerResult<bool> {
        match self.try_process_next_batch().await {
            Ok(more) => Ok(more),
            Err(error) => {
                self.last_processed_record_number = None;
                Err(error)
            }
        }
    }

    async fn try_process_next_batch(&mut self) -> IndexerResult<bool> {
        let last_processed = match self.last_processed_record_number {
            Some(number) => number,
            None => {
                let mut conn = self.uow.pool().acquire().await?;
                counters::get_last_processed_record_number(&mut conn, self.table).await?
            }
        };

        let records = {
            let mut conn = self.uow.pool().acquire().await?;
            counters::get_next_records(&mut conn, self.table, last_processed, self.records_batch_size)
                .await?
        };
        if records.is_empty() {
            self.last_processed_record_number = Some(last_processed);
            return Ok(false);
        }

        tracing::debug!(
            table = self.table.table_name(),
            starting_from_number = last_processed + 1,
            "updating counters"
        );
        let deltas = calculate_counters(self.table.table_name(), &records, self.criteria);
        let new_last_processed = records[records.len() - 1].number;

        let mut tx = self.uow.begin().await?;
        counters::increment_counters(tx.conn(), self.table, &deltas, new_last_processed).await?;
        tx.commit().await?;

        self.last_processed_record_number = Some(new_last_processed);
        Ok(records.len() as i64 == self.records_batch_size)
    }

}

/// Subtracts already-folded rows above `last_correct_block` from the
/// counters, walking the numbered rows up to the stored watermark. The
/// watermark itself stays put: replacement rows always get higher numbers,
/// so a stale cached watermark in a running processor remains valid. Runs
/// on the caller's connection so it shares the revert transaction.
pub async fn revert_counters(
    conn: &mut PgConnection,
    table: CountedTable,
    criteria: CriteriaList,
    records_batch_size: i64,
    last_correct_block: u64,
) -> IndexerResult<()> {
    let last_processed = counters::get_last_processed_record_number(&mut *conn, table).await?;
    let mut last_reverted: i64 = -1;

    loop {
        if last_processed <= last_reverted {
            return Ok(());
        }
        let records = counters::get_reverted_records(
            &mut *conn,
            table,
            last_correct_block,
            last_reverted + 1,
            last_processed,
            records_batch_size,
        )
        .await?;
        if records.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            table = table.table_name(),
            starting_from_number = records[0].number,
            "reverting counters"
        );
        let deltas = calculate_counters(table.table_name(), &records, criteria);
        counters::decrement_counters(&mut *conn, &deltas).await?;

        last_reverted = records[records.len() - 1].number;
        if (records.len() as i64) < records_batch_size {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(number: i64, block: i64, from: u8, to: Option<u8>) -> CountableRecord {
        CountableRecord {
            number,
            block_number: block,
            from_address: vec![from; 20],
            to_address: to.map(|b| vec![b; 20]),
        }
    }

    fn addr(byte: u8) -> String {
        format!("0x{}", hex::encode(vec![byte; 20]))
    }

    #[test]
    fn query_string_is_sorted_and_form_encoded() {
        let mut filters = BTreeMap::new();
        filters.insert("to".to_string(), "123".to_string());
        filters.insert("from|to".to_string(), "321".to_string());
        assert_eq!(get_query_string(&filters), "from%7Cto=321&to=123");
    }

    #[test]
    fn empty_filters_render_an_empty_query_string() {
        assert_eq!(get_query_string(&BTreeMap::new()), "");
    }

    #[test]
    fn counts_every_record_in_the_total() {
        let records = vec![
            record(1, 10, 0x11, Some(0x22)),
            record(2, 10, 0x33, Some(0x11)),
        ];
        let counters = calculate_counters("transfers", &records, ADDRESS_CRITERIA);
        assert_eq!(counters[0].table_name, "transfers");
        assert_eq!(counters[0].query_string, "");
        assert_eq!(counters[0].count, 2);
    }

    #[test]
    fn counts_each_side_of_the_address_dimension() {
        let records = vec![
            record(1, 10, 0x11, Some(0x22)),
            record(2, 10, 0x33, Some(0x11)),
        ];
        let counters = calculate_counters("transfers", &records, ADDRESS_CRITERIA);
        let by_query: BTreeMap<_, _> = counters
            .iter()
            .map(|c| (c.query_string.clone(), c.count))
            .collect();
        assert_eq!(by_query[&format!("from%7Cto={}", addr(0x11))], 2);
        assert_eq!(by_query[&format!("from%7Cto={}", addr(0x22))], 1);
        assert_eq!(by_query[&format!("from%7Cto={}", addr(0x33))], 1);
    }

    #[test]
    fn self_transfer_is_counted_once() {
        let records = vec![record(1, 10, 0x11, Some(0x11))];
        let counters = calculate_counters("transfers", &records, ADDRESS_CRITERIA);
        assert_eq!(counters.len(), 2);
        assert_eq!(counters[1].query_string, format!("from%7Cto={}", addr(0x11)));
        assert_eq!(counters[1].count, 1);
    }

    #[test]
    fn missing_to_address_counts_under_null() {
        let records = vec![record(1, 10, 0x11, None)];
        let counters = calculate_counters("transactions", &records, ADDRESS_CRITERIA);
        let by_query: BTreeMap<_, _> = counters
            .iter()
            .map(|c| (c.query_string.clone(), c.count))
            .collect();
        assert_eq!(by_query[&format!("from%7Cto={}", addr(0x11))], 1);
        assert_eq!(by_query["from%7Cto=null"], 1);
    }

    #[test]
    fn multi_field_criteria_produce_combinations() {
        let records = vec![
            record(1, 10, 0x11, Some(0x22)),
            record(2, 10, 0x33, Some(0x11)),
            record(3, 9, 0x11, Some(0x22)),
        ];
        let criteria: CriteriaList = &[&["blockNumber", "from|to"]];
        let counters = calculate_counters("transfers", &records, criteria);
        let by_query: BTreeMap<_, _> = counters
            .iter()
            .map(|c| (c.query_string.clone(), c.count))
            .collect();
        assert_eq!(by_query[&format!("blockNumber=10&from%7Cto={}", addr(0x11))], 2);
        assert_eq!(by_query[&format!("blockNumber=10&from%7Cto={}", addr(0x22))], 1);
        assert_eq!(by_query[&format!("blockNumber=10&from%7Cto={}", addr(0x33))], 1);
        assert_eq!(by_query[&format!("blockNumber=9&from%7Cto={}", addr(0x11))], 1);
        assert_eq!(by_query[&format!("blockNumber=9&from%7Cto={}", addr(0x22))], 1);
    }

    #[test]
    fn no_records_yield_a_zero_total_only() {
        let counters = calculate_counters("transactions", &[], ADDRESS_CRITERIA);
        assert_eq!(
            counters,
            vec![Counter {
                table_name: "transactions".to_string(),
                query_string: String::new(),
                count: 0,
            }]
        );
    }
}
