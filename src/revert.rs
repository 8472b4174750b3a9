use std::sync::Arc;

use sqlx::PgConnection;

use crate::chain::ChainClient;
use crate::counter::{self, ADDRESS_CRITERIA};
use crate::error::IndexerResult;
use crate::repositories::{balances, blocks, counters::CountedTable, nft, tokens};
use crate::uow::UnitOfWork;

/// Recovers from a detected chain reorganization: finds the newest stored
/// block whose hash still matches the node and deletes everything above it
/// in one transaction.
pub struct BlocksRevertService {
    uow: UnitOfWork,
    client: Arc<dyn ChainClient>,
    counters_records_batch_size: i64,
}

/// Midpoint of the open search interval, or None once the interval has
/// collapsed to its lower bound.
fn next_probe(start: u64, end: u64) -> Option<u64> {
    (end > start + 1).then(|| start + (end - start) / 2)
}

impl BlocksRevertService {
    pub fn new(
        uow: UnitOfWork,
        client: Arc<dyn ChainClient>,
        counters_records_batch_size: i64,
    ) -> Self {
        Self {
            uow,
            client,
            counters_records_batch_size,
        }
    }

    pub async fn handle_revert(&self, detected_incorrect_block_number: u64) -> IndexerResult<()> {
        let last_correct_block_number = self
            .find_last_correct_block_number(detected_incorrect_block_number)
            .await?;
        tracing::info!(
            detected_incorrect_block_number,
            last_correct_block_number,
            "reverting blocks"
        );

        let mut tx = self.uow.begin().await?;

        // Counters first: they need the doomed rows to compute the deltas
        for table in [CountedTable::Transactions, CountedTable::Transfers] {
            counter::revert_counters(
                tx.conn(),
                table,
                ADDRESS_CRITERIA,
                self.counters_records_batch_size,
                last_correct_block_number,
            )
            .await?;
        }

        let deleted_blocks = blocks::delete_from(tx.conn(), last_correct_block_number).await?;
        tokens::delete_from(tx.conn(), last_correct_block_number).await?;
        nft::delete_from(tx.conn(), last_correct_block_number).await?;

        // The balances cleaner must re-scan from the cut, its watermark may
        // point past blocks that no longer exist
        let cleaner_from = balances::get_delete_balances_from_block(tx.conn()).await?;
        if cleaner_from > last_correct_block_number {
            balances::set_delete_balances_from_block(tx.conn(), last_correct_block_number).await?;
        }

        tx.commit().await?;
        tracing::info!(
            last_correct_block_number,
            deleted_blocks,
            "blocks revert completed"
        );
        Ok(())
    }

    /// Binary search between the newest L1-executed block (which cannot
    /// revert) and the detected incorrect block. With no executed block yet,
    /// the earliest stored block anchors the search instead.
    async fn find_last_correct_block_number(
        &self,
        detected_incorrect_block_number: u64,
    ) -> IndexerResult<u64> {
        let mut conn = self.uow.pool().acquire().await?;
        let mut start = match blocks::get_last_executed_block_number(&mut conn).await? {
            Some(number) => number,
            None => blocks::get_earliest_block_number(&mut conn)
                .await?
                .unwrap_or(0),
        };
        let mut end = detected_incorrect_block_number;

        while let Some(mid) = next_probe(start, end) {
            if self.hash_matches(&mut conn, mid).await? {
                start = mid;
            } else {
                end = mid;
            }
        }
        Ok(start)
    }

    async fn hash_matches(&self, conn: &mut PgConnection, number: u64) -> IndexerResult<bool> {
        let Some(stored) = blocks::get_block(conn, number).await? else {
            return Ok(false);
        };
        let chain_hash = self.client.get_block(number).await.and_then(|b| b.hash);
        Ok(chain_hash == Some(stored.hash))
    }
}
