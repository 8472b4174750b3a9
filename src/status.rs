use std::sync::Arc;

use crate::chain::ChainClient;
use crate::error::IndexerResult;
use crate::repositories::blocks;
use crate::types::BlockDetails;
use crate::uow::UnitOfWork;

/// Whether the chain has any L1 finality coordinates for the block yet.
fn finality_advanced(details: &BlockDetails) -> bool {
    details.commit_tx_hash.is_some()
        || details.prove_tx_hash.is_some()
        || details.execute_tx_hash.is_some()
}

/// Collects fresh details for the given block numbers, stopping at the first
/// block the chain reports no L1 commitment for. Finality advances with
/// height, so nothing past that point can have progressed either.
async fn fetch_advanced_details(client: &dyn ChainClient, numbers: &[u64]) -> Vec<BlockDetails> {
    let mut advanced = Vec::new();
    for number in numbers {
        let Some(details) = client.get_block_details(*number).await else {
            break;
        };
        if !finality_advanced(&details) {
            break;
        }
        advanced.push(details);
    }
    advanced
}

/// Re-polls stored blocks whose batch is not executed yet and writes back
/// the commit/prove/execute coordinates as they appear on L1. Without this
/// a block's finality columns would forever stay as they were at ingestion
/// time.
pub struct BlockStatusService {
    uow: UnitOfWork,
    client: Arc<dyn ChainClient>,
    batch_size: i64,
}

impl BlockStatusService {
    pub fn new(uow: UnitOfWork, client: Arc<dyn ChainClient>, batch_size: i64) -> Self {
        Self {
            uow,
            client,
            batch_size,
        }
    }

    /// Returns true when a full batch was updated and more work is likely
    /// waiting, false when the caller should idle before the next pass.
    pub async fn update_next_batch(&self) -> IndexerResult<bool> {
        let numbers = {
            let mut conn = self.uow.pool().acquire().await?;
            blocks::get_unfinalized_block_numbers(&mut conn, self.batch_size).await?
        };
        if numbers.is_empty() {
            return Ok(false);
        }

        let advanced = fetch_advanced_details(self.client.as_ref(), &numbers).await;
        let Some(last) = advanced.last() else {
            return Ok(false);
        };

        let mut conn = self.uow.pool().acquire().await?;
        // A stored block whose hash no longer matches the chain is about to
        // be reverted and must not have its finality advanced. If the
        // highest block to update still matches, everything below it does
        // too.
        let Some(stored) = blocks::get_block(&mut conn, last.number).await? else {
            return Ok(false);
        };
        let chain_hash = self.client.get_block(last.number).await.and_then(|b| b.hash);
        if chain_hash != Some(stored.hash) {
            tracing::warn!(
                block_number = last.number,
                "stored block hash diverged from the chain, skipping status update"
            );
            return Ok(false);
        }

        tracing::debug!(
            from_block = numbers[0],
            to_block = last.number,
            updated = advanced.len(),
            "updating block finality statuses"
        );
        for details in &advanced {
            blocks::update_finality(&mut conn, details).await?;
        }
        Ok(advanced.len() == numbers.len())
    }
}
