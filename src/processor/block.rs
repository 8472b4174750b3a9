use std::sync::Arc;

use ethers::types::H256;
use sqlx::PgConnection;
use tokio::sync::mpsc;

use crate::balance::BalanceTracker;
use crate::chain::ChainClient;
use crate::error::{IndexerError, IndexerResult};
use crate::processor::{LogProcessor, TransactionProcessor};
use crate::repositories::blocks::{self, StoredBlock};
use crate::types::{BlockData, BlockDetails, ChainBlock};
use crate::uow::UnitOfWork;
use crate::watcher::BlockWatcher;

/// Emitted when the stored chain tip no longer matches the node: the block
/// at this number (and everything above) is suspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevertDetected {
    pub detected_incorrect_block_number: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RangeDecision {
    /// The stored tip is not the parent of the incoming range.
    Revert { detected_incorrect_block_number: u64 },
    /// The range cannot be ingested yet; no writes, try again later.
    Skip,
    Process,
}

/// Every block in the range must point at the hash of its predecessor.
pub fn validate_blocks_linking(blocks: &[BlockData]) -> bool {
    blocks.windows(2).all(|pair| {
        match (&pair[0].block, &pair[1].block) {
            (Some(prev), Some(next)) => prev.hash.is_some_and(|h| next.parent_hash == h),
            _ => false,
        }
    })
}

/// Decides what to do with a non-empty fetched range given the stored tip.
///
/// The parent-hash check runs first: a range whose first block does not
/// extend the stored tip means the tip itself was reorganized away. A range
/// with holes or broken internal linkage is merely skipped; those blocks
/// are not in the database, so waiting the node out costs nothing.
pub fn plan_range(last_db: Option<&StoredBlock>, blocks: &[BlockData]) -> RangeDecision {
    if let Some(last) = last_db {
        let first_parent = blocks
            .first()
            .and_then(|b| b.block.as_ref())
            .map(|b| b.parent_hash);
        if first_parent != Some(last.hash) {
            return RangeDecision::Revert {
                detected_incorrect_block_number: last.number,
            };
        }
    }
    if blocks
        .iter()
        .any(|b| b.block.is_none() || b.block_details.is_none())
    {
        return RangeDecision::Skip;
    }
    if !validate_blocks_linking(blocks) {
        return RangeDecision::Skip;
    }
    RangeDecision::Process
}

/// When the watcher returns nothing, the stored tip is re-checked against
/// the chain: a changed or vanished hash is the only way to notice a revert
/// while fully caught up. Returns the detected incorrect block number.
pub fn plan_empty_range(
    last_db: Option<&StoredBlock>,
    chain_hash: Option<H256>,
) -> Option<u64> {
    let last = last_db?;
    if chain_hash == Some(last.hash) {
        None
    } else {
        Some(last.number)
    }
}

/// Drives one ingestion cycle: find the next contiguous range, validate it
/// against the stored tip, and commit it atomically.
pub struct BlockProcessor {
    uow: UnitOfWork,
    client: Arc<dyn ChainClient>,
    watcher: BlockWatcher,
    transaction_processor: TransactionProcessor,
    log_processor: Arc<LogProcessor>,
    balance_tracker: Arc<BalanceTracker>,
    revert_tx: mpsc::Sender<RevertDetected>,
    to_block: Option<u64>,
    disable_blocks_revert: bool,
}

impl BlockProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uow: UnitOfWork,
        client: Arc<dyn ChainClient>,
        watcher: BlockWatcher,
        transaction_processor: TransactionProcessor,
        log_processor: Arc<LogProcessor>,
        balance_tracker: Arc<BalanceTracker>,
        revert_tx: mpsc::Sender<RevertDetected>,
        to_block: Option<u64>,
        disable_blocks_revert: bool,
    ) -> Self {
        Self {
            uow,
            client,
            watcher,
            transaction_processor,
            log_processor,
            balance_tracker,
            revert_tx,
            to_block,
            disable_blocks_revert,
        }
    }

    /// Returns true when a range was committed, false when there was
    /// nothing to do (caller sleeps before the next cycle).
    pub async fn process_next_blocks_range(&self) -> IndexerResult<bool> {
        let last_db_block = {
            let mut conn = self.uow.pool().acquire().await?;
            blocks::get_last_block(&mut conn, self.to_block).await?
        };
        tracing::debug!(
            last_db_block = last_db_block.as_ref().map(|b| b.number),
            "last block stored in DB"
        );

        let blocks_data = self
            .watcher
            .get_next_blocks_to_process(last_db_block.as_ref().map(|b| b.number))
            .await?;

        if blocks_data.is_empty() {
            if let Some(last) = &last_db_block {
                let chain_hash = self.client.get_block(last.number).await.and_then(|b| b.hash);
                if let Some(detected) = plan_empty_range(Some(last), chain_hash) {
                    self.trigger_revert(detected);
                }
            }
            return Ok(false);
        }

        match plan_range(last_db_block.as_ref(), &blocks_data) {
            RangeDecision::Revert {
                detected_incorrect_block_number,
            } => {
                self.trigger_revert(detected_incorrect_block_number);
                Ok(false)
            }
            RangeDecision::Skip => {
                tracing::warn!(
                    last_db_block = last_db_block.as_ref().map(|b| b.number),
                    "fetched range is incomplete or has broken linkage, waiting for the chain"
                );
                Ok(false)
            }
            RangeDecision::Process => {
                let mut tx = self.uow.begin().await?;
                for block_data in &blocks_data {
                    self.add_block(tx.conn(), block_data).await?;
                }
                tx.commit().await?;
                Ok(true)
            }
        }
    }

    fn trigger_revert(&self, detected_incorrect_block_number: u64) {
        tracing::warn!(detected_incorrect_block_number, "blocks revert detected");
        if self.disable_blocks_revert {
            return;
        }
        let _ = self.revert_tx.try_send(RevertDetected {
            detected_incorrect_block_number,
        });
    }

    async fn add_block(
        &self,
        conn: &mut PgConnection,
        block_data: &BlockData,
    ) -> IndexerResult<()> {
        // Presence was validated before the transaction started
        let (Some(block), Some(details)) = (&block_data.block, &block_data.block_details) else {
            return Err(IndexerError::Other("incomplete block data in range".into()));
        };
        tracing::info!(block_number = details.number, "adding block");
        // Tracked balances must not leak into the next cycle, success or not
        let _tracked = self.balance_tracker.clear_on_drop(details.number);
        self.add_block_inner(conn, block, details).await
    }

    async fn add_block_inner(
        &self,
        conn: &mut PgConnection,
        block: &ChainBlock,
        details: &BlockDetails,
    ) -> IndexerResult<()> {
        blocks::insert(conn, block, details).await?;

        if block.transactions.is_empty() {
            // Some blocks carry logs without transactions (system events)
            let logs = self.client.get_logs(details.number, details.number).await;
            self.log_processor
                .process(conn, &logs, details, None, None)
                .await?;
        } else {
            for tx_hash in &block.transactions {
                self.transaction_processor.add(conn, *tx_hash, details).await?;
            }
        }

        self.balance_tracker
            .save_changed_balances(details.number, conn)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(number: u64) -> BlockDetails {
        BlockDetails {
            number,
            l1_batch_number: Some(1),
            timestamp: 1_700_000_000,
            l1_tx_count: 0,
            l2_tx_count: 0,
            root_hash: None,
            status: "sealed".into(),
            commit_tx_hash: None,
            committed_at: None,
            prove_tx_hash: None,
            proven_at: None,
            execute_tx_hash: None,
            executed_at: None,
            operator_address: None,
        }
    }

    fn block_data(number: u64, hash: H256, parent_hash: H256) -> BlockData {
        BlockData {
            block: Some(ChainBlock {
                hash: Some(hash),
                parent_hash,
                number: Some(number.into()),
                ..Default::default()
            }),
            block_details: Some(details(number)),
        }
    }

    fn chain(hashes: &[(u64, u8, u8)]) -> Vec<BlockData> {
        hashes
            .iter()
            .map(|(n, hash, parent)| {
                block_data(*n, H256::repeat_byte(*hash), H256::repeat_byte(*parent))
            })
            .collect()
    }

    #[test]
    fn linked_range_is_valid() {
        let blocks = chain(&[(1, 1, 0), (2, 2, 1), (3, 3, 2)]);
        assert!(validate_blocks_linking(&blocks));
    }

    #[test]
    fn broken_link_is_invalid() {
        let blocks = chain(&[(1, 1, 0), (2, 2, 1), (3, 3, 9)]);
        assert!(!validate_blocks_linking(&blocks));
    }

    #[test]
    fn single_block_range_is_valid() {
        assert!(validate_blocks_linking(&chain(&[(1, 1, 0)])));
    }

    #[test]
    fn range_extending_the_tip_is_processed() {
        let last = StoredBlock {
            number: 10,
            hash: H256::repeat_byte(0xa),
        };
        let blocks = chain(&[(11, 0xb, 0xa), (12, 0xc, 0xb)]);
        assert_eq!(plan_range(Some(&last), &blocks), RangeDecision::Process);
    }

    #[test]
    fn empty_database_processes_without_parent_check() {
        let blocks = chain(&[(0, 1, 0)]);
        assert_eq!(plan_range(None, &blocks), RangeDecision::Process);
    }

    #[test]
    fn parent_hash_mismatch_detects_revert_at_stored_tip() {
        let last = StoredBlock {
            number: 10,
            hash: H256::repeat_byte(0xa),
        };
        let blocks = chain(&[(11, 0xb, 0xf)]);
        assert_eq!(
            plan_range(Some(&last), &blocks),
            RangeDecision::Revert {
                detected_incorrect_block_number: 10
            }
        );
    }

    #[test]
    fn missing_first_block_with_stored_tip_detects_revert() {
        let last = StoredBlock {
            number: 10,
            hash: H256::repeat_byte(0xa),
        };
        let blocks = vec![BlockData {
            block: None,
            block_details: Some(details(11)),
        }];
        assert_eq!(
            plan_range(Some(&last), &blocks),
            RangeDecision::Revert {
                detected_incorrect_block_number: 10
            }
        );
    }

    #[test]
    fn missing_block_in_range_skips_without_revert() {
        let last = StoredBlock {
            number: 10,
            hash: H256::repeat_byte(0xa),
        };
        let mut blocks = chain(&[(11, 0xb, 0xa), (12, 0xc, 0xb)]);
        blocks[1].block_details = None;
        assert_eq!(plan_range(Some(&last), &blocks), RangeDecision::Skip);
    }

    #[test]
    fn broken_intra_range_linkage_skips_without_revert() {
        let last = StoredBlock {
            number: 10,
            hash: H256::repeat_byte(0xa),
        };
        let blocks = chain(&[(11, 0xb, 0xa), (12, 0xc, 0xf)]);
        assert_eq!(plan_range(Some(&last), &blocks), RangeDecision::Skip);
    }

    #[test]
    fn empty_range_with_matching_tip_hash_is_quiet() {
        let last = StoredBlock {
            number: 10,
            hash: H256::repeat_byte(0xa),
        };
        assert_eq!(plan_empty_range(Some(&last), Some(H256::repeat_byte(0xa))), None);
    }

    #[test]
    fn empty_range_with_changed_tip_hash_detects_revert() {
        let last = StoredBlock {
            number: 10,
            hash: H256::repeat_byte(0xa),
        };
        assert_eq!(
            plan_empty_range(Some(&last), Some(H256::repeat_byte(0xb))),
            Some(10)
        );
    }

    #[test]
    fn empty_range_with_vanished_tip_detects_revert() {
        let last = StoredBlock {
            number: 10,
            hash: H256::repeat_byte(0xa),
        };
        assert_eq!(plan_empty_range(Some(&last), None), Some(10));
    }

    #[test]
    fn empty_range_with_empty_database_is_quiet() {
        assert_eq!(plan_empty_range(None, None), None);
    }
}
