use crate::error::IndexerResult;
use crate::repositories::{balances, blocks};
use crate::uow::UnitOfWork;

/// Periodically compacts the balances ledger: within the already-executed
/// part of the chain only the newest row per (address, token) matters, and
/// drained accounts need no rows at all.
pub struct BalancesCleaner {
    uow: UnitOfWork,
}

impl BalancesCleaner {
    pub fn new(uow: UnitOfWork) -> Self {
        Self { uow }
    }

    /// Cleans `(watermark, last_executed]` and advances the watermark.
    /// Bounded by the last L1-executed block so a revert can never undo
    /// rows a cleanup already relied on. Returns true when a range was
    /// cleaned.
    pub async fn clean_next_range(&self) -> IndexerResult<bool> {
        let mut conn = self.uow.pool().acquire().await?;
        let from_block = balances::get_delete_balances_from_block(&mut conn).await?;
        let Some(to_block) = blocks::get_last_executed_block_number(&mut conn).await? else {
            return Ok(false);
        };
        if to_block <= from_block {
            return Ok(false);
        }

        tracing::info!(from_block, to_block, "cleaning balances");
        if let Err(error) = balances::delete_old_balances(&mut conn, from_block, to_block).await {
            tracing::error!(error = %error, "failed to delete old balances");
        }
        if let Err(error) = balances::delete_zero_balances(&mut conn, from_block, to_block).await {
            tracing::error!(error = %error, "failed to delete zero balances");
        }
        balances::set_delete_balances_from_block(&mut conn, to_block).await?;
        Ok(true)
    }
}
