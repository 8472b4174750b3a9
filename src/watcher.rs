use std::sync::Arc;

use tokio::sync::watch;

use crate::error::IndexerResult;
use crate::fetcher::DataFetcherClient;
use crate::types::BlockData;

/// Computes the next contiguous range to ingest. `last_db_block` is the
/// newest committed block, `head` the newest chain block the poller has
/// seen. Returns an inclusive range, or None when there is nothing to do.
///
/// Ranges always start at `last_db_block + 1` (or the configured start), so
/// no number is ever skipped and no gap can appear.
pub fn next_range(
    head: Option<u64>,
    last_db_block: Option<u64>,
    from_block: u64,
    to_block: Option<u64>,
    batch_size: u64,
) -> Option<(u64, u64)> {
    let head = head?;
    let next = last_db_block.map_or(from_block, |n| n + 1);
    let end = to_block.map_or(head, |t| t.min(head)).min(next + batch_size - 1);
    if next < from_block || next > end {
        return None;
    }
    Some((next, end))
}

/// Watches the chain head and turns "what is committed" into "what to fetch
/// next": the next contiguous block range, fully loaded from the data
/// fetcher.
pub struct BlockWatcher {
    head: watch::Receiver<Option<u64>>,
    fetcher: Arc<DataFetcherClient>,
    batch_size: u64,
    from_block: u64,
    to_block: Option<u64>,
}

impl BlockWatcher {
    pub fn new(
        head: watch::Receiver<Option<u64>>,
        fetcher: Arc<DataFetcherClient>,
        batch_size: u64,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Self {
        Self {
            head,
            fetcher,
            batch_size,
            from_block,
            to_block,
        }
    }

    pub async fn get_next_blocks_to_process(
        &self,
        last_db_block: Option<u64>,
    ) -> IndexerResult<Vec<BlockData>> {
        let head = *self.head.borrow();
        let Some((from, to)) = next_range(
            head,
            last_db_block,
            self.from_block,
            self.to_block,
            self.batch_size,
        ) else {
            return Ok(Vec::new());
        };
        tracing::debug!(from_block = from, to_block = to, "fetching next blocks range");
        self.fetcher.get_block_data(from, to).await
    }
}
