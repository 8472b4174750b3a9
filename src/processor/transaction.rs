use std::sync::Arc;

use ethers::types::H256;
use sqlx::PgConnection;

use crate::chain::ChainClient;
use crate::error::{IndexerError, IndexerResult};
use crate::processor::LogProcessor;
use crate::repositories::transactions;
use crate::types::BlockDetails;

/// Ingests one transaction: fetches its three chain views concurrently,
/// persists the merged row and receipt, traces failures, and hands the
/// receipt logs on to the log processor.
pub struct TransactionProcessor {
    client: Arc<dyn ChainClient>,
    log_processor: Arc<LogProcessor>,
}

impl TransactionProcessor {
    pub fn new(client: Arc<dyn ChainClient>, log_processor: Arc<LogProcessor>) -> Self {
        Self {
            client,
            log_processor,
        }
    }

    /// Any of the three views being absent means the node no longer knows
    /// the transaction, most likely a reorg in flight: the whole cycle
    /// rolls back and retries later.
    pub async fn add(
        &self,
        conn: &mut PgConnection,
        tx_hash: H256,
        block_details: &BlockDetails,
    ) -> IndexerResult<()> {
        tracing::debug!(
            transaction_hash = ?tx_hash,
            block_number = block_details.number,
            "saving transaction data to the DB"
        );
        let (tx, details, receipt) = tokio::join!(
            self.client.get_transaction(tx_hash),
            self.client.get_transaction_details(tx_hash),
            self.client.get_transaction_receipt(tx_hash),
        );
        let (Some(tx), Some(details), Some(receipt)) = (tx, details, receipt) else {
            return Err(IndexerError::MissingTransactionData(tx_hash));
        };

        let receipt_status = receipt.status.map_or(1, |s| s.as_u64() as i32);
        transactions::insert(conn, &tx, &details, block_details, receipt_status).await?;
        transactions::insert_receipt(conn, &receipt).await?;

        if receipt_status == 0 {
            if let Some(trace) = self.client.debug_trace_transaction(tx_hash, true).await {
                transactions::update_failure_reason(conn, tx_hash, trace.error, trace.revert_reason)
                    .await?;
            }
        }

        self.log_processor
            .process(conn, &receipt.logs, block_details, Some(&details), Some(&receipt))
            .await
    }
}
