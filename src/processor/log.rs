use std::sync::Arc;

use sqlx::PgConnection;

use crate::address::AddressService;
use crate::balance::BalanceTracker;
use crate::error::IndexerResult;
use crate::repositories::{logs, nft, transfers};
use crate::token::TokenService;
use crate::transfer::TransferExtractor;
use crate::types::{BlockDetails, ChainLog, ChainReceipt, TokenType, TransactionDetails};

/// Fans a batch of logs out to every extractor: raw log rows, transfers,
/// balance tracking, deployed contracts and their tokens.
pub struct LogProcessor {
    extractor: TransferExtractor,
    balance_tracker: Arc<BalanceTracker>,
    address_service: Arc<AddressService>,
    token_service: Arc<TokenService>,
}

impl LogProcessor {
    pub fn new(
        balance_tracker: Arc<BalanceTracker>,
        address_service: Arc<AddressService>,
        token_service: Arc<TokenService>,
    ) -> Self {
        Self {
            extractor: TransferExtractor::new(),
            balance_tracker,
            address_service,
            token_service,
        }
    }

    pub async fn process(
        &self,
        conn: &mut PgConnection,
        logs_batch: &[ChainLog],
        block_details: &BlockDetails,
        tx_details: Option<&TransactionDetails>,
        receipt: Option<&ChainReceipt>,
    ) -> IndexerResult<()> {
        if logs_batch.is_empty() {
            return Ok(());
        }
        let timestamp = tx_details.map_or_else(|| block_details.timestamp_utc(), |d| d.received_at);
        logs::insert_many(conn, logs_batch, timestamp).await?;

        let extracted = self
            .extractor
            .extract(logs_batch, block_details, tx_details, receipt);
        if !extracted.is_empty() {
            transfers::insert_many(conn, &extracted).await?;
            for transfer in extracted.iter().filter(|t| t.token_type == TokenType::Erc721) {
                nft::upsert_owner(conn, transfer).await?;
            }
            self.balance_tracker.track_changed_balances(&extracted);
        }

        if let Some(receipt) = receipt {
            let contracts = self
                .address_service
                .save_contract_addresses(logs_batch, receipt, conn)
                .await?;
            for contract in &contracts {
                self.token_service
                    .save_erc20_token(contract, Some(receipt), conn)
                    .await?;
            }
        }
        Ok(())
    }
}
