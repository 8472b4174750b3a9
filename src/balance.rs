use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ethers::types::{Address, U256};
use futures::future::join_all;
use sqlx::PgConnection;

use crate::chain::ChainClient;
use crate::error::IndexerResult;
use crate::repositories::balances;
use crate::types::{TokenType, Transfer};

type ChangedBalances = HashMap<u64, HashMap<Address, HashMap<Address, TokenType>>>;

/// Tracks which (address, token) pairs changed per block while transfers
/// stream through, then resolves their authoritative balances from the
/// chain at commit time. State is in-memory only; the block processor
/// clears it whether the cycle commits or rolls back.
pub struct BalanceTracker {
    client: Arc<dyn ChainClient>,
    changed: Mutex<ChangedBalances>,
}

/// Clears a block's tracked balances when dropped, so a failed cycle cannot
/// leak its state into the next one.
pub struct TrackedBlockGuard<'a> {
    tracker: &'a BalanceTracker,
    block_number: u64,
}

impl Drop for TrackedBlockGuard<'_> {
    fn drop(&mut self) {
        self.tracker.clear_tracked_state(self.block_number);
    }
}

impl BalanceTracker {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self {
            client,
            changed: Mutex::new(HashMap::new()),
        }
    }

    pub fn track_changed_balances(&self, transfers: &[Transfer]) {
        if transfers.is_empty() {
            return;
        }
        let mut changed = self.changed.lock().unwrap_or_else(|e| e.into_inner());
        for transfer in transfers {
            let block = changed.entry(transfer.block_number).or_default();
            for address in [transfer.from, transfer.to] {
                // The zero address is a mint/burn placeholder, not an account
                if address == Address::zero() {
                    continue;
                }
                block
                    .entry(address)
                    .or_default()
                    .insert(transfer.token_address, transfer.token_type);
            }
        }
    }

    /// Changed pairs recorded for a block, in deterministic order. Each pair
    /// carries the token type of the transfer that last touched it.
    pub fn changed_pairs(&self, block_number: u64) -> Vec<(Address, Address, TokenType)> {
        let changed = self.changed.lock().unwrap_or_else(|e| e.into_inner());
        let mut pairs: Vec<(Address, Address, TokenType)> = changed
            .get(&block_number)
            .map(|block| {
                block
                    .iter()
                    .flat_map(|(address, tokens)| {
                        tokens.iter().map(|(t, ty)| (*address, *t, *ty))
                    })
                    .collect()
            })
            .unwrap_or_default();
        pairs.sort_by_key(|(address, token, _)| (*address, *token));
        pairs
    }

    /// Resolves each changed pair against the chain at `block_number` and
    /// appends the results as ledger rows. Pairs whose balance read fails
    /// permanently (no `balanceOf`) are dropped, not stored.
    pub async fn save_changed_balances(
        &self,
        block_number: u64,
        conn: &mut PgConnection,
    ) -> IndexerResult<()> {
        let pairs = self.changed_pairs(block_number);
        if pairs.is_empty() {
            return Ok(());
        }

        tracing::debug!(block_number, pairs = pairs.len(), "fetching changed balances");
        let fetches = pairs.iter().map(|(address, token, token_type)| async move {
            let balance = self.client.get_balance(*address, block_number, *token).await;
            (*address, *token, *token_type, balance)
        });
        let mut resolved: Vec<(Address, Address, TokenType, U256)> =
            Vec::with_capacity(pairs.len());
        for (address, token, token_type, balance) in join_all(fetches).await {
            match balance {
                Ok(balance) => resolved.push((address, token, token_type, balance)),
                Err(error) => {
                    tracing::warn!(
                        address = ?address,
                        token_address = ?token,
                        block_number,
                        error = %error,
                        "balance fetch failed permanently, skipping pair"
                    );
                }
            }
        }
        balances::insert_many(conn, block_number, &resolved).await
    }

    /// The guard clears the block's state on every exit path of its scope.
    pub fn clear_on_drop(&self, block_number: u64) -> TrackedBlockGuard<'_> {
        TrackedBlockGuard {
            tracker: self,
            block_number,
        }
    }

    pub fn clear_tracked_state(&self, block_number: u64) {
        self.changed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&block_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexerError;
    use crate::types::{unix_to_datetime, TransferType};
    use async_trait::async_trait;
    use ethers::types::{Bytes, H256};

    struct NoopClient;

    #[async_trait]
    impl ChainClient for NoopClient {
        async fn get_block(&self, _: u64) -> Option<crate::types::ChainBlock> {
            unimplemented!()
        }
        async fn get_block_details(&self, _: u64) -> Option<crate::types::BlockDetails> {
            unimplemented!()
        }
        async fn get_transaction(&self, _: H256) -> Option<crate::types::ChainTransaction> {
            unimplemented!()
        }
        async fn get_transaction_details(
            &self,
            _: H256,
        ) -> Option<crate::types::TransactionDetails> {
            unimplemented!()
        }
        async fn get_transaction_receipt(&self, _: H256) -> Option<crate::types::ChainReceipt> {
            unimplemented!()
        }
        async fn get_logs(&self, _: u64, _: u64) -> Vec<crate::types::ChainLog> {
            unimplemented!()
        }
        async fn get_code(&self, _: Address) -> Bytes {
            unimplemented!()
        }
        async fn get_balance(&self, _: Address, _: u64, _: Address) -> IndexerResult<U256> {
            unimplemented!()
        }
        async fn debug_trace_transaction(
            &self,
            _: H256,
            _: bool,
        ) -> Option<crate::types::TransactionTrace> {
            unimplemented!()
        }
        async fn get_erc20_token_data(
            &self,
            _: Address,
        ) -> IndexerResult<crate::types::Erc20TokenData> {
            unimplemented!()
        }
    }

    fn transfer(block: u64, from: Address, to: Address, token: Address) -> Transfer {
        Transfer {
            from,
            to,
            transaction_hash: Some(H256::repeat_byte(1)),
            transaction_index: 0,
            block_number: block,
            amount: Some(U256::from(10)),
            token_address: token,
            token_type: TokenType::Erc20,
            r#type: TransferType::Transfer,
            is_fee_or_refund: false,
            is_internal: false,
            log_index: 0,
            timestamp: unix_to_datetime(1_700_000_000),
            fields: None,
        }
    }

    fn tracker() -> BalanceTracker {
        BalanceTracker::new(Arc::new(NoopClient))
    }

    #[test]
    fn both_sides_of_a_transfer_are_tracked() {
        let tracker = tracker();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let token = Address::repeat_byte(3);
        tracker.track_changed_balances(&[transfer(5, a, b, token)]);
        assert_eq!(
            tracker.changed_pairs(5),
            vec![(a, token, TokenType::Erc20), (b, token, TokenType::Erc20)]
        );
    }

    #[test]
    fn an_address_on_both_sides_of_two_transfers_is_tracked_once_per_token() {
        let tracker = tracker();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let c = Address::repeat_byte(4);
        let token = Address::repeat_byte(3);
        tracker.track_changed_balances(&[
            transfer(5, a, b, token),
            transfer(5, b, c, token),
        ]);
        // b appears in both transfers but only once as a changed pair
        assert_eq!(
            tracker.changed_pairs(5),
            vec![
                (a, token, TokenType::Erc20),
                (b, token, TokenType::Erc20),
                (c, token, TokenType::Erc20)
            ]
        );
    }

    #[test]
    fn pairs_carry_the_token_type_of_the_transfer() {
        let tracker = tracker();
        let owner = Address::repeat_byte(1);
        let buyer = Address::repeat_byte(2);
        let collection = Address::repeat_byte(3);
        let mut nft = transfer(5, owner, buyer, collection);
        nft.token_type = TokenType::Erc721;
        tracker.track_changed_balances(&[nft]);
        assert_eq!(
            tracker.changed_pairs(5),
            vec![
                (owner, collection, TokenType::Erc721),
                (buyer, collection, TokenType::Erc721)
            ]
        );
    }

    #[test]
    fn zero_address_is_never_tracked() {
        let tracker = tracker();
        let to = Address::repeat_byte(2);
        let token = Address::repeat_byte(3);
        tracker.track_changed_balances(&[transfer(5, Address::zero(), to, token)]);
        assert_eq!(tracker.changed_pairs(5), vec![(to, token, TokenType::Erc20)]);
    }

    #[test]
    fn clearing_removes_only_the_given_block() {
        let tracker = tracker();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let token = Address::repeat_byte(3);
        tracker.track_changed_balances(&[transfer(5, a, b, token)]);
        tracker.track_changed_balances(&[transfer(6, a, b, token)]);
        tracker.clear_tracked_state(5);
        assert!(tracker.changed_pairs(5).is_empty());
        assert_eq!(tracker.changed_pairs(6).len(), 2);
    }

    #[test]
    fn guard_clears_state_when_the_block_write_fails() {
        let tracker = tracker();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let token = Address::repeat_byte(3);
        tracker.track_changed_balances(&[transfer(5, a, b, token)]);

        let result: IndexerResult<()> = (|| {
            let _tracked = tracker.clear_on_drop(5);
            Err(IndexerError::Other("block insert failed".into()))
        })();

        assert!(result.is_err());
        assert!(tracker.changed_pairs(5).is_empty());
    }

    #[test]
    fn guard_clears_state_on_success_too() {
        let tracker = tracker();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let token = Address::repeat_byte(3);
        tracker.track_changed_balances(&[transfer(5, a, b, token)]);
        {
            let _tracked = tracker.clear_on_drop(5);
        }
        assert!(tracker.changed_pairs(5).is_empty());
    }
}
