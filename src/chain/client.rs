use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, BlockId, BlockNumber, Bytes, Filter, H256, U256, U64};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::chain::contract::{retryable_call, Erc20Reader};
use crate::error::IndexerResult;
use crate::types::{
    base_token_address, BlockDetails, ChainBlock, ChainLog, ChainReceipt, ChainTransaction,
    Erc20TokenData, TransactionDetails, TransactionTrace,
};

/// Error codes that indicate a transient connectivity problem: these retry
/// after the quick timeout instead of the default one.
const QUICK_RETRY_CODES: [&str; 4] = ["NETWORK_ERROR", "ECONNRESET", "ECONNREFUSED", "TIMEOUT"];

pub fn is_quick_retry_error(message: &str) -> bool {
    QUICK_RETRY_CODES.iter().any(|code| message.contains(code))
}

/// Runs an RPC operation until it succeeds. Connectivity errors wait
/// `quick_timeout` before the next attempt, everything else waits
/// `default_timeout`. Ingestion must not fall behind because of a flaky
/// node, so there is no attempt cap.
pub async fn retry_rpc<T, E, F, Fut>(
    name: &str,
    quick_timeout: Duration,
    default_timeout: Duration,
    mut op: F,
) -> T
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    loop {
        match op().await {
            Ok(value) => {
                tracing::debug!(
                    call = name,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "rpc call succeeded"
                );
                return value;
            }
            Err(error) => {
                let message = error.to_string();
                let delay = if is_quick_retry_error(&message) {
                    quick_timeout
                } else {
                    default_timeout
                };
                tracing::warn!(
                    call = name,
                    error = %message,
                    retry_in_ms = delay.as_millis() as u64,
                    "rpc call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Chain access used by the processors. A trait so tests can script
/// responses without a node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_block(&self, number: u64) -> Option<ChainBlock>;
    /// Chain-level block metadata, including the L1 commit/prove/execute
    /// coordinates as the node currently knows them.
    async fn get_block_details(&self, number: u64) -> Option<BlockDetails>;
    async fn get_transaction(&self, hash: H256) -> Option<ChainTransaction>;
    async fn get_transaction_details(&self, hash: H256) -> Option<TransactionDetails>;
    async fn get_transaction_receipt(&self, hash: H256) -> Option<ChainReceipt>;
    async fn get_logs(&self, from_block: u64, to_block: u64) -> Vec<ChainLog>;
    async fn get_code(&self, address: Address) -> Bytes;
    /// Balance of `address` in `token` at `block`. Base token reads the
    /// account balance, everything else calls `balanceOf`. Errors out only
    /// on a permanent contract error (not an ERC20).
    async fn get_balance(&self, address: Address, block: u64, token: Address)
        -> IndexerResult<U256>;
    async fn debug_trace_transaction(
        &self,
        hash: H256,
        only_top_call: bool,
    ) -> Option<TransactionTrace>;
    /// symbol/decimals/name via retryable contract reads. A permanent error
    /// on symbol or decimals means the address is not an ERC20.
    async fn get_erc20_token_data(&self, address: Address) -> IndexerResult<Erc20TokenData>;
}

pub struct EthersChainClient {
    provider: Arc<Provider<Http>>,
    quick_retry_timeout: Duration,
    default_retry_timeout: Duration,
}

impl EthersChainClient {
    pub fn new(
        provider: Provider<Http>,
        quick_retry_timeout: Duration,
        default_retry_timeout: Duration,
    ) -> Self {
        Self {
            provider: Arc::new(provider),
            quick_retry_timeout,
            default_retry_timeout,
        }
    }

    async fn rpc<T, E, F, Fut>(&self, name: &str, op: F) -> T
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        retry_rpc(name, self.quick_retry_timeout, self.default_retry_timeout, op).await
    }

    /// Polls the node head and publishes new block numbers into a watch
    /// channel. Poll errors are skipped rather than retried; the next tick
    /// will observe the head anyway.
    pub fn subscribe_blocks(&self, poll_interval: Duration) -> watch::Receiver<Option<u64>> {
        let (tx, rx) = watch::channel(None);
        let provider = self.provider.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                match provider.get_block_number().await {
                    Ok(head) => {
                        let head = head.as_u64();
                        let known = *tx.borrow();
                        if known.map_or(true, |k| head > k) {
                            let _ = tx.send(Some(head));
                        }
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "failed to poll chain head");
                    }
                }
            }
        });
        rx
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn get_block(&self, number: u64) -> Option<ChainBlock> {
        self.rpc("getBlock", || self.provider.get_block(number)).await
    }

    async fn get_block_details(&self, number: u64) -> Option<BlockDetails> {
        self.rpc("getBlockDetails", || {
            self.provider.request("zks_getBlockDetails", [json!(number)])
        })
        .await
    }

    async fn get_transaction(&self, hash: H256) -> Option<ChainTransaction> {
        self.rpc("getTransaction", || self.provider.get_transaction(hash))
            .await
    }

    async fn get_transaction_details(&self, hash: H256) -> Option<TransactionDetails> {
        self.rpc("getTransactionDetails", || {
            self.provider
                .request("zks_getTransactionDetails", [json!(hash)])
        })
        .await
    }

    async fn get_transaction_receipt(&self, hash: H256) -> Option<ChainReceipt> {
        self.rpc("getTransactionReceipt", || {
            self.provider.get_transaction_receipt(hash)
        })
        .await
    }

    async fn get_logs(&self, from_block: u64, to_block: u64) -> Vec<ChainLog> {
        let filter = Filter::new()
            .from_block(BlockNumber::Number(U64::from(from_block)))
            .to_block(BlockNumber::Number(U64::from(to_block)));
        self.rpc("getLogs", || self.provider.get_logs(&filter)).await
    }

    async fn get_code(&self, address: Address) -> Bytes {
        self.rpc("getCode", || self.provider.get_code(address, None))
            .await
    }

    async fn get_balance(
        &self,
        address: Address,
        block: u64,
        token: Address,
    ) -> IndexerResult<U256> {
        if token == base_token_address() {
            let block_id = Some(BlockId::from(block));
            return Ok(self
                .rpc("getBalance", || self.provider.get_balance(address, block_id))
                .await);
        }
        let reader = Erc20Reader::new(token, self.provider.clone())?;
        retryable_call("balanceOf", || reader.balance_of(address, block)).await
    }

    async fn debug_trace_transaction(
        &self,
        hash: H256,
        only_top_call: bool,
    ) -> Option<TransactionTrace> {
        let params = json!([
            hash,
            {
                "tracer": "callTracer",
                "tracerConfig": { "onlyTopCall": only_top_call },
            }
        ]);
        self.rpc("debugTraceTransaction", || {
            self.provider
                .request::<_, Option<TransactionTrace>>("debug_traceTransaction", params.clone())
        })
        .await
    }

    async fn get_erc20_token_data(&self, address: Address) -> IndexerResult<Erc20TokenData> {
        let reader = Erc20Reader::new(address, self.provider.clone())?;
        let symbol = retryable_call("symbol", || reader.symbol()).await?;
        let decimals = retryable_call("decimals", || reader.decimals()).await?;
        // Some deployed tokens have no name() at all; that is not a reason
        // to drop the token.
        let name = retryable_call("name", || reader.name()).await.ok();
        Ok(Erc20TokenData {
            symbol,
            decimals: u32::from(decimals),
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const QUICK: Duration = Duration::from_millis(500);
    const DEFAULT: Duration = Duration::from_millis(30_000);

    #[test]
    fn connectivity_codes_are_quick_retries() {
        assert!(is_quick_retry_error("could not detect network (NETWORK_ERROR)"));
        assert!(is_quick_retry_error("connect ECONNREFUSED 127.0.0.1:3050"));
        assert!(is_quick_retry_error("read ECONNRESET"));
        assert!(is_quick_retry_error("TIMEOUT while waiting for response"));
        assert!(!is_quick_retry_error("missing trie node"));
    }

    #[tokio::test(start_paused = true)]
    async fn generic_errors_wait_the_default_timeout() {
        let attempts = AtomicU32::new(0);
        let started = Instant::now();
        let value = retry_rpc("test", QUICK, DEFAULT, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err("some rpc failure".to_string())
                } else {
                    Ok(42u64)
                }
            }
        })
        .await;
        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), DEFAULT * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connectivity_errors_wait_the_quick_timeout() {
        let attempts = AtomicU32::new(0);
        let started = Instant::now();
        let value = retry_rpc("test", QUICK, DEFAULT, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err("connect ECONNREFUSED".to_string())
                } else {
                    Ok(7u64)
                }
            }
        })
        .await;
        assert_eq!(value, 7);
        assert_eq!(started.elapsed(), QUICK * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn mixed_errors_classify_per_attempt() {
        let attempts = AtomicU32::new(0);
        let started = Instant::now();
        let _ = retry_rpc("test", QUICK, DEFAULT, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                match attempt {
                    0 => Err("TIMEOUT".to_string()),
                    1 => Err("internal error".to_string()),
                    _ => Ok(()),
                }
            }
        })
        .await;
        assert_eq!(started.elapsed(), QUICK + DEFAULT);
    }
}
