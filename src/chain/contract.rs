use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ethers::abi::parse_abi;
use ethers::contract::Contract;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, U256};

use crate::error::{IndexerError, IndexerResult};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Error texts that will never succeed on retry: bad call arguments, a
/// contract that reverts the read, or return data that does not decode as
/// the expected type (usually "this address is not an ERC20").
const PERMANENT_MARKERS: [&str; 9] = [
    "INVALID_ARGUMENT",
    "MISSING_ARGUMENT",
    "UNEXPECTED_ARGUMENT",
    "NOT_IMPLEMENTED",
    "execution reverted",
    "could not decode result data",
    "call revert exception",
    "reverted with data",
    "Invalid output type",
];

pub fn is_permanent_call_error(message: &str) -> bool {
    PERMANENT_MARKERS.iter().any(|marker| message.contains(marker))
}

/// Runs a contract read until it succeeds or fails permanently. Transient
/// errors back off exponentially from 1s, capped at 60s, without an attempt
/// limit. Permanent errors surface as `IndexerError::Contract`.
pub async fn retryable_call<T, E, F, Fut>(name: &str, mut op: F) -> IndexerResult<T>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let message = error.to_string();
                if is_permanent_call_error(&message) {
                    return Err(IndexerError::Contract(message));
                }
                tracing::warn!(
                    call = name,
                    error = %message,
                    retry_in_ms = backoff.as_millis() as u64,
                    "contract call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// Read-only ERC20 surface used for token probing and balance fetching.
pub struct Erc20Reader {
    contract: Contract<Provider<Http>>,
}

impl Erc20Reader {
    pub fn new(address: Address, client: Arc<Provider<Http>>) -> IndexerResult<Self> {
        let abi = parse_abi(&[
            "function name() external view returns (string)",
            "function symbol() external view returns (string)",
            "function decimals() external view returns (uint8)",
            "function balanceOf(address owner) external view returns (uint256)",
        ])
        .map_err(|error| IndexerError::Contract(error.to_string()))?;
        Ok(Self {
            contract: Contract::new(address, abi, client),
        })
    }

    pub async fn symbol(&self) -> Result<String, String> {
        self.call::<(), String>("symbol", ()).await
    }

    pub async fn name(&self) -> Result<String, String> {
        self.call::<(), String>("name", ()).await
    }

    pub async fn decimals(&self) -> Result<u8, String> {
        self.call::<(), u8>("decimals", ()).await
    }

    pub async fn balance_of(&self, owner: Address, block: u64) -> Result<U256, String> {
        let call = self
            .contract
            .method::<_, U256>("balanceOf", owner)
            .map_err(|error| error.to_string())?;
        call.block(block).call().await.map_err(|error| error.to_string())
    }

    async fn call<A, R>(&self, name: &str, args: A) -> Result<R, String>
    where
        A: ethers::abi::Tokenize,
        R: ethers::abi::Detokenize,
    {
        let call = self
            .contract
            .method::<A, R>(name, args)
            .map_err(|error| error.to_string())?;
        call.call().await.map_err(|error| error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn argument_and_revert_errors_are_permanent() {
        assert!(is_permanent_call_error("invalid value (argument=..., code=INVALID_ARGUMENT)"));
        assert!(is_permanent_call_error("missing value (code=MISSING_ARGUMENT)"));
        assert!(is_permanent_call_error("too many values (code=UNEXPECTED_ARGUMENT)"));
        assert!(is_permanent_call_error("method not implemented (code=NOT_IMPLEMENTED)"));
        assert!(is_permanent_call_error("execution reverted: ERC20 call failed"));
        assert!(is_permanent_call_error("could not decode result data"));
        assert!(is_permanent_call_error("call revert exception"));
    }

    #[test]
    fn connectivity_errors_are_transient() {
        assert!(!is_permanent_call_error("connect ECONNREFUSED 127.0.0.1:3050"));
        assert!(!is_permanent_call_error("TIMEOUT"));
        assert!(!is_permanent_call_error("missing trie node"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_back_off_exponentially() {
        let attempts = AtomicU32::new(0);
        let started = Instant::now();
        let value = retryable_call("symbol", || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err("some transient failure".to_string())
                } else {
                    Ok("TKN".to_string())
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, "TKN");
        // 1s + 2s + 4s between the four attempts
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_capped() {
        let attempts = AtomicU32::new(0);
        let started = Instant::now();
        let _ = retryable_call("symbol", || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 8 {
                    Err("transient".to_string())
                } else {
                    Ok(())
                }
            }
        })
        .await;
        // 1+2+4+8+16+32+60+60
        assert_eq!(started.elapsed(), Duration::from_secs(183));
    }

    #[tokio::test]
    async fn permanent_errors_propagate_without_retry() {
        let attempts = AtomicU32::new(0);
        let result: IndexerResult<()> = retryable_call("decimals", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("execution reverted".to_string()) }
        })
        .await;
        assert!(matches!(result, Err(IndexerError::Contract(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
