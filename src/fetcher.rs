use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::IndexerResult;
use crate::types::BlockData;

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Runs `op`, and on failure runs it exactly once more after `delay`. The
/// second outcome, good or bad, is final; longer-lived outages are the
/// ingestion loop's problem.
async fn retry_once<T, E, F, Fut>(name: &str, delay: Duration, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(error) => {
            tracing::warn!(
                call = name,
                error = %error,
                retry_in_ms = delay.as_millis() as u64,
                "request failed, retrying once"
            );
            tokio::time::sleep(delay).await;
            op().await
        }
    }
}

/// Client for the batch data fetcher service, which bundles a block and its
/// chain-level details per number so the worker makes one HTTP round trip
/// per range.
pub struct DataFetcherClient {
    http: reqwest::Client,
    base_url: String,
}

impl DataFetcherClient {
    pub fn new(base_url: String, request_timeout: Duration) -> IndexerResult<Self> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetches `[from, to]` inclusive, one entry per number in ascending
    /// order.
    pub async fn get_block_data(&self, from: u64, to: u64) -> IndexerResult<Vec<BlockData>> {
        Ok(retry_once("getBlockData", RETRY_DELAY, || self.request(from, to)).await?)
    }

    async fn request(&self, from: u64, to: u64) -> Result<Vec<BlockData>, reqwest::Error> {
        let url = format!("{}/blocks", self.base_url);
        self.http
            .get(url)
            .query(&[("from", from), ("to", to)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    #[tokio::test]
    async fn a_successful_request_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let value = retry_once("test", RETRY_DELAY, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(5u64) }
        })
        .await;
        assert_eq!(value, Ok(5));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn a_failed_request_is_retried_once_after_the_delay() {
        let attempts = AtomicU32::new(0);
        let started = Instant::now();
        let value = retry_once("test", RETRY_DELAY, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err("connection reset".to_string())
                } else {
                    Ok(7u64)
                }
            }
        })
        .await;
        assert_eq!(value, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn a_second_failure_propagates() {
        let attempts = AtomicU32::new(0);
        let value: Result<u64, String> = retry_once("test", RETRY_DELAY, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("service unavailable".to_string()) }
        })
        .await;
        assert_eq!(value, Err("service unavailable".to_string()));
        // exactly one retry, never more
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
