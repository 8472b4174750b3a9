use std::env;
use std::time::Duration;

use ethers::types::Address;

use crate::error::{IndexerError, IndexerResult};

/// Worker configuration, read from environment variables.
///
/// Every option has the same default as the production deployment so a bare
/// `.env` with `DATABASE_URL` is enough to run against a local node.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub blockchain_rpc_url: String,
    pub data_fetcher_url: String,
    pub data_fetcher_request_timeout: Duration,

    pub rpc_call_default_retry_timeout: Duration,
    pub rpc_call_quick_retry_timeout: Duration,

    pub wait_for_blocks_interval: Duration,
    pub blocks_processing_batch_size: u64,
    pub from_block: u64,
    pub to_block: Option<u64>,
    pub disable_blocks_revert: bool,

    pub disable_block_status_processing: bool,
    pub block_status_polling_interval: Duration,
    pub block_status_batch_size: i64,

    pub disable_old_balances_cleaner: bool,
    pub delete_balances_interval: Duration,

    pub disable_counters_processing: bool,
    pub counters_processing_polling_interval: Duration,
    pub counters_records_batch_size: i64,

    /// Recognized for deployment compatibility; no off-chain data provider
    /// is wired in this build, so setting it only produces a warning.
    pub enable_token_offchain_data_saver: bool,

    pub base_token: BaseTokenConfig,
    pub l2_erc20_default_bridge: Option<Address>,
}

/// Static metadata for the chain's native token. The native token has no
/// deploying contract to probe, so its Token row comes from here.
#[derive(Debug, Clone)]
pub struct BaseTokenConfig {
    pub symbol: String,
    pub name: String,
    pub decimals: u32,
    pub l1_address: Address,
    pub icon_url: Option<String>,
}

impl Config {
    pub fn from_env() -> IndexerResult<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| IndexerError::Config("DATABASE_URL not found in environment".into()))?;

        let config = Self {
            database_url,
            blockchain_rpc_url: var_or("BLOCKCHAIN_RPC_URL", "http://localhost:3050"),
            data_fetcher_url: var_or("DATA_FETCHER_URL", "http://localhost:3040"),
            data_fetcher_request_timeout: millis_or("DATA_FETCHER_REQUEST_TIMEOUT", 150_000),
            rpc_call_default_retry_timeout: millis_or("RPC_CALLS_DEFAULT_RETRY_TIMEOUT", 30_000),
            rpc_call_quick_retry_timeout: millis_or("RPC_CALLS_QUICK_RETRY_TIMEOUT", 500),
            wait_for_blocks_interval: millis_or("WAIT_FOR_BLOCKS_INTERVAL", 1_000),
            blocks_processing_batch_size: parse_or("BLOCKS_PROCESSING_BATCH_SIZE", 50),
            from_block: parse_or("FROM_BLOCK", 0),
            to_block: env::var("TO_BLOCK").ok().and_then(|v| v.parse().ok()),
            disable_blocks_revert: bool_var("DISABLE_BLOCKS_REVERT"),
            disable_block_status_processing: bool_var("DISABLE_BLOCK_STATUS_PROCESSING"),
            block_status_polling_interval: millis_or("BLOCK_STATUS_POLLING_INTERVAL", 60_000),
            block_status_batch_size: parse_or("BLOCK_STATUS_BATCH_SIZE", 100),
            disable_old_balances_cleaner: bool_var("DISABLE_OLD_BALANCES_CLEANER"),
            delete_balances_interval: millis_or("DELETE_BALANCES_INTERVAL", 300_000),
            disable_counters_processing: bool_var("DISABLE_COUNTERS_PROCESSING"),
            counters_processing_polling_interval: millis_or(
                "COUNTERS_PROCESSING_POLLING_INTERVAL",
                30_000,
            ),
            counters_records_batch_size: parse_or("COUNTERS_PROCESSING_RECORDS_BATCH_SIZE", 20_000),
            enable_token_offchain_data_saver: bool_var("ENABLE_TOKEN_OFFCHAIN_DATA_SAVER"),
            base_token: BaseTokenConfig {
                symbol: var_or("BASE_TOKEN_SYMBOL", "ETH"),
                name: var_or("BASE_TOKEN_NAME", "Ether"),
                decimals: parse_or("BASE_TOKEN_DECIMALS", 18),
                l1_address: env::var("BASE_TOKEN_L1_ADDRESS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(Address::zero),
                icon_url: env::var("BASE_TOKEN_ICON_URL").ok(),
            },
            l2_erc20_default_bridge: env::var("L2_ERC20_DEFAULT_BRIDGE_ADDRESS")
                .ok()
                .and_then(|v| v.parse().ok()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> IndexerResult<()> {
        if self.blocks_processing_batch_size == 0 {
            return Err(IndexerError::Config(
                "BLOCKS_PROCESSING_BATCH_SIZE must be greater than zero".into(),
            ));
        }
        if self.block_status_batch_size <= 0 {
            return Err(IndexerError::Config(
                "BLOCK_STATUS_BATCH_SIZE must be greater than zero".into(),
            ));
        }
        if let Some(to_block) = self.to_block {
            if to_block < self.from_block {
                return Err(IndexerError::Config(
                    "TO_BLOCK must not be less than FROM_BLOCK".into(),
                ));
            }
        }
        Ok(())
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn millis_or(name: &str, default: u64) -> Duration {
    Duration::from_millis(parse_or(name, default))
}

fn bool_var(name: &str) -> bool {
    env::var(name).map(|v| v == "true").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            database_url: "postgres://localhost/explorer".into(),
            blockchain_rpc_url: "http://localhost:3050".into(),
            data_fetcher_url: "http://localhost:3040".into(),
            data_fetcher_request_timeout: Duration::from_millis(150_000),
            rpc_call_default_retry_timeout: Duration::from_millis(30_000),
            rpc_call_quick_retry_timeout: Duration::from_millis(500),
            wait_for_blocks_interval: Duration::from_millis(1_000),
            blocks_processing_batch_size: 50,
            from_block: 0,
            to_block: None,
            disable_blocks_revert: false,
            disable_block_status_processing: false,
            block_status_polling_interval: Duration::from_millis(60_000),
            block_status_batch_size: 100,
            disable_old_balances_cleaner: false,
            delete_balances_interval: Duration::from_millis(300_000),
            disable_counters_processing: false,
            counters_processing_polling_interval: Duration::from_millis(30_000),
            counters_records_batch_size: 20_000,
            enable_token_offchain_data_saver: false,
            base_token: BaseTokenConfig {
                symbol: "ETH".into(),
                name: "Ether".into(),
                decimals: 18,
                l1_address: Address::zero(),
                icon_url: None,
            },
            l2_erc20_default_bridge: None,
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut config = base_config();
        config.blocks_processing_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_status_batch_size_is_rejected() {
        let mut config = base_config();
        config.block_status_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_block_window_is_rejected() {
        let mut config = base_config();
        config.from_block = 100;
        config.to_block = Some(50);
        assert!(config.validate().is_err());
    }
}
