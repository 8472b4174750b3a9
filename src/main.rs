mod address;
mod app;
mod balance;
mod chain;
mod cleaner;
mod config;
mod counter;
mod error;
mod events;
mod fetcher;
mod processor;
mod repositories;
mod revert;
mod status;
mod token;
mod transfer;
mod types;
mod uow;
mod watcher;

use std::sync::Arc;

use dotenvy::dotenv;
use ethers::providers::{Http, Provider};
use eyre::{Result, WrapErr};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::Config::from_env().wrap_err("invalid configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .wrap_err("failed to connect to the database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .wrap_err("failed to run database migrations")?;
    let uow = uow::UnitOfWork::new(pool);

    let provider = Provider::<Http>::try_from(config.blockchain_rpc_url.as_str())
        .wrap_err("failed to create the RPC provider")?;
    let chain_client = chain::EthersChainClient::new(
        provider,
        config.rpc_call_quick_retry_timeout,
        config.rpc_call_default_retry_timeout,
    );
    let head = chain_client.subscribe_blocks(config.wait_for_blocks_interval);
    let client: Arc<dyn chain::ChainClient> = Arc::new(chain_client);

    let data_fetcher = Arc::new(fetcher::DataFetcherClient::new(
        config.data_fetcher_url.clone(),
        config.data_fetcher_request_timeout,
    )?);
    let block_watcher = watcher::BlockWatcher::new(
        head,
        data_fetcher,
        config.blocks_processing_batch_size,
        config.from_block,
        config.to_block,
    );

    let balance_tracker = Arc::new(balance::BalanceTracker::new(client.clone()));
    let address_service = Arc::new(address::AddressService::new(client.clone()));
    let token_service = Arc::new(token::TokenService::new(
        client.clone(),
        config.l2_erc20_default_bridge,
        config.base_token.clone(),
    ));

    {
        let mut conn = uow.pool().acquire().await?;
        token_service.ensure_base_token(&mut conn).await?;
    }

    let log_processor = Arc::new(processor::LogProcessor::new(
        balance_tracker.clone(),
        address_service,
        token_service,
    ));
    let transaction_processor =
        processor::TransactionProcessor::new(client.clone(), log_processor.clone());

    let (revert_tx, revert_rx) = mpsc::channel(1);
    let block_processor = Arc::new(processor::BlockProcessor::new(
        uow.clone(),
        client.clone(),
        block_watcher,
        transaction_processor,
        log_processor,
        balance_tracker,
        revert_tx,
        config.to_block,
        config.disable_blocks_revert,
    ));
    let block_status = Arc::new(status::BlockStatusService::new(
        uow.clone(),
        client.clone(),
        config.block_status_batch_size,
    ));
    let revert_service =
        revert::BlocksRevertService::new(uow.clone(), client, config.counters_records_batch_size);

    if config.enable_token_offchain_data_saver {
        tracing::warn!(
            "ENABLE_TOKEN_OFFCHAIN_DATA_SAVER is set but no off-chain data provider is \
             available in this build; token market data will not be populated"
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    tracing::info!(from_block = config.from_block, "starting worker");
    let app = app::App::new(
        config,
        uow,
        block_processor,
        block_status,
        revert_service,
        revert_rx,
    );
    app.run(shutdown_rx).await?;
    Ok(())
}
