use ethers::types::H256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Provider error: {0}")]
    Provider(#[from] ethers::providers::ProviderError),

    #[error("Permanent contract call error: {0}")]
    Contract(String),

    #[error("Data fetcher error: {0}")]
    DataFetcher(#[from] reqwest::Error),

    #[error("Missing transaction data for {0:#x}")]
    MissingTransactionData(H256),

    #[error("{0}")]
    Other(String),
}

pub type IndexerResult<T> = Result<T, IndexerError>;
