pub mod client;
pub mod contract;

pub use client::{ChainClient, EthersChainClient};
