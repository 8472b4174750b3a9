use chrono::{DateTime, TimeZone, Utc};
use ethers::types::{Address, Block, Transaction, TransactionReceipt, H256, U256};
use serde::{Deserialize, Serialize};

/// Blocks come back from the node with transaction hashes only; full
/// transactions are fetched one by one by the transaction processor.
pub type ChainBlock = Block<H256>;
pub type ChainTransaction = Transaction;
pub type ChainReceipt = TransactionReceipt;
pub type ChainLog = ethers::types::Log;

/// The address the L2 exposes the base (native) token under (system
/// contract `0x…800a`).
pub fn base_token_address() -> Address {
    system_contract_address(0x80, 0x0a)
}

/// The bootloader's formal address (system contract `0x…8001`). Base-token
/// transfers to it are fees; transfers from it are refunds.
pub fn bootloader_address() -> Address {
    system_contract_address(0x80, 0x01)
}

/// The contract deployer system contract (`0x…8006`) emits
/// `ContractDeployed` events.
pub fn contract_deployer_address() -> Address {
    system_contract_address(0x80, 0x06)
}

fn system_contract_address(hi: u8, lo: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[18] = hi;
    bytes[19] = lo;
    Address::from(bytes)
}

/// Chain-level block metadata returned by the `zks_getBlockDetails` style
/// endpoint. Batch linkage and L1 commit/prove/execute hashes live here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDetails {
    pub number: u64,
    #[serde(default)]
    pub l1_batch_number: Option<u64>,
    pub timestamp: u64,
    pub l1_tx_count: u32,
    pub l2_tx_count: u32,
    #[serde(default)]
    pub root_hash: Option<H256>,
    pub status: String,
    #[serde(default)]
    pub commit_tx_hash: Option<H256>,
    #[serde(default)]
    pub committed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prove_tx_hash: Option<H256>,
    #[serde(default)]
    pub proven_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execute_tx_hash: Option<H256>,
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub operator_address: Option<Address>,
}

impl BlockDetails {
    pub fn timestamp_utc(&self) -> DateTime<Utc> {
        unix_to_datetime(self.timestamp)
    }
}

/// Chain-level transaction metadata (`zks_getTransactionDetails` style).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetails {
    pub is_l1_originated: bool,
    pub status: String,
    pub fee: U256,
    #[serde(default)]
    pub gas_per_pubdata: Option<U256>,
    pub initiator_address: Address,
    pub received_at: DateTime<Utc>,
}

/// Top call frame of a `debug_traceTransaction` response; only the failure
/// fields are of interest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionTrace {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub revert_reason: Option<String>,
}

/// One entry of the batch data fetcher response. Either field may be absent
/// when the node has not sealed the block yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockData {
    pub block: Option<ChainBlock>,
    pub block_details: Option<BlockDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenType {
    #[serde(rename = "BASETOKEN")]
    BaseToken,
    Erc20,
    Erc721,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::BaseToken => "BASETOKEN",
            TokenType::Erc20 => "ERC20",
            TokenType::Erc721 => "ERC721",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferType {
    Deposit,
    Transfer,
    Withdrawal,
    Fee,
    Mint,
    Refund,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferType::Deposit => "deposit",
            TransferType::Transfer => "transfer",
            TransferType::Withdrawal => "withdrawal",
            TransferType::Fee => "fee",
            TransferType::Mint => "mint",
            TransferType::Refund => "refund",
        }
    }
}

/// Extra per-type transfer payload; only ERC721 transfers carry one today.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFields {
    pub token_id: U256,
}

/// A value movement extracted from a log. Persisted to `transfers` and
/// denormalized into `address_transfers` per distinct side.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub from: Address,
    pub to: Address,
    pub transaction_hash: Option<H256>,
    pub transaction_index: u32,
    pub block_number: u64,
    pub amount: Option<U256>,
    pub token_address: Address,
    pub token_type: TokenType,
    pub r#type: TransferType,
    pub is_fee_or_refund: bool,
    pub is_internal: bool,
    pub log_index: u32,
    pub timestamp: DateTime<Utc>,
    pub fields: Option<TransferFields>,
}

/// A contract deployment extracted from a `ContractDeployed` log.
#[derive(Debug, Clone)]
pub struct ContractAddress {
    pub address: Address,
    pub block_number: u64,
    pub transaction_hash: H256,
    pub creator_address: Address,
    pub log_index: u32,
}

/// An ERC20 token row candidate. The deployment coordinates are None only
/// for the statically configured base token.
#[derive(Debug, Clone)]
pub struct Token {
    pub l2_address: Address,
    pub l1_address: Option<Address>,
    pub symbol: String,
    pub name: Option<String>,
    pub decimals: u32,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<H256>,
    pub log_index: Option<u32>,
    pub icon_url: Option<String>,
}

/// symbol/decimals/name probed from an ERC20 contract.
#[derive(Debug, Clone)]
pub struct Erc20TokenData {
    pub symbol: String,
    pub decimals: u32,
    pub name: Option<String>,
}

pub fn unix_to_datetime(secs: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or_default()
}

/// U256 as a decimal string for TEXT columns.
pub fn u256_to_decimal(value: U256) -> String {
    value.to_string()
}
