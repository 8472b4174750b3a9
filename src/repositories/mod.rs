pub mod addresses;
pub mod balances;
pub mod blocks;
pub mod counters;
pub mod logs;
pub mod nft;
pub mod tokens;
pub mod transactions;
pub mod transfers;

use ethers::types::{Address, H256, U64};

pub(crate) fn addr_bytes(address: Address) -> Vec<u8> {
    address.as_bytes().to_vec()
}

pub(crate) fn hash_bytes(hash: H256) -> Vec<u8> {
    hash.as_bytes().to_vec()
}

pub(crate) fn opt_addr_bytes(address: Option<Address>) -> Option<Vec<u8>> {
    address.map(addr_bytes)
}

pub(crate) fn opt_hash_bytes(hash: Option<H256>) -> Option<Vec<u8>> {
    hash.map(hash_bytes)
}

pub(crate) fn u64_of(value: Option<U64>) -> i64 {
    value.map_or(0, |v| v.as_u64() as i64)
}
