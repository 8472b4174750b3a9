//! Topic0 hashes of the events the worker reacts to, derived from their
//! signatures so the constants cannot drift from the ABI.

use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;

/// ERC20 `Transfer(address,address,uint256)`; ERC721 shares the signature
/// with the token id as a third indexed topic.
pub fn transfer() -> H256 {
    event_topic("Transfer(address,address,uint256)")
}

/// Legacy name of `BridgeInitialize`; both are still emitted in the wild.
pub fn bridge_initialization() -> H256 {
    event_topic("BridgeInitialization(address,string,string,uint8)")
}

pub fn bridge_initialize() -> H256 {
    event_topic("BridgeInitialize(address,string,string,uint8)")
}

pub fn finalize_deposit() -> H256 {
    event_topic("FinalizeDeposit(address,address,address,uint256)")
}

pub fn withdrawal_initiated() -> H256 {
    event_topic("WithdrawalInitiated(address,address,address,uint256)")
}

pub fn contract_deployed() -> H256 {
    event_topic("ContractDeployed(address,bytes32,address)")
}

/// Base-token `Mint(address,uint256)` emitted on L1->L2 value arrival.
pub fn mint() -> H256 {
    event_topic("Mint(address,uint256)")
}

/// Base-token `Withdrawal(address,address,uint256)` emitted on L2->L1 exit.
pub fn withdrawal() -> H256 {
    event_topic("Withdrawal(address,address,uint256)")
}

fn event_topic(signature: &str) -> H256 {
    H256::from(keccak256(signature.as_bytes()))
}

/// An address packed into an indexed topic occupies the low 20 bytes.
pub fn topic_to_address(topic: H256) -> Address {
    Address::from_slice(&topic.as_bytes()[12..])
}

pub fn topic_to_u256(topic: H256) -> U256 {
    U256::from_big_endian(topic.as_bytes())
}

/// First 32-byte word of unindexed log data.
pub fn data_to_u256(data: &[u8]) -> Option<U256> {
    if data.len() < 32 {
        return None;
    }
    Some(U256::from_big_endian(&data[..32]))
}
