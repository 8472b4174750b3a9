use std::sync::Arc;

use ethers::types::H256;
use sqlx::PgConnection;

use crate::chain::ChainClient;
use crate::error::IndexerResult;
use crate::events;
use crate::repositories::addresses;
use crate::types::{ChainLog, ChainReceipt, ContractAddress};

/// Recognizes a deployment event and pulls the deployed address out of it.
/// A registry so chains with additional deployer contracts can contribute
/// their own log shapes.
pub trait ContractDeployedHandler: Send + Sync {
    fn matches(&self, log: &ChainLog) -> bool;
    fn extract(&self, log: &ChainLog, receipt: &ChainReceipt) -> Option<ContractAddress>;
}

/// `ContractDeployed(address indexed deployer, bytes32 indexed bytecodeHash,
/// address indexed contractAddress)` from the system deployer.
pub struct DefaultContractDeployedHandler {
    topic: H256,
}

impl Default for DefaultContractDeployedHandler {
    fn default() -> Self {
        Self {
            topic: events::contract_deployed(),
        }
    }
}

impl ContractDeployedHandler for DefaultContractDeployedHandler {
    fn matches(&self, log: &ChainLog) -> bool {
        log.topics.first() == Some(&self.topic) && log.topics.len() == 4
    }

    fn extract(&self, log: &ChainLog, receipt: &ChainReceipt) -> Option<ContractAddress> {
        Some(ContractAddress {
            address: events::topic_to_address(*log.topics.get(3)?),
            block_number: log
                .block_number
                .map_or_else(|| receipt.block_number.map_or(0, |n| n.as_u64()), |n| n.as_u64()),
            transaction_hash: log.transaction_hash.unwrap_or(receipt.transaction_hash),
            creator_address: events::topic_to_address(*log.topics.get(1)?),
            log_index: log.log_index.map_or(0, |i| i.as_u64() as u32),
        })
    }
}

pub struct AddressService {
    client: Arc<dyn ChainClient>,
    handlers: Vec<Box<dyn ContractDeployedHandler>>,
}

impl AddressService {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self {
            client,
            handlers: vec![Box::<DefaultContractDeployedHandler>::default()],
        }
    }

    /// Extracts deployed contracts from the receipt logs, stores each with
    /// its current bytecode and returns them for token extraction.
    pub async fn save_contract_addresses(
        &self,
        logs: &[ChainLog],
        receipt: &ChainReceipt,
        conn: &mut PgConnection,
    ) -> IndexerResult<Vec<ContractAddress>> {
        let mut contracts = Vec::new();
        for log in logs {
            let extracted = self
                .handlers
                .iter()
                .find(|handler| handler.matches(log))
                .and_then(|handler| handler.extract(log, receipt));
            if let Some(contract) = extracted {
                contracts.push(contract);
            }
        }
        for contract in &contracts {
            let bytecode = self.client.get_code(contract.address).await;
            addresses::upsert(conn, contract, &bytecode).await?;
        }
        Ok(contracts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, U256, U64};

    fn address_topic(address: Address) -> H256 {
        let mut bytes = [0u8; 32];
        bytes[12..].copy_from_slice(address.as_bytes());
        H256::from(bytes)
    }

    fn deployed_log(deployer: Address, deployed: Address) -> ChainLog {
        ChainLog {
            address: crate::types::contract_deployer_address(),
            topics: vec![
                events::contract_deployed(),
                address_topic(deployer),
                H256::repeat_byte(5),
                address_topic(deployed),
            ],
            block_number: Some(U64::from(12)),
            transaction_hash: Some(H256::repeat_byte(7)),
            log_index: Some(U256::from(3)),
            ..Default::default()
        }
    }

    #[test]
    fn default_handler_extracts_deployment() {
        let deployer = Address::repeat_byte(1);
        let deployed = Address::repeat_byte(2);
        let log = deployed_log(deployer, deployed);
        let handler = DefaultContractDeployedHandler::default();
        assert!(handler.matches(&log));
        let contract = handler.extract(&log, &ChainReceipt::default()).unwrap();
        assert_eq!(contract.address, deployed);
        assert_eq!(contract.creator_address, deployer);
        assert_eq!(contract.block_number, 12);
        assert_eq!(contract.transaction_hash, H256::repeat_byte(7));
        assert_eq!(contract.log_index, 3);
    }

    #[test]
    fn handler_rejects_other_topics() {
        let mut log = deployed_log(Address::repeat_byte(1), Address::repeat_byte(2));
        log.topics[0] = events::transfer();
        assert!(!DefaultContractDeployedHandler::default().matches(&log));

        let mut short = deployed_log(Address::repeat_byte(1), Address::repeat_byte(2));
        short.topics.truncate(2);
        assert!(!DefaultContractDeployedHandler::default().matches(&short));
    }
}
