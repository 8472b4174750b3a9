use std::sync::Arc;

use ethers::abi::{decode, ParamType, Token as AbiToken};
use ethers::types::Address;
use sqlx::PgConnection;

use crate::chain::ChainClient;
use crate::config::BaseTokenConfig;
use crate::error::IndexerResult;
use crate::events;
use crate::repositories::tokens;
use crate::types::{base_token_address, ChainLog, ChainReceipt, ContractAddress, Token};

/// Extracts ERC20 tokens for freshly deployed contracts and keeps the base
/// token row in line with static configuration.
pub struct TokenService {
    client: Arc<dyn ChainClient>,
    l2_default_bridge: Option<Address>,
    base_token: BaseTokenConfig,
}

/// Strips characters that cannot be stored or rendered. A token whose
/// symbol is empty after sanitation is not worth a row.
pub fn sanitize_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

impl TokenService {
    pub fn new(
        client: Arc<dyn ChainClient>,
        l2_default_bridge: Option<Address>,
        base_token: BaseTokenConfig,
    ) -> Self {
        Self {
            client,
            l2_default_bridge,
            base_token,
        }
    }

    /// Tries to store a token row for a deployed contract. Bridge-deployed
    /// tokens are decoded straight from the bridge initialization log; other
    /// contracts are probed on chain. Contracts that are not ERC20s are
    /// silently skipped.
    pub async fn save_erc20_token(
        &self,
        contract: &ContractAddress,
        receipt: Option<&ChainReceipt>,
        conn: &mut PgConnection,
    ) -> IndexerResult<()> {
        let Some(token) = self.resolve_erc20(contract, receipt).await else {
            return Ok(());
        };
        tracing::debug!(
            contract_address = ?contract.address,
            block_number = contract.block_number,
            "adding ERC20 token to the DB"
        );
        tokens::upsert(conn, &token).await
    }

    async fn resolve_erc20(
        &self,
        contract: &ContractAddress,
        receipt: Option<&ChainReceipt>,
    ) -> Option<Token> {
        let mut token = match self.extract_from_bridge_log(contract, receipt) {
            Some(token) => token,
            None => match self.client.get_erc20_token_data(contract.address).await {
                Ok(data) => Token {
                    l2_address: contract.address,
                    l1_address: None,
                    symbol: data.symbol,
                    name: data.name,
                    decimals: data.decimals,
                    block_number: Some(contract.block_number),
                    transaction_hash: Some(contract.transaction_hash),
                    log_index: Some(contract.log_index),
                    icon_url: None,
                },
                Err(error) => {
                    tracing::debug!(
                        contract_address = ?contract.address,
                        error = %error,
                        "cannot read ERC20 data, might be a contract of a different type"
                    );
                    return None;
                }
            },
        };

        token.symbol = sanitize_symbol(&token.symbol);
        if token.symbol.is_empty() {
            tracing::debug!(
                contract_address = ?contract.address,
                "skipping token with empty symbol"
            );
            return None;
        }

        if contract.address == base_token_address() {
            token.l1_address = Some(self.base_token.l1_address);
        }
        Some(token)
    }

    /// Inserts the configured base token row if absent, and corrects it in
    /// place when a stored row drifts from configuration. Runs at startup.
    pub async fn ensure_base_token(&self, conn: &mut PgConnection) -> IndexerResult<()> {
        let configured = Token {
            l2_address: base_token_address(),
            l1_address: Some(self.base_token.l1_address),
            symbol: self.base_token.symbol.clone(),
            name: Some(self.base_token.name.clone()),
            decimals: self.base_token.decimals,
            block_number: None,
            transaction_hash: None,
            log_index: None,
            icon_url: self.base_token.icon_url.clone(),
        };
        match tokens::get(conn, base_token_address()).await? {
            None => tokens::upsert(conn, &configured).await,
            Some(stored) => {
                let drifted = stored.symbol != configured.symbol
                    || stored.name.as_deref() != configured.name.as_deref()
                    || stored.decimals != configured.decimals as i32
                    || stored.l1_address.as_deref()
                        != configured.l1_address.map(|a| a.as_bytes().to_vec()).as_deref()
                    || stored.icon_url != configured.icon_url;
                if drifted {
                    tracing::info!("correcting drifted base token metadata");
                    tokens::update_token_values(conn, &configured).await?;
                }
                Ok(())
            }
        }
    }

    fn extract_from_bridge_log(
        &self,
        contract: &ContractAddress,
        receipt: Option<&ChainReceipt>,
    ) -> Option<Token> {
        let receipt = receipt?;
        let bridge = self.l2_default_bridge?;
        if receipt.to != Some(bridge) {
            return None;
        }
        let log = receipt.logs.iter().find(|log| {
            log.address == contract.address
                && log.topics.first().is_some_and(|topic| {
                    *topic == events::bridge_initialize()
                        || *topic == events::bridge_initialization()
                })
        })?;
        decode_bridge_initialize(log).map(|(l1_token, name, symbol, decimals)| Token {
            l2_address: contract.address,
            l1_address: Some(l1_token),
            symbol,
            name: Some(name),
            decimals,
            block_number: Some(contract.block_number),
            transaction_hash: Some(contract.transaction_hash),
            log_index: Some(contract.log_index),
            icon_url: None,
        })
    }
}

/// `BridgeInitialize(address indexed l1Token, string name, string symbol,
/// uint8 decimals)`.
fn decode_bridge_initialize(log: &ChainLog) -> Option<(Address, String, String, u32)> {
    let l1_token = events::topic_to_address(*log.topics.get(1)?);
    let tokens = decode(
        &[ParamType::String, ParamType::String, ParamType::Uint(8)],
        &log.data,
    )
    .ok()?;
    let mut iter = tokens.into_iter();
    let name = match iter.next()? {
        AbiToken::String(s) => s,
        _ => return None,
    };
    let symbol = match iter.next()? {
        AbiToken::String(s) => s,
        _ => return None,
    };
    let decimals = match iter.next()? {
        AbiToken::Uint(u) => u.as_u32(),
        _ => return None,
    };
    Some((l1_token, name, symbol, decimals))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use ethers::abi::Token as AbiToken;
    use ethers::types::{Bytes, H256, U256};

    use crate::error::IndexerError;
    use crate::types::Erc20TokenData;

    /// Answers `get_erc20_token_data` from a script and records whether the
    /// probe was exercised at all.
    struct ProbeClient {
        data: Option<Erc20TokenData>,
        probed: AtomicBool,
    }

    impl ProbeClient {
        fn returning(data: Option<Erc20TokenData>) -> Arc<Self> {
            Arc::new(Self {
                data,
                probed: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl ChainClient for ProbeClient {
        async fn get_block(&self, _: u64) -> Option<crate::types::ChainBlock> {
            unimplemented!()
        }
        async fn get_block_details(&self, _: u64) -> Option<crate::types::BlockDetails> {
            unimplemented!()
        }
        async fn get_transaction(&self, _: H256) -> Option<crate::types::ChainTransaction> {
            unimplemented!()
        }
        async fn get_transaction_details(
            &self,
            _: H256,
        ) -> Option<crate::types::TransactionDetails> {
            unimplemented!()
        }
        async fn get_transaction_receipt(&self, _: H256) -> Option<crate::types::ChainReceipt> {
            unimplemented!()
        }
        async fn get_logs(&self, _: u64, _: u64) -> Vec<ChainLog> {
            unimplemented!()
        }
        async fn get_code(&self, _: Address) -> Bytes {
            unimplemented!()
        }
        async fn get_balance(&self, _: Address, _: u64, _: Address) -> IndexerResult<U256> {
            unimplemented!()
        }
        async fn debug_trace_transaction(
            &self,
            _: H256,
            _: bool,
        ) -> Option<crate::types::TransactionTrace> {
            unimplemented!()
        }
        async fn get_erc20_token_data(&self, _: Address) -> IndexerResult<Erc20TokenData> {
            self.probed.store(true, Ordering::SeqCst);
            self.data
                .clone()
                .ok_or_else(|| IndexerError::Contract("could not decode result data".into()))
        }
    }

    fn base_token_config() -> BaseTokenConfig {
        BaseTokenConfig {
            symbol: "ETH".into(),
            name: "Ether".into(),
            decimals: 18,
            l1_address: Address::zero(),
            icon_url: None,
        }
    }

    fn deployed_contract(address: Address) -> ContractAddress {
        ContractAddress {
            address,
            block_number: 7,
            transaction_hash: H256::repeat_byte(0x7a),
            creator_address: Address::repeat_byte(0x11),
            log_index: 3,
        }
    }

    fn service(client: Arc<ProbeClient>, bridge: Option<Address>) -> TokenService {
        TokenService::new(client, bridge, base_token_config())
    }

    fn erc20(symbol: &str) -> Erc20TokenData {
        Erc20TokenData {
            symbol: symbol.into(),
            decimals: 6,
            name: Some("Test Coin".into()),
        }
    }

    #[tokio::test]
    async fn contract_without_bridge_log_is_probed_on_chain() {
        let client = ProbeClient::returning(Some(erc20("TST")));
        let service = service(client.clone(), None);
        let contract = deployed_contract(Address::repeat_byte(0x42));

        let token = service.resolve_erc20(&contract, None).await.unwrap();
        assert!(client.probed.load(Ordering::SeqCst));
        assert_eq!(token.symbol, "TST");
        assert_eq!(token.decimals, 6);
        assert_eq!(token.l2_address, contract.address);
        assert_eq!(token.block_number, Some(7));
    }

    #[tokio::test]
    async fn non_erc20_contract_yields_no_row() {
        let client = ProbeClient::returning(None);
        let service = service(client.clone(), None);
        let contract = deployed_contract(Address::repeat_byte(0x42));

        assert!(service.resolve_erc20(&contract, None).await.is_none());
        assert!(client.probed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn token_with_empty_symbol_yields_no_row() {
        for symbol in ["", "\u{0}\u{0}\u{0}"] {
            let client = ProbeClient::returning(Some(erc20(symbol)));
            let service = service(client, None);
            let contract = deployed_contract(Address::repeat_byte(0x42));
            assert!(service.resolve_erc20(&contract, None).await.is_none());
        }
    }

    #[tokio::test]
    async fn bridge_initialization_log_skips_the_probe() {
        let bridge = Address::repeat_byte(0xbb);
        let contract = deployed_contract(Address::repeat_byte(0x42));
        let l1_token = Address::repeat_byte(0xaa);
        let mut topic = [0u8; 32];
        topic[12..].copy_from_slice(l1_token.as_bytes());
        let data = ethers::abi::encode(&[
            AbiToken::String("Wrapped Ether".into()),
            AbiToken::String("WETH".into()),
            AbiToken::Uint(U256::from(18)),
        ]);
        let receipt = ChainReceipt {
            to: Some(bridge),
            logs: vec![ChainLog {
                address: contract.address,
                topics: vec![events::bridge_initialize(), H256::from(topic)],
                data: Bytes::from(data),
                ..Default::default()
            }],
            ..Default::default()
        };

        let client = ProbeClient::returning(Some(erc20("SHOULD_NOT_BE_USED")));
        let service = service(client.clone(), Some(bridge));

        let token = service.resolve_erc20(&contract, Some(&receipt)).await.unwrap();
        assert!(!client.probed.load(Ordering::SeqCst));
        assert_eq!(token.symbol, "WETH");
        assert_eq!(token.l1_address, Some(l1_token));
    }

    #[test]
    fn sanitation_strips_control_characters() {
        assert_eq!(sanitize_symbol("T\u{0}KN"), "TKN");
        assert_eq!(sanitize_symbol("  USDC "), "USDC");
        assert_eq!(sanitize_symbol("\u{1}\u{2}\u{0}"), "");
        assert_eq!(sanitize_symbol(""), "");
    }

    #[test]
    fn bridge_initialize_log_decodes() {
        let l1_token = Address::repeat_byte(0xaa);
        let mut topic = [0u8; 32];
        topic[12..].copy_from_slice(l1_token.as_bytes());
        let data = ethers::abi::encode(&[
            AbiToken::String("Wrapped Ether".into()),
            AbiToken::String("WETH".into()),
            AbiToken::Uint(U256::from(18)),
        ]);
        let log = ChainLog {
            address: Address::repeat_byte(1),
            topics: vec![events::bridge_initialize(), H256::from(topic)],
            data: Bytes::from(data),
            ..Default::default()
        };
        let (decoded_l1, name, symbol, decimals) = decode_bridge_initialize(&log).unwrap();
        assert_eq!(decoded_l1, l1_token);
        assert_eq!(name, "Wrapped Ether");
        assert_eq!(symbol, "WETH");
        assert_eq!(decimals, 18);
    }

    #[test]
    fn malformed_bridge_log_is_rejected() {
        let log = ChainLog {
            address: Address::repeat_byte(1),
            topics: vec![events::bridge_initialize(), H256::zero()],
            data: Bytes::from(vec![0u8; 4]),
            ..Default::default()
        };
        assert!(decode_bridge_initialize(&log).is_none());
    }
}
