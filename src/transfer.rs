use ethers::types::{Address, H256};

use crate::events;
use crate::types::{
    base_token_address, bootloader_address, BlockDetails, ChainLog, ChainReceipt,
    TokenType, TransactionDetails, Transfer, TransferFields, TransferType,
};

/// Turns raw logs into `Transfer` records. Handlers are keyed by topic0;
/// the two post-passes reshape L1-originated fee/refund deposits and mark
/// internal base-token movements.
pub struct TransferExtractor {
    transfer_topic: H256,
    finalize_deposit_topic: H256,
    withdrawal_initiated_topic: H256,
    mint_topic: H256,
    withdrawal_topic: H256,
}

impl Default for TransferExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferExtractor {
    pub fn new() -> Self {
        Self {
            transfer_topic: events::transfer(),
            finalize_deposit_topic: events::finalize_deposit(),
            withdrawal_initiated_topic: events::withdrawal_initiated(),
            mint_topic: events::mint(),
            withdrawal_topic: events::withdrawal(),
        }
    }

    pub fn extract(
        &self,
        logs: &[ChainLog],
        block_details: &BlockDetails,
        tx_details: Option<&TransactionDetails>,
        receipt: Option<&ChainReceipt>,
    ) -> Vec<Transfer> {
        let mut transfers: Vec<Transfer> = logs
            .iter()
            .filter_map(|log| self.extract_one(log, block_details, tx_details))
            .collect();
        if !transfers.is_empty() {
            format_fee_and_refund_deposits(&mut transfers, tx_details);
            for transfer in &mut transfers {
                transfer.is_internal = is_internal_transfer(transfer, receipt);
            }
        }
        transfers
    }

    fn extract_one(
        &self,
        log: &ChainLog,
        block_details: &BlockDetails,
        tx_details: Option<&TransactionDetails>,
    ) -> Option<Transfer> {
        let topic0 = *log.topics.first()?;
        let base = base_transfer(log, block_details, tx_details);

        if topic0 == self.transfer_topic {
            return match log.topics.len() {
                // ERC721 carries the token id as a third indexed topic
                4 => Some(Transfer {
                    from: events::topic_to_address(log.topics[1]),
                    to: events::topic_to_address(log.topics[2]),
                    token_address: log.address,
                    token_type: TokenType::Erc721,
                    r#type: TransferType::Transfer,
                    amount: None,
                    fields: Some(TransferFields {
                        token_id: events::topic_to_u256(log.topics[3]),
                    }),
                    ..base
                }),
                3 => {
                    let from = events::topic_to_address(log.topics[1]);
                    let to = events::topic_to_address(log.topics[2]);
                    let (r#type, is_fee_or_refund) = if to == bootloader_address() {
                        (TransferType::Fee, true)
                    } else if from == bootloader_address() && tx_details.is_some() {
                        (TransferType::Refund, true)
                    } else {
                        (TransferType::Transfer, false)
                    };
                    Some(Transfer {
                        from,
                        to,
                        token_address: log.address,
                        token_type: token_type_of(log.address),
                        r#type,
                        is_fee_or_refund,
                        amount: events::data_to_u256(&log.data),
                        ..base
                    })
                }
                _ => None,
            };
        }

        if topic0 == self.finalize_deposit_topic && log.topics.len() == 4 {
            let token = events::topic_to_address(log.topics[3]);
            return Some(Transfer {
                from: events::topic_to_address(log.topics[1]),
                to: events::topic_to_address(log.topics[2]),
                token_address: token,
                token_type: token_type_of(token),
                r#type: TransferType::Deposit,
                amount: events::data_to_u256(&log.data),
                ..base
            });
        }

        if topic0 == self.withdrawal_initiated_topic && log.topics.len() == 4 {
            let token = events::topic_to_address(log.topics[3]);
            return Some(Transfer {
                from: events::topic_to_address(log.topics[1]),
                to: events::topic_to_address(log.topics[2]),
                token_address: token,
                token_type: token_type_of(token),
                r#type: TransferType::Withdrawal,
                amount: events::data_to_u256(&log.data),
                ..base
            });
        }

        // Base-token mint/burn are emitted by the base token contract only
        if topic0 == self.mint_topic && log.address == base_token_address() {
            let account = events::topic_to_address(*log.topics.get(1)?);
            return Some(Transfer {
                from: account,
                to: account,
                token_address: base_token_address(),
                token_type: TokenType::BaseToken,
                r#type: TransferType::Deposit,
                amount: events::data_to_u256(&log.data),
                ..base
            });
        }

        if topic0 == self.withdrawal_topic
            && log.address == base_token_address()
            && log.topics.len() == 3
        {
            return Some(Transfer {
                from: events::topic_to_address(log.topics[1]),
                to: events::topic_to_address(log.topics[2]),
                token_address: base_token_address(),
                token_type: TokenType::BaseToken,
                r#type: TransferType::Withdrawal,
                amount: events::data_to_u256(&log.data),
                ..base
            });
        }

        None
    }
}

fn token_type_of(token: Address) -> TokenType {
    if token == base_token_address() {
        TokenType::BaseToken
    } else {
        TokenType::Erc20
    }
}

fn base_transfer(
    log: &ChainLog,
    block_details: &BlockDetails,
    tx_details: Option<&TransactionDetails>,
) -> Transfer {
    Transfer {
        from: Address::zero(),
        to: Address::zero(),
        transaction_hash: log.transaction_hash,
        transaction_index: log.transaction_index.map_or(0, |i| i.as_u64() as u32),
        block_number: log.block_number.map_or(block_details.number, |n| n.as_u64()),
        amount: None,
        token_address: Address::zero(),
        token_type: TokenType::Erc20,
        r#type: TransferType::Transfer,
        is_fee_or_refund: false,
        is_internal: false,
        log_index: log.log_index.map_or(0, |i| i.as_u64() as u32),
        timestamp: tx_details.map_or_else(|| block_details.timestamp_utc(), |d| d.received_at),
        fields: None,
    }
}

/// An L1-originated transaction pays its fee with a base-token deposit to
/// the bootloader and gets the unused part back as a final deposit. Rewrite
/// those two deposits as fee and refund.
fn format_fee_and_refund_deposits(
    transfers: &mut [Transfer],
    tx_details: Option<&TransactionDetails>,
) {
    let Some(details) = tx_details else {
        return;
    };
    if !details.is_l1_originated {
        return;
    }

    let is_base_deposit = |t: &Transfer| {
        t.r#type == TransferType::Deposit && t.token_address == base_token_address()
    };
    let Some(fee_idx) = transfers
        .iter()
        .position(|t| is_base_deposit(t) && t.to == bootloader_address())
    else {
        return;
    };

    let non_fee_from = transfers
        .iter()
        .find(|t| is_base_deposit(t) && t.to != bootloader_address())
        .map(|t| t.from);
    let fee_log_index = transfers[fee_idx].log_index;
    transfers[fee_idx].r#type = TransferType::Fee;
    transfers[fee_idx].is_fee_or_refund = true;
    // ERC20 deposits are initiated by the bridge account; the depositor is
    // the from of the value deposit.
    transfers[fee_idx].from = non_fee_from.unwrap_or(details.initiator_address);

    let refund_idx = transfers
        .iter()
        .enumerate()
        .filter(|(_, t)| {
            is_base_deposit(t) && t.to != bootloader_address() && t.log_index > fee_log_index
        })
        .map(|(i, _)| i)
        .last();
    if let Some(refund_idx) = refund_idx {
        transfers[refund_idx].r#type = TransferType::Refund;
        transfers[refund_idx].is_fee_or_refund = true;
        transfers[refund_idx].from = bootloader_address();
    }
}

/// A base-token transfer whose endpoints differ from the transaction's own
/// from/to was made by a contract, not the transaction itself.
fn is_internal_transfer(transfer: &Transfer, receipt: Option<&ChainReceipt>) -> bool {
    if transfer.r#type != TransferType::Transfer
        || transfer.token_address != base_token_address()
    {
        return false;
    }
    match receipt {
        None => true,
        Some(receipt) => {
            transfer.from != receipt.from || receipt.to.map_or(true, |to| transfer.to != to)
        }
    }
}
