use crate::events::{Transfer, decode_transfer_event};
use alloy::rpc::types::{Log, TransactionReceipt};
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use tracing::warn;

/// One decoded Transfer of the token of interest, in receipt order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub log_index: Option<u64>,
}

/// Everything a transaction tells us about where the token went: its declared
/// sender and the ordered token transfers from its receipt. Built per
/// purchase and dropped after resolution.
#[derive(Debug, Clone)]
pub struct TxEvidence {
    pub tx_hash: B256,
    pub sender: Address,
    pub transfers: Vec<TokenTransfer>,
}

/// Where transaction evidence comes from.
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    /// `None` while the node does not know the transaction yet.
    async fn evidence(&self, token: Address, tx_hash: B256) -> anyhow::Result<Option<TxEvidence>>;
}

impl TxEvidence {
    pub fn from_receipt(token: Address, receipt: &TransactionReceipt) -> Self {
        Self::from_logs(token, receipt.transaction_hash, receipt.from, receipt.inner.logs())
    }

    /// Keeps only Transfer logs emitted by `token`. A log that claims to be a
    /// Transfer but does not decode is skipped; its siblings still count.
    pub fn from_logs(
        token: Address,
        tx_hash: B256,
        sender: Address,
        logs: &[Log],
    ) -> Self {
        let transfers = logs
            .iter()
            .filter(|log| log.address() == token)
            .filter(|log| log.topics().first() == Some(&Transfer::SIGNATURE_HASH))
            .filter_map(|log| match decode_transfer_event(log) {
                Ok(event) => Some(TokenTransfer {
                    from: event.from,
                    to: event.to,
                    value: event.value,
                    log_index: log.log_index,
                }),
                Err(e) => {
                    warn!(
                        tx = ?tx_hash,
                        log_index = ?log.log_index,
                        "Skipping malformed transfer log: {}",
                        e
                    );
                    None
                }
            })
            .collect();

        TxEvidence {
            tx_hash,
            sender,
            transfers,
        }
    }
}
