//! The purchase monitor: polls pool `Swap` and sale `TokensPurchased` logs,
//! resolves the buyer of each buy and announces it.

use crate::classifier::{BuyLegs, PurchaseEvent, PurchaseFilter, classify_sale, classify_swap};
use crate::events::{Swap, TokensPurchased, decode_swap_event, decode_tokens_purchased_event};
use crate::evidence::{EvidenceSource, TxEvidence};
use crate::notifier::Notifier;
use crate::poller::{BlockRange, LogPoller, LogSource, RangeHandler};
use crate::pools::{PoolDiscovery, PoolRegistry};
use crate::resolver::{CodeInspector, PurchaseCandidate, ResolveError, resolve_buyer};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

/// Everything the monitor reads from the chain.
pub trait PurchaseChain: LogSource + EvidenceSource + CodeInspector {}

impl<T: LogSource + EvidenceSource + CodeInspector + ?Sized> PurchaseChain for T {}

/// A buy detected in a log, before the buyer is known.
#[derive(Debug, Clone, Copy)]
pub struct DetectedBuy {
    pub candidate: PurchaseCandidate,
    pub legs: BuyLegs,
    pub block_number: Option<u64>,
}

/// Turns a pool or sale log into a buy. `Ok(None)` for sells and for logs from
/// unknown emitters.
pub fn detect_buy(
    log: &Log,
    registry: &PoolRegistry,
    sales: &[Address],
) -> Result<Option<DetectedBuy>> {
    let source = log.address();
    let tx_hash = log.transaction_hash.context("log without transaction hash")?;
    let topic0 = log.topic0().copied();

    let detected = if topic0 == Some(Swap::SIGNATURE_HASH) {
        let Some(side) = registry.side(&source) else {
            return Ok(None);
        };
        let swap = decode_swap_event(log)?;
        classify_swap(&swap, side).map(|legs| (legs, swap.recipient))
    } else if topic0 == Some(TokensPurchased::SIGNATURE_HASH) && sales.contains(&source) {
        let purchase = decode_tokens_purchased_event(log)?;
        classify_sale(&purchase).map(|legs| (legs, purchase.beneficiary))
    } else {
        None
    };

    Ok(detected.map(|(legs, declared_recipient)| DetectedBuy {
        candidate: PurchaseCandidate {
            tx_hash,
            source,
            declared_recipient,
            token_amount: legs.token_amount,
        },
        legs,
        block_number: log.block_number,
    }))
}

struct PurchaseScan<'a, C: ?Sized> {
    chain: &'a C,
    token: Address,
    registry: &'a PoolRegistry,
    sales: &'a [Address],
    filter: PurchaseFilter,
    notifier: &'a Notifier,
    evidence: HashMap<B256, TxEvidence>,
}

impl<C: PurchaseChain + ?Sized> PurchaseScan<'_, C> {
    async fn evidence_for(&mut self, tx_hash: B256) -> Result<&TxEvidence> {
        if !self.evidence.contains_key(&tx_hash) {
            let evidence = self
                .chain
                .evidence(self.token, tx_hash)
                .await?
                .ok_or(ResolveError::ReceiptUnavailable { tx: tx_hash })?;
            self.evidence.insert(tx_hash, evidence);
        }
        self.evidence
            .get(&tx_hash)
            .context("transaction evidence missing after fetch")
    }

    async fn process(&mut self, log: &Log) -> Result<bool> {
        let Some(buy) = detect_buy(log, self.registry, self.sales)? else {
            return Ok(false);
        };
        let Some(valuation) = self.filter.accept(&buy.legs) else {
            debug!(tx = ?buy.candidate.tx_hash, "Buy below the USD floor");
            return Ok(false);
        };

        let chain = self.chain;
        let evidence = self.evidence_for(buy.candidate.tx_hash).await?;
        let resolution = resolve_buyer(chain, &buy.candidate, evidence).await?;

        let event = PurchaseEvent {
            buyer: resolution.buyer,
            resolved_by: resolution.resolved_by,
            token_amount: valuation.token_amount,
            quote_amount: valuation.quote_amount,
            usd_value: valuation.usd_value,
            unit_price: valuation.unit_price,
            tx_hash: buy.candidate.tx_hash,
            block_number: buy.block_number,
            source: buy.candidate.source,
        };
        self.notifier.notify_purchase(&event).await;
        Ok(true)
    }
}

#[async_trait]
impl<C> RangeHandler for PurchaseScan<'_, C>
where
    C: PurchaseChain + ?Sized,
{
    async fn handle(&mut self, range: BlockRange) -> Result<()> {
        let pools = self.registry.addresses();
        let mut logs = self.chain.logs(range, &pools, Swap::SIGNATURE_HASH).await?;
        logs.extend(
            self.chain
                .logs(range, self.sales, TokensPurchased::SIGNATURE_HASH)
                .await?,
        );
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        let mut announced = 0;
        for log in &logs {
            match self.process(log).await {
                Ok(true) => announced += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    tx = ?log.transaction_hash,
                    "Skipping purchase in blocks {}: {:#}", range, e
                ),
            }
        }
        info!(
            "[BuyBot] Blocks {}: {} log(s), {} purchase(s) announced",
            range,
            logs.len(),
            announced
        );
        self.evidence.clear();
        Ok(())
    }
}

pub struct SwapMonitor<C> {
    chain: C,
    token: Address,
    registry: PoolRegistry,
    discovery: Option<(Address, LogPoller)>,
    sales: Vec<Address>,
    poller: LogPoller,
    filter: PurchaseFilter,
    notifier: Arc<Notifier>,
}

impl<C: PurchaseChain> SwapMonitor<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: C,
        token: Address,
        registry: PoolRegistry,
        discovery: Option<(Address, LogPoller)>,
        sales: Vec<Address>,
        poller: LogPoller,
        filter: PurchaseFilter,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            chain,
            token,
            registry,
            discovery,
            sales,
            poller,
            filter,
            notifier,
        }
    }

    /// One poll: new pools first, so their swaps in the same blocks are seen.
    pub async fn tick(&mut self) -> Result<usize> {
        let head = self.chain.latest_block().await?;

        if let Some((factory, poller)) = &mut self.discovery {
            let mut discovery = PoolDiscovery {
                source: &self.chain,
                factory: *factory,
                registry: &mut self.registry,
            };
            poller.poll(head, &mut discovery).await?;
        }

        let mut scan = PurchaseScan {
            chain: &self.chain,
            token: self.token,
            registry: &self.registry,
            sales: &self.sales,
            filter: self.filter,
            notifier: &self.notifier,
            evidence: HashMap::new(),
        };
        self.poller.poll(head, &mut scan).await
    }

    pub async fn run(mut self, period: Duration) {
        info!(
            "[BuyBot] Watching {} pool(s) and {} sale contract(s)",
            self.registry.len(),
            self.sales.len()
        );
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!("Swap poll error: {:#}", e);
            }
        }
    }
}
