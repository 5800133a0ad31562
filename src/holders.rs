//! Holder counting.
//!
//! Every address that ever sent or received the token is remembered; a report
//! re-reads each one's balance (plus staked balance, when a staking contract
//! is configured) and counts those above zero. Addresses are never forgotten,
//! so the pass grows with the token's history.

use crate::events::{Transfer, decode_transfer_event};
use crate::notifier::message::render_holder_report;
use crate::notifier::{Channel, Notifier};
use crate::poller::{BlockRange, LogPoller, LogSource, RangeHandler};
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Holding {
    pub balance: U256,
    pub staked: U256,
}

impl Holding {
    pub fn total(&self) -> U256 {
        self.balance.saturating_add(self.staked)
    }
}

#[async_trait]
pub trait HoldingReader: Send + Sync {
    async fn holding(
        &self,
        token: Address,
        staking: Option<Address>,
        holder: Address,
    ) -> Result<Holding>;
}

/// Everything the holder counter reads from the chain.
pub trait HolderChain: LogSource + HoldingReader {}

impl<T: LogSource + HoldingReader + ?Sized> HolderChain for T {}

/// Insert-only set of every address seen in a transfer. The zero address is
/// never admitted.
#[derive(Debug, Default)]
pub struct KnownAddressSet {
    addresses: HashSet<Address>,
    order: Vec<Address>,
}

impl KnownAddressSet {
    pub fn insert(&mut self, address: Address) -> bool {
        if address == Address::ZERO || !self.addresses.insert(address) {
            return false;
        }
        self.order.push(address);
        true
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Addresses in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.order.iter()
    }
}

struct TransferScan<'a, C: ?Sized> {
    chain: &'a C,
    token: Address,
    known: &'a mut KnownAddressSet,
}

#[async_trait]
impl<C> RangeHandler for TransferScan<'_, C>
where
    C: LogSource + ?Sized,
{
    async fn handle(&mut self, range: BlockRange) -> Result<()> {
        let logs = self
            .chain
            .logs(range, &[self.token], Transfer::SIGNATURE_HASH)
            .await?;

        let before = self.known.len();
        for log in &logs {
            match decode_transfer_event(log) {
                Ok(event) => {
                    self.known.insert(event.from);
                    self.known.insert(event.to);
                }
                Err(e) => warn!("Failed to decode transfer event in blocks {}: {}", range, e),
            }
        }
        info!(
            "[HolderBot] Blocks {}: {} transfer(s), {} new address(es)",
            range,
            logs.len(),
            self.known.len() - before
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HolderBalance {
    pub address: Address,
    pub holding: Holding,
}

#[derive(Debug, Clone, Default)]
pub struct HolderSnapshot {
    /// Addresses with a positive combined holding, in discovery order.
    pub holders: Vec<HolderBalance>,
    pub checked: usize,
    pub failed: usize,
}

impl HolderSnapshot {
    pub fn count(&self) -> usize {
        self.holders.len()
    }
}

/// Checks every known address. Lookups that fail are skipped and tallied.
pub async fn count_holders<R>(
    reader: &R,
    token: Address,
    staking: Option<Address>,
    known: &KnownAddressSet,
    query_delay: Duration,
) -> HolderSnapshot
where
    R: HoldingReader + ?Sized,
{
    let mut snapshot = HolderSnapshot::default();
    for address in known.iter() {
        match reader.holding(token, staking, *address).await {
            Ok(holding) => {
                snapshot.checked += 1;
                if !holding.total().is_zero() {
                    snapshot.holders.push(HolderBalance {
                        address: *address,
                        holding,
                    });
                }
            }
            Err(e) => {
                snapshot.failed += 1;
                warn!(address = ?address, "Holding lookup failed: {:#}", e);
            }
        }
        if !query_delay.is_zero() {
            sleep(query_delay).await;
        }
    }
    snapshot
}

pub struct HolderCounter<C> {
    chain: C,
    token: Address,
    staking: Option<Address>,
    poller: LogPoller,
    known: KnownAddressSet,
    query_delay: Duration,
}

impl<C: HolderChain> HolderCounter<C> {
    pub fn new(
        chain: C,
        token: Address,
        staking: Option<Address>,
        poller: LogPoller,
        query_delay: Duration,
    ) -> Self {
        Self {
            chain,
            token,
            staking,
            poller,
            known: KnownAddressSet::default(),
            query_delay,
        }
    }

    pub fn known(&self) -> &KnownAddressSet {
        &self.known
    }

    /// Scans transfer logs up to the current head into the known set.
    pub async fn update_known(&mut self) -> Result<()> {
        let head = self.chain.latest_block().await?;
        let mut scan = TransferScan {
            chain: &self.chain,
            token: self.token,
            known: &mut self.known,
        };
        self.poller.poll(head, &mut scan).await?;
        Ok(())
    }

    pub async fn snapshot(&mut self) -> Result<HolderSnapshot> {
        self.update_known().await?;
        info!("[HolderBot] Checking {} known address(es)", self.known.len());
        Ok(count_holders(
            &self.chain,
            self.token,
            self.staking,
            &self.known,
            self.query_delay,
        )
        .await)
    }
}

/// Asks the holder task for a report; `reply_to` overrides the broadcast.
pub struct ReportRequest {
    pub reply_to: Option<Arc<dyn Channel>>,
}

/// Owns the holder counter. Scheduled and requested reports are served one
/// at a time by this single loop, so scans never overlap.
pub async fn run_holder_task<C: HolderChain>(
    mut counter: HolderCounter<C>,
    notifier: Arc<Notifier>,
    period: Duration,
    mut requests: mpsc::Receiver<ReportRequest>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let reply_to = tokio::select! {
            biased;
            _ = ticker.tick() => None,
            request = requests.recv() => match request {
                Some(request) => request.reply_to,
                None => {
                    info!("[HolderBot] Report channel closed, stopping");
                    return;
                }
            },
        };

        match counter.snapshot().await {
            Ok(snapshot) => {
                let symbol = &notifier.context().token_symbol;
                let report = render_holder_report(symbol, snapshot.count());
                match reply_to {
                    Some(channel) => {
                        if let Err(e) = channel.deliver(&report).await {
                            warn!("Delivery to {} failed: {:#}", channel.name(), e);
                        }
                    }
                    None => {
                        notifier.broadcast(&report).await;
                    }
                }
                info!(
                    "[HolderBot] Posted {} holder(s) ({} checked, {} failed)",
                    snapshot.count(),
                    snapshot.checked,
                    snapshot.failed
                );
            }
            Err(e) => error!("Holder track error: {:#}", e),
        }
    }
}
