//! Buyer resolution.
//!
//! A pool (or sale contract) rarely pays the buyer directly: routers and
//! aggregators receive the tokens and forward them within the same
//! transaction. The resolver folds every transfer of the token inside the
//! transaction into a net balance change per address and picks the account
//! (no deployed code) that ended up with the most tokens.

use crate::evidence::{TokenTransfer, TxEvidence};
use alloy_primitives::{Address, B256, I256, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Tells plain accounts apart from contracts.
#[async_trait]
pub trait CodeInspector: Send + Sync {
    async fn is_contract(&self, address: Address) -> anyhow::Result<bool>;
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("purchase in {tx:?} moved no tokens")]
    NonActionable { tx: B256 },
    #[error("receipt for {tx:?} is not available")]
    ReceiptUnavailable { tx: B256 },
    #[error("code lookup for {address:?} failed: {reason}")]
    CodeLookup { address: Address, reason: String },
}

/// How the buyer was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBy {
    NetDelta,
    Sender,
    DeclaredRecipient,
    /// The transaction sender returned without confirming it is an account.
    /// It may be a contract; callers still get an address to show.
    SenderUnverified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub buyer: Address,
    pub resolved_by: ResolvedBy,
}

/// The purchase the resolver is asked about.
#[derive(Debug, Clone, Copy)]
pub struct PurchaseCandidate {
    pub tx_hash: B256,
    /// Pool or sale contract that emitted the purchase.
    pub source: Address,
    /// Recipient named by the event itself (swap `recipient`, sale `beneficiary`).
    pub declared_recipient: Address,
    pub token_amount: U256,
}

/// Signed per-address change of the token within one transaction.
///
/// The zero address is never credited or debited, so a mint or burn leaves a
/// non-zero [`net_sum`](Self::net_sum).
#[derive(Debug, Clone, Default)]
pub struct BalanceDelta {
    order: Vec<Address>,
    deltas: HashMap<Address, I256>,
    skipped: usize,
}

impl BalanceDelta {
    pub fn from_transfers(transfers: &[TokenTransfer]) -> Self {
        let mut delta = BalanceDelta::default();
        for transfer in transfers {
            delta.apply(transfer);
        }
        delta
    }

    fn apply(&mut self, transfer: &TokenTransfer) {
        let Ok(value) = I256::try_from(transfer.value) else {
            // larger than any real supply
            self.skipped += 1;
            return;
        };

        if transfer.from != Address::ZERO {
            let entry = self.entry(transfer.from);
            *entry = entry.saturating_sub(value);
        }
        if transfer.to != Address::ZERO {
            let entry = self.entry(transfer.to);
            *entry = entry.saturating_add(value);
        }
    }

    fn entry(&mut self, address: Address) -> &mut I256 {
        if !self.deltas.contains_key(&address) {
            self.order.push(address);
        }
        self.deltas.entry(address).or_insert(I256::ZERO)
    }

    pub fn get(&self, address: &Address) -> I256 {
        self.deltas.get(address).copied().unwrap_or(I256::ZERO)
    }

    pub fn net_sum(&self) -> I256 {
        self.deltas
            .values()
            .fold(I256::ZERO, |acc, d| acc.saturating_add(*d))
    }

    pub fn is_conserved(&self) -> bool {
        self.net_sum().is_zero()
    }

    /// Transfers whose value did not fit a signed 256-bit integer.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Addresses with a strictly positive delta, largest first, ties in
    /// first-seen order.
    pub fn receivers(&self) -> Vec<(Address, I256)> {
        let mut receivers: Vec<(Address, I256)> = self
            .order
            .iter()
            .map(|address| (*address, self.get(address)))
            .filter(|(_, delta)| delta.is_positive())
            .collect();
        // stable sort keeps first-seen order among equal deltas
        receivers.sort_by(|a, b| b.1.cmp(&a.1));
        receivers
    }
}

/// Memoises code lookups for the duration of one resolution.
struct AccountCheck<'a, C: ?Sized> {
    inspector: &'a C,
    known: HashMap<Address, bool>,
}

impl<'a, C: CodeInspector + ?Sized> AccountCheck<'a, C> {
    fn new(inspector: &'a C) -> Self {
        Self {
            inspector,
            known: HashMap::new(),
        }
    }

    async fn is_account(&mut self, address: Address) -> Result<bool, ResolveError> {
        if let Some(is_contract) = self.known.get(&address) {
            return Ok(!is_contract);
        }
        let is_contract = self
            .inspector
            .is_contract(address)
            .await
            .map_err(|e| ResolveError::CodeLookup {
                address,
                reason: format!("{e:#}"),
            })?;
        self.known.insert(address, is_contract);
        Ok(!is_contract)
    }
}

pub async fn resolve_buyer<C>(
    inspector: &C,
    candidate: &PurchaseCandidate,
    evidence: &TxEvidence,
) -> Result<Resolution, ResolveError>
where
    C: CodeInspector + ?Sized,
{
    if candidate.token_amount.is_zero() {
        return Err(ResolveError::NonActionable {
            tx: candidate.tx_hash,
        });
    }

    let delta = BalanceDelta::from_transfers(&evidence.transfers);
    if !delta.is_conserved() {
        debug!(
            tx = ?evidence.tx_hash,
            net = %delta.net_sum(),
            "Token transfers do not net to zero (mint or burn in transaction)"
        );
    }
    if delta.skipped() > 0 {
        warn!(
            tx = ?evidence.tx_hash,
            skipped = delta.skipped(),
            "Ignored out-of-range transfer values"
        );
    }

    let mut accounts = AccountCheck::new(inspector);

    for (address, amount) in delta.receivers() {
        if accounts.is_account(address).await? {
            debug!(
                tx = ?evidence.tx_hash,
                buyer = ?address,
                delta = %amount,
                "Buyer resolved from net balance change"
            );
            return Ok(Resolution {
                buyer: address,
                resolved_by: ResolvedBy::NetDelta,
            });
        }
    }

    if accounts.is_account(evidence.sender).await? {
        return Ok(Resolution {
            buyer: evidence.sender,
            resolved_by: ResolvedBy::Sender,
        });
    }

    if candidate.declared_recipient != Address::ZERO
        && accounts.is_account(candidate.declared_recipient).await?
    {
        return Ok(Resolution {
            buyer: candidate.declared_recipient,
            resolved_by: ResolvedBy::DeclaredRecipient,
        });
    }

    // Known inaccuracy: the sender may be a contract here. Kept so that every
    // purchase still names someone.
    warn!(
        tx = ?evidence.tx_hash,
        sender = ?evidence.sender,
        "No account received the tokens, reporting the transaction sender"
    );
    Ok(Resolution {
        buyer: evidence.sender,
        resolved_by: ResolvedBy::SenderUnverified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct FakeChain {
        contracts: HashSet<Address>,
        broken: HashSet<Address>,
        lookups: Mutex<Vec<Address>>,
    }

    impl FakeChain {
        fn with_contracts(contracts: &[Address]) -> Self {
            Self {
                contracts: contracts.iter().copied().collect(),
                broken: HashSet::new(),
                lookups: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CodeInspector for FakeChain {
        async fn is_contract(&self, address: Address) -> anyhow::Result<bool> {
            self.lookups.lock().unwrap().push(address);
            if self.broken.contains(&address) {
                anyhow::bail!("node timeout");
            }
            Ok(self.contracts.contains(&address))
        }
    }

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn transfer(from: Address, to: Address, value: u64) -> TokenTransfer {
        TokenTransfer {
            from,
            to,
            value: U256::from(value),
            log_index: None,
        }
    }

    fn candidate(pool: Address, recipient: Address) -> PurchaseCandidate {
        PurchaseCandidate {
            tx_hash: B256::repeat_byte(0xee),
            source: pool,
            declared_recipient: recipient,
            token_amount: U256::from(100),
        }
    }

    fn evidence(sender: Address, transfers: Vec<TokenTransfer>) -> TxEvidence {
        TxEvidence {
            tx_hash: B256::repeat_byte(0xee),
            sender,
            transfers,
        }
    }

    const POOL: u8 = 0x01;
    const ROUTER: u8 = 0x02;
    const VAULT: u8 = 0x03;
    const ALICE: u8 = 0xa1;
    const BOB: u8 = 0xb0;

    #[tokio::test]
    async fn test_single_transfer_to_account() {
        let chain = FakeChain::with_contracts(&[addr(POOL), addr(ROUTER)]);
        let ev = evidence(addr(ROUTER), vec![transfer(addr(POOL), addr(ALICE), 100)]);

        let resolution = resolve_buyer(&chain, &candidate(addr(POOL), addr(ROUTER)), &ev)
            .await
            .unwrap();
        assert_eq!(resolution.buyer, addr(ALICE));
        assert_eq!(resolution.resolved_by, ResolvedBy::NetDelta);
    }

    #[tokio::test]
    async fn test_two_hop_forward_resolves_final_account() {
        let chain = FakeChain::with_contracts(&[addr(POOL), addr(ROUTER)]);
        let ev = evidence(
            addr(BOB),
            vec![
                transfer(addr(POOL), addr(ROUTER), 100),
                transfer(addr(ROUTER), addr(ALICE), 100),
            ],
        );

        let resolution = resolve_buyer(&chain, &candidate(addr(POOL), addr(ROUTER)), &ev)
            .await
            .unwrap();
        assert_eq!(resolution.buyer, addr(ALICE));
        // router nets to zero and is never a candidate
        assert!(!chain.lookups.lock().unwrap().contains(&addr(ROUTER)));
    }

    #[tokio::test]
    async fn test_fee_skim_on_forward_still_picks_largest_account() {
        let chain = FakeChain::with_contracts(&[addr(POOL), addr(ROUTER)]);
        let ev = evidence(
            addr(ALICE),
            vec![
                transfer(addr(POOL), addr(ROUTER), 100),
                transfer(addr(ROUTER), addr(BOB), 1),
                transfer(addr(ROUTER), addr(ALICE), 99),
            ],
        );

        let resolution = resolve_buyer(&chain, &candidate(addr(POOL), addr(ROUTER)), &ev)
            .await
            .unwrap();
        assert_eq!(resolution.buyer, addr(ALICE));
    }

    #[tokio::test]
    async fn test_contract_receiver_is_skipped_for_next_account() {
        let chain = FakeChain::with_contracts(&[addr(POOL), addr(VAULT)]);
        let ev = evidence(
            addr(ROUTER),
            vec![
                transfer(addr(POOL), addr(VAULT), 80),
                transfer(addr(POOL), addr(BOB), 20),
            ],
        );

        let resolution = resolve_buyer(&chain, &candidate(addr(POOL), addr(VAULT)), &ev)
            .await
            .unwrap();
        assert_eq!(resolution.buyer, addr(BOB));
    }

    #[tokio::test]
    async fn test_tie_breaks_on_first_seen() {
        let chain = FakeChain::with_contracts(&[addr(POOL)]);
        let ev = evidence(
            addr(ROUTER),
            vec![
                transfer(addr(POOL), addr(BOB), 50),
                transfer(addr(POOL), addr(ALICE), 50),
            ],
        );

        let resolution = resolve_buyer(&chain, &candidate(addr(POOL), addr(ROUTER)), &ev)
            .await
            .unwrap();
        assert_eq!(resolution.buyer, addr(BOB));
    }

    #[tokio::test]
    async fn test_batched_multi_swap_uses_largest_receiver() {
        let chain = FakeChain::with_contracts(&[addr(POOL), addr(ROUTER)]);
        let ev = evidence(
            addr(ROUTER),
            vec![
                transfer(addr(POOL), addr(BOB), 30),
                transfer(addr(ALICE), addr(POOL), 500),
                transfer(addr(POOL), addr(ALICE), 70),
                transfer(addr(POOL), addr(ALICE), 40),
            ],
        );

        // ALICE sold 500 and bought 110: net negative, BOB is the only net buyer
        let resolution = resolve_buyer(&chain, &candidate(addr(POOL), addr(ROUTER)), &ev)
            .await
            .unwrap();
        assert_eq!(resolution.buyer, addr(BOB));
    }

    #[tokio::test]
    async fn test_no_transfers_falls_back_to_account_sender() {
        let chain = FakeChain::with_contracts(&[addr(POOL)]);
        let ev = evidence(addr(ALICE), vec![]);

        let resolution = resolve_buyer(&chain, &candidate(addr(POOL), addr(BOB)), &ev)
            .await
            .unwrap();
        assert_eq!(resolution.buyer, addr(ALICE));
        assert_eq!(resolution.resolved_by, ResolvedBy::Sender);
    }

    #[tokio::test]
    async fn test_contract_sender_falls_back_to_declared_recipient() {
        let chain = FakeChain::with_contracts(&[addr(POOL), addr(ROUTER), addr(VAULT)]);
        let ev = evidence(addr(ROUTER), vec![transfer(addr(POOL), addr(VAULT), 100)]);

        let resolution = resolve_buyer(&chain, &candidate(addr(POOL), addr(BOB)), &ev)
            .await
            .unwrap();
        assert_eq!(resolution.buyer, addr(BOB));
        assert_eq!(resolution.resolved_by, ResolvedBy::DeclaredRecipient);
    }

    #[tokio::test]
    async fn test_all_contracts_returns_sender_unverified() {
        let chain = FakeChain::with_contracts(&[addr(POOL), addr(ROUTER), addr(VAULT)]);
        let ev = evidence(addr(ROUTER), vec![transfer(addr(POOL), addr(VAULT), 100)]);

        let resolution = resolve_buyer(&chain, &candidate(addr(POOL), addr(VAULT)), &ev)
            .await
            .unwrap();
        assert_eq!(resolution.buyer, addr(ROUTER));
        assert_eq!(resolution.resolved_by, ResolvedBy::SenderUnverified);
    }

    #[tokio::test]
    async fn test_code_lookups_are_memoised() {
        let chain = FakeChain::with_contracts(&[addr(POOL), addr(ROUTER)]);
        let ev = evidence(addr(ROUTER), vec![transfer(addr(POOL), addr(ROUTER), 100)]);

        let resolution = resolve_buyer(&chain, &candidate(addr(POOL), addr(ROUTER)), &ev)
            .await
            .unwrap();
        assert_eq!(resolution.resolved_by, ResolvedBy::SenderUnverified);
        let lookups = chain.lookups.lock().unwrap();
        assert_eq!(lookups.iter().filter(|a| **a == addr(ROUTER)).count(), 1);
    }

    #[tokio::test]
    async fn test_mint_and_burn_do_not_crash() {
        let chain = FakeChain::with_contracts(&[addr(POOL)]);
        let ev = evidence(
            addr(ROUTER),
            vec![
                transfer(Address::ZERO, addr(ALICE), 1_000),
                transfer(addr(POOL), Address::ZERO, 5),
            ],
        );

        let delta = BalanceDelta::from_transfers(&ev.transfers);
        assert!(!delta.is_conserved());
        assert_eq!(delta.get(&Address::ZERO), I256::ZERO);

        let resolution = resolve_buyer(&chain, &candidate(addr(POOL), addr(ROUTER)), &ev)
            .await
            .unwrap();
        assert_eq!(resolution.buyer, addr(ALICE));
    }

    #[tokio::test]
    async fn test_zero_amount_is_non_actionable() {
        let chain = FakeChain::with_contracts(&[]);
        let mut purchase = candidate(addr(POOL), addr(BOB));
        purchase.token_amount = U256::ZERO;
        let ev = evidence(addr(ALICE), vec![transfer(addr(POOL), addr(ALICE), 100)]);

        let err = resolve_buyer(&chain, &purchase, &ev).await.unwrap_err();
        assert!(matches!(err, ResolveError::NonActionable { .. }));
        assert!(chain.lookups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_code_lookup_failure_is_reported() {
        let mut chain = FakeChain::with_contracts(&[addr(POOL)]);
        chain.broken.insert(addr(ALICE));
        let ev = evidence(addr(BOB), vec![transfer(addr(POOL), addr(ALICE), 100)]);

        let err = resolve_buyer(&chain, &candidate(addr(POOL), addr(BOB)), &ev)
            .await
            .unwrap_err();
        match err {
            ResolveError::CodeLookup { address, .. } => assert_eq!(address, addr(ALICE)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_well_formed_transfers_conserve_units() {
        let transfers = vec![
            transfer(addr(POOL), addr(ROUTER), 1_000),
            transfer(addr(ROUTER), addr(ALICE), 600),
            transfer(addr(ROUTER), addr(BOB), 400),
            transfer(addr(BOB), addr(POOL), 7),
        ];
        let delta = BalanceDelta::from_transfers(&transfers);
        assert!(delta.is_conserved());
        assert_eq!(delta.get(&addr(ROUTER)), I256::ZERO);
        assert_eq!(delta.get(&addr(ALICE)), I256::try_from(600i64).unwrap());
        assert_eq!(delta.get(&addr(POOL)), I256::try_from(-993i64).unwrap());
    }

    #[test]
    fn test_oversized_value_is_skipped() {
        let transfers = vec![
            TokenTransfer {
                from: addr(POOL),
                to: addr(ALICE),
                value: U256::MAX,
                log_index: None,
            },
            transfer(addr(POOL), addr(BOB), 1),
        ];
        let delta = BalanceDelta::from_transfers(&transfers);
        assert_eq!(delta.skipped(), 1);
        assert_eq!(delta.receivers(), vec![(addr(BOB), I256::ONE)]);
    }
}
