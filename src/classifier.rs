use crate::events::{Swap, TokensPurchased};
use crate::resolver::ResolvedBy;
use alloy_primitives::utils::format_units;
use alloy_primitives::{Address, B256, U256};

/// Position of the token of interest inside a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSide {
    Token0,
    Token1,
}

/// Raw amounts of a detected buy, before valuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyLegs {
    pub token_amount: U256,
    pub quote_amount: U256,
}

/// A swap is a buy when the token leaves the pool and the quote currency
/// enters it. Every other sign combination is ignored.
pub fn classify_swap(swap: &Swap, side: TokenSide) -> Option<BuyLegs> {
    let (token_leg, quote_leg) = match side {
        TokenSide::Token0 => (swap.amount0, swap.amount1),
        TokenSide::Token1 => (swap.amount1, swap.amount0),
    };

    if token_leg.is_negative() && quote_leg.is_positive() {
        Some(BuyLegs {
            token_amount: token_leg.unsigned_abs(),
            quote_amount: quote_leg.unsigned_abs(),
        })
    } else {
        None
    }
}

pub fn classify_sale(purchase: &TokensPurchased) -> Option<BuyLegs> {
    if purchase.amount.is_zero() || purchase.value.is_zero() {
        return None;
    }
    Some(BuyLegs {
        token_amount: purchase.amount,
        quote_amount: purchase.value,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Valuation {
    pub token_amount: f64,
    pub quote_amount: f64,
    pub usd_value: f64,
    pub unit_price: f64,
}

/// A resolved, valued purchase ready to be announced.
#[derive(Debug, Clone)]
pub struct PurchaseEvent {
    pub buyer: Address,
    pub resolved_by: ResolvedBy,
    pub token_amount: f64,
    pub quote_amount: f64,
    pub usd_value: f64,
    pub unit_price: f64,
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    /// Pool or sale contract the purchase came from.
    pub source: Address,
}

#[derive(Debug, Clone, Copy)]
pub struct PurchaseFilter {
    pub token_decimals: u8,
    pub quote_decimals: u8,
    pub quote_usd_price: f64,
    pub min_usd: f64,
}

impl PurchaseFilter {
    pub fn value(&self, legs: &BuyLegs) -> Option<Valuation> {
        let token_amount = to_f64(legs.token_amount, self.token_decimals)?;
        let quote_amount = to_f64(legs.quote_amount, self.quote_decimals)?;
        if token_amount <= 0.0 || quote_amount <= 0.0 {
            return None;
        }
        let usd_value = quote_amount * self.quote_usd_price;
        Some(Valuation {
            token_amount,
            quote_amount,
            usd_value,
            unit_price: usd_value / token_amount,
        })
    }

    /// Values the buy and drops it when it is worth less than the floor.
    pub fn accept(&self, legs: &BuyLegs) -> Option<Valuation> {
        self.value(legs).filter(|v| v.usd_value >= self.min_usd)
    }
}

fn to_f64(amount: U256, decimals: u8) -> Option<f64> {
    format_units(amount, decimals).ok()?.parse().ok()
}
