use crate::classifier::TokenSide;
use crate::events::{PoolCreated, decode_pool_created_event, token0Call};
use crate::poller::{BlockRange, LogSource, RangeHandler};
use crate::rpc::RpcClient;
use alloy::sol_types::SolEvent;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{info, warn};

/// Pools known to trade the token, with the side the token sits on.
#[derive(Debug, Clone, Default)]
pub struct PoolRegistry {
    token: Address,
    pools: HashMap<Address, TokenSide>,
}

impl PoolRegistry {
    pub fn new(token: Address) -> Self {
        Self {
            token,
            pools: HashMap::new(),
        }
    }

    pub fn side(&self, pool: &Address) -> Option<TokenSide> {
        self.pools.get(pool).copied()
    }

    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.pools.keys().copied().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn insert(&mut self, pool: Address, side: TokenSide) -> bool {
        self.pools.insert(pool, side).is_none()
    }

    /// Registers the pool if it pairs the token. Returns true for a new pool.
    pub fn register_created(&mut self, event: &PoolCreated) -> bool {
        let side = if event.token0 == self.token {
            TokenSide::Token0
        } else if event.token1 == self.token {
            TokenSide::Token1
        } else {
            return false;
        };

        let added = self.insert(event.pool, side);
        if added {
            info!("[Pools] Added pool {:?} ({:?})", event.pool, side);
        }
        added
    }

    /// Registers a configured pool, asking it which side the token is on.
    pub async fn register_configured(&mut self, client: &RpcClient, pool: Address) -> Result<()> {
        let token0 = client
            .call_contract(pool, token0Call {})
            .await
            .with_context(|| format!("Failed to read token0 of pool {pool:?}"))?;
        let side = if token0 == self.token {
            TokenSide::Token0
        } else {
            TokenSide::Token1
        };
        self.insert(pool, side);
        info!("[Pools] Watching configured pool {:?} ({:?})", pool, side);
        Ok(())
    }
}

/// Grows a [`PoolRegistry`] from a factory's `PoolCreated` logs.
pub struct PoolDiscovery<'a, S: ?Sized> {
    pub source: &'a S,
    pub factory: Address,
    pub registry: &'a mut PoolRegistry,
}

#[async_trait]
impl<S> RangeHandler for PoolDiscovery<'_, S>
where
    S: LogSource + ?Sized,
{
    async fn handle(&mut self, range: BlockRange) -> Result<()> {
        let logs = self
            .source
            .logs(range, &[self.factory], PoolCreated::SIGNATURE_HASH)
            .await?;

        for log in &logs {
            match decode_pool_created_event(log) {
                Ok(event) => {
                    self.registry.register_created(&event);
                }
                Err(e) => warn!("Failed to decode PoolCreated event in blocks {}: {}", range, e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(token0: Address, token1: Address, pool: Address) -> PoolCreated {
        PoolCreated {
            token0,
            token1,
            fee: Default::default(),
            tickSpacing: Default::default(),
            pool,
        }
    }

    #[test]
    fn test_only_pools_pairing_the_token_are_registered() {
        let token = Address::repeat_byte(0xaa);
        let quote = Address::repeat_byte(0xbb);
        let other = Address::repeat_byte(0xcc);
        let mut registry = PoolRegistry::new(token);

        assert!(registry.register_created(&created(token, quote, Address::repeat_byte(1))));
        assert!(registry.register_created(&created(quote, token, Address::repeat_byte(2))));
        assert!(!registry.register_created(&created(quote, other, Address::repeat_byte(3))));
        // already known
        assert!(!registry.register_created(&created(token, quote, Address::repeat_byte(1))));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.side(&Address::repeat_byte(1)), Some(TokenSide::Token0));
        assert_eq!(registry.side(&Address::repeat_byte(2)), Some(TokenSide::Token1));
        assert_eq!(registry.side(&Address::repeat_byte(3)), None);
    }
}
