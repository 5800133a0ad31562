use crate::config::Config;
use crate::events::{decimalsCall, symbolCall, totalSupplyCall};
use crate::rpc::RpcClient;
use alloy_primitives::Address;
use alloy_primitives::utils::format_units;
use anyhow::Result;
use tracing::{info, warn};

pub async fn find_deployment_block(
    client: &RpcClient,
    address: Address,
    latest_block: u64,
) -> Result<u64> {
    info!("Searching for deployment block of contract {:?}", address);

    let code = client.get_code_at_block(address, latest_block).await?;
    if code.is_empty() {
        anyhow::bail!("Address {:?} is not a deployed contract", address);
    }

    let mut left = 0u64;
    let mut right = latest_block;

    while left < right {
        let mid = (left + right) / 2;

        let code = client.get_code_at_block(address, mid).await?;

        if code.is_empty() {
            left = mid + 1;
        } else {
            right = mid;
        }
    }

    info!("Contract deployed at block {}", left);
    Ok(left)
}

#[derive(Debug, Clone)]
pub struct TokenMetadata {
    pub symbol: String,
    pub decimals: u8,
    /// Whole tokens, used for the market cap line.
    pub total_supply: f64,
}

/// Configured values win; the rest is read from the token, with defaults
/// when the token does not answer.
pub async fn fetch_token_metadata(
    client: &RpcClient,
    config: &Config,
) -> Result<TokenMetadata> {
    let address = config.token_address;
    info!("Fetching token metadata for {:?}", address);

    let symbol = match &config.token_symbol {
        Some(symbol) => symbol.clone(),
        None => match client.call_contract(address, symbolCall {}).await {
            Ok(result) => {
                info!("Token symbol: {}", result);
                result
            }
            Err(e) => {
                warn!("Failed to fetch token symbol: {}", e);
                "TOKEN".to_string()
            }
        },
    };

    let decimals = match config.token_decimals {
        Some(decimals) => decimals,
        None => match client.call_contract(address, decimalsCall {}).await {
            Ok(result) => {
                info!("Token decimals: {}", result);
                result
            }
            Err(e) => {
                warn!("Failed to fetch token decimals, assuming 18: {}", e);
                18
            }
        },
    };

    let total_supply = match client.call_contract(address, totalSupplyCall {}).await {
        Ok(raw) => match format_units(raw, decimals).ok().and_then(|s| s.parse::<f64>().ok()) {
            Some(supply) => {
                info!("Token total supply: {}", supply);
                supply
            }
            None => {
                warn!("Unusable total supply {}, using fallback", raw);
                config.total_supply_fallback
            }
        },
        Err(e) => {
            warn!(
                "Failed to fetch total supply, using fallback {}: {}",
                config.total_supply_fallback, e
            );
            config.total_supply_fallback
        }
    };

    Ok(TokenMetadata {
        symbol,
        decimals,
        total_supply,
    })
}
