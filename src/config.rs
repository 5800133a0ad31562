use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub json_rpc_urls: Vec<String>,
    pub rpc_timeout: Duration,

    pub token_address: Address,
    pub token_decimals: Option<u8>,
    pub token_symbol: Option<String>,
    pub total_supply_fallback: f64,

    pub quote_symbol: String,
    pub quote_decimals: u8,
    pub quote_usd_price: f64,

    pub pool_addresses: Vec<Address>,
    pub factory_address: Option<Address>,
    pub sale_addresses: Vec<Address>,
    pub staking_address: Option<Address>,

    pub min_usd: f64,
    pub start_block: Option<u64>,
    pub holder_start_block: Option<u64>,
    pub max_block_span: u64,
    pub holder_block_span: u64,

    pub poll_interval: Duration,
    pub holder_interval: Duration,
    pub send_delay: Duration,
    pub holder_query_delay: Duration,

    pub explorer_url: String,
    pub chart_url: Option<String>,
    pub buy_url: Option<String>,
    pub buy_image_path: Option<String>,

    pub cursor_db_path: Option<String>,
    pub telegram: Option<TelegramConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup so it can be
    /// exercised without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let json_rpc_urls = get("JSON_RPC_URLS")
            .or_else(|| get("JSON_RPC_URL"))
            .map(|v| split_list(&v))
            .unwrap_or_default();
        if json_rpc_urls.is_empty() {
            anyhow::bail!("JSON_RPC_URLS (or JSON_RPC_URL) must be set in .env");
        }

        let token_address = get("TOKEN_ADDRESS").context("TOKEN_ADDRESS must be set in .env")?;
        let token_address =
            Address::from_str(&token_address).context("Invalid TOKEN_ADDRESS format")?;

        let pool_addresses = address_list(get("POOL_ADDRESSES"), "POOL_ADDRESSES")?;
        let sale_addresses = address_list(get("SALE_ADDRESSES"), "SALE_ADDRESSES")?;
        let factory_address = optional_address(get("FACTORY_ADDRESS"), "FACTORY_ADDRESS")?;
        let staking_address =
            optional_address(get("STAKING_CONTRACT_ADDRESS"), "STAKING_CONTRACT_ADDRESS")?;

        if pool_addresses.is_empty() && sale_addresses.is_empty() && factory_address.is_none() {
            anyhow::bail!(
                "Nothing to monitor: set at least one of \
                 POOL_ADDRESSES, FACTORY_ADDRESS or SALE_ADDRESSES"
            );
        }

        let telegram = match get("TELEGRAM_BOT_TOKEN") {
            Some(bot_token) => {
                let chat_ids = get("TELEGRAM_CHAT_IDS")
                    .map(|v| split_list(&v))
                    .unwrap_or_default();
                if chat_ids.is_empty() {
                    anyhow::bail!("TELEGRAM_CHAT_IDS must list at least one chat");
                }
                Some(TelegramConfig {
                    bot_token,
                    chat_ids,
                })
            }
            None => None,
        };

        Ok(Config {
            json_rpc_urls,
            rpc_timeout: Duration::from_secs(parsed_or(
                get("RPC_TIMEOUT_SECS"),
                "RPC_TIMEOUT_SECS",
                30,
            )?),
            token_address,
            token_decimals: parsed(get("TOKEN_DECIMALS"), "TOKEN_DECIMALS")?,
            token_symbol: get("TOKEN_SYMBOL"),
            total_supply_fallback: parsed_or(
                get("TOTAL_SUPPLY_FALLBACK"),
                "TOTAL_SUPPLY_FALLBACK",
                100_000_000.0,
            )?,
            quote_symbol: get("QUOTE_SYMBOL").unwrap_or_else(|| "USDT".to_string()),
            quote_decimals: parsed_or(get("QUOTE_DECIMALS"), "QUOTE_DECIMALS", 6)?,
            quote_usd_price: parsed_or(get("QUOTE_USD_PRICE"), "QUOTE_USD_PRICE", 1.0)?,
            pool_addresses,
            factory_address,
            sale_addresses,
            staking_address,
            min_usd: parsed_or(get("MIN_USD"), "MIN_USD", 10.0)?,
            start_block: parsed(get("START_BLOCK"), "START_BLOCK")?,
            holder_start_block: parsed(get("HOLDER_START_BLOCK"), "HOLDER_START_BLOCK")?,
            max_block_span: parsed_or::<u64>(get("MAX_BLOCK_SPAN"), "MAX_BLOCK_SPAN", 1000)?.max(1),
            holder_block_span: parsed_or::<u64>(
                get("HOLDER_BLOCK_SPAN"),
                "HOLDER_BLOCK_SPAN",
                500,
            )?
            .max(1),
            poll_interval: Duration::from_secs(parsed_or(
                get("POLL_INTERVAL_SECS"),
                "POLL_INTERVAL_SECS",
                10,
            )?),
            holder_interval: Duration::from_secs(parsed_or(
                get("HOLDER_INTERVAL_SECS"),
                "HOLDER_INTERVAL_SECS",
                6 * 60 * 60,
            )?),
            send_delay: Duration::from_millis(parsed_or(
                get("SEND_DELAY_MS"),
                "SEND_DELAY_MS",
                300,
            )?),
            holder_query_delay: Duration::from_millis(parsed_or(
                get("HOLDER_QUERY_DELAY_MS"),
                "HOLDER_QUERY_DELAY_MS",
                100,
            )?),
            explorer_url: get("EXPLORER_URL")
                .unwrap_or_else(|| "https://basescan.org".to_string())
                .trim_end_matches('/')
                .to_string(),
            chart_url: get("CHART_URL"),
            buy_url: get("BUY_URL"),
            buy_image_path: get("BUY_IMAGE_PATH"),
            cursor_db_path: get("CURSOR_DB_PATH"),
            telegram,
        })
    }

    pub fn require_telegram(&self) -> Result<&TelegramConfig> {
        self.telegram
            .as_ref()
            .context("TELEGRAM_BOT_TOKEN must be set in .env")
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn address_list(value: Option<String>, key: &str) -> Result<Vec<Address>> {
    value
        .map(|v| split_list(&v))
        .unwrap_or_default()
        .iter()
        .map(|s| Address::from_str(s).with_context(|| format!("Invalid address in {key}: {s}")))
        .collect()
}

fn optional_address(value: Option<String>, key: &str) -> Result<Option<Address>> {
    value
        .map(|v| Address::from_str(&v).with_context(|| format!("Invalid {key} format")))
        .transpose()
}

fn parsed<T: FromStr>(value: Option<String>, key: &str) -> Result<Option<T>> {
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| anyhow::anyhow!("Invalid value for {}: {}", key, v))
        })
        .transpose()
}

fn parsed_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    Ok(parsed(value, key)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const TOKEN: &str = "0x31705474c1f2de7f738e34233c49522ca1e3c53c";
    const POOL: &str = "0xc3fd337dfc5700565a5444e3b0723920802a426d";

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load(&[
            ("JSON_RPC_URL", "http://localhost:8545"),
            ("TOKEN_ADDRESS", TOKEN),
            ("POOL_ADDRESSES", POOL),
        ])
        .unwrap();

        assert_eq!(config.json_rpc_urls, vec!["http://localhost:8545"]);
        assert_eq!(config.pool_addresses.len(), 1);
        assert_eq!(config.min_usd, 10.0);
        assert_eq!(config.quote_decimals, 6);
        assert_eq!(config.max_block_span, 1000);
        assert_eq!(config.holder_block_span, 500);
        assert_eq!(config.send_delay, Duration::from_millis(300));
        assert_eq!(config.explorer_url, "https://basescan.org");
        assert!(config.start_block.is_none());
        assert!(config.telegram.is_none());
        assert!(config.require_telegram().is_err());
    }

    #[test]
    fn test_lists_are_split_and_trimmed() {
        let config = load(&[
            ("JSON_RPC_URLS", "http://a, http://b ,"),
            ("TOKEN_ADDRESS", TOKEN),
            ("SALE_ADDRESSES", POOL),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_IDS", "-100123, @channel"),
            ("START_BLOCK", "29988806"),
        ])
        .unwrap();

        assert_eq!(config.json_rpc_urls, vec!["http://a", "http://b"]);
        assert_eq!(config.start_block, Some(29_988_806));
        let telegram = config.require_telegram().unwrap();
        assert_eq!(telegram.chat_ids, vec!["-100123", "@channel"]);
    }

    #[test]
    fn test_missing_required_values_fail() {
        assert!(load(&[("TOKEN_ADDRESS", TOKEN), ("POOL_ADDRESSES", POOL)]).is_err());
        assert!(load(&[("JSON_RPC_URL", "http://a"), ("POOL_ADDRESSES", POOL)]).is_err());
        // nothing to monitor
        assert!(load(&[("JSON_RPC_URL", "http://a"), ("TOKEN_ADDRESS", TOKEN)]).is_err());
        // bot token without chats
        assert!(
            load(&[
                ("JSON_RPC_URL", "http://a"),
                ("TOKEN_ADDRESS", TOKEN),
                ("POOL_ADDRESSES", POOL),
                ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ])
            .is_err()
        );
    }

    #[test]
    fn test_malformed_values_fail() {
        assert!(
            load(&[
                ("JSON_RPC_URL", "http://a"),
                ("TOKEN_ADDRESS", "0xnotanaddress"),
                ("POOL_ADDRESSES", POOL),
            ])
            .is_err()
        );
        assert!(
            load(&[
                ("JSON_RPC_URL", "http://a"),
                ("TOKEN_ADDRESS", TOKEN),
                ("POOL_ADDRESSES", POOL),
                ("MIN_USD", "ten"),
            ])
            .is_err()
        );
    }
}
