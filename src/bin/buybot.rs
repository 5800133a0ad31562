use anyhow::{Context, Result};
use buybot::classifier::PurchaseFilter;
use buybot::config::Config;
use buybot::deployment::{fetch_token_metadata, find_deployment_block};
use buybot::holders::{HolderCounter, run_holder_task};
use buybot::monitor::SwapMonitor;
use buybot::notifier::message::MessageContext;
use buybot::notifier::telegram::{TelegramChannel, run_commands};
use buybot::notifier::{Channel, Notifier};
use buybot::poller::{BlockCursor, LogPoller};
use buybot::pools::PoolRegistry;
use buybot::repository::CursorStore;
use buybot::rpc::RpcClient;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::Bot;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn open_store(config: &Config) -> Result<Option<CursorStore>> {
    config
        .cursor_db_path
        .as_deref()
        .map(CursorStore::open)
        .transpose()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting token buy bot");

    let config = Config::from_env()?;
    let telegram = config.require_telegram()?;
    info!("Configuration loaded");
    info!("Token address: {:?}", config.token_address);
    info!(
        "RPC URLs: {} endpoint(s) configured",
        config.json_rpc_urls.len()
    );

    let client = RpcClient::new(&config.json_rpc_urls, config.rpc_timeout)?;
    let head = client
        .get_latest_block()
        .await
        .context("Node unreachable at startup")?;
    info!("RPC client connected, head block {}", head);

    let metadata = fetch_token_metadata(&client, &config).await?;

    let bot = Bot::new(&telegram.bot_token);
    let channels: Vec<Arc<dyn Channel>> = telegram
        .chat_ids
        .iter()
        .map(|chat_id| {
            Arc::new(TelegramChannel::new(bot.clone(), chat_id)) as Arc<dyn Channel>
        })
        .collect();
    let context = MessageContext {
        token_symbol: metadata.symbol.clone(),
        quote_symbol: config.quote_symbol.clone(),
        total_supply: metadata.total_supply,
        explorer_url: config.explorer_url.clone(),
        chart_url: config.chart_url.clone(),
        buy_url: config.buy_url.clone(),
        image: config.buy_image_path.as_ref().map(PathBuf::from),
    };
    let notifier = Arc::new(Notifier::new(channels, context, config.send_delay));

    let mut registry = PoolRegistry::new(config.token_address);
    for pool in &config.pool_addresses {
        registry.register_configured(&client, *pool).await?;
    }

    let store = open_store(&config)?;

    // pools created before the first tick only show up in a replay from deployment
    let replay_pools = config.factory_address.is_some()
        && LogPoller::stored_block("pools", store.as_ref())?.is_none();
    let deployment = if replay_pools || config.holder_start_block.is_none() {
        Some(find_deployment_block(&client, config.token_address, head).await?)
    } else {
        None
    };

    let discovery = match config.factory_address {
        Some(factory) => {
            let poller = LogPoller::restore(
                "pools",
                store.clone(),
                deployment,
                head,
                config.max_block_span,
            )?;
            Some((factory, poller))
        }
        None => None,
    };
    let swap_poller = LogPoller::restore(
        "swaps",
        store,
        config.start_block,
        head,
        config.max_block_span,
    )?;
    let filter = PurchaseFilter {
        token_decimals: metadata.decimals,
        quote_decimals: config.quote_decimals,
        quote_usd_price: config.quote_usd_price,
        min_usd: config.min_usd,
    };
    let monitor = SwapMonitor::new(
        client.clone(),
        config.token_address,
        registry,
        discovery,
        config.sale_addresses.clone(),
        swap_poller,
        filter,
        notifier.clone(),
    );

    // holder addresses live only in memory, so this scan always starts over
    let holder_start = config
        .holder_start_block
        .or(deployment)
        .context("No holder start block")?;
    let holder_poller = LogPoller::new(
        "holders",
        BlockCursor::initial(Some(holder_start), head),
        config.holder_block_span,
    );
    let counter = HolderCounter::new(
        client,
        config.token_address,
        config.staking_address,
        holder_poller,
        config.holder_query_delay,
    );
    let (report_tx, report_rx) = mpsc::channel(1);

    info!("Bot started, polling every {:?}", config.poll_interval);
    tokio::select! {
        _ = monitor.run(config.poll_interval) => {}
        _ = run_holder_task(counter, notifier, config.holder_interval, report_rx) => {}
        _ = run_commands(bot, report_tx) => info!("Command dispatcher stopped, shutting down"),
    }

    Ok(())
}
