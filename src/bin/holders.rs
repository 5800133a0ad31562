use anyhow::Result;
use buybot::config::Config;
use buybot::deployment::{fetch_token_metadata, find_deployment_block};
use buybot::holders::HolderCounter;
use buybot::poller::{BlockCursor, LogPoller};
use buybot::report::{OutputFormat, format_holders};
use buybot::rpc::RpcClient;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "holders")]
#[command(about = "Count current token holders", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "table")]
    format: String,

    /// Print every holder, not only the count
    #[arg(long, default_value = "false")]
    list: bool,

    /// First block to scan for transfers (defaults to HOLDER_START_BLOCK or the deployment block)
    #[arg(long)]
    from_block: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    // logs go to stderr so the report can be piped
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    let client = RpcClient::new(&config.json_rpc_urls, config.rpc_timeout)?;
    let head = client.get_latest_block().await?;
    let metadata = fetch_token_metadata(&client, &config).await?;

    let start = match cli.from_block.or(config.holder_start_block) {
        Some(block) => block,
        None => find_deployment_block(&client, config.token_address, head).await?,
    };
    let poller = LogPoller::new(
        "holders",
        BlockCursor::initial(Some(start), head),
        config.holder_block_span,
    );
    let mut counter = HolderCounter::new(
        client,
        config.token_address,
        config.staking_address,
        poller,
        config.holder_query_delay,
    );

    let snapshot = counter.snapshot().await?;
    println!(
        "{}",
        format_holders(&snapshot, &metadata.symbol, metadata.decimals, cli.list, format)
    );

    Ok(())
}
