use crate::events::{balanceOfCall, stakedCall};
use crate::evidence::{EvidenceSource, TxEvidence};
use crate::holders::{Holding, HoldingReader};
use crate::poller::{BlockRange, LogSource};
use crate::resolver::CodeInspector;
use alloy::network::TransactionBuilder;
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{
    BlockNumberOrTag, Filter, Log, TransactionReceipt, TransactionRequest,
};
use alloy::sol_types::SolCall;
use alloy_primitives::{Address, B256, Bytes, U256};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

type AlloyFullProvider = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider,
>;

#[derive(Clone)]
pub struct RpcClient {
    providers: Vec<AlloyFullProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
    max_retries: usize,
    request_timeout: Duration,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String], request_timeout: Duration) -> Result<Self> {
        if rpc_urls.is_empty() {
            return Err(anyhow::anyhow!("At least one RPC URL must be provided"));
        }

        let mut providers = Vec::new();
        for url in rpc_urls {
            let parsed_url = url
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", url))?;
            let provider: AlloyFullProvider = ProviderBuilder::new().connect_http(parsed_url);
            providers.push(provider);
        }

        Ok(RpcClient {
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
            max_retries: 3,
            request_timeout,
        })
    }

    fn get_provider(&self) -> &AlloyFullProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        &self.providers[index]
    }

    pub fn get_current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    pub fn rotate_provider(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{}", next);
        }
    }

    fn get_retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.max_retries)
    }

    fn handle_error(&self, error_str: &str) {
        let current_url = self.get_current_url();
        warn!(
            "RPC error on {}: {}, rotating provider",
            current_url, error_str
        );
        self.rotate_provider();
    }

    fn handle_timeout(&self) -> anyhow::Error {
        let current_url = self.get_current_url();
        warn!(
            "Request timeout after {} seconds on {}, rotating provider",
            self.request_timeout.as_secs(),
            current_url
        );
        self.rotate_provider();
        anyhow::anyhow!(
            "Request timeout after {} seconds",
            self.request_timeout.as_secs()
        )
    }

    pub async fn get_latest_block(&self) -> Result<u64> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                match timeout(client.request_timeout, provider.get_block_number()).await {
                    Ok(Ok(block_number)) => Ok(block_number),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();
                        client.handle_error(&error_str);
                        Err(anyhow::anyhow!("{}", e))
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
    }

    pub async fn get_code(&self, address: Address) -> Result<Bytes> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                match timeout(client.request_timeout, provider.get_code_at(address)).await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();
                        client.handle_error(&error_str);
                        Err(anyhow::anyhow!("{}", e))
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
    }

    pub async fn get_code_at_block(&self, address: Address, block_number: u64) -> Result<Bytes> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                let future = provider
                    .get_code_at(address)
                    .block_id(BlockNumberOrTag::Number(block_number).into());

                match timeout(client.request_timeout, future).await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();
                        client.handle_error(&error_str);
                        Err(anyhow::anyhow!("{}", e))
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
    }

    /// Receipt of a mined transaction; `None` while the node does not know it yet.
    pub async fn get_receipt(&self, tx_hash: B256) -> Result<Option<TransactionReceipt>> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                match timeout(
                    client.request_timeout,
                    provider.get_transaction_receipt(tx_hash),
                )
                .await
                {
                    Ok(Ok(receipt)) => Ok(receipt),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();
                        client.handle_error(&error_str);
                        Err(anyhow::anyhow!("{}", e))
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
    }

    pub async fn call_contract<C>(&self, address: Address, call: C) -> Result<C::Return>
    where
        C: SolCall,
        C::Return: Send,
    {
        let input: Bytes = call.abi_encode().into();
        let client = self.clone();
        let output = Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            let request = TransactionRequest::default()
                .with_to(address)
                .with_input(input.clone());
            async move {
                let provider = client.get_provider();
                match timeout(client.request_timeout, provider.call(request)).await {
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();
                        // a revert is deterministic, keep the provider
                        if !error_str.contains("revert") {
                            client.handle_error(&error_str);
                        }
                        Err(anyhow::anyhow!("{}", e))
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await?;

        C::abi_decode_returns(&output)
            .map_err(|e| anyhow::anyhow!("Failed to decode call result from {:?}: {}", address, e))
    }

    async fn get_logs_internal(
        &self,
        from_block: u64,
        to_block: u64,
        contract_addresses: &[Address],
        topic0: B256,
    ) -> Result<Vec<Log>> {
        let client = self.clone();
        let contract_addresses = contract_addresses.to_vec();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            let filter = Filter::new()
                .address(contract_addresses.clone())
                .event_signature(topic0)
                .from_block(from_block)
                .to_block(to_block);
            async move {
                let provider = client.get_provider();
                match timeout(client.request_timeout, provider.get_logs(&filter)).await {
                    Ok(Ok(logs)) => Ok(Ok(logs)),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();

                        if error_str.contains("exceeds max results") {
                            debug!(
                                "Max results exceeded for blocks {}-{}, will split range",
                                from_block, to_block
                            );
                            // not retried: the caller splits the range instead
                            Ok(Err(anyhow::anyhow!("{}", e)))
                        } else {
                            client.handle_error(&error_str);
                            Err(anyhow::anyhow!("{}", e))
                        }
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
        .and_then(|r| r)
    }

    fn parse_max_results_error(error_str: &str) -> Option<(u64, u64)> {
        let re = Regex::new(r"retry with the range (\d+)-(\d+)").ok()?;
        let captures = re.captures(error_str)?;

        let from = captures.get(1)?.as_str().parse().ok()?;
        let to = captures.get(2)?.as_str().parse().ok()?;

        Some((from, to))
    }

    /// The node's suggested sub-range, kept only when it starts at `from` and
    /// clamped to `to` so no block is skipped or fetched twice.
    fn split_range(error_str: &str, from: u64, to: u64) -> Option<(u64, u64)> {
        let (suggested_from, suggested_to) = Self::parse_max_results_error(error_str)?;
        if suggested_from != from || suggested_to < suggested_from {
            return None;
        }
        Some((suggested_from, suggested_to.min(to)))
    }

    /// Logs with `topic0` emitted by any of `contract_addresses` in the inclusive range.
    pub async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        contract_addresses: &[Address],
        topic0: B256,
    ) -> Result<Vec<Log>> {
        let mut all_logs = Vec::new();
        if contract_addresses.is_empty() {
            return Ok(all_logs);
        }
        let mut current_from = from_block;

        while current_from <= to_block {
            let current_to = to_block;

            match self
                .get_logs_internal(current_from, current_to, contract_addresses, topic0)
                .await
            {
                Ok(logs) => {
                    all_logs.extend(logs);
                    break;
                }
                Err(e) => {
                    let error_str = e.to_string();

                    if error_str.contains("exceeds max results") {
                        if let Some((suggested_from, suggested_to)) =
                            Self::split_range(&error_str, current_from, to_block)
                        {
                            info!(
                                "Hit max results limit for blocks {}-{}, splitting at block {}",
                                current_from, current_to, suggested_to
                            );

                            let logs = self
                                .get_logs_internal(
                                    suggested_from,
                                    suggested_to,
                                    contract_addresses,
                                    topic0,
                                )
                                .await?;

                            all_logs.extend(logs);
                            current_from = suggested_to + 1;
                        } else {
                            return Err(e);
                        }
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Ok(all_logs)
    }
}

#[async_trait]
impl LogSource for RpcClient {
    async fn latest_block(&self) -> Result<u64> {
        self.get_latest_block().await
    }

    async fn logs(
        &self,
        range: BlockRange,
        addresses: &[Address],
        topic0: B256,
    ) -> Result<Vec<Log>> {
        self.get_logs(range.from, range.to, addresses, topic0).await
    }
}

#[async_trait]
impl EvidenceSource for RpcClient {
    async fn evidence(&self, token: Address, tx_hash: B256) -> Result<Option<TxEvidence>> {
        let receipt = self.get_receipt(tx_hash).await?;
        Ok(receipt.map(|receipt| TxEvidence::from_receipt(token, &receipt)))
    }
}

#[async_trait]
impl CodeInspector for RpcClient {
    async fn is_contract(&self, address: Address) -> Result<bool> {
        Ok(!self.get_code(address).await?.is_empty())
    }
}

#[async_trait]
impl HoldingReader for RpcClient {
    async fn holding(
        &self,
        token: Address,
        staking: Option<Address>,
        holder: Address,
    ) -> Result<Holding> {
        let balance = self.call_contract(token, balanceOfCall { account: holder });
        let staked = async {
            match staking {
                Some(staking) => {
                    self.call_contract(staking, stakedCall { account: holder })
                        .await
                }
                None => Ok(U256::ZERO),
            }
        };
        let (balance, staked) = futures::future::try_join(balance, staked).await?;
        Ok(Holding { balance, staked })
    }
}
