//! reqwest-backed client for the node's JSON-RPC endpoints

use {
    crate::{
        types::{
            BlockResult, BlockResultsResult, GenesisPayload, GenesisResult, RpcResponse,
            StatusResult,
        },
        NodeApi,
    },
    anyhow::{anyhow, Context, Result},
    async_trait::async_trait,
    serde::de::DeserializeOwned,
    std::time::Duration,
    tiascan_common::{
        config::NodeConfig,
        types::{Block, BlockResults, Height, TxResult},
    },
    tracing::debug,
};

#[derive(Clone)]
pub struct RpcClient {
    base_url: String,
    client: reqwest::Client,
}

impl RpcClient {
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build node HTTP client")?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("node request: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Node request failed: {url}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("Node returned {} for {}", response.status(), url));
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to decode node response: {url}"))?;

        Ok(body.result)
    }
}

fn parse_height(raw: &str) -> Result<Height> {
    raw.parse::<Height>()
        .map_err(|_| anyhow!("Node returned non-numeric height: {raw}"))
}

#[async_trait]
impl NodeApi for RpcClient {
    async fn status(&self) -> Result<Height> {
        let status: StatusResult = self.get("status").await?;
        parse_height(&status.sync_info.latest_block_height)
    }

    async fn block(&self, height: Height) -> Result<Block> {
        let result: BlockResult = self.get(&format!("block?height={height}")).await?;

        Ok(Block {
            height: parse_height(&result.block.header.height)?,
            hash: result.block_id.hash,
            parent_hash: result.block.header.last_block_id.hash,
            time: result.block.header.time,
            header: result.block.header.rest,
            txs: result.block.data.txs,
        })
    }

    async fn block_results(&self, height: Height) -> Result<BlockResults> {
        let result: BlockResultsResult = self
            .get(&format!("block_results?height={height}"))
            .await?;

        let tx_results = result
            .txs_results
            .unwrap_or_default()
            .into_iter()
            .map(|tx| TxResult {
                code: tx.code,
                gas_wanted: tx.gas_wanted.parse().unwrap_or_default(),
                gas_used: tx.gas_used.parse().unwrap_or_default(),
                events: tx.events,
            })
            .collect();

        Ok(BlockResults {
            height: parse_height(&result.height)?,
            tx_results,
            begin_block_events: result.begin_block_events.unwrap_or_default(),
            end_block_events: result.end_block_events.unwrap_or_default(),
        })
    }

    async fn genesis(&self) -> Result<GenesisPayload> {
        let result: GenesisResult = self.get("genesis").await?;
        Ok(GenesisPayload {
            genesis: result.genesis,
        })
    }
}
