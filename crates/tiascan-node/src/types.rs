//! Wire shapes for the Tendermint-style RPC endpoints
//!
//! Heights arrive as JSON strings; everything the pipeline does not need
//! stays an opaque `serde_json::Value`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub(crate) struct RpcResponse<T> {
    pub result: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusResult {
    pub sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SyncInfo {
    pub latest_block_height: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BlockResult {
    pub block_id: BlockId,
    pub block: RawBlock,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BlockId {
    pub hash: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBlock {
    pub header: RawHeader,
    pub data: RawBlockData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawHeader {
    pub height: String,
    pub time: chrono::DateTime<chrono::Utc>,
    pub last_block_id: BlockId,
    #[serde(flatten)]
    pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBlockData {
    #[serde(default)]
    pub txs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BlockResultsResult {
    pub height: String,
    #[serde(default)]
    pub txs_results: Option<Vec<RawTxResult>>,
    #[serde(default)]
    pub begin_block_events: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub end_block_events: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawTxResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub gas_wanted: String,
    #[serde(default)]
    pub gas_used: String,
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GenesisResult {
    pub genesis: serde_json::Value,
}

/// The genesis document as handed to the external genesis consumer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisPayload {
    pub genesis: serde_json::Value,
}
