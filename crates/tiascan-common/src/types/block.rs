//! Block data types
//!
//! This module defines the block shapes that move through the ingestion
//! pipeline: the raw block as fetched from the node, its execution results,
//! and the per-block stats row kept alongside it in storage.

use {
    crate::types::Height,
    serde::{Deserialize, Serialize},
    std::fmt::{Debug, Formatter, Result as FmtResult},
};

/// A block header plus its raw transactions, as returned by the node.
#[derive(Clone, Serialize, Deserialize)]
pub struct Block {
    pub height: Height,
    pub hash: String,
    pub parent_hash: String,
    pub time: chrono::DateTime<chrono::Utc>,
    /// Opaque header body; the pipeline never looks inside it.
    pub header: serde_json::Value,
    /// Raw base64 transaction bodies, decoded by the external parser.
    pub txs: Vec<String>,
}

/// Execution results for one block: per-tx results plus begin/end events.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlockResults {
    pub height: Height,
    pub tx_results: Vec<TxResult>,
    pub begin_block_events: Vec<serde_json::Value>,
    pub end_block_events: Vec<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxResult {
    pub code: u32,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub events: Vec<serde_json::Value>,
}

/// A block together with its execution results, produced by a fetch worker
/// and handed to the sequencer. Immutable once built.
#[derive(Clone, Serialize, Deserialize)]
pub struct FetchedBlock {
    pub block: Block,
    pub results: BlockResults,
}

impl FetchedBlock {
    pub fn height(&self) -> Height {
        self.block.height
    }

    pub fn hash(&self) -> &str {
        &self.block.hash
    }

    pub fn parent_hash(&self) -> &str {
        &self.block.parent_hash
    }
}

impl Debug for FetchedBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FetchedBlock")
            .field("height", &self.block.height)
            .field("hash", &self.block.hash)
            .field("parent_hash", &self.block.parent_hash)
            .field("tx_count", &self.block.txs.len())
            .finish()
    }
}

/// Aggregates recorded for one committed block; the rollback controller
/// subtracts exactly these from the durable state when undoing the block.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlockStats {
    pub height: Height,
    pub tx_count: i64,
    pub events_count: i64,
    pub fee: i64,
    pub blobs_size: i64,
    pub blobs_count: i64,
    pub supply_change: i64,
}
