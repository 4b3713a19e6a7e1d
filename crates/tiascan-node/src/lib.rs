//! Node collaborator for the tiascan indexer
//!
//! The pipeline consumes the remote chain node exclusively through the
//! [`NodeApi`] trait. All calls are read-only and idempotent, so callers
//! are free to retry them.

mod rpc;
mod types;

pub use rpc::RpcClient;
pub use types::GenesisPayload;

use {
    anyhow::Result,
    async_trait::async_trait,
    tiascan_common::types::{Block, BlockResults, Height},
};

/// Read-only view of the remote node.
#[async_trait]
pub trait NodeApi: Send + Sync + 'static {
    /// Current head height of the node's canonical chain.
    async fn status(&self) -> Result<Height>;

    /// Block header, hash linkage and raw transactions at `height`.
    async fn block(&self, height: Height) -> Result<Block>;

    /// Execution results for the block at `height`.
    async fn block_results(&self, height: Height) -> Result<BlockResults>;

    /// The genesis document, used once for the initial bootstrap.
    async fn genesis(&self) -> Result<GenesisPayload>;
}
