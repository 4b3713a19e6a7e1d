//! Test doubles shared by the pipeline tests.

use {
    anyhow::{anyhow, Result},
    async_trait::async_trait,
    chrono::{TimeZone, Utc},
    std::{
        collections::BTreeMap,
        sync::{
            atomic::{AtomicU32, Ordering},
            Mutex,
        },
    },
    tiascan_common::types::{Block, BlockResults, FetchedBlock, Height},
    tiascan_node::{GenesisPayload, NodeApi},
};

/// Hash of the canonical test block at `height`. `chain_hash(0)` is the
/// genesis hash the first block links back to.
pub fn chain_hash(height: Height) -> String {
    format!("hash{height}")
}

/// Hash of the replacement block at `height` after a reorg.
pub fn fork_hash(height: Height) -> String {
    format!("fork-hash{height}")
}

pub fn make_block(height: Height) -> Block {
    Block {
        height,
        hash: chain_hash(height),
        parent_hash: chain_hash(height.saturating_sub(1)),
        time: Utc.timestamp_opt(1_700_000_000 + height as i64, 0).unwrap(),
        header: serde_json::json!({}),
        txs: Vec::new(),
    }
}

/// A canonical-chain block with empty execution results.
pub fn make_fetched(height: Height) -> FetchedBlock {
    FetchedBlock {
        block: make_block(height),
        results: BlockResults {
            height,
            ..Default::default()
        },
    }
}

/// In-memory node serving a hash-linked chain. The chain can be extended
/// or rewritten from a height upward to simulate a reorg, and the next N
/// fetch calls can be made to fail.
pub struct MockNode {
    blocks: Mutex<BTreeMap<Height, Block>>,
    fail_budget: AtomicU32,
}

impl MockNode {
    /// A node whose canonical chain runs from height 1 to `head`.
    pub fn with_chain(head: Height) -> Self {
        let blocks = (1..=head).map(|h| (h, make_block(h))).collect();
        Self {
            blocks: Mutex::new(blocks),
            fail_budget: AtomicU32::new(0),
        }
    }

    /// Appends canonical blocks up to `head`, linking to whatever hash the
    /// current tip carries.
    pub fn extend_to(&self, head: Height) {
        let mut blocks = self.blocks.lock().unwrap();
        let mut parent = blocks
            .last_key_value()
            .map(|(_, b)| b.hash.clone())
            .unwrap_or_else(|| chain_hash(0));
        let from = blocks.last_key_value().map(|(h, _)| h + 1).unwrap_or(1);
        for h in from..=head {
            let mut block = make_block(h);
            block.parent_hash = parent;
            parent = block.hash.clone();
            blocks.insert(h, block);
        }
    }

    /// Replaces every block from `height` to the tip with a forked one.
    /// The fork's first block still links to the canonical parent below it.
    pub fn reorg_from(&self, height: Height) {
        let mut blocks = self.blocks.lock().unwrap();
        let head = match blocks.last_key_value() {
            Some((h, _)) => *h,
            None => return,
        };
        let mut parent = blocks
            .get(&(height - 1))
            .map(|b| b.hash.clone())
            .unwrap_or_else(|| chain_hash(0));
        for h in height..=head {
            let mut block = make_block(h);
            block.hash = fork_hash(h);
            block.parent_hash = parent;
            parent = block.hash.clone();
            blocks.insert(h, block);
        }
    }

    /// The next `n` calls to `block` fail with a transient error.
    pub fn fail_next_fetches(&self, n: u32) {
        self.fail_budget.store(n, Ordering::SeqCst);
    }

    fn consume_failure(&self) -> bool {
        self.fail_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl NodeApi for MockNode {
    async fn status(&self) -> Result<Height> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .last_key_value()
            .map(|(h, _)| *h)
            .unwrap_or(0))
    }

    async fn block(&self, height: Height) -> Result<Block> {
        if self.consume_failure() {
            return Err(anyhow!("injected fetch failure at height {height}"));
        }
        self.blocks
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .ok_or_else(|| anyhow!("no block at height {height}"))
    }

    async fn block_results(&self, height: Height) -> Result<BlockResults> {
        Ok(BlockResults {
            height,
            ..Default::default()
        })
    }

    async fn genesis(&self) -> Result<GenesisPayload> {
        Ok(GenesisPayload {
            genesis: serde_json::json!({ "chain_id": "tiascan-test" }),
        })
    }
}
