//! Pipeline counters
//!
//! Cheap atomic counters the binary logs periodically; not a metrics
//! endpoint.

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::atomic::{AtomicU64, Ordering},
};

pub struct PipelineMetrics {
    pub tasks_submitted: AtomicU64,
    pub blocks_fetched: AtomicU64,
    pub fetch_retries: AtomicU64,
    pub blocks_released: AtomicU64,
    pub rollbacks: AtomicU64,
    pub rolled_back_blocks: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            tasks_submitted: AtomicU64::new(0),
            blocks_fetched: AtomicU64::new(0),
            fetch_retries: AtomicU64::new(0),
            blocks_released: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            rolled_back_blocks: AtomicU64::new(0),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for PipelineMetrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PipelineMetrics")
            .field("tasks_submitted", &self.tasks_submitted.load(Ordering::Relaxed))
            .field("blocks_fetched", &self.blocks_fetched.load(Ordering::Relaxed))
            .field("fetch_retries", &self.fetch_retries.load(Ordering::Relaxed))
            .field("blocks_released", &self.blocks_released.load(Ordering::Relaxed))
            .field("rollbacks", &self.rollbacks.load(Ordering::Relaxed))
            .field(
                "rolled_back_blocks",
                &self.rolled_back_blocks.load(Ordering::Relaxed),
            )
            .finish()
    }
}
