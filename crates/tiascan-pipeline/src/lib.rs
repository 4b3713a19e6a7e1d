//! Ingestion pipeline for the tiascan indexer
//!
//! Blocks flow through four cooperating modules:
//!
//! sync driver -> fetch worker pool -> sequencer -> (caller)
//!                                        |
//!                                        v
//!                                rollback controller
//!
//! The sync driver polls the node head and submits missing heights. The
//! worker pool fetches them with bounded parallelism and unbounded retry.
//! The sequencer turns out-of-order completions back into a strictly
//! ordered, hash-linked stream and escalates any linkage break to the
//! rollback controller, which peels diverged blocks from storage and
//! reports the checkpoint everyone resumes from.

pub mod fetcher;
pub mod indexer;
pub mod metrics;
pub mod module;
pub mod rollback;
pub mod sequencer;
pub mod sync;

pub use {
    indexer::Indexer,
    metrics::PipelineMetrics,
    rollback::{RollbackController, RollbackTrigger},
};

#[cfg(test)]
mod testutil;
