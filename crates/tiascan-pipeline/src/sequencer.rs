//! Strict-ordering sequencer
//!
//! Workers complete in arbitrary order; the sequencer buffers their
//! results and releases blocks downstream strictly by ascending height,
//! each one's parent hash checked against the hash of the block released
//! before it. On a mismatch it signals the rollback controller and holds
//! all releases until a new checkpoint arrives.
//!
//! The buffer is owned exclusively by this task; the only state shared
//! with anyone else is the cursor, which the sync driver reads.

use {
    crate::{
        metrics::PipelineMetrics,
        module::{Input, Module, Output, Shutdown},
        rollback::RollbackTrigger,
    },
    anyhow::Result,
    async_trait::async_trait,
    std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    },
    tiascan_common::types::{Cursor, FetchedBlock, Height},
    tokio::sync::{broadcast, RwLock},
    tracing::{debug, info},
};

/// Mutual-exclusion flag between forward sync and rollback. The sequencer
/// locks it before triggering a rollback; the sync driver refuses to
/// submit new tasks while it is locked.
#[derive(Clone, Default)]
pub struct SyncGate {
    locked: Arc<AtomicBool>,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

pub struct Sequencer {
    input: Input<FetchedBlock>,
    output: Output<FetchedBlock>,
    rollback_out: Output<RollbackTrigger>,
    checkpoints: broadcast::Receiver<Cursor>,
    cursor: Arc<RwLock<Cursor>>,
    gate: SyncGate,
    /// Height -> most recently received block; duplicates overwrite.
    buffer: HashMap<Height, FetchedBlock>,
    metrics: Arc<PipelineMetrics>,
}

impl Sequencer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input: Input<FetchedBlock>,
        output: Output<FetchedBlock>,
        rollback_out: Output<RollbackTrigger>,
        checkpoints: broadcast::Receiver<Cursor>,
        cursor: Arc<RwLock<Cursor>>,
        gate: SyncGate,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            input,
            output,
            rollback_out,
            checkpoints,
            cursor,
            gate,
            buffer: HashMap::new(),
            metrics,
        }
    }

    /// Releases every consecutive buffered height starting at
    /// `cursor + 1`. Returns `false` when downstream is gone.
    async fn release_ready(&mut self, shutdown: &mut Shutdown) -> Result<bool> {
        loop {
            let (next, expected_parent) = {
                let cursor = self.cursor.read().await;
                (cursor.next_height(), cursor.hash.clone())
            };

            let Some(block) = self.buffer.remove(&next) else {
                return Ok(true);
            };

            // The genesis cursor carries no hash; the first block has
            // nothing to link back to.
            if expected_parent.is_empty() || block.parent_hash() == expected_parent {
                let released = Cursor::new(block.height(), block.hash().to_string());

                if self.output.push(block).await.is_err() {
                    return Ok(false);
                }
                *self.cursor.write().await = released;
                self.metrics
                    .blocks_released
                    .fetch_add(1, Ordering::Relaxed);
                debug!("released block {}", next);
                continue;
            }

            // Parent hash mismatch: the node's history no longer agrees
            // with ours. Hold everything until rollback reports a new
            // consistent checkpoint.
            info!("reorg detected, rolling back from height {}", next);
            self.gate.lock();
            self.metrics.rollbacks.fetch_add(1, Ordering::Relaxed);

            // The diverged block is tainted and stays out of the buffer;
            // the driver resubmits its height after the checkpoint clears
            // the pending set.
            let trigger = RollbackTrigger {
                detected_at: next,
                expected_parent,
                got_parent: block.parent_hash().to_string(),
            };
            if self.rollback_out.push(trigger).await.is_err() {
                return Ok(false);
            }

            let checkpoint = loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(false),
                    checkpoint = self.checkpoints.recv() => match checkpoint {
                        Ok(checkpoint) => break checkpoint,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return Ok(false),
                    },
                }
            };

            info!(
                "resuming sync from checkpoint ({}, {})",
                checkpoint.height, checkpoint.hash
            );
            self.buffer.retain(|height, _| *height > checkpoint.height);
            *self.cursor.write().await = checkpoint;
            self.gate.unlock();
        }
    }
}

#[async_trait]
impl Module for Sequencer {
    fn name(&self) -> &'static str {
        "sequencer"
    }

    async fn run(mut self, mut shutdown: Shutdown) -> Result<()> {
        loop {
            let block = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                block = self.input.pop() => match block {
                    Some(block) => block,
                    None => return Ok(()),
                },
            };

            // Late duplicates of already-released heights carry nothing
            // new; keeping them would grow the buffer unboundedly.
            if block.height() > self.cursor.read().await.height {
                self.buffer.insert(block.height(), block);
            }
            if !self.release_ready(&mut shutdown).await? {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{connect, spawn};
    use crate::testutil::{chain_hash, make_fetched};
    use tokio::time::{timeout, Duration};

    struct Rig {
        blocks_in: Output<FetchedBlock>,
        released: Input<FetchedBlock>,
        triggers: Input<RollbackTrigger>,
        checkpoints: broadcast::Sender<Cursor>,
        cursor: Arc<RwLock<Cursor>>,
        gate: SyncGate,
        handle: crate::module::ModuleHandle,
    }

    fn rig(start: Cursor) -> Rig {
        let (blocks_in, input) = connect("sequencer_in", 16);
        let (output, released) = connect("released", 16);
        let (rollback_out, triggers) = connect("rollback_triggers", 4);
        let (checkpoints, checkpoint_rx) = broadcast::channel(4);
        let cursor = Arc::new(RwLock::new(start));
        let gate = SyncGate::new();
        let metrics = Arc::new(PipelineMetrics::new());

        let sequencer = Sequencer::new(
            input,
            output,
            rollback_out,
            checkpoint_rx,
            cursor.clone(),
            gate.clone(),
            metrics,
        );

        Rig {
            blocks_in,
            released,
            triggers,
            checkpoints,
            cursor,
            gate,
            handle: spawn(sequencer),
        }
    }

    #[tokio::test]
    async fn releases_out_of_order_arrivals_in_order() {
        let mut rig = rig(Cursor::new(0, chain_hash(0)));

        for height in [5, 3, 4, 1, 2] {
            rig.blocks_in.push(make_fetched(height)).await.unwrap();
        }

        for expected in 1..=5 {
            let released = timeout(Duration::from_secs(1), rig.released.pop())
                .await
                .expect("block must be released")
                .unwrap();
            assert_eq!(released.height(), expected);
            assert_eq!(released.parent_hash(), chain_hash(expected - 1));
        }

        assert_eq!(rig.cursor.read().await.height, 5);
        rig.handle.close().await;
    }

    #[tokio::test]
    async fn duplicate_heights_release_exactly_once() {
        let mut rig = rig(Cursor::new(0, chain_hash(0)));

        rig.blocks_in.push(make_fetched(1)).await.unwrap();
        rig.blocks_in.push(make_fetched(2)).await.unwrap();
        rig.blocks_in.push(make_fetched(2)).await.unwrap();

        assert_eq!(rig.released.pop().await.unwrap().height(), 1);
        assert_eq!(rig.released.pop().await.unwrap().height(), 2);
        let extra = timeout(Duration::from_millis(100), rig.released.pop()).await;
        assert!(extra.is_err(), "duplicate must not be released twice");

        rig.handle.close().await;
    }

    #[tokio::test]
    async fn divergence_triggers_rollback_and_resumes_on_checkpoint() {
        let mut rig = rig(Cursor::new(0, chain_hash(0)));

        for height in 1..=5 {
            rig.blocks_in.push(make_fetched(height)).await.unwrap();
        }
        for expected in 1..=5 {
            assert_eq!(rig.released.pop().await.unwrap().height(), expected);
        }

        // Block 6 claims a parent that is not block 5.
        let mut bad = make_fetched(6);
        bad.block.parent_hash = "not-hash5".into();
        rig.blocks_in.push(bad).await.unwrap();

        let trigger = timeout(Duration::from_secs(1), rig.triggers.pop())
            .await
            .expect("divergence must trigger rollback")
            .unwrap();
        assert_eq!(trigger.detected_at, 6);
        assert!(rig.gate.is_locked());

        // No releases while the rollback is in flight.
        rig.blocks_in.push(make_fetched(7)).await.unwrap();
        let held = timeout(Duration::from_millis(100), rig.released.pop()).await;
        assert!(held.is_err(), "releases must be suspended during rollback");

        // Controller reports that storage agrees with the node up to 5.
        rig.checkpoints
            .send(Cursor::new(5, chain_hash(5)))
            .unwrap();

        // A corrected block 6 flows through.
        rig.blocks_in.push(make_fetched(6)).await.unwrap();
        assert_eq!(rig.released.pop().await.unwrap().height(), 6);
        assert_eq!(rig.released.pop().await.unwrap().height(), 7);
        assert!(!rig.gate.is_locked());

        rig.handle.close().await;
    }

    #[tokio::test]
    async fn heights_behind_the_checkpoint_are_never_released() {
        let mut rig = rig(Cursor::new(3, "stale-hash3".to_string()));

        // Height 4 arrives against a cursor whose hash no longer matches.
        rig.blocks_in.push(make_fetched(4)).await.unwrap();
        let trigger = rig.triggers.pop().await.unwrap();
        assert_eq!(trigger.detected_at, 4);

        // While rollback is in flight, a stale duplicate of 2 and a fresh
        // 3 arrive. The controller then reports checkpoint (2, hash2).
        rig.blocks_in.push(make_fetched(2)).await.unwrap();
        rig.blocks_in.push(make_fetched(3)).await.unwrap();
        rig.checkpoints
            .send(Cursor::new(2, chain_hash(2)))
            .unwrap();

        // 3 releases against the repaired chain; 2 is behind the cursor
        // and must never come out. 4 was tainted and needs a refetch.
        assert_eq!(rig.released.pop().await.unwrap().height(), 3);
        rig.blocks_in.push(make_fetched(4)).await.unwrap();
        assert_eq!(rig.released.pop().await.unwrap().height(), 4);

        rig.handle.close().await;
    }
}
