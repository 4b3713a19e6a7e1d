//! Sync driver
//!
//! Polls the node head once at startup and then every `block_period`
//! seconds, submitting every height between the cursor and the head to
//! the fetch worker pool. A one-time genesis bootstrap runs before the
//! first tick when no persisted state exists. Submission is suspended
//! while a rollback is in flight; the controller's checkpoint clears the
//! pending set and lets the next tick resubmit from the new cursor.

use {
    crate::{
        fetcher::TaskQueue,
        module::{Input, Module, Output, Shutdown},
        sequencer::SyncGate,
    },
    anyhow::Result,
    async_trait::async_trait,
    std::{sync::Arc, time::Duration},
    tiascan_common::types::Cursor,
    tiascan_node::{GenesisPayload, NodeApi},
    tokio::sync::{broadcast, RwLock},
    tracing::{debug, info, warn},
};

const GENESIS_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct SyncDriver {
    node: Arc<dyn NodeApi>,
    queue: TaskQueue,
    cursor: Arc<RwLock<Cursor>>,
    gate: SyncGate,
    checkpoints: broadcast::Receiver<Cursor>,
    block_period: Duration,
    /// Set when no persisted state exists; genesis is emitted and
    /// acknowledged before the first tick.
    needs_genesis: bool,
    genesis_out: Output<GenesisPayload>,
    genesis_done: Input<()>,
}

impl SyncDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node: Arc<dyn NodeApi>,
        queue: TaskQueue,
        cursor: Arc<RwLock<Cursor>>,
        gate: SyncGate,
        checkpoints: broadcast::Receiver<Cursor>,
        block_period: Duration,
        needs_genesis: bool,
        genesis_out: Output<GenesisPayload>,
        genesis_done: Input<()>,
    ) -> Self {
        Self {
            node,
            queue,
            cursor,
            gate,
            checkpoints,
            block_period,
            needs_genesis,
            genesis_out,
            genesis_done,
        }
    }

    /// Fetches the genesis document and blocks until the external genesis
    /// consumer reports completion. Returns `false` on cancellation.
    async fn bootstrap_genesis(&mut self, shutdown: &mut Shutdown) -> Result<bool> {
        info!("no persisted state found, running genesis bootstrap");

        let payload = loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(false),
                result = self.node.genesis() => match result {
                    Ok(payload) => break payload,
                    Err(e) => {
                        warn!("genesis fetch failed, will retry: {:#}", e);
                        tokio::select! {
                            _ = shutdown.cancelled() => return Ok(false),
                            _ = tokio::time::sleep(GENESIS_RETRY_DELAY) => {}
                        }
                    }
                },
            }
        };

        if self.genesis_out.push(payload).await.is_err() {
            return Ok(false);
        }

        tokio::select! {
            _ = shutdown.cancelled() => Ok(false),
            done = self.genesis_done.pop() => match done {
                Some(()) => {
                    info!("genesis bootstrap complete");
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }

    /// One sync pass: query the head and submit every missing height.
    async fn sync_pass(&self) {
        if self.gate.is_locked() {
            debug!("rollback in flight, skipping sync pass");
            return;
        }

        let head = match self.node.status().await {
            Ok(head) => head,
            Err(e) => {
                warn!("head height query failed, retrying next tick: {:#}", e);
                return;
            }
        };

        let from = self.cursor.read().await.height;
        if head <= from {
            return;
        }

        debug!("syncing heights {}..={}", from + 1, head);
        for height in from + 1..=head {
            // A rollback can start mid-pass; stop producing immediately.
            if self.gate.is_locked() {
                return;
            }
            self.queue.submit(height).await;
        }

        // Reservations at or below the cursor are leftovers from before a
        // rollback and would only block future resubmission.
        self.queue.prune_through(self.cursor.read().await.height.min(from));
    }
}

#[async_trait]
impl Module for SyncDriver {
    fn name(&self) -> &'static str {
        "sync"
    }

    async fn run(mut self, mut shutdown: Shutdown) -> Result<()> {
        if self.needs_genesis && !self.bootstrap_genesis(&mut shutdown).await? {
            return Ok(());
        }

        let mut ticker = tokio::time::interval(self.block_period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                checkpoint = self.checkpoints.recv() => match checkpoint {
                    Ok(checkpoint) => {
                        debug!(
                            "rollback checkpoint ({}, {}), clearing pending tasks",
                            checkpoint.height, checkpoint.hash
                        );
                        self.queue.clear();
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
                _ = ticker.tick() => self.sync_pass().await,
            }
        }
    }
}
