//! Pipeline assembly
//!
//! Wires the sync driver, fetch worker pool, sequencer and rollback
//! controller together and owns their lifecycles. The caller consumes
//! released blocks and the one-shot genesis payload through the returned
//! handle; everything else is internal.

use {
    crate::{
        fetcher::Fetcher,
        metrics::PipelineMetrics,
        module::{connect, spawn, Input, ModuleHandle, Output},
        rollback::{RollbackController, RollbackTrigger},
        sequencer::{Sequencer, SyncGate},
        sync::SyncDriver,
    },
    anyhow::Result,
    std::{sync::Arc, time::Duration},
    tiascan_common::{config::IndexerConfig, types::FetchedBlock},
    tiascan_node::{GenesisPayload, NodeApi},
    tiascan_store::Storage,
    tokio::sync::{broadcast, RwLock},
    tracing::info,
};

pub struct Indexer {
    /// Blocks in strict height order, ready for parsing and commit.
    pub released: Input<FetchedBlock>,
    /// Carries the genesis document exactly once, on a fresh database.
    pub genesis: Input<GenesisPayload>,
    /// The genesis consumer acknowledges here to unblock syncing.
    pub genesis_done: Output<()>,
    pub metrics: Arc<PipelineMetrics>,
    handles: Vec<ModuleHandle>,
}

impl Indexer {
    /// Starts all pipeline modules. The cursor resumes from the persisted
    /// state row; a missing row triggers the genesis bootstrap.
    pub async fn start(
        config: &IndexerConfig,
        node: Arc<dyn NodeApi>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        let state = storage.state(&config.name).await?;
        let needs_genesis = state.is_none();
        let cursor = state.map(|s| s.cursor()).unwrap_or_default();
        info!(
            "starting pipeline '{}' from ({}, {})",
            config.name, cursor.height, cursor.hash
        );

        let cursor = Arc::new(RwLock::new(cursor));
        let gate = SyncGate::new();
        let metrics = Arc::new(PipelineMetrics::new());

        let (fetched_out, fetched_in) = connect("fetched", 64);
        let (released_out, released) = connect("released", 64);
        let (trigger_out, trigger_in) = connect::<RollbackTrigger>("rollback_triggers", 4);
        let (genesis_out, genesis) = connect("genesis", 1);
        let (genesis_done, genesis_done_in) = connect("genesis_done", 1);
        let (checkpoint_tx, sequencer_checkpoints) = broadcast::channel(16);
        let sync_checkpoints = checkpoint_tx.subscribe();

        let (fetcher, queue) = Fetcher::new(
            node.clone(),
            config.threads_count,
            fetched_out,
            metrics.clone(),
        );

        let driver = SyncDriver::new(
            node.clone(),
            queue,
            cursor.clone(),
            gate.clone(),
            sync_checkpoints,
            Duration::from_secs(config.block_period),
            needs_genesis,
            genesis_out,
            genesis_done_in,
        );

        let sequencer = Sequencer::new(
            fetched_in,
            released_out,
            trigger_out,
            sequencer_checkpoints,
            cursor,
            gate,
            metrics.clone(),
        );

        let rollback = RollbackController::new(
            node,
            storage,
            trigger_in,
            checkpoint_tx,
            config.name.clone(),
            metrics.clone(),
        );

        // Close order mirrors the data flow: producers before consumers.
        let handles = vec![
            spawn(fetcher),
            spawn(driver),
            spawn(sequencer),
            spawn(rollback),
        ];

        Ok(Self {
            released,
            genesis,
            genesis_done,
            metrics,
            handles,
        })
    }

    /// Stops every module and waits for its loop to exit.
    pub async fn shutdown(self) {
        for handle in self.handles {
            info!("stopping module {}", handle.name());
            handle.close().await;
        }
    }
}
