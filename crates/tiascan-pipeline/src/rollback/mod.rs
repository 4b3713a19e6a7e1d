//! Reorg rollback controller
//!
//! Peels blocks off the top of storage one at a time, inside one storage
//! transaction per block, until the local tip hash agrees with what the
//! node reports for that height. Every per-block undo also reverses the
//! block's effect on balances, validators, delegations, namespaces and the
//! aggregate state row, derived from the rows the deletes handed back. The
//! resulting checkpoint is broadcast so the sequencer and the sync driver
//! can resume from it.

mod balances;
mod namespaces;
mod staking;

use {
    crate::{
        metrics::PipelineMetrics,
        module::{Input, Module, Shutdown},
    },
    anyhow::{anyhow, Context, Result},
    async_trait::async_trait,
    self::balances::BalanceLedger,
    std::{
        collections::HashSet,
        sync::{atomic::Ordering, Arc},
        time::Duration,
    },
    tiascan_common::types::{Cursor, Height},
    tiascan_node::NodeApi,
    tiascan_store::{Storage, StorageTx},
    tokio::sync::broadcast,
    tracing::{info, warn},
};

/// Sleep between node queries while the node is unreachable mid-rollback.
const NODE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Emitted by the sequencer when a block's parent hash does not match the
/// hash of the previously released block.
#[derive(Clone, Debug)]
pub struct RollbackTrigger {
    pub detected_at: Height,
    pub expected_parent: String,
    pub got_parent: String,
}

pub struct RollbackController {
    node: Arc<dyn NodeApi>,
    storage: Arc<dyn Storage>,
    triggers: Input<RollbackTrigger>,
    checkpoints: broadcast::Sender<Cursor>,
    state_name: String,
    metrics: Arc<PipelineMetrics>,
}

impl RollbackController {
    pub fn new(
        node: Arc<dyn NodeApi>,
        storage: Arc<dyn Storage>,
        triggers: Input<RollbackTrigger>,
        checkpoints: broadcast::Sender<Cursor>,
        state_name: impl Into<String>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            node,
            storage,
            triggers,
            checkpoints,
            state_name: state_name.into(),
            metrics,
        }
    }

    /// Queries the node for its block at `height`, retrying until it
    /// answers. Returns `None` on cancellation.
    async fn node_hash(&self, height: Height, shutdown: &mut Shutdown) -> Option<String> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                result = self.node.block(height) => match result {
                    Ok(block) => return Some(block.hash),
                    Err(e) => {
                        warn!("node query at height {} failed, will retry: {:#}", height, e);
                    }
                },
            }
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(NODE_RETRY_DELAY) => {}
            }
        }
    }

    /// Rolls back until the stored tip matches the node, returning the
    /// checkpoint. `None` means cancellation interrupted the loop; already
    /// committed per-block undos stay committed, the next trigger resumes
    /// from where this one stopped.
    async fn rollback_to_consistent(&self, shutdown: &mut Shutdown) -> Result<Option<Cursor>> {
        loop {
            let mut tx = self.storage.begin().await?;

            let Some((height, hash)) = tx.last_block().await? else {
                // Whole local chain undone; resume from genesis.
                tx.flush().await?;
                return Ok(Some(Cursor::new(0, String::new())));
            };

            let Some(node_hash) = self.node_hash(height, shutdown).await else {
                tx.handle_error().await?;
                return Ok(None);
            };

            if node_hash == hash {
                tx.flush().await?;
                return Ok(Some(Cursor::new(height, hash)));
            }

            info!(
                "undoing block {} (local hash {}, node hash {})",
                height, hash, node_hash
            );
            match self.undo_block(tx.as_mut(), height).await {
                Ok(()) => {
                    tx.flush().await?;
                    self.metrics
                        .rolled_back_blocks
                        .fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    // Abort so no partial undo persists, then bail out.
                    let _ = tx.handle_error().await;
                    return Err(e).with_context(|| format!("undoing block {height}"));
                }
            }
        }
    }

    /// Deletes every row derived from `height` and reverses the block's
    /// effect on the surviving rows, all through the one transaction.
    /// Link rows go first so the scoping subqueries still see their
    /// parents.
    async fn undo_block(&self, tx: &mut dyn StorageTx, height: Height) -> Result<()> {
        let stats = tx.rollback_block_stats(height).await?;
        let _signers = tx.rollback_signers(height).await?;
        let _message_addresses = tx.rollback_message_addresses(height).await?;
        let namespace_links = tx.rollback_namespace_messages(height).await?;
        let _messages = tx.rollback_messages(height).await?;
        let _txs = tx.rollback_txs(height).await?;
        let events = tx.rollback_events(height).await?;
        let addresses = tx.rollback_addresses(height).await?;
        let delegations = tx.rollback_delegations(height).await?;
        let validators = tx.rollback_validators(height).await?;
        let staking_logs = tx.rollback_staking_logs(height).await?;
        let _jails = tx.rollback_jails(height).await?;
        let namespaces = tx.rollback_namespaces(height).await?;
        tx.rollback_block(height).await?;

        let deleted_addresses: HashSet<String> =
            addresses.iter().map(|a| a.address.clone()).collect();
        let deleted_validators: HashSet<i64> = validators.iter().map(|v| v.id).collect();
        let deleted_delegations: HashSet<(String, i64)> = delegations
            .iter()
            .map(|d| (d.address.clone(), d.validator_id))
            .collect();
        let deleted_namespaces: HashSet<String> = namespaces
            .iter()
            .map(|ns| ns.namespace_id.clone())
            .collect();

        let mut ledger = BalanceLedger::new();
        balances::reverse_transfers(&events, &deleted_addresses, &mut ledger)?;
        let staking = staking::reverse_staking(
            &staking_logs,
            &deleted_validators,
            &deleted_addresses,
            &deleted_delegations,
            &mut ledger,
        );
        let namespace_updates = namespaces::reverse_usage(&namespace_links, &deleted_namespaces);

        tx.save_balances(&ledger.into_updates()).await?;
        tx.update_validators(&staking.validators).await?;
        tx.save_delegations(&staking.delegations).await?;
        tx.update_namespaces(&namespace_updates).await?;

        let mut state = tx
            .state(&self.state_name)
            .await?
            .ok_or_else(|| anyhow!("state row '{}' missing", self.state_name))?;
        if let Some(stats) = &stats {
            state.total_tx -= stats.tx_count;
            state.total_fee -= stats.fee;
            state.total_blobs_size -= stats.blobs_size;
            state.total_supply -= stats.supply_change;
        }
        state.total_accounts -= addresses.len() as i64;
        state.total_namespaces -= namespaces.len() as i64;
        match tx.last_block().await? {
            Some((h, hash)) => {
                state.last_height = h;
                state.last_hash = hash;
            }
            None => {
                state.last_height = 0;
                state.last_hash = String::new();
            }
        }
        tx.update_state(&state).await?;
        Ok(())
    }
}

#[async_trait]
impl Module for RollbackController {
    fn name(&self) -> &'static str {
        "rollback"
    }

    async fn run(mut self, mut shutdown: Shutdown) -> Result<()> {
        loop {
            let trigger = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                trigger = self.triggers.pop() => match trigger {
                    Some(trigger) => trigger,
                    None => return Ok(()),
                },
            };

            info!(
                "rollback requested at height {} (expected parent {}, got {})",
                trigger.detected_at, trigger.expected_parent, trigger.got_parent
            );

            let Some(checkpoint) = self.rollback_to_consistent(&mut shutdown).await? else {
                return Ok(());
            };

            info!(
                "rollback complete, checkpoint ({}, {})",
                checkpoint.height, checkpoint.hash
            );
            if self.checkpoints.send(checkpoint).is_err() {
                // Receivers are gone, the pipeline is shutting down.
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{connect, spawn, Output};
    use crate::testutil::{chain_hash, MockNode};
    use std::collections::HashMap;
    use tiascan_common::types::{
        Address, Balance, BlockStats, Delegation, Event, EventKind, IndexerState, StakingLog,
        StakingLogKind, Validator,
    };
    use tiascan_store::InMemoryStore;
    use tokio::time::{timeout, Duration};

    const STATE: &str = "tiascan";

    fn seed_chain(store: &InMemoryStore, head: Height) {
        let mut tables = store.tables();
        for h in 1..=head {
            tables.blocks.insert(h, chain_hash(h));
        }
        let mut state = IndexerState::new(STATE);
        state.last_height = head;
        state.last_hash = chain_hash(head);
        tables.states.insert(STATE.to_string(), state);
    }

    struct Rig {
        triggers: Output<RollbackTrigger>,
        checkpoints: broadcast::Receiver<Cursor>,
        metrics: Arc<PipelineMetrics>,
        handle: crate::module::ModuleHandle,
    }

    fn rig(node: Arc<MockNode>, store: InMemoryStore) -> Rig {
        let (triggers, trigger_in) = connect("rollback_triggers", 4);
        let (checkpoint_tx, checkpoints) = broadcast::channel(4);
        let metrics = Arc::new(PipelineMetrics::new());

        let controller = RollbackController::new(
            node,
            Arc::new(store),
            trigger_in,
            checkpoint_tx,
            STATE,
            metrics.clone(),
        );

        Rig {
            triggers,
            checkpoints,
            metrics,
            handle: spawn(controller),
        }
    }

    fn trigger(detected_at: Height) -> RollbackTrigger {
        RollbackTrigger {
            detected_at,
            expected_parent: "local".into(),
            got_parent: "remote".into(),
        }
    }

    #[tokio::test]
    async fn peels_blocks_until_hashes_agree() {
        let node = Arc::new(MockNode::with_chain(5));
        node.reorg_from(4);
        let store = InMemoryStore::new();
        seed_chain(&store, 5);
        let store_view = store.clone();

        let mut rig = rig(node, store);
        rig.triggers.push(trigger(6)).await.unwrap();

        let checkpoint = timeout(Duration::from_secs(3), rig.checkpoints.recv())
            .await
            .expect("rollback must finish")
            .unwrap();
        assert_eq!(checkpoint, Cursor::new(3, chain_hash(3)));

        let tables = store_view.tables();
        assert_eq!(tables.blocks.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        let state = &tables.states[STATE];
        assert_eq!(state.last_height, 3);
        assert_eq!(state.last_hash, chain_hash(3));
        assert_eq!(rig.metrics.rolled_back_blocks.load(Ordering::Relaxed), 2);

        rig.handle.close().await;
    }

    #[tokio::test]
    async fn terminates_at_genesis_when_the_whole_chain_diverged() {
        let node = Arc::new(MockNode::with_chain(2));
        node.reorg_from(1);
        let store = InMemoryStore::new();
        seed_chain(&store, 2);
        let store_view = store.clone();

        let mut rig = rig(node, store);
        rig.triggers.push(trigger(3)).await.unwrap();

        let checkpoint = timeout(Duration::from_secs(3), rig.checkpoints.recv())
            .await
            .expect("rollback must terminate")
            .unwrap();
        assert_eq!(checkpoint, Cursor::new(0, String::new()));
        assert!(store_view.tables().blocks.is_empty());

        rig.handle.close().await;
    }

    #[tokio::test]
    async fn reverses_balances_staking_and_state_exactly() {
        let node = Arc::new(MockNode::with_chain(5));
        node.reorg_from(5);
        let store = InMemoryStore::new();
        seed_chain(&store, 5);
        {
            let mut tables = store.tables();
            // addr1 spent a net 70utia at height 5 and delegated 100.
            tables.events.push(Event {
                id: 1,
                height: 5,
                tx_id: Some(1),
                kind: EventKind::CoinSpent,
                attributes: HashMap::from([
                    ("spender".to_string(), "addr1".to_string()),
                    ("amount".to_string(), "100utia".to_string()),
                ]),
            });
            tables.events.push(Event {
                id: 2,
                height: 5,
                tx_id: Some(1),
                kind: EventKind::CoinReceived,
                attributes: HashMap::from([
                    ("receiver".to_string(), "addr1".to_string()),
                    ("amount".to_string(), "30utia".to_string()),
                ]),
            });
            tables.addresses.push(Address {
                id: 1,
                address: "addr1".to_string(),
                height: 2,
                balance: Balance {
                    spendable: 930,
                    delegated: 100,
                    unbonding: 0,
                },
            });
            tables.validators.push(Validator {
                id: 7,
                address: "val7".to_string(),
                delegator: "addr7".to_string(),
                stake: 1100,
                commissions: 0,
                rewards: 0,
                height: 1,
            });
            tables.staking_logs.push(StakingLog {
                id: 1,
                height: 5,
                kind: StakingLogKind::Delegation,
                validator_id: 7,
                address: Some("addr1".to_string()),
                amount: 100,
            });
            tables.delegations.push(Delegation {
                id: 1,
                address: "addr1".to_string(),
                validator_id: 7,
                amount: 100,
                height: 5,
            });
            tables.stats.insert(
                5,
                BlockStats {
                    height: 5,
                    tx_count: 2,
                    events_count: 2,
                    fee: 10,
                    blobs_size: 0,
                    blobs_count: 0,
                    supply_change: 3,
                },
            );
            let state = tables.states.get_mut(STATE).unwrap();
            state.total_tx = 20;
            state.total_fee = 100;
            state.total_supply = 50;
        }
        let store_view = store.clone();

        let mut rig = rig(node, store);
        rig.triggers.push(trigger(6)).await.unwrap();

        let checkpoint = timeout(Duration::from_secs(3), rig.checkpoints.recv())
            .await
            .expect("rollback must finish")
            .unwrap();
        assert_eq!(checkpoint, Cursor::new(4, chain_hash(4)));

        let tables = store_view.tables();
        let addr = tables.addresses.iter().find(|a| a.address == "addr1").unwrap();
        // Net spend of 70 comes back, the delegation of 100 unwinds.
        assert_eq!(addr.balance.spendable, 930 + 70 + 100);
        assert_eq!(addr.balance.delegated, 0);
        let validator = tables.validators.iter().find(|v| v.id == 7).unwrap();
        assert_eq!(validator.stake, 1000);
        assert!(tables.delegations.is_empty(), "zeroed delegation row is dropped");
        assert!(tables.events.is_empty());
        assert!(tables.staking_logs.is_empty());

        let state = &tables.states[STATE];
        assert_eq!(state.total_tx, 18);
        assert_eq!(state.total_fee, 90);
        assert_eq!(state.total_supply, 47);
        assert_eq!(state.last_height, 4);

        rig.handle.close().await;
    }
}
