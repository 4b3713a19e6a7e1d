//! In-memory storage backend
//!
//! Backs the pipeline tests and local runs without a database. Transaction
//! semantics are real: `begin` snapshots the tables, writes go to the
//! snapshot, `flush` swaps it in and `handle_error` discards it, so a
//! failed rollback never leaves partial deletes behind.

use {
    crate::traits::{
        BalanceUpdate, DelegationUpdate, NamespaceUpdate, Storage, StorageTx, ValidatorUpdate,
    },
    anyhow::Result,
    async_trait::async_trait,
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        sync::{Arc, Mutex, MutexGuard},
    },
    tiascan_common::types::{
        Address, BlockStats, Delegation, Event, Height, IndexerState, Jail, Message,
        MessageAddress, Namespace, NamespaceMessage, Signer, StakingLog, Tx, Validator,
    },
};

/// All tables, mirroring the relational schema closely enough for the
/// rollback queries to behave the same way.
#[derive(Clone, Debug, Default)]
pub struct Tables {
    pub blocks: BTreeMap<Height, String>,
    pub stats: HashMap<Height, BlockStats>,
    pub txs: Vec<Tx>,
    pub signers: Vec<Signer>,
    pub messages: Vec<Message>,
    pub message_addresses: Vec<MessageAddress>,
    pub namespace_messages: Vec<NamespaceMessage>,
    pub namespaces: Vec<Namespace>,
    pub events: Vec<Event>,
    pub addresses: Vec<Address>,
    pub validators: Vec<Validator>,
    pub staking_logs: Vec<StakingLog>,
    pub jails: Vec<Jail>,
    pub delegations: Vec<Delegation>,
    pub states: HashMap<String, IndexerState>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct table access, used by tests to seed fixture rows and by the
    /// local committer to persist forward progress.
    pub fn tables(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().expect("store lock poisoned")
    }
}

#[async_trait]
impl Storage for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StorageTx>> {
        let work = self.tables().clone();
        Ok(Box::new(MemoryTx {
            inner: self.inner.clone(),
            work,
        }))
    }

    async fn state(&self, name: &str) -> Result<Option<IndexerState>> {
        Ok(self.tables().states.get(name).cloned())
    }
}

pub struct MemoryTx {
    inner: Arc<Mutex<Tables>>,
    work: Tables,
}

/// Drains every element matching `pred` out of `rows`, preserving order.
fn drain_where<T>(rows: &mut Vec<T>, pred: impl Fn(&T) -> bool) -> Vec<T> {
    let mut removed = Vec::new();
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows.drain(..) {
        if pred(&row) {
            removed.push(row);
        } else {
            kept.push(row);
        }
    }
    *rows = kept;
    removed
}

#[async_trait]
impl StorageTx for MemoryTx {
    async fn last_block(&mut self) -> Result<Option<(Height, String)>> {
        Ok(self
            .work
            .blocks
            .iter()
            .next_back()
            .map(|(height, hash)| (*height, hash.clone())))
    }

    async fn rollback_block(&mut self, height: Height) -> Result<()> {
        self.work.blocks.remove(&height);
        Ok(())
    }

    async fn rollback_block_stats(&mut self, height: Height) -> Result<Option<BlockStats>> {
        Ok(self.work.stats.remove(&height))
    }

    async fn rollback_txs(&mut self, height: Height) -> Result<Vec<Tx>> {
        Ok(drain_where(&mut self.work.txs, |tx| tx.height == height))
    }

    async fn rollback_signers(&mut self, height: Height) -> Result<Vec<Signer>> {
        let tx_ids: HashSet<i64> = self
            .work
            .txs
            .iter()
            .filter(|tx| tx.height == height)
            .map(|tx| tx.id)
            .collect();
        Ok(drain_where(&mut self.work.signers, |s| {
            tx_ids.contains(&s.tx_id)
        }))
    }

    async fn rollback_messages(&mut self, height: Height) -> Result<Vec<Message>> {
        Ok(drain_where(&mut self.work.messages, |m| m.height == height))
    }

    async fn rollback_message_addresses(&mut self, height: Height) -> Result<Vec<MessageAddress>> {
        let msg_ids: HashSet<i64> = self
            .work
            .messages
            .iter()
            .filter(|m| m.height == height)
            .map(|m| m.id)
            .collect();
        Ok(drain_where(&mut self.work.message_addresses, |ma| {
            msg_ids.contains(&ma.msg_id)
        }))
    }

    async fn rollback_namespace_messages(
        &mut self,
        height: Height,
    ) -> Result<Vec<NamespaceMessage>> {
        Ok(drain_where(&mut self.work.namespace_messages, |nm| {
            nm.height == height
        }))
    }

    async fn rollback_namespaces(&mut self, height: Height) -> Result<Vec<Namespace>> {
        Ok(drain_where(&mut self.work.namespaces, |ns| {
            ns.first_height == height
        }))
    }

    async fn rollback_events(&mut self, height: Height) -> Result<Vec<Event>> {
        Ok(drain_where(&mut self.work.events, |ev| ev.height == height))
    }

    async fn rollback_addresses(&mut self, height: Height) -> Result<Vec<Address>> {
        Ok(drain_where(&mut self.work.addresses, |a| a.height == height))
    }

    async fn rollback_validators(&mut self, height: Height) -> Result<Vec<Validator>> {
        Ok(drain_where(&mut self.work.validators, |v| {
            v.height == height
        }))
    }

    async fn rollback_staking_logs(&mut self, height: Height) -> Result<Vec<StakingLog>> {
        Ok(drain_where(&mut self.work.staking_logs, |log| {
            log.height == height
        }))
    }

    async fn rollback_jails(&mut self, height: Height) -> Result<Vec<Jail>> {
        Ok(drain_where(&mut self.work.jails, |j| j.height == height))
    }

    async fn rollback_delegations(&mut self, height: Height) -> Result<Vec<Delegation>> {
        let removed_validators: HashSet<i64> = self
            .work
            .validators
            .iter()
            .filter(|v| v.height == height)
            .map(|v| v.id)
            .collect();
        Ok(drain_where(&mut self.work.delegations, |d| {
            d.height == height || removed_validators.contains(&d.validator_id)
        }))
    }

    async fn save_addresses(&mut self, addresses: &[Address]) -> Result<()> {
        for address in addresses {
            match self
                .work
                .addresses
                .iter_mut()
                .find(|a| a.address == address.address)
            {
                Some(existing) => *existing = address.clone(),
                None => self.work.addresses.push(address.clone()),
            }
        }
        Ok(())
    }

    async fn save_balances(&mut self, updates: &[BalanceUpdate]) -> Result<()> {
        for update in updates {
            if let Some(address) = self
                .work
                .addresses
                .iter_mut()
                .find(|a| a.address == update.address)
            {
                address.balance.spendable += update.spendable;
                address.balance.delegated += update.delegated;
                address.balance.unbonding += update.unbonding;
            }
        }
        Ok(())
    }

    async fn save_delegations(&mut self, updates: &[DelegationUpdate]) -> Result<()> {
        for update in updates {
            if let Some(delegation) = self
                .work
                .delegations
                .iter_mut()
                .find(|d| d.address == update.address && d.validator_id == update.validator_id)
            {
                delegation.amount += update.amount;
            }
        }
        self.work.delegations.retain(|d| d.amount != 0);
        Ok(())
    }

    async fn update_validators(&mut self, updates: &[ValidatorUpdate]) -> Result<()> {
        for update in updates {
            if let Some(validator) = self.work.validators.iter_mut().find(|v| v.id == update.id) {
                validator.stake += update.stake;
                validator.commissions += update.commissions;
                validator.rewards += update.rewards;
            }
        }
        Ok(())
    }

    async fn update_namespaces(&mut self, updates: &[NamespaceUpdate]) -> Result<()> {
        for update in updates {
            if let Some(namespace) = self
                .work
                .namespaces
                .iter_mut()
                .find(|ns| ns.namespace_id == update.namespace_id)
            {
                namespace.size += update.size;
                namespace.pfb_count += update.pfb_count;
            }
        }
        Ok(())
    }

    async fn state(&mut self, name: &str) -> Result<Option<IndexerState>> {
        Ok(self.work.states.get(name).cloned())
    }

    async fn update_state(&mut self, state: &IndexerState) -> Result<()> {
        self.work.states.insert(state.name.clone(), state.clone());
        Ok(())
    }

    async fn flush(self: Box<Self>) -> Result<()> {
        *self.inner.lock().expect("store lock poisoned") = self.work;
        Ok(())
    }

    async fn handle_error(self: Box<Self>) -> Result<()> {
        // Snapshot is simply dropped; the shared tables never saw it.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: i64, height: Height) -> Tx {
        Tx {
            id,
            height,
            hash: format!("tx{id}"),
            position: 0,
            fee: 0,
            gas_wanted: 0,
            gas_used: 0,
            messages_count: 0,
        }
    }

    #[tokio::test]
    async fn aborted_transaction_leaves_tables_untouched() {
        let store = InMemoryStore::new();
        store.tables().blocks.insert(7, "h7".into());

        let mut txn = store.begin().await.unwrap();
        txn.rollback_block(7).await.unwrap();
        txn.handle_error().await.unwrap();

        assert_eq!(store.tables().blocks.get(&7), Some(&"h7".to_string()));
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = InMemoryStore::new();
        store.tables().blocks.insert(7, "h7".into());

        let mut txn = store.begin().await.unwrap();
        txn.rollback_block(7).await.unwrap();
        txn.flush().await.unwrap();

        assert!(store.tables().blocks.is_empty());
    }

    #[tokio::test]
    async fn signer_rollback_is_scoped_to_the_height() {
        let store = InMemoryStore::new();
        {
            let mut tables = store.tables();
            tables.txs.push(tx(1, 5));
            tables.txs.push(tx(2, 6));
            tables.signers.push(Signer {
                tx_id: 1,
                address_id: 10,
            });
            tables.signers.push(Signer {
                tx_id: 2,
                address_id: 11,
            });
        }

        let mut txn = store.begin().await.unwrap();
        let removed = txn.rollback_signers(6).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].tx_id, 2);
        txn.flush().await.unwrap();

        assert_eq!(store.tables().signers.len(), 1);
    }
}
