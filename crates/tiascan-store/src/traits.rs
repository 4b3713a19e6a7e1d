//! Storage traits consumed by the ingestion pipeline
//!
//! The rollback controller runs entirely inside one [`StorageTx`]: every
//! `rollback_*` call deletes the rows derived from the given height and
//! hands them back, so reversal deltas are computed from what storage
//! actually held, not recomputed from scratch. `flush` commits the
//! transaction; `handle_error` aborts it. A transaction must always end in
//! exactly one of the two.

use {
    anyhow::Result,
    async_trait::async_trait,
    tiascan_common::types::{
        Address, BlockStats, Delegation, Event, Height, IndexerState, Jail, Message,
        MessageAddress, Namespace, NamespaceMessage, Signer, StakingLog, Tx, Validator,
    },
};

/// Balance adjustment for one address, in utia. Positive values credit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub address: String,
    pub spendable: i64,
    pub delegated: i64,
    pub unbonding: i64,
}

/// Stake/commission/reward adjustment for one surviving validator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatorUpdate {
    pub id: i64,
    pub stake: i64,
    pub commissions: i64,
    pub rewards: i64,
}

/// Amount adjustment for one (address, validator) delegation row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DelegationUpdate {
    pub address: String,
    pub validator_id: i64,
    pub amount: i64,
}

/// Size/count adjustment for one surviving namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceUpdate {
    pub namespace_id: String,
    pub size: i64,
    pub pfb_count: i64,
}

#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Opens a transactional handle. All writes go through it.
    async fn begin(&self) -> Result<Box<dyn StorageTx>>;

    /// Reads the persisted state row outside of any transaction. `None`
    /// means the indexer has never run and genesis bootstrap is required.
    async fn state(&self, name: &str) -> Result<Option<IndexerState>>;
}

#[async_trait]
pub trait StorageTx: Send {
    /// The latest locally stored block, if any.
    async fn last_block(&mut self) -> Result<Option<(Height, String)>>;

    // Deletions, each returning the removed rows. Link rows (signers,
    // message addresses, namespace messages) must be rolled back before
    // the rows they reference.
    async fn rollback_block(&mut self, height: Height) -> Result<()>;
    async fn rollback_block_stats(&mut self, height: Height) -> Result<Option<BlockStats>>;
    async fn rollback_txs(&mut self, height: Height) -> Result<Vec<Tx>>;
    async fn rollback_signers(&mut self, height: Height) -> Result<Vec<Signer>>;
    async fn rollback_messages(&mut self, height: Height) -> Result<Vec<Message>>;
    async fn rollback_message_addresses(&mut self, height: Height) -> Result<Vec<MessageAddress>>;
    async fn rollback_namespace_messages(&mut self, height: Height)
        -> Result<Vec<NamespaceMessage>>;
    async fn rollback_namespaces(&mut self, height: Height) -> Result<Vec<Namespace>>;
    async fn rollback_events(&mut self, height: Height) -> Result<Vec<Event>>;
    async fn rollback_addresses(&mut self, height: Height) -> Result<Vec<Address>>;
    async fn rollback_validators(&mut self, height: Height) -> Result<Vec<Validator>>;
    async fn rollback_staking_logs(&mut self, height: Height) -> Result<Vec<StakingLog>>;
    async fn rollback_jails(&mut self, height: Height) -> Result<Vec<Jail>>;
    async fn rollback_delegations(&mut self, height: Height) -> Result<Vec<Delegation>>;

    // Reversal writes.
    async fn save_addresses(&mut self, addresses: &[Address]) -> Result<()>;
    async fn save_balances(&mut self, updates: &[BalanceUpdate]) -> Result<()>;
    async fn save_delegations(&mut self, updates: &[DelegationUpdate]) -> Result<()>;
    async fn update_validators(&mut self, updates: &[ValidatorUpdate]) -> Result<()>;
    async fn update_namespaces(&mut self, updates: &[NamespaceUpdate]) -> Result<()>;

    async fn state(&mut self, name: &str) -> Result<Option<IndexerState>>;
    async fn update_state(&mut self, state: &IndexerState) -> Result<()>;

    /// Commits the transaction.
    async fn flush(self: Box<Self>) -> Result<()>;

    /// Aborts the transaction; nothing written through it persists.
    async fn handle_error(self: Box<Self>) -> Result<()>;
}
