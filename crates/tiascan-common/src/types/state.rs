//! Durable aggregate counters

use {
    crate::types::Height,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// The durable aggregate counters, mutated transactionally by the forward
/// commit path and by the rollback controller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexerState {
    pub name: String,
    pub last_height: Height,
    pub last_hash: String,
    pub last_time: DateTime<Utc>,
    pub total_tx: i64,
    pub total_accounts: i64,
    pub total_namespaces: i64,
    pub total_blobs_size: i64,
    pub total_fee: i64,
    pub total_supply: i64,
}

impl IndexerState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_height: 0,
            last_hash: String::new(),
            last_time: DateTime::<Utc>::MIN_UTC,
            total_tx: 0,
            total_accounts: 0,
            total_namespaces: 0,
            total_blobs_size: 0,
            total_fee: 0,
            total_supply: 0,
        }
    }

    pub fn cursor(&self) -> crate::types::Cursor {
        crate::types::Cursor::new(self.last_height, self.last_hash.clone())
    }
}
