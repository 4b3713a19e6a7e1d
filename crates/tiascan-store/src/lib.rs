//! Storage collaborator for the tiascan indexer
//!
//! The pipeline talks to durable storage only through the [`Storage`] and
//! [`StorageTx`] traits. Two backends live here: a PostgreSQL store on
//! sqlx and an in-memory store used by tests and local runs.

pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use traits::{
    BalanceUpdate, DelegationUpdate, NamespaceUpdate, Storage, StorageTx, ValidatorUpdate,
};
