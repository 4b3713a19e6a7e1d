//! Data types shared across the tiascan crates

mod address;
mod block;
mod cursor;
mod event;
mod namespace;
mod staking;
mod state;
mod transaction;

pub use address::{Address, Balance};
pub use block::{Block, BlockResults, BlockStats, FetchedBlock, TxResult};
pub use cursor::Cursor;
pub use event::{parse_utia, Event, EventKind};
pub use namespace::{Namespace, NamespaceMessage};
pub use staking::{Delegation, Jail, StakingLog, StakingLogKind, Validator};
pub use state::IndexerState;
pub use transaction::{Message, MessageAddress, Signer, Tx};

/// Monotonically increasing block position in the chain.
pub type Height = u64;
