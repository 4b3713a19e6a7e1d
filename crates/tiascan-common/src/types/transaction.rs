//! Transaction, message and link rows

use {
    crate::types::Height,
    serde::{Deserialize, Serialize},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tx {
    pub id: i64,
    pub height: Height,
    pub hash: String,
    pub position: i32,
    pub fee: i64,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub messages_count: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Signer {
    pub tx_id: i64,
    pub address_id: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub tx_id: i64,
    pub height: Height,
    pub position: i32,
    pub msg_type: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageAddress {
    pub msg_id: i64,
    pub address_id: i64,
}
