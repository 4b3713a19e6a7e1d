//! Address and balance rows

use {
    crate::types::Height,
    serde::{Deserialize, Serialize},
};

/// Balance columns kept per address, all in utia.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub spendable: i64,
    pub delegated: i64,
    pub unbonding: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Address {
    pub id: i64,
    pub address: String,
    /// Height at which this address was first seen.
    pub height: Height,
    pub balance: Balance,
}
