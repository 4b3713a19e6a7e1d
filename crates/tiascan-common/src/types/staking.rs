//! Validator and staking rows
//!
//! Staking logs record every delegation/unbonding/commission/reward change
//! so that validator and balance state can be reconstructed, including in
//! reverse during rollback.

use {
    crate::types::Height,
    serde::{Deserialize, Serialize},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Validator {
    pub id: i64,
    pub address: String,
    pub delegator: String,
    pub stake: i64,
    pub commissions: i64,
    pub rewards: i64,
    pub height: Height,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakingLogKind {
    Delegation,
    Unbonding,
    Commissions,
    Rewards,
}

impl StakingLogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StakingLogKind::Delegation => "delegation",
            StakingLogKind::Unbonding => "unbonding",
            StakingLogKind::Commissions => "commissions",
            StakingLogKind::Rewards => "rewards",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "delegation" => Some(StakingLogKind::Delegation),
            "unbonding" => Some(StakingLogKind::Unbonding),
            "commissions" => Some(StakingLogKind::Commissions),
            "rewards" => Some(StakingLogKind::Rewards),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakingLog {
    pub id: i64,
    pub height: Height,
    pub kind: StakingLogKind,
    pub validator_id: i64,
    /// Delegator address; commissions and rewards accrue to the validator
    /// itself and carry no address.
    pub address: Option<String>,
    pub amount: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Delegation {
    pub id: i64,
    pub address: String,
    pub validator_id: i64,
    pub amount: i64,
    pub height: Height,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Jail {
    pub id: i64,
    pub validator_id: i64,
    pub height: Height,
    pub reason: String,
    pub burned: i64,
}
