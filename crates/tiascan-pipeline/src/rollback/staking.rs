//! Staking reversal from deleted staking logs
//!
//! Each log row records one signed staking movement; undoing the block
//! applies every movement with the opposite sign. Rows that point at a
//! validator, address or delegation deleted in the same rollback are
//! skipped, there is nothing left to adjust.

use {
    crate::rollback::balances::BalanceLedger,
    std::collections::{BTreeMap, HashSet},
    tiascan_common::types::{StakingLog, StakingLogKind},
    tiascan_store::{DelegationUpdate, ValidatorUpdate},
};

#[derive(Debug, Default)]
pub(crate) struct StakingReversal {
    pub validators: Vec<ValidatorUpdate>,
    pub delegations: Vec<DelegationUpdate>,
}

pub(crate) fn reverse_staking(
    logs: &[StakingLog],
    deleted_validators: &HashSet<i64>,
    deleted_addresses: &HashSet<String>,
    deleted_delegations: &HashSet<(String, i64)>,
    ledger: &mut BalanceLedger,
) -> StakingReversal {
    let mut validators: BTreeMap<i64, ValidatorUpdate> = BTreeMap::new();
    let mut delegations: BTreeMap<(String, i64), DelegationUpdate> = BTreeMap::new();

    for log in logs {
        let amount = log.amount;
        let validator = (!deleted_validators.contains(&log.validator_id)).then(|| {
            validators
                .entry(log.validator_id)
                .or_insert_with(|| ValidatorUpdate {
                    id: log.validator_id,
                    ..Default::default()
                })
        });

        match log.kind {
            StakingLogKind::Delegation => {
                if let Some(validator) = validator {
                    validator.stake -= amount;
                }
                if let Some(address) = &log.address {
                    if !deleted_addresses.contains(address) {
                        ledger.credit_delegated(address, -amount);
                        ledger.credit_spendable(address, amount);
                    }
                    adjust_delegation(
                        &mut delegations,
                        address,
                        log.validator_id,
                        -amount,
                        deleted_validators,
                        deleted_delegations,
                    );
                }
            }
            StakingLogKind::Unbonding => {
                if let Some(validator) = validator {
                    validator.stake += amount;
                }
                if let Some(address) = &log.address {
                    if !deleted_addresses.contains(address) {
                        ledger.credit_unbonding(address, -amount);
                        ledger.credit_delegated(address, amount);
                    }
                    adjust_delegation(
                        &mut delegations,
                        address,
                        log.validator_id,
                        amount,
                        deleted_validators,
                        deleted_delegations,
                    );
                }
            }
            StakingLogKind::Commissions => {
                if let Some(validator) = validator {
                    validator.commissions -= amount;
                }
            }
            StakingLogKind::Rewards => {
                if let Some(validator) = validator {
                    validator.rewards -= amount;
                }
            }
        }
    }

    StakingReversal {
        validators: validators
            .into_values()
            .filter(|u| u.stake != 0 || u.commissions != 0 || u.rewards != 0)
            .collect(),
        delegations: delegations
            .into_values()
            .filter(|u| u.amount != 0)
            .collect(),
    }
}

fn adjust_delegation(
    delegations: &mut BTreeMap<(String, i64), DelegationUpdate>,
    address: &str,
    validator_id: i64,
    amount: i64,
    deleted_validators: &HashSet<i64>,
    deleted_delegations: &HashSet<(String, i64)>,
) {
    if deleted_validators.contains(&validator_id)
        || deleted_delegations.contains(&(address.to_string(), validator_id))
    {
        return;
    }
    delegations
        .entry((address.to_string(), validator_id))
        .or_insert_with(|| DelegationUpdate {
            address: address.to_string(),
            validator_id,
            ..Default::default()
        })
        .amount += amount;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(kind: StakingLogKind, validator_id: i64, address: Option<&str>, amount: i64) -> StakingLog {
        StakingLog {
            id: 1,
            height: 10,
            kind,
            validator_id,
            address: address.map(str::to_string),
            amount,
        }
    }

    #[test]
    fn delegation_is_reversed_with_opposite_signs() {
        let logs = vec![log(StakingLogKind::Delegation, 7, Some("addr1"), 100)];
        let mut ledger = BalanceLedger::new();

        let reversal = reverse_staking(
            &logs,
            &HashSet::new(),
            &HashSet::new(),
            &HashSet::new(),
            &mut ledger,
        );

        assert_eq!(reversal.validators, vec![ValidatorUpdate { id: 7, stake: -100, ..Default::default() }]);
        assert_eq!(
            reversal.delegations,
            vec![DelegationUpdate { address: "addr1".into(), validator_id: 7, amount: -100 }]
        );
        let balances = ledger.into_updates();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].delegated, -100);
        assert_eq!(balances[0].spendable, 100);
    }

    #[test]
    fn unbonding_is_reversed_back_into_delegated() {
        let logs = vec![log(StakingLogKind::Unbonding, 7, Some("addr1"), 40)];
        let mut ledger = BalanceLedger::new();

        let reversal = reverse_staking(
            &logs,
            &HashSet::new(),
            &HashSet::new(),
            &HashSet::new(),
            &mut ledger,
        );

        assert_eq!(reversal.validators[0].stake, 40);
        assert_eq!(reversal.delegations[0].amount, 40);
        let balances = ledger.into_updates();
        assert_eq!(balances[0].unbonding, -40);
        assert_eq!(balances[0].delegated, 40);
    }

    #[test]
    fn commissions_and_rewards_only_touch_the_validator() {
        let logs = vec![
            log(StakingLogKind::Commissions, 3, None, 12),
            log(StakingLogKind::Rewards, 3, None, 5),
        ];
        let mut ledger = BalanceLedger::new();

        let reversal = reverse_staking(
            &logs,
            &HashSet::new(),
            &HashSet::new(),
            &HashSet::new(),
            &mut ledger,
        );

        assert_eq!(
            reversal.validators,
            vec![ValidatorUpdate { id: 3, commissions: -12, rewards: -5, ..Default::default() }]
        );
        assert!(reversal.delegations.is_empty());
        assert!(ledger.into_updates().is_empty());
    }

    #[test]
    fn rows_for_deleted_validators_are_skipped() {
        let logs = vec![log(StakingLogKind::Delegation, 9, Some("addr1"), 100)];
        let deleted_validators: HashSet<i64> = [9].into();
        let mut ledger = BalanceLedger::new();

        let reversal = reverse_staking(
            &logs,
            &deleted_validators,
            &HashSet::new(),
            &HashSet::new(),
            &mut ledger,
        );

        // The validator and its delegation rows are gone; only the
        // delegator's balance still needs the credit back.
        assert!(reversal.validators.is_empty());
        assert!(reversal.delegations.is_empty());
        assert_eq!(ledger.into_updates()[0].spendable, 100);
    }

    #[test]
    fn deleted_delegation_rows_get_no_amount_adjustment() {
        let logs = vec![log(StakingLogKind::Delegation, 7, Some("addr1"), 100)];
        let deleted_delegations: HashSet<(String, i64)> = [("addr1".to_string(), 7)].into();
        let mut ledger = BalanceLedger::new();

        let reversal = reverse_staking(
            &logs,
            &HashSet::new(),
            &HashSet::new(),
            &deleted_delegations,
            &mut ledger,
        );

        assert!(reversal.delegations.is_empty());
        assert_eq!(reversal.validators[0].stake, -100);
    }
}
