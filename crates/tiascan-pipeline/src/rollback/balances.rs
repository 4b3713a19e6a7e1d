//! Balance reversal from deleted transfer events
//!
//! Spends and receives recorded for a rolled-back block are credited back
//! in reverse. The deltas come from the deleted event rows themselves, so
//! the reversal is exact regardless of what else happened at that height.

use {
    anyhow::{bail, Result},
    std::collections::{BTreeMap, HashSet},
    tiascan_common::types::{parse_utia, Event, EventKind},
    tiascan_store::BalanceUpdate,
};

/// Accumulates per-address balance deltas across all reversal sources for
/// one block, netted before they are written.
#[derive(Debug, Default)]
pub(crate) struct BalanceLedger {
    entries: BTreeMap<String, BalanceUpdate>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, address: &str) -> &mut BalanceUpdate {
        self.entries
            .entry(address.to_string())
            .or_insert_with(|| BalanceUpdate {
                address: address.to_string(),
                ..Default::default()
            })
    }

    pub fn credit_spendable(&mut self, address: &str, amount: i64) {
        self.entry(address).spendable += amount;
    }

    pub fn credit_delegated(&mut self, address: &str, amount: i64) {
        self.entry(address).delegated += amount;
    }

    pub fn credit_unbonding(&mut self, address: &str, amount: i64) {
        self.entry(address).unbonding += amount;
    }

    /// The netted updates, dropping addresses whose deltas cancel out.
    pub fn into_updates(self) -> Vec<BalanceUpdate> {
        self.entries
            .into_values()
            .filter(|u| u.spendable != 0 || u.delegated != 0 || u.unbonding != 0)
            .collect()
    }
}

/// Folds the deleted transfer events into the ledger. A `coin_spent` is
/// reversed by crediting the spender; a `coin_received` by debiting the
/// receiver. Addresses deleted in the same rollback are skipped, their
/// rows are already gone.
pub(crate) fn reverse_transfers(
    events: &[Event],
    deleted_addresses: &HashSet<String>,
    ledger: &mut BalanceLedger,
) -> Result<()> {
    for event in events {
        let (address_key, sign) = match event.kind {
            EventKind::CoinSpent => ("spender", 1),
            EventKind::CoinReceived => ("receiver", -1),
            _ => continue,
        };

        let Some(address) = event.attribute(address_key) else {
            bail!(
                "{} event {} at height {} has no {} attribute",
                event.kind.as_str(),
                event.id,
                event.height,
                address_key
            );
        };
        let Some(coins) = event.attribute("amount") else {
            bail!(
                "{} event {} at height {} has no amount attribute",
                event.kind.as_str(),
                event.id,
                event.height
            );
        };

        if deleted_addresses.contains(address) {
            continue;
        }
        ledger.credit_spendable(address, sign * parse_utia(coins)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn event(kind: EventKind, attrs: &[(&str, &str)]) -> Event {
        Event {
            id: 1,
            height: 10,
            tx_id: Some(1),
            kind,
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn nets_spends_and_receives_per_address() {
        let events = vec![
            event(EventKind::CoinSpent, &[("spender", "addr1"), ("amount", "100utia")]),
            event(EventKind::CoinReceived, &[("receiver", "addr1"), ("amount", "30utia")]),
            event(EventKind::CoinReceived, &[("receiver", "addr2"), ("amount", "70utia")]),
        ];

        let mut ledger = BalanceLedger::new();
        reverse_transfers(&events, &HashSet::new(), &mut ledger).unwrap();
        let updates = ledger.into_updates();

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].address, "addr1");
        assert_eq!(updates[0].spendable, 70);
        assert_eq!(updates[1].address, "addr2");
        assert_eq!(updates[1].spendable, -70);
    }

    #[test]
    fn skips_addresses_deleted_in_the_same_rollback() {
        let events = vec![event(
            EventKind::CoinReceived,
            &[("receiver", "fresh"), ("amount", "50utia")],
        )];
        let deleted: HashSet<String> = ["fresh".to_string()].into();

        let mut ledger = BalanceLedger::new();
        reverse_transfers(&events, &deleted, &mut ledger).unwrap();
        assert!(ledger.into_updates().is_empty());
    }

    #[test]
    fn drops_entries_that_cancel_out() {
        let events = vec![
            event(EventKind::CoinSpent, &[("spender", "addr1"), ("amount", "10utia")]),
            event(EventKind::CoinReceived, &[("receiver", "addr1"), ("amount", "10utia")]),
        ];

        let mut ledger = BalanceLedger::new();
        reverse_transfers(&events, &HashSet::new(), &mut ledger).unwrap();
        assert!(ledger.into_updates().is_empty());
    }

    #[test]
    fn rejects_events_without_an_amount() {
        let events = vec![event(EventKind::CoinSpent, &[("spender", "addr1")])];
        let mut ledger = BalanceLedger::new();
        assert!(reverse_transfers(&events, &HashSet::new(), &mut ledger).is_err());
    }
}
