//! Chain events as stored per block
//!
//! Only the balance-bearing event kinds matter to the rollback path; the
//! rest ride along as opaque attribute maps for the query surface.

use {
    crate::{
        errors::{Error, Result},
        types::Height,
    },
    serde::{Deserialize, Serialize},
    std::collections::HashMap,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CoinSpent,
    CoinReceived,
    Transfer,
    Message,
    Other,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CoinSpent => "coin_spent",
            EventKind::CoinReceived => "coin_received",
            EventKind::Transfer => "transfer",
            EventKind::Message => "message",
            EventKind::Other => "other",
        }
    }

    pub fn from_type(ty: &str) -> Self {
        match ty {
            "coin_spent" => EventKind::CoinSpent,
            "coin_received" => EventKind::CoinReceived,
            "transfer" => EventKind::Transfer,
            "message" => EventKind::Message,
            _ => EventKind::Other,
        }
    }
}

/// One event row. `tx_id` is set for tx-scoped events and empty for
/// begin/end block events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub height: Height,
    pub tx_id: Option<i64>,
    pub kind: EventKind,
    pub attributes: HashMap<String, String>,
}

impl Event {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Parses a coin string such as `"100utia"` or `"100utia,7stake"` and
/// returns the utia amount. Non-utia denominations are ignored.
pub fn parse_utia(coins: &str) -> Result<i64> {
    let mut total: i64 = 0;
    for coin in coins.split(',') {
        let coin = coin.trim();
        if coin.is_empty() {
            continue;
        }
        if let Some(digits) = coin.strip_suffix("utia") {
            let amount: i64 = digits
                .parse()
                .map_err(|_| Error::MalformedEvent(format!("bad coin amount: {coin}")))?;
            total += amount;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_utia_coin() {
        assert_eq!(parse_utia("100utia").unwrap(), 100);
    }

    #[test]
    fn ignores_foreign_denominations() {
        assert_eq!(parse_utia("100utia,7stake").unwrap(), 100);
        assert_eq!(parse_utia("7stake").unwrap(), 0);
    }

    #[test]
    fn rejects_garbage_amounts() {
        assert!(parse_utia("xyzutia").is_err());
    }
}
