//! Price feed abstractions and core types

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;

/// Ordered `(from, to)` pair. `(a, b)` and `(b, a)` are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PairKey {
    pub from: String,
    pub to: String,
}

impl PairKey {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.from, self.to)
    }
}

/// A single asset's price as reported by the feed, in the feed's quote
/// currency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub usd: Option<Decimal>,
    pub market_cap: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    pub change_24h: Option<Decimal>,
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl PriceQuote {
    pub fn from_usd(usd: Decimal) -> Self {
        Self {
            usd: Some(usd),
            ..Self::default()
        }
    }

    /// The quoted price when it can be used for arithmetic.
    pub fn usable_price(&self) -> Option<Decimal> {
        self.usd.filter(|p| p.is_sign_positive() && !p.is_zero())
    }
}

/// External price feed.
///
/// A partial result is not an error: symbols missing from the returned map
/// are treated as individually unavailable.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Currency every quote is expressed in.
    fn quote_currency(&self) -> &str {
        "USD"
    }

    async fn fetch_prices(&self, symbols: &HashSet<String>) -> Result<HashMap<String, PriceQuote>>;
}
