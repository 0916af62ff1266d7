//! Cross-asset conversion through a single pivot currency.

use crate::core::cache::RateCache;
use crate::core::error::{LedgerError, Result};
use crate::core::portfolio::PriceLookup;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

/// Turns cached "asset priced in pivot" lookups into arbitrary pair rates.
///
/// Only `(asset, pivot)` pairs ever reach the cache, so the feed never needs
/// to support every pairwise combination directly.
#[derive(Clone)]
pub struct Converter {
    cache: Arc<RateCache>,
    pivot: String,
}

impl Converter {
    pub fn new(cache: Arc<RateCache>, pivot: &str) -> Self {
        Self {
            cache,
            pivot: pivot.to_string(),
        }
    }

    pub fn pivot(&self) -> &str {
        &self.pivot
    }

    /// Price of one unit of `from` in `to`.
    pub async fn rate(&self, from: &str, to: &str) -> Result<Decimal> {
        if from == to {
            return Ok(Decimal::ONE);
        }

        let rate = if to == self.pivot {
            self.cache.get(from, &self.pivot).await?
        } else if from == self.pivot {
            let price = self.cache.get(to, &self.pivot).await?;
            invert(from, to, price)?
        } else {
            let (from_price, to_price) = futures::try_join!(
                self.cache.get(from, &self.pivot),
                self.cache.get(to, &self.pivot)
            )?;
            divide(from, to, from_price, to_price)?
        };

        debug!("Rate {}/{} via {}: {}", from, to, self.pivot, rate);
        Ok(rate)
    }

    pub async fn convert(&self, amount: Decimal, from: &str, to: &str) -> Result<Decimal> {
        if from == to {
            return Ok(amount);
        }
        let rate = self.rate(from, to).await?;
        amount
            .checked_mul(rate)
            .ok_or_else(|| LedgerError::rate_unavailable(from, to, "converted amount overflows"))
    }
}

fn invert(from: &str, to: &str, price: Decimal) -> Result<Decimal> {
    divide(from, to, Decimal::ONE, price)
}

fn divide(from: &str, to: &str, numerator: Decimal, denominator: Decimal) -> Result<Decimal> {
    if denominator.is_zero() {
        return Err(LedgerError::rate_unavailable(from, to, format!("zero price for {to}")));
    }
    numerator
        .checked_div(denominator)
        .ok_or_else(|| LedgerError::rate_unavailable(from, to, "rate out of range"))
}

#[async_trait]
impl PriceLookup for Converter {
    async fn price(&self, symbol: &str, currency: &str) -> Result<Decimal> {
        self.rate(symbol, currency).await
    }
}
