//! Portfolio model, holding/cash mutations and valuation metrics.
use crate::core::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Source of current unit prices used when valuing a portfolio.
#[async_trait]
pub trait PriceLookup: Send + Sync {
    /// Price of one unit of `symbol` expressed in `currency`.
    async fn price(&self, symbol: &str, currency: &str) -> Result<Decimal>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetHolding {
    pub symbol: String,
    pub amount: Decimal,
    pub cost_basis_per_unit: Decimal,
    pub last_priced_value: Decimal,
    pub acquired_at: DateTime<Utc>,
}

/// One owner's holdings and cash.
///
/// `total_value`, `total_invested`, `gain_loss` and `gain_loss_percent` are
/// only meaningful as of `last_recomputed_at`; mutations leave them stale
/// until [`recompute_metrics`] runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub owner_id: String,
    pub holdings: Vec<AssetHolding>,
    pub cash_by_symbol: BTreeMap<String, Decimal>,
    pub total_value: Decimal,
    pub total_invested: Decimal,
    pub gain_loss: Decimal,
    pub gain_loss_percent: Decimal,
    pub last_recomputed_at: Option<DateTime<Utc>>,
    /// Bumped by every mutation of holdings or cash.
    #[serde(default)]
    pub version: u64,
    /// Ledger entries already applied, keyed by entry reference, with the
    /// cost basis per unit each one moved.
    #[serde(default)]
    pub applied: BTreeMap<String, Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Portfolio {
    pub fn new(owner_id: &str) -> Self {
        let now = Utc::now();
        Self {
            owner_id: owner_id.to_string(),
            holdings: Vec::new(),
            cash_by_symbol: BTreeMap::new(),
            total_value: Decimal::ZERO,
            total_invested: Decimal::ZERO,
            gain_loss: Decimal::ZERO,
            gain_loss_percent: Decimal::ZERO,
            last_recomputed_at: None,
            version: 0,
            applied: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn holding(&self, symbol: &str) -> Option<&AssetHolding> {
        let symbol = symbol_key(symbol);
        self.holdings.iter().find(|h| h.symbol == symbol)
    }

    pub fn cash(&self, symbol: &str) -> Decimal {
        self.cash_by_symbol
            .get(&symbol_key(symbol))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Adds units of an asset. An existing holding of the same symbol is
    /// merged using the amount-weighted average cost basis.
    pub fn add_holding(
        &mut self,
        symbol: &str,
        amount: Decimal,
        cost_basis_per_unit: Decimal,
    ) -> Result<&mut Self> {
        let symbol = normalize_symbol(symbol)?;
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAsset(format!(
                "amount for {symbol} must be positive, got {amount}"
            )));
        }
        if cost_basis_per_unit <= Decimal::ZERO {
            return Err(LedgerError::InvalidAsset(format!(
                "cost basis for {symbol} must be positive, got {cost_basis_per_unit}"
            )));
        }

        match self.holdings.iter_mut().find(|h| h.symbol == symbol) {
            Some(existing) => {
                let merged = existing.amount.checked_add(amount).and_then(|total_amount| {
                    let total_cost = existing
                        .amount
                        .checked_mul(existing.cost_basis_per_unit)?
                        .checked_add(amount.checked_mul(cost_basis_per_unit)?)?;
                    Some((total_amount, total_cost.checked_div(total_amount)?))
                });
                let (total_amount, cost_basis) = merged.ok_or_else(|| overflows(&symbol))?;
                existing.cost_basis_per_unit = cost_basis;
                existing.amount = total_amount;
                debug!(
                    "Merged {} {} into holding, cost basis now {}",
                    amount, symbol, existing.cost_basis_per_unit
                );
            }
            None => self.holdings.push(AssetHolding {
                symbol,
                amount,
                cost_basis_per_unit,
                last_priced_value: Decimal::ZERO,
                acquired_at: Utc::now(),
            }),
        }
        Ok(self.touch())
    }

    pub fn remove_holding(&mut self, symbol: &str) -> Result<AssetHolding> {
        let index = self.position(symbol)?;
        let removed = self.holdings.remove(index);
        self.touch();
        Ok(removed)
    }

    /// Sets a holding's amount; zero removes the holding entirely.
    pub fn adjust_holding(&mut self, symbol: &str, new_amount: Decimal) -> Result<&mut Self> {
        let index = self.position(symbol)?;
        if new_amount < Decimal::ZERO {
            return Err(LedgerError::InvalidAsset(format!(
                "amount for {symbol} cannot be negative, got {new_amount}"
            )));
        }
        if new_amount.is_zero() {
            self.holdings.remove(index);
        } else {
            self.holdings[index].amount = new_amount;
        }
        Ok(self.touch())
    }

    /// Removes `amount` units from a holding, failing rather than going
    /// below zero.
    pub fn reduce_holding(&mut self, symbol: &str, amount: Decimal) -> Result<&mut Self> {
        ensure_positive(symbol, amount)?;
        let available = self.holding(symbol).map_or(Decimal::ZERO, |h| h.amount);
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                symbol: symbol_key(symbol),
                available,
                requested: amount,
            });
        }
        self.adjust_holding(symbol, available - amount)
    }

    pub fn credit_cash(&mut self, symbol: &str, amount: Decimal) -> Result<&mut Self> {
        let symbol = normalize_symbol(symbol)?;
        ensure_positive(&symbol, amount)?;
        let balance = self
            .cash(&symbol)
            .checked_add(amount)
            .ok_or_else(|| overflows(&symbol))?;
        self.cash_by_symbol.insert(symbol, balance);
        Ok(self.touch())
    }

    pub fn debit_cash(&mut self, symbol: &str, amount: Decimal) -> Result<&mut Self> {
        let symbol = normalize_symbol(symbol)?;
        ensure_positive(&symbol, amount)?;
        let available = self.cash(&symbol);
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                symbol,
                available,
                requested: amount,
            });
        }
        self.cash_by_symbol.insert(symbol, available - amount);
        Ok(self.touch())
    }

    fn position(&self, symbol: &str) -> Result<usize> {
        let symbol = symbol_key(symbol);
        self.holdings
            .iter()
            .position(|h| h.symbol == symbol)
            .ok_or(LedgerError::HoldingNotFound { symbol })
    }

    fn touch(&mut self) -> &mut Self {
        self.version += 1;
        self.updated_at = Utc::now();
        self
    }
}

/// Symbols are stored trimmed and upper-cased.
pub fn symbol_key(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

fn normalize_symbol(symbol: &str) -> Result<String> {
    let symbol = symbol_key(symbol);
    if symbol.is_empty() {
        return Err(LedgerError::InvalidAsset("symbol cannot be empty".to_string()));
    }
    Ok(symbol)
}

fn overflows(symbol: &str) -> LedgerError {
    LedgerError::InvalidAsset(format!("{symbol} balance overflows"))
}

fn ensure_positive(symbol: &str, amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAsset(format!(
            "amount for {symbol} must be positive, got {amount}"
        )));
    }
    Ok(())
}

/// Values every holding and cash balance from scratch in `currency`.
///
/// Cash counts at face value in both totals; cash held in another currency is
/// converted first. Any price that cannot be obtained fails the whole pass,
/// so the returned totals are never built from placeholders.
pub async fn recompute_metrics(
    portfolio: &Portfolio,
    prices: &dyn PriceLookup,
    currency: &str,
) -> Result<Portfolio> {
    let overflow = |symbol: &str| LedgerError::rate_unavailable(symbol, currency, "value overflows");
    let sum = |total: Decimal, value: Decimal, symbol: &str| {
        total.checked_add(value).ok_or_else(|| overflow(symbol))
    };

    let mut next = portfolio.clone();
    let mut total_value = Decimal::ZERO;
    let mut total_invested = Decimal::ZERO;

    for holding in &mut next.holdings {
        let price = prices.price(&holding.symbol, currency).await?;
        let current_value = holding
            .amount
            .checked_mul(price)
            .ok_or_else(|| overflow(&holding.symbol))?;
        let invested_value = holding
            .amount
            .checked_mul(holding.cost_basis_per_unit)
            .ok_or_else(|| overflow(&holding.symbol))?;
        holding.last_priced_value = current_value;
        total_value = sum(total_value, current_value, &holding.symbol)?;
        total_invested = sum(total_invested, invested_value, &holding.symbol)?;
    }

    for (symbol, balance) in &next.cash_by_symbol {
        let value = if symbol == currency {
            *balance
        } else if balance.is_zero() {
            Decimal::ZERO
        } else {
            balance
                .checked_mul(prices.price(symbol, currency).await?)
                .ok_or_else(|| overflow(symbol))?
        };
        total_value = sum(total_value, value, symbol)?;
        total_invested = sum(total_invested, value, symbol)?;
    }

    next.total_value = total_value;
    next.total_invested = total_invested;
    next.gain_loss = total_value - total_invested;
    next.gain_loss_percent = if total_invested > Decimal::ZERO {
        next.gain_loss
            .checked_div(total_invested)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .ok_or_else(|| overflow(&next.owner_id))?
    } else {
        Decimal::ZERO
    };
    next.last_recomputed_at = Some(Utc::now());

    debug!(
        "Recomputed {}: value {} invested {} gain {} ({}%)",
        next.owner_id, next.total_value, next.total_invested, next.gain_loss, next.gain_loss_percent
    );
    Ok(next)
}
