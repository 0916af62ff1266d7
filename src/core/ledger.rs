//! Owner-scoped ledger service over the record store.

use crate::core::error::{LedgerError, Result};
use crate::core::locks::KeyedLocks;
use crate::core::portfolio::{self, Portfolio, PriceLookup, symbol_key};
use crate::core::store::RecordStore;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

const RECOMPUTE_ATTEMPTS: usize = 3;

/// One side of a ledger movement.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerLeg {
    pub owner_id: String,
    pub symbol: String,
    pub amount: Decimal,
    /// Cost basis recorded when the leg credits a non-cash asset.
    pub cost_basis_per_unit: Decimal,
    /// Marks the leg as applied at most once per owner.
    pub reference: Option<String>,
}

impl LedgerLeg {
    pub fn new(owner_id: &str, symbol: &str, amount: Decimal) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            symbol: symbol.to_string(),
            amount,
            cost_basis_per_unit: Decimal::ZERO,
            reference: None,
        }
    }

    pub fn with_cost_basis(mut self, cost_basis_per_unit: Decimal) -> Self {
        self.cost_basis_per_unit = cost_basis_per_unit;
        self
    }

    /// Makes the leg idempotent: once applied under `reference`, applying it
    /// again leaves the portfolio unchanged.
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    fn entry(&self, side: &str) -> Option<String> {
        self.reference.as_ref().map(|r| format!("{r}/{side}"))
    }
}

/// Holds every owner's portfolio and serializes mutations per owner.
///
/// Fiat symbols live in `cash_by_symbol`; every other symbol is a holding.
pub struct PortfolioLedger {
    store: Arc<dyn RecordStore>,
    locks: KeyedLocks,
    fiat: HashSet<String>,
    default_cash: BTreeMap<String, Decimal>,
}

impl PortfolioLedger {
    pub fn new<I, S>(store: Arc<dyn RecordStore>, fiat: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            store,
            locks: KeyedLocks::new(),
            fiat: fiat.into_iter().map(|s| symbol_key(s.as_ref())).collect(),
            default_cash: BTreeMap::new(),
        }
    }

    /// Cash balances given to a portfolio when it is first created.
    pub fn with_default_cash(mut self, default_cash: BTreeMap<String, Decimal>) -> Self {
        self.default_cash = default_cash
            .into_iter()
            .map(|(symbol, amount)| (symbol_key(&symbol), amount))
            .collect();
        self
    }

    pub fn is_fiat(&self, symbol: &str) -> bool {
        self.fiat.contains(&symbol_key(symbol))
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Returns the owner's portfolio, creating it on first access.
    pub async fn portfolio(&self, owner_id: &str) -> Result<Portfolio> {
        if let Some(portfolio) = self.store.get_portfolio(owner_id).await? {
            return Ok(portfolio);
        }
        let _guard = self.locks.lock(owner_id).await;
        self.load_or_create(owner_id).await
    }

    /// Creates the portfolio with the given contents unless it already
    /// exists. Returns whether it was created.
    pub async fn seed(
        &self,
        owner_id: &str,
        cash: &BTreeMap<String, Decimal>,
        holdings: &[(String, Decimal, Decimal)],
    ) -> Result<bool> {
        let _guard = self.locks.lock(owner_id).await;
        if self.store.get_portfolio(owner_id).await?.is_some() {
            return Ok(false);
        }

        let mut portfolio = Portfolio::new(owner_id);
        for (symbol, amount) in cash.iter().filter(|(_, a)| !a.is_zero()) {
            self.ensure_cash(symbol)?;
            portfolio.credit_cash(symbol, *amount)?;
        }
        for (symbol, amount, cost_basis) in holdings {
            self.ensure_holding(symbol)?;
            portfolio.add_holding(symbol, *amount, *cost_basis)?;
        }
        self.store.put_portfolio(&portfolio).await?;
        info!("Seeded portfolio for {}", owner_id);
        Ok(true)
    }

    /// Applies `f` to the owner's portfolio inside the owner's exclusive
    /// section. `f` works on a copy; the copy is only persisted if `f`
    /// succeeds, so a failed mutation leaves no trace.
    pub async fn mutate<T, F>(&self, owner_id: &str, f: F) -> Result<(Portfolio, T)>
    where
        F: FnOnce(&mut Portfolio) -> Result<T> + Send,
    {
        let _guard = self.locks.lock(owner_id).await;
        let mut portfolio = self.load_or_create(owner_id).await?;
        let output = f(&mut portfolio)?;
        self.store.put_portfolio(&portfolio).await?;
        Ok((portfolio, output))
    }

    pub async fn add_holding(
        &self,
        owner_id: &str,
        symbol: &str,
        amount: Decimal,
        cost_basis_per_unit: Decimal,
    ) -> Result<Portfolio> {
        self.ensure_holding(symbol)?;
        self.mutate(owner_id, |p| {
            p.add_holding(symbol, amount, cost_basis_per_unit).map(|_| ())
        })
        .await
        .map(|(p, _)| p)
    }

    pub async fn remove_holding(&self, owner_id: &str, symbol: &str) -> Result<Portfolio> {
        self.ensure_holding(symbol)?;
        self.mutate(owner_id, |p| p.remove_holding(symbol).map(|_| ()))
            .await
            .map(|(p, _)| p)
    }

    pub async fn adjust_holding(
        &self,
        owner_id: &str,
        symbol: &str,
        new_amount: Decimal,
    ) -> Result<Portfolio> {
        self.ensure_holding(symbol)?;
        self.mutate(owner_id, |p| p.adjust_holding(symbol, new_amount).map(|_| ()))
            .await
            .map(|(p, _)| p)
    }

    pub async fn credit_cash(&self, owner_id: &str, symbol: &str, amount: Decimal) -> Result<Portfolio> {
        self.ensure_cash(symbol)?;
        self.mutate(owner_id, |p| p.credit_cash(symbol, amount).map(|_| ()))
            .await
            .map(|(p, _)| p)
    }

    pub async fn debit_cash(&self, owner_id: &str, symbol: &str, amount: Decimal) -> Result<Portfolio> {
        self.ensure_cash(symbol)?;
        self.mutate(owner_id, |p| p.debit_cash(symbol, amount).map(|_| ()))
            .await
            .map(|(p, _)| p)
    }

    /// Debits cash for fiat symbols, holding units otherwise. Returns the
    /// cost basis per unit of the debited units (zero for cash).
    pub async fn debit_asset(&self, leg: &LedgerLeg) -> Result<(Portfolio, Decimal)> {
        self.mutate(&leg.owner_id, |p| self.debit_in(p, leg)).await
    }

    /// Credits cash for fiat symbols, holding units otherwise.
    pub async fn credit_asset(&self, leg: &LedgerLeg) -> Result<Portfolio> {
        self.mutate(&leg.owner_id, |p| self.credit_in(p, leg))
            .await
            .map(|(p, _)| p)
    }

    /// Debits one leg and credits the other as a single step. Both owners are
    /// locked for the duration; if the debit fails nothing is written.
    ///
    /// With referenced legs a repeated call only applies the side that is
    /// still missing.
    pub async fn apply_transfer(&self, debit: &LedgerLeg, credit: &LedgerLeg) -> Result<()> {
        let _guards = self
            .locks
            .lock_pair(&debit.owner_id, &credit.owner_id)
            .await;

        if debit.owner_id == credit.owner_id {
            let mut portfolio = self.load_or_create(&debit.owner_id).await?;
            self.debit_in(&mut portfolio, debit)?;
            self.credit_in(&mut portfolio, credit)?;
            return self.store.put_portfolio(&portfolio).await;
        }

        let original = self.load_or_create(&debit.owner_id).await?;
        let mut source = original.clone();
        let mut destination = self.load_or_create(&credit.owner_id).await?;
        self.debit_in(&mut source, debit)?;
        self.credit_in(&mut destination, credit)?;

        self.store.put_portfolio(&source).await?;
        if let Err(e) = self.store.put_portfolio(&destination).await {
            warn!(error = %e, "Credit to {} failed, restoring {}", credit.owner_id, debit.owner_id);
            self.store.put_portfolio(&original).await?;
            return Err(e);
        }
        debug!(
            "Moved {} {} from {} to {} {} for {}",
            debit.amount, debit.symbol, debit.owner_id, credit.amount, credit.symbol, credit.owner_id
        );
        Ok(())
    }

    /// Values the owner's portfolio and persists the metrics.
    ///
    /// Pricing runs outside the owner's lock. The result is only written back
    /// if no mutation landed in the meantime; otherwise the pass is repeated
    /// against the newer state.
    pub async fn recompute_metrics(
        &self,
        owner_id: &str,
        prices: &dyn PriceLookup,
        currency: &str,
    ) -> Result<Portfolio> {
        let mut snapshot = self.portfolio(owner_id).await?;
        for attempt in 1..=RECOMPUTE_ATTEMPTS {
            let valued = portfolio::recompute_metrics(&snapshot, prices, currency).await?;

            let _guard = self.locks.lock(owner_id).await;
            let current = self.load_or_create(owner_id).await?;
            if current.version == valued.version {
                self.store.put_portfolio(&valued).await?;
                return Ok(valued);
            }
            debug!(
                "Portfolio {} changed during valuation (attempt {}), recomputing",
                owner_id, attempt
            );
            snapshot = current;
        }
        portfolio::recompute_metrics(&snapshot, prices, currency).await
    }

    async fn load_or_create(&self, owner_id: &str) -> Result<Portfolio> {
        if let Some(portfolio) = self.store.get_portfolio(owner_id).await? {
            return Ok(portfolio);
        }
        if owner_id.trim().is_empty() {
            return Err(LedgerError::InvalidTransaction(
                "owner id cannot be empty".to_string(),
            ));
        }
        let mut portfolio = Portfolio::new(owner_id);
        portfolio.cash_by_symbol = self.default_cash.clone();
        self.store.put_portfolio(&portfolio).await?;
        debug!("Created portfolio for {}", owner_id);
        Ok(portfolio)
    }

    fn ensure_holding(&self, symbol: &str) -> Result<()> {
        if self.is_fiat(symbol) {
            return Err(LedgerError::InvalidAsset(format!(
                "{} is a cash currency, not a holding",
                symbol_key(symbol)
            )));
        }
        Ok(())
    }

    fn ensure_cash(&self, symbol: &str) -> Result<()> {
        if !self.is_fiat(symbol) {
            return Err(LedgerError::InvalidAsset(format!(
                "{} is not a cash currency",
                symbol_key(symbol)
            )));
        }
        Ok(())
    }

    fn debit_in(&self, portfolio: &mut Portfolio, leg: &LedgerLeg) -> Result<Decimal> {
        let entry = leg.entry("debit");
        if let Some(cost_basis) = entry.as_ref().and_then(|e| portfolio.applied.get(e)) {
            debug!("Debit {:?} already applied for {}", entry, leg.owner_id);
            return Ok(*cost_basis);
        }

        let cost_basis = if self.is_fiat(&leg.symbol) {
            portfolio.debit_cash(&leg.symbol, leg.amount)?;
            Decimal::ZERO
        } else {
            let cost_basis = portfolio
                .holding(&leg.symbol)
                .map(|h| h.cost_basis_per_unit)
                .unwrap_or_default();
            portfolio.reduce_holding(&leg.symbol, leg.amount)?;
            cost_basis
        };
        if let Some(entry) = entry {
            portfolio.applied.insert(entry, cost_basis);
        }
        Ok(cost_basis)
    }

    fn credit_in(&self, portfolio: &mut Portfolio, leg: &LedgerLeg) -> Result<()> {
        let entry = leg.entry("credit");
        if entry.as_ref().is_some_and(|e| portfolio.applied.contains_key(e)) {
            debug!("Credit {:?} already applied for {}", entry, leg.owner_id);
            return Ok(());
        }

        if self.is_fiat(&leg.symbol) {
            portfolio.credit_cash(&leg.symbol, leg.amount)?;
        } else {
            portfolio.add_holding(&leg.symbol, leg.amount, leg.cost_basis_per_unit)?;
        }
        if let Some(entry) = entry {
            portfolio.applied.insert(entry, leg.cost_basis_per_unit);
        }
        Ok(())
    }
}
