//! Transaction state machine over the ledger and converter.
//!
//! Every transaction starts `pending` and is dispatched by kind:
//!
//! * transfers settle immediately into `completed` or `failed`;
//! * payments wait in `awaiting_approval` for [`TransactionProcessor::approve`]
//!   or [`TransactionProcessor::cancel`];
//! * remittances escrow the source funds and wait in
//!   `awaiting_international_transfer` for
//!   [`TransactionProcessor::confirm`].
//!
//! Settlement failures caused by the business rules or the price feed end
//! the transaction in `failed` with the error recorded; they are returned as
//! part of the transaction, not as an `Err`.
//!
//! Each ledger movement is a [`LedgerStep`]. The step is saved on the
//! transaction before the ledger is touched and its ledger legs carry a
//! reference derived from the transaction id, so a step interrupted by a
//! store fault is finished on the next event (or by
//! [`TransactionProcessor::resume`]) without moving funds twice.

use crate::core::converter::Converter;
use crate::core::error::{LedgerError, Result};
use crate::core::ledger::{LedgerLeg, PortfolioLedger};
use crate::core::locks::KeyedLocks;
use crate::core::portfolio::symbol_key;
use crate::core::transaction::{
    LedgerStep, PartyDirectory, Settlement, Transaction, TransactionKind, TransactionRequest,
    TransactionState,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_LIST_LIMIT: usize = 50;

pub struct TransactionProcessor {
    ledger: Arc<PortfolioLedger>,
    converter: Converter,
    directory: Arc<dyn PartyDirectory>,
    locks: KeyedLocks,
}

impl TransactionProcessor {
    pub fn new(
        ledger: Arc<PortfolioLedger>,
        converter: Converter,
        directory: Arc<dyn PartyDirectory>,
    ) -> Self {
        Self {
            ledger,
            converter,
            directory,
            locks: KeyedLocks::new(),
        }
    }

    pub fn ledger(&self) -> &PortfolioLedger {
        &self.ledger
    }

    /// Validates and records a request, then dispatches it by kind.
    ///
    /// Returns `Err` only when the request is rejected up front (nothing is
    /// recorded) or the record store fails.
    #[instrument(skip(self, request), fields(owner = %request.owner_id, kind = request.kind.name()))]
    pub async fn create(&self, request: TransactionRequest) -> Result<Transaction> {
        let request = self.validate(request).await?;
        let mut tx = Transaction::new(request);

        let _guard = self.locks.lock(&tx.id).await;
        self.save(&tx).await?;
        info!("Created {} {} for {}", tx.kind.name(), tx.id, tx.owner_id);

        self.dispatch(&mut tx).await?;
        Ok(tx)
    }

    /// Settles a payment waiting for approval.
    #[instrument(skip(self))]
    pub async fn approve(&self, id: &str) -> Result<Transaction> {
        let _guard = self.locks.lock(id).await;
        let mut tx = self.get(id).await?;
        if self.recover(&mut tx).await? == Some(LedgerStep::Settle) {
            return Ok(tx);
        }
        ensure_open(&tx)?;

        match (&tx.kind, tx.state) {
            (TransactionKind::Payment { .. }, TransactionState::AwaitingApproval) => {}
            _ => return Err(not_applicable(&tx, "approve")),
        }
        self.run_step(&mut tx, LedgerStep::Settle).await?;
        Ok(tx)
    }

    /// Cancels a payment awaiting approval, or a remittance awaiting its
    /// international leg. A cancelled remittance returns its escrow.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &str) -> Result<Transaction> {
        let refund = LedgerStep::Refund { cancelled: true };
        let _guard = self.locks.lock(id).await;
        let mut tx = self.get(id).await?;
        if self.recover(&mut tx).await? == Some(refund) {
            return Ok(tx);
        }
        ensure_open(&tx)?;

        match (tx.kind.clone(), tx.state) {
            (TransactionKind::Payment { .. }, TransactionState::AwaitingApproval) => {
                transition(&mut tx, TransactionState::Cancelled)?;
                self.save(&tx).await?;
                info!("Cancelled {}", tx.id);
            }
            (TransactionKind::Remittance { .. }, TransactionState::AwaitingInternationalTransfer) => {
                self.run_step(&mut tx, refund).await?;
            }
            _ => return Err(not_applicable(&tx, "cancel")),
        }
        Ok(tx)
    }

    /// Applies the outcome of a remittance's international leg. Success
    /// credits the beneficiary; failure returns the escrow to the owner.
    /// Either outcome is final, so repeated signals are rejected.
    #[instrument(skip(self))]
    pub async fn confirm(&self, id: &str, delivered: bool) -> Result<Transaction> {
        let step = if delivered {
            LedgerStep::Deliver
        } else {
            LedgerStep::Refund { cancelled: false }
        };
        let _guard = self.locks.lock(id).await;
        let mut tx = self.get(id).await?;
        if self.recover(&mut tx).await? == Some(step) {
            return Ok(tx);
        }
        ensure_open(&tx)?;

        match (&tx.kind, tx.state) {
            (TransactionKind::Remittance { .. }, TransactionState::AwaitingInternationalTransfer) => {}
            _ => return Err(not_applicable(&tx, "confirm")),
        }
        if tx.settlement.is_none() {
            return Err(invalid(format!("{} has no captured settlement", tx.id)));
        }
        self.run_step(&mut tx, step).await?;
        Ok(tx)
    }

    /// Finishes a transaction left part-way by a record store fault: an
    /// interrupted ledger step is completed, and a transaction that never
    /// left `pending` or `transferring` is dispatched again. Anything else is
    /// returned unchanged.
    #[instrument(skip(self))]
    pub async fn resume(&self, id: &str) -> Result<Transaction> {
        let _guard = self.locks.lock(id).await;
        let mut tx = self.get(id).await?;
        if self.recover(&mut tx).await?.is_none() {
            self.dispatch(&mut tx).await?;
        }
        Ok(tx)
    }

    pub async fn get(&self, id: &str) -> Result<Transaction> {
        self.ledger
            .store()
            .get_transaction(id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))
    }

    /// The owner's transactions, newest first.
    pub async fn list_for_owner(&self, owner_id: &str, limit: usize) -> Result<Vec<Transaction>> {
        let mut transactions = self.ledger.store().list_transactions(owner_id).await?;
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        transactions.truncate(limit);
        Ok(transactions)
    }

    async fn validate(&self, mut request: TransactionRequest) -> Result<TransactionRequest> {
        if request.owner_id.trim().is_empty() {
            return Err(invalid("owner id cannot be empty"));
        }
        if request.amount <= Decimal::ZERO {
            return Err(invalid(format!("amount must be positive, got {}", request.amount)));
        }
        request.from_asset = symbol_key(&request.from_asset);
        request.to_asset = symbol_key(&request.to_asset);
        if request.from_asset.is_empty() || request.to_asset.is_empty() {
            return Err(invalid("asset symbols cannot be empty"));
        }

        if !self.directory.resolve(&request.owner_id).await {
            return Err(invalid(format!("unknown owner '{}'", request.owner_id)));
        }
        let counterparty = request.kind.counterparty();
        if !self.directory.resolve(counterparty).await {
            return Err(invalid(format!("unknown counterparty '{counterparty}'")));
        }
        Ok(request)
    }

    /// Moves a `pending` transaction into its kind's first step. A transfer
    /// found in `transferring` without a recorded step never reached the
    /// ledger and is settled again.
    async fn dispatch(&self, tx: &mut Transaction) -> Result<()> {
        match (tx.kind.clone(), tx.state) {
            (TransactionKind::Transfer { .. }, TransactionState::Pending) => {
                transition(tx, TransactionState::Transferring)?;
                self.save(tx).await?;
                self.run_step(tx, LedgerStep::Settle).await
            }
            (TransactionKind::Transfer { .. }, TransactionState::Transferring) => {
                self.run_step(tx, LedgerStep::Settle).await
            }
            (TransactionKind::Payment { .. }, TransactionState::Pending) => {
                transition(tx, TransactionState::AwaitingApproval)?;
                self.save(tx).await
            }
            (TransactionKind::Remittance { .. }, TransactionState::Pending) => {
                self.run_step(tx, LedgerStep::Escrow).await
            }
            _ => Ok(()),
        }
    }

    /// Completes the step an earlier call saved but never finished. Returns
    /// the step that was completed, if any.
    async fn recover(&self, tx: &mut Transaction) -> Result<Option<LedgerStep>> {
        let Some(step) = tx.step else {
            return Ok(None);
        };
        warn!("Finishing interrupted {} step of {}", step.name(), tx.id);
        self.run_step(tx, step).await?;
        Ok(Some(step))
    }

    /// Captures the rate and the amounts derived from it.
    async fn quote(&self, tx: &Transaction) -> Result<(Decimal, Settlement)> {
        let rate = self.converter.rate(&tx.from_asset, &tx.to_asset).await?;
        let settled_amount = tx.amount.checked_mul(rate).ok_or_else(|| {
            LedgerError::rate_unavailable(&tx.from_asset, &tx.to_asset, "settled amount overflows")
        })?;
        let credit_cost_basis = if self.ledger.is_fiat(&tx.to_asset) {
            Decimal::ZERO
        } else {
            self.converter
                .rate(&tx.to_asset, self.converter.pivot())
                .await?
        };
        Ok((
            rate,
            Settlement {
                settled_amount,
                credit_cost_basis,
                escrow_cost_basis: Decimal::ZERO,
            },
        ))
    }

    /// Records `step` on the transaction, applies it to the ledger and saves
    /// the outcome. The rate is captured first unless an earlier attempt
    /// already captured it.
    ///
    /// Business and rate failures while settling or escrowing fail the
    /// transaction. A rejected delivery or refund leaves the transaction
    /// where it was and returns the error.
    async fn run_step(&self, tx: &mut Transaction, step: LedgerStep) -> Result<()> {
        if tx.settlement.is_none() {
            match self.quote(tx).await {
                Ok((rate, settlement)) => {
                    tx.rate_at_execution = Some(rate);
                    tx.settlement = Some(settlement);
                }
                Err(LedgerError::Storage(reason)) => return Err(LedgerError::Storage(reason)),
                Err(e) => {
                    self.fail(tx, e)?;
                    return self.save(tx).await;
                }
            }
        }

        tx.step = Some(step);
        self.save(tx).await?;

        match self.apply_step(tx, step).await {
            Ok(()) => self.finish_step(tx, step)?,
            Err(LedgerError::Storage(reason)) => return Err(LedgerError::Storage(reason)),
            Err(e) => {
                tx.step = None;
                match step {
                    LedgerStep::Settle | LedgerStep::Escrow => self.fail(tx, e)?,
                    LedgerStep::Deliver | LedgerStep::Refund { .. } => {
                        self.save(tx).await?;
                        return Err(e);
                    }
                }
            }
        }
        self.save(tx).await
    }

    async fn apply_step(&self, tx: &mut Transaction, step: LedgerStep) -> Result<()> {
        let settlement = tx
            .settlement
            .clone()
            .ok_or_else(|| invalid(format!("{} has no captured settlement", tx.id)))?;
        let reference = format!("{}:{}", tx.id, step.name());
        let owner_leg =
            LedgerLeg::new(&tx.owner_id, &tx.from_asset, tx.amount).with_reference(&reference);
        let counterparty_leg =
            LedgerLeg::new(tx.kind.counterparty(), &tx.to_asset, settlement.settled_amount)
                .with_cost_basis(settlement.credit_cost_basis)
                .with_reference(&reference);

        match step {
            LedgerStep::Settle => {
                self.ledger
                    .apply_transfer(&owner_leg, &counterparty_leg)
                    .await
            }
            LedgerStep::Escrow => {
                let (_, escrow_cost_basis) = self.ledger.debit_asset(&owner_leg).await?;
                if let Some(settlement) = tx.settlement.as_mut() {
                    settlement.escrow_cost_basis = escrow_cost_basis;
                }
                Ok(())
            }
            LedgerStep::Deliver => self.ledger.credit_asset(&counterparty_leg).await.map(|_| ()),
            LedgerStep::Refund { .. } => {
                let refund = owner_leg.with_cost_basis(settlement.escrow_cost_basis);
                self.ledger.credit_asset(&refund).await?;
                debug!("Refunded {} {} for {}", tx.amount, tx.from_asset, tx.id);
                Ok(())
            }
        }
    }

    fn finish_step(&self, tx: &mut Transaction, step: LedgerStep) -> Result<()> {
        tx.step = None;
        match step {
            LedgerStep::Settle => {
                transition(tx, TransactionState::Completed)?;
                info!("Settled {} to {}", tx.id, tx.kind.counterparty());
            }
            LedgerStep::Escrow => {
                transition(tx, TransactionState::AwaitingInternationalTransfer)?;
                debug!("Escrowed {} {} for {}", tx.amount, tx.from_asset, tx.id);
            }
            LedgerStep::Deliver => {
                transition(tx, TransactionState::Completed)?;
                info!("Remittance {} delivered to {}", tx.id, tx.kind.counterparty());
            }
            LedgerStep::Refund { cancelled: true } => {
                transition(tx, TransactionState::Cancelled)?;
                info!("Cancelled {}", tx.id);
            }
            LedgerStep::Refund { cancelled: false } => {
                tx.failure = Some(LedgerError::InvalidTransaction(
                    "international transfer failed".to_string(),
                ));
                transition(tx, TransactionState::Failed)?;
                warn!("Remittance {} failed, escrow returned to {}", tx.id, tx.owner_id);
            }
        }
        Ok(())
    }

    fn fail(&self, tx: &mut Transaction, error: LedgerError) -> Result<()> {
        warn!(error = %error, "Transaction {} failed", tx.id);
        tx.failure = Some(error);
        transition(tx, TransactionState::Failed)
    }

    async fn save(&self, tx: &Transaction) -> Result<()> {
        self.ledger.store().put_transaction(tx).await
    }
}

fn ensure_open(tx: &Transaction) -> Result<()> {
    if tx.is_terminal() {
        return Err(LedgerError::AlreadyFinalized {
            id: tx.id.clone(),
            state: tx.state.to_string(),
        });
    }
    Ok(())
}

fn transition(tx: &mut Transaction, next: TransactionState) -> Result<()> {
    if !tx.state.can_transition_to(next) {
        if tx.is_terminal() {
            return Err(LedgerError::AlreadyFinalized {
                id: tx.id.clone(),
                state: tx.state.to_string(),
            });
        }
        return Err(invalid(format!("{} cannot move from {} to {}", tx.id, tx.state, next)));
    }
    let now = Utc::now();
    tx.state = next;
    tx.updated_at = now;
    if next.is_terminal() {
        tx.completed_at = Some(now);
    }
    Ok(())
}

fn not_applicable(tx: &Transaction, event: &str) -> LedgerError {
    invalid(format!(
        "cannot {} {} {} in state {}",
        event,
        tx.kind.name(),
        tx.id,
        tx.state
    ))
}

fn invalid(reason: impl Into<String>) -> LedgerError {
    LedgerError::InvalidTransaction(reason.into())
}
