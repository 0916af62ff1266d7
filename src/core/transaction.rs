//! Transaction model and settlement states.

use crate::core::error::LedgerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Display;
use uuid::Uuid;

/// Kind of movement, carrying the counterparty that receives the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionKind {
    /// Immediate conversion into `recipient`'s account (may be the owner).
    Transfer { recipient: String },
    /// Held until an external approval arrives.
    Payment { payee: String },
    /// Source funds escrowed until the international leg is confirmed.
    Remittance { beneficiary: String },
}

impl TransactionKind {
    pub fn counterparty(&self) -> &str {
        match self {
            TransactionKind::Transfer { recipient } => recipient,
            TransactionKind::Payment { payee } => payee,
            TransactionKind::Remittance { beneficiary } => beneficiary,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransactionKind::Transfer { .. } => "transfer",
            TransactionKind::Payment { .. } => "payment",
            TransactionKind::Remittance { .. } => "remittance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    Transferring,
    AwaitingApproval,
    AwaitingInternationalTransfer,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Completed | TransactionState::Failed | TransactionState::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TransactionState) -> bool {
        use TransactionState::*;
        match self {
            Pending => matches!(
                next,
                Transferring | AwaitingApproval | AwaitingInternationalTransfer | Failed
            ),
            Transferring | AwaitingApproval | AwaitingInternationalTransfer => {
                matches!(next, Completed | Failed | Cancelled)
            }
            Completed | Failed | Cancelled => false,
        }
    }
}

impl Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                TransactionState::Pending => "pending",
                TransactionState::Transferring => "transferring",
                TransactionState::AwaitingApproval => "awaiting_approval",
                TransactionState::AwaitingInternationalTransfer => "awaiting_international_transfer",
                TransactionState::Completed => "completed",
                TransactionState::Failed => "failed",
                TransactionState::Cancelled => "cancelled",
            }
        )
    }
}

/// Inbound request to move value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub owner_id: String,
    pub kind: TransactionKind,
    pub from_asset: String,
    pub to_asset: String,
    pub amount: Decimal,
    pub description: Option<String>,
}

/// Amounts fixed when a transaction's rate is captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    /// Units of `to_asset` credited (or to be credited) to the counterparty.
    pub settled_amount: Decimal,
    /// Pivot-currency cost per unit recorded when `to_asset` lands as a
    /// holding.
    pub credit_cost_basis: Decimal,
    /// Cost per unit of the debited `from_asset` units, used to restore them
    /// on a refund.
    pub escrow_cost_basis: Decimal,
}

/// A ledger movement a transaction has committed to. It is recorded on the
/// transaction before the ledger is touched and cleared once the outcome is
/// saved, so a store fault in between can be finished instead of repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStep {
    /// Owner to counterparty, for transfers and approved payments.
    Settle,
    /// Source funds taken from the owner for a remittance.
    Escrow,
    /// Escrowed value credited to the beneficiary.
    Deliver,
    /// Escrow returned to the owner, on cancellation or a failed leg.
    Refund { cancelled: bool },
}

impl LedgerStep {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerStep::Settle => "settle",
            LedgerStep::Escrow => "escrow",
            LedgerStep::Deliver => "deliver",
            LedgerStep::Refund { .. } => "refund",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub owner_id: String,
    pub kind: TransactionKind,
    pub from_asset: String,
    pub to_asset: String,
    pub amount: Decimal,
    /// Units of `to_asset` per unit of `from_asset`, fixed once captured.
    pub rate_at_execution: Option<Decimal>,
    pub settlement: Option<Settlement>,
    pub state: TransactionState,
    pub description: Option<String>,
    /// Why the transaction ended in `failed`.
    pub failure: Option<LedgerError>,
    /// Ledger step started but not yet recorded as done.
    #[serde(default)]
    pub step: Option<LedgerStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(request: TransactionRequest) -> Self {
        let now = Utc::now();
        Self {
            id: new_transaction_id(),
            owner_id: request.owner_id,
            kind: request.kind,
            from_asset: request.from_asset,
            to_asset: request.to_asset,
            amount: request.amount,
            rate_at_execution: None,
            settlement: None,
            state: TransactionState::Pending,
            description: request.description,
            failure: None,
            step: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Time-ordered ids: a UUIDv7 combines a millisecond timestamp with random
/// bits, so concurrent creations never collide.
pub fn new_transaction_id() -> String {
    format!("txn_{}", Uuid::now_v7().simple())
}

/// Resolves whether a party id refers to a known account.
#[async_trait]
pub trait PartyDirectory: Send + Sync {
    async fn resolve(&self, party_id: &str) -> bool;
}

/// Accepts any non-blank party id.
pub struct OpenDirectory;

#[async_trait]
impl PartyDirectory for OpenDirectory {
    async fn resolve(&self, party_id: &str) -> bool {
        !party_id.trim().is_empty()
    }
}

/// Accepts only the listed parties.
pub struct KnownParties(pub HashSet<String>);

#[async_trait]
impl PartyDirectory for KnownParties {
    async fn resolve(&self, party_id: &str) -> bool {
        self.0.contains(party_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_terminal_states_have_no_exits() {
        use TransactionState::*;
        let all = [
            Pending,
            Transferring,
            AwaitingApproval,
            AwaitingInternationalTransfer,
            Completed,
            Failed,
            Cancelled,
        ];
        for state in [Completed, Failed, Cancelled] {
            assert!(state.is_terminal());
            assert!(all.iter().all(|next| !state.can_transition_to(*next)));
        }
        assert!(Pending.can_transition_to(AwaitingApproval));
        assert!(!Pending.can_transition_to(Completed));
        assert!(AwaitingInternationalTransfer.can_transition_to(Failed));
    }

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<String> = (0..10_000).map(|_| new_transaction_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_new_transaction_starts_pending() {
        let tx = Transaction::new(TransactionRequest {
            owner_id: "alice".to_string(),
            kind: TransactionKind::Payment {
                payee: "shop".to_string(),
            },
            from_asset: "USD".to_string(),
            to_asset: "USD".to_string(),
            amount: dec!(25),
            description: None,
        });
        assert_eq!(tx.state, TransactionState::Pending);
        assert!(tx.rate_at_execution.is_none());
        assert!(tx.completed_at.is_none());
        assert!(tx.id.starts_with("txn_"));
        assert_eq!(tx.kind.counterparty(), "shop");
    }

    #[test]
    fn test_kind_serializes_with_tag() {
        let kind = TransactionKind::Remittance {
            beneficiary: "bob".to_string(),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, r#"{"type":"remittance","beneficiary":"bob"}"#);
        assert_eq!(TransactionState::AwaitingApproval.to_string(), "awaiting_approval");

        let step = serde_json::to_string(&LedgerStep::Refund { cancelled: true }).unwrap();
        assert_eq!(step, r#"{"refund":{"cancelled":true}}"#);
    }

    #[tokio::test]
    async fn test_party_directories() {
        assert!(OpenDirectory.resolve("alice").await);
        assert!(!OpenDirectory.resolve(" ").await);

        let known = KnownParties(HashSet::from(["alice".to_string()]));
        assert!(known.resolve("alice").await);
        assert!(!known.resolve("mallory").await);
    }
}
