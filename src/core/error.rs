//! Error taxonomy shared by the valuation and settlement core.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by the rate cache, converter, ledger and processor.
///
/// The type is `Clone` because a single coalesced rate fetch hands the same
/// outcome to every waiting caller, and serializable because a failed
/// transaction records the error that failed it.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerError {
    /// A holding or cash operation was given an unusable amount or symbol.
    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    /// A transaction request or event was rejected.
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Holding not found: {symbol}")]
    HoldingNotFound { symbol: String },

    /// The debit would take a balance below zero.
    #[error("Insufficient funds: {symbol} balance {available} is below {requested}")]
    InsufficientFunds {
        symbol: String,
        available: Decimal,
        requested: Decimal,
    },

    /// No usable price could be obtained for the pair.
    #[error("Rate unavailable for {from}/{to}: {reason}")]
    RateUnavailable {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Transaction {id} is already finalized ({state})")]
    AlreadyFinalized { id: String, state: String },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// The record store failed to read or write.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn rate_unavailable(from: &str, to: &str, reason: impl Into<String>) -> Self {
        LedgerError::RateUnavailable {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }

    /// True for outcomes produced by business rules, false for faults in an
    /// external system (price feed, record store).
    pub fn is_business_outcome(&self) -> bool {
        !matches!(
            self,
            LedgerError::RateUnavailable { .. } | LedgerError::Storage(_)
        )
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<fjall::Error> for LedgerError {
    fn from(err: fjall::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insufficient_funds_is_a_business_outcome() {
        let err = LedgerError::InsufficientFunds {
            symbol: "USD".to_string(),
            available: dec!(10),
            requested: dec!(20),
        };
        assert!(err.is_business_outcome());
        assert_eq!(
            err.to_string(),
            "Insufficient funds: USD balance 10 is below 20"
        );

        let err = LedgerError::rate_unavailable("BTC", "USD", "timed out");
        assert!(!err.is_business_outcome());
        assert_eq!(err.to_string(), "Rate unavailable for BTC/USD: timed out");
        assert!(!LedgerError::Storage("disk full".to_string()).is_business_outcome());
    }
}
