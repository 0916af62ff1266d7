//! Valuation and settlement core

pub mod cache;
pub mod config;
pub mod converter;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod log;
pub mod portfolio;
pub mod processor;
pub mod rate;
pub mod store;
pub mod transaction;

// Re-export main types for cleaner imports
pub use cache::{RateCache, RateCacheEntry};
pub use converter::Converter;
pub use error::{LedgerError, Result};
pub use ledger::{LedgerLeg, PortfolioLedger};
pub use portfolio::{AssetHolding, Portfolio, PriceLookup};
pub use processor::TransactionProcessor;
pub use rate::{PairKey, PriceQuote, RateSource};
pub use store::RecordStore;
pub use transaction::{
    PartyDirectory, Transaction, TransactionKind, TransactionRequest, TransactionState,
};
