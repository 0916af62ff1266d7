//! Record store abstraction for portfolios and transactions.

use crate::core::error::Result;
use crate::core::portfolio::Portfolio;
use crate::core::transaction::Transaction;
use async_trait::async_trait;

/// Keyed persistence for portfolios (by owner id) and transactions (by id).
///
/// Implementations must provide read-after-write consistency for a single
/// owner's records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_portfolio(&self, owner_id: &str) -> Result<Option<Portfolio>>;

    async fn put_portfolio(&self, portfolio: &Portfolio) -> Result<()>;

    async fn delete_portfolio(&self, owner_id: &str) -> Result<()>;

    async fn get_transaction(&self, id: &str) -> Result<Option<Transaction>>;

    async fn put_transaction(&self, transaction: &Transaction) -> Result<()>;

    async fn delete_transaction(&self, id: &str) -> Result<()>;

    /// All transactions where `owner_id` is the initiating owner, in no
    /// particular order.
    async fn list_transactions(&self, owner_id: &str) -> Result<Vec<Transaction>>;
}
