use crate::core::error::Result;
use crate::core::portfolio::Portfolio;
use crate::core::store::RecordStore;
use crate::core::transaction::Transaction;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// In-process record store. Contents live as long as the value.
#[derive(Default)]
pub struct MemoryStore {
    portfolios: RwLock<HashMap<String, Portfolio>>,
    transactions: RwLock<HashMap<String, Transaction>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_portfolio(&self, owner_id: &str) -> Result<Option<Portfolio>> {
        Ok(self.portfolios.read().await.get(owner_id).cloned())
    }

    async fn put_portfolio(&self, portfolio: &Portfolio) -> Result<()> {
        debug!("Store PUT portfolio {}", portfolio.owner_id);
        self.portfolios
            .write()
            .await
            .insert(portfolio.owner_id.clone(), portfolio.clone());
        Ok(())
    }

    async fn delete_portfolio(&self, owner_id: &str) -> Result<()> {
        self.portfolios.write().await.remove(owner_id);
        Ok(())
    }

    async fn get_transaction(&self, id: &str) -> Result<Option<Transaction>> {
        Ok(self.transactions.read().await.get(id).cloned())
    }

    async fn put_transaction(&self, transaction: &Transaction) -> Result<()> {
        debug!(
            "Store PUT transaction {} ({})",
            transaction.id, transaction.state
        );
        self.transactions
            .write()
            .await
            .insert(transaction.id.clone(), transaction.clone());
        Ok(())
    }

    async fn delete_transaction(&self, id: &str) -> Result<()> {
        self.transactions.write().await.remove(id);
        Ok(())
    }

    async fn list_transactions(&self, owner_id: &str) -> Result<Vec<Transaction>> {
        Ok(self
            .transactions
            .read()
            .await
            .values()
            .filter(|tx| tx.owner_id == owner_id)
            .cloned()
            .collect())
    }
}
