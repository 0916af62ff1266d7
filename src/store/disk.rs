use crate::core::error::Result;
use crate::core::portfolio::Portfolio;
use crate::core::store::RecordStore;
use crate::core::transaction::Transaction;
use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::Path;
use tracing::debug;

const PORTFOLIOS: &str = "portfolios";
const TRANSACTIONS: &str = "transactions";
const OWNER_INDEX: &str = "owner_transactions";

/// Record store on a fjall keyspace. Records are stored as JSON; an index
/// partition keyed by `owner \0 id` serves per-owner listings.
pub struct DiskStore {
    keyspace: Keyspace,
    portfolios: PartitionHandle,
    transactions: PartitionHandle,
    owner_index: PartitionHandle,
}

impl DiskStore {
    pub fn open(path: &Path) -> Result<Self> {
        let keyspace = Config::new(path).open()?;
        let portfolios = keyspace.open_partition(PORTFOLIOS, PartitionCreateOptions::default())?;
        let transactions =
            keyspace.open_partition(TRANSACTIONS, PartitionCreateOptions::default())?;
        let owner_index = keyspace.open_partition(OWNER_INDEX, PartitionCreateOptions::default())?;
        debug!("Opened record store at {}", path.display());
        Ok(Self {
            keyspace,
            portfolios,
            transactions,
            owner_index,
        })
    }

    fn persist(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}

fn index_key(owner_id: &str, id: &str) -> String {
    format!("{owner_id}\0{id}")
}

#[async_trait]
impl RecordStore for DiskStore {
    async fn get_portfolio(&self, owner_id: &str) -> Result<Option<Portfolio>> {
        match self.portfolios.get(owner_id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_portfolio(&self, portfolio: &Portfolio) -> Result<()> {
        self.portfolios
            .insert(&portfolio.owner_id, serde_json::to_vec(portfolio)?)?;
        debug!("Store PUT portfolio {}", portfolio.owner_id);
        self.persist()
    }

    async fn delete_portfolio(&self, owner_id: &str) -> Result<()> {
        self.portfolios.remove(owner_id)?;
        self.persist()
    }

    async fn get_transaction(&self, id: &str) -> Result<Option<Transaction>> {
        match self.transactions.get(id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_transaction(&self, transaction: &Transaction) -> Result<()> {
        let mut batch = self.keyspace.batch();
        batch.insert(
            &self.transactions,
            &transaction.id,
            serde_json::to_vec(transaction)?,
        );
        batch.insert(
            &self.owner_index,
            index_key(&transaction.owner_id, &transaction.id),
            "",
        );
        batch.commit()?;
        debug!(
            "Store PUT transaction {} ({})",
            transaction.id, transaction.state
        );
        self.persist()
    }

    async fn delete_transaction(&self, id: &str) -> Result<()> {
        let Some(transaction) = self.get_transaction(id).await? else {
            return Ok(());
        };
        let mut batch = self.keyspace.batch();
        batch.remove(&self.transactions, id);
        batch.remove(&self.owner_index, index_key(&transaction.owner_id, id));
        batch.commit()?;
        self.persist()
    }

    async fn list_transactions(&self, owner_id: &str) -> Result<Vec<Transaction>> {
        let prefix = index_key(owner_id, "");
        let mut ids = Vec::new();
        for entry in self.owner_index.prefix(&prefix) {
            let (key, _) = entry?;
            ids.push(String::from_utf8_lossy(&key[prefix.len()..]).to_string());
        }

        let mut transactions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(transaction) = self.get_transaction(&id).await? {
                transactions.push(transaction);
            }
        }
        Ok(transactions)
    }
}
