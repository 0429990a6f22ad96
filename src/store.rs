// store.rs
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::transaction::Transaction;

pub type UpdateFn = Box<dyn FnOnce(&mut Transaction) + Send>;

/// Persistence for payment transactions.
///
/// `update` must run read, `apply` and write as one unit so two deliveries of
/// the same webhook cannot interleave.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: &Transaction) -> Result<()>;
    async fn get(&self, reference: &str) -> Result<Option<Transaction>>;
    async fn update(&self, reference: &str, apply: UpdateFn) -> Result<Option<Transaction>>;
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    transactions: Mutex<HashMap<String, Transaction>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn insert(&self, tx: &Transaction) -> Result<()> {
        let mut transactions = self.transactions.lock().await;
        transactions
            .entry(tx.reference().to_string())
            .or_insert_with(|| tx.clone());
        Ok(())
    }

    async fn get(&self, reference: &str) -> Result<Option<Transaction>> {
        Ok(self.transactions.lock().await.get(reference).cloned())
    }

    async fn update(&self, reference: &str, apply: UpdateFn) -> Result<Option<Transaction>> {
        let mut transactions = self.transactions.lock().await;
        Ok(transactions.get_mut(reference).map(|tx| {
            apply(tx);
            tx.clone()
        }))
    }
}
