//! Append-only execution ledger.
//!
//! One [`ExecutionRecord`] is written per finished run and never changed
//! afterwards. The ledger shares the workspace database file with the
//! artifact repository.

use chrono::{Duration, Utc};

use crate::errors::StorageError;
use crate::workspace::{DbHandle, ExecutionRecord};

#[derive(Clone)]
pub struct ExecutionLedger {
    db: DbHandle,
}

impl ExecutionLedger {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Append a run record in one atomic insert. Recording the same
    /// execution twice fails with [`StorageError::DuplicateExecution`].
    pub async fn append(&self, record: ExecutionRecord) -> Result<(), StorageError> {
        self.db
            .call(move |db| db.insert_execution(&record))
            .await
            .map_err(StorageError::from_db)
    }

    pub async fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, StorageError> {
        let owned = execution_id.to_string();
        self.db
            .call(move |db| db.get_execution(&owned))
            .await
            .map_err(StorageError::from_db)
    }

    /// Most recent runs first.
    pub async fn history(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StorageError> {
        self.db
            .call(move |db| db.list_executions(limit))
            .await
            .map_err(StorageError::from_db)
    }

    pub async fn latest(&self) -> Result<Option<ExecutionRecord>, StorageError> {
        Ok(self.history(1).await?.into_iter().next())
    }

    pub async fn count(&self) -> Result<u64, StorageError> {
        self.db
            .call(|db| db.count_executions())
            .await
            .map_err(StorageError::from_db)
    }

    /// The newest completed run inside `window` whose score met `threshold`
    /// and whose inputs hashed to `input_digest`.
    pub async fn most_recent_successful(
        &self,
        window: Duration,
        threshold: f64,
        input_digest: &str,
    ) -> Result<Option<ExecutionRecord>, StorageError> {
        let since = Utc::now() - window;
        let digest = input_digest.to_string();
        self.db
            .call(move |db| db.latest_successful_since(since, threshold, Some(&digest)))
            .await
            .map_err(StorageError::from_db)
    }
}
