use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{BatchOp, DatabaseInterface};

/// Durable backend stored under the daemon's data directory.
///
/// Every write is flushed before returning so a crash never loses a
/// recorded digest or receipt.
#[derive(Debug, Clone)]
pub struct SledDatabase {
    db: sled::Db,
}

impl SledDatabase {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("Failed to open sled database at {}", path.display()))?;
        Ok(Self { db })
    }

    async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .context("Failed to flush sled database")?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseInterface for SledDatabase {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|value| value.to_vec()))
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        self.flush().await
    }

    async fn set_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let swapped = self
            .db
            .compare_and_swap(key, None::<&[u8]>, Some(value))?
            .is_ok();
        if swapped {
            self.flush().await?;
        }
        Ok(swapped)
    }

    async fn compare_and_swap(&self, key: &[u8], expected: &[u8], value: &[u8]) -> Result<bool> {
        let swapped = self
            .db
            .compare_and_swap(key, Some(expected), Some(value))?
            .is_ok();
        if swapped {
            self.flush().await?;
        }
        Ok(swapped)
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.remove(key)?;
        self.flush().await
    }

    async fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.db.contains_key(key)?)
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.db
            .scan_prefix(prefix)
            .map(|item| {
                let (key, value) = item?;
                Ok((key.to_vec(), value.to_vec()))
            })
            .collect()
    }

    async fn apply_batch(&self, batch: Vec<BatchOp>) -> Result<()> {
        let mut sled_batch = sled::Batch::default();
        for op in batch {
            match op {
                BatchOp::Set { key, value } => sled_batch.insert(key, value),
                BatchOp::Delete { key } => sled_batch.remove(key),
            }
        }
        self.db.apply_batch(sled_batch)?;
        self.flush().await
    }
}
