use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

pub mod instrumented;
pub mod memory;
pub mod sled;

pub use instrumented::{DatabaseStats, DatabaseStatsSnapshot, InstrumentedDatabase, OperationCounts};
pub use memory::MemoryDatabase;
pub use self::sled::SledDatabase;

/// A single write inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Set { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Key/value persistence the store is built on.
///
/// Implementations must make `set_if_absent`, `compare_and_swap` and
/// `apply_batch` atomic with respect to every other operation on the same
/// database.
#[async_trait]
pub trait DatabaseInterface: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;
    /// Returns false without writing when the key already exists
    async fn set_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool>;
    /// Replace the value of `key` only while it still equals `expected`.
    /// Returns false without writing when the key changed or is gone.
    async fn compare_and_swap(&self, key: &[u8], expected: &[u8], value: &[u8]) -> Result<bool>;
    async fn delete(&self, key: &[u8]) -> Result<()>;
    async fn exists(&self, key: &[u8]) -> Result<bool>;
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
    async fn apply_batch(&self, batch: Vec<BatchOp>) -> Result<()>;
}

pub type SharedDatabase = Arc<dyn DatabaseInterface>;

#[async_trait]
impl<T: DatabaseInterface + ?Sized> DatabaseInterface for Arc<T> {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).set(key, value).await
    }

    async fn set_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        (**self).set_if_absent(key, value).await
    }

    async fn compare_and_swap(&self, key: &[u8], expected: &[u8], value: &[u8]) -> Result<bool> {
        (**self).compare_and_swap(key, expected, value).await
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        (**self).delete(key).await
    }

    async fn exists(&self, key: &[u8]) -> Result<bool> {
        (**self).exists(key).await
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        (**self).scan_prefix(prefix).await
    }

    async fn apply_batch(&self, batch: Vec<BatchOp>) -> Result<()> {
        (**self).apply_batch(batch).await
    }
}
