use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument, warn};

use super::{BatchOp, DatabaseInterface};
use crate::events::{EventBus, SubpayEvent};

const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(100);

/// Counters for one key namespace, or for all of them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub total: u64,
    pub failed: u64,
    pub slow: u64,
    pub total_duration_ms: u64,
}

impl OperationCounts {
    fn record(&mut self, duration: Duration, success: bool, slow: bool) {
        self.total += 1;
        self.total_duration_ms += duration.as_millis() as u64;
        if !success {
            self.failed += 1;
        }
        if slow {
            self.slow += 1;
        }
    }

    pub fn succeeded(&self) -> u64 {
        self.total - self.failed
    }

    pub fn average_duration_ms(&self) -> u64 {
        self.total_duration_ms.checked_div(self.total).unwrap_or(0)
    }
}

/// Point-in-time copy of [`DatabaseStats`]
#[derive(Debug, Clone, Default)]
pub struct DatabaseStatsSnapshot {
    pub totals: OperationCounts,
    /// Keyed by entity namespace (`intent`, `digest`, `receipt`, ...)
    pub by_namespace: BTreeMap<String, OperationCounts>,
}

#[derive(Debug, Default)]
pub struct DatabaseStats {
    inner: Mutex<DatabaseStatsSnapshot>,
}

impl DatabaseStats {
    fn record(&self, namespace: &str, duration: Duration, success: bool, slow: bool) {
        let Ok(mut stats) = self.inner.lock() else {
            return;
        };
        stats.totals.record(duration, success, slow);
        stats
            .by_namespace
            .entry(namespace.to_string())
            .or_default()
            .record(duration, success, slow);
    }

    pub fn snapshot(&self) -> DatabaseStatsSnapshot {
        self.inner
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }
}

/// Wraps a backend with timing, per-namespace stats, slow-operation
/// warnings and `database_query_executed` events
pub struct InstrumentedDatabase<T: DatabaseInterface> {
    inner: T,
    event_bus: Arc<EventBus>,
    stats: Arc<DatabaseStats>,
    service_name: String,
    slow_threshold: Duration,
}

impl<T: DatabaseInterface> InstrumentedDatabase<T> {
    pub fn new(inner: T, event_bus: Arc<EventBus>, service_name: impl Into<String>) -> Self {
        Self {
            inner,
            event_bus,
            stats: Arc::new(DatabaseStats::default()),
            service_name: service_name.into(),
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn stats(&self) -> Arc<DatabaseStats> {
        self.stats.clone()
    }

    /// Entity namespace of a key (`intent/0xabc` -> `intent`); identifiers
    /// stay out of logs
    fn key_prefix(key: &[u8]) -> String {
        let end = key.iter().position(|b| *b == b'/').unwrap_or(key.len());
        String::from_utf8_lossy(&key[..end]).into_owned()
    }

    async fn publish_db_event(
        &self,
        operation: &str,
        key_prefix: &str,
        duration: Duration,
        success: bool,
        error_message: Option<String>,
    ) {
        self.event_bus
            .publish(SubpayEvent::DatabaseQueryExecuted {
                operation: operation.to_string(),
                key_prefix: key_prefix.to_string(),
                duration_ms: duration.as_millis(),
                success,
                error_message,
                correlation_id: None,
                timestamp: Utc::now(),
            })
            .await;
    }

    #[instrument(skip(self, operation, key), fields(operation = %op_name, key_prefix))]
    async fn execute_with_instrumentation<F, R>(
        &self,
        operation: F,
        op_name: &str,
        key: &[u8],
    ) -> Result<R>
    where
        F: std::future::Future<Output = Result<R>>,
    {
        let start = Instant::now();
        let key_prefix = Self::key_prefix(key);

        tracing::Span::current().record("key_prefix", key_prefix.as_str());

        let result = operation.await;
        let duration = start.elapsed();
        let success = result.is_ok();

        let slow = duration > self.slow_threshold;
        self.stats.record(&key_prefix, duration, success, slow);

        match &result {
            Ok(_) if slow => {
                warn!(
                    operation = %op_name,
                    key_prefix = %key_prefix,
                    duration_ms = %duration.as_millis(),
                    service = %self.service_name,
                    "Slow database operation detected"
                );
            }
            Ok(_) => {
                debug!(
                    operation = %op_name,
                    key_prefix = %key_prefix,
                    duration_ms = %duration.as_millis(),
                    service = %self.service_name,
                    "Database operation completed successfully"
                );
            }
            Err(e) => {
                warn!(
                    operation = %op_name,
                    key_prefix = %key_prefix,
                    duration_ms = %duration.as_millis(),
                    error = ?e,
                    service = %self.service_name,
                    "Database operation failed"
                );
            }
        }

        let error_message = result.as_ref().err().map(|e| e.to_string());
        self.publish_db_event(op_name, &key_prefix, duration, success, error_message)
            .await;

        result
    }
}

#[async_trait]
impl<T: DatabaseInterface> DatabaseInterface for InstrumentedDatabase<T> {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.execute_with_instrumentation(self.inner.get(key), "get", key)
            .await
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.execute_with_instrumentation(self.inner.set(key, value), "set", key)
            .await
    }

    async fn set_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.execute_with_instrumentation(
            self.inner.set_if_absent(key, value),
            "set_if_absent",
            key,
        )
        .await
    }

    async fn compare_and_swap(&self, key: &[u8], expected: &[u8], value: &[u8]) -> Result<bool> {
        self.execute_with_instrumentation(
            self.inner.compare_and_swap(key, expected, value),
            "compare_and_swap",
            key,
        )
        .await
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.execute_with_instrumentation(self.inner.delete(key), "delete", key)
            .await
    }

    async fn exists(&self, key: &[u8]) -> Result<bool> {
        self.execute_with_instrumentation(self.inner.exists(key), "exists", key)
            .await
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.execute_with_instrumentation(self.inner.scan_prefix(prefix), "scan_prefix", prefix)
            .await
    }

    async fn apply_batch(&self, batch: Vec<BatchOp>) -> Result<()> {
        // Labelled by the first key's namespace
        let label = match batch.first() {
            Some(BatchOp::Set { key, .. }) | Some(BatchOp::Delete { key }) => key.clone(),
            None => b"batch".to_vec(),
        };
        self.execute_with_instrumentation(self.inner.apply_batch(batch), "apply_batch", &label)
            .await
    }
}
