use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, info, instrument, warn};

use super::renewal::{RenewalEngine, RenewalOutcome};
use super::timers::TimerRegistry;
use crate::core::clock::Clock;
use crate::error::{SettlementError, SettlementResult};
use crate::events::{EventBus, SubpayEvent};
use crate::store::SubscriptionStore;

/// Delay before a renewal that could not reach the store is attempted again
const STORE_RETRY_DELAY_SECS: i64 = 30;

/// Arms one chained one-shot timer per active intent.
///
/// Timers are advisory: every fire re-reads the intent before renewing.
#[derive(Clone)]
pub struct PaymentScheduler {
    store: SubscriptionStore,
    engine: Arc<RenewalEngine>,
    timers: Arc<TimerRegistry>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PaymentScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentScheduler")
            .field("timers", &self.timers)
            .finish_non_exhaustive()
    }
}

impl PaymentScheduler {
    pub fn new(
        store: SubscriptionStore,
        engine: Arc<RenewalEngine>,
        timers: Arc<TimerRegistry>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            engine,
            timers,
            event_bus,
            clock,
        }
    }

    pub fn timers(&self) -> &Arc<TimerRegistry> {
        &self.timers
    }

    /// Arm the renewal timer for `intent_id` at the absolute time `when`,
    /// replacing any timer already armed for it. A `when` in the past fires
    /// as soon as possible.
    ///
    /// Fails with `NotFound` when the intent no longer exists and with
    /// `NotActive` when it is not active; no timer is left armed either way.
    #[instrument(skip(self))]
    pub async fn schedule_payment_job(
        &self,
        intent_id: &str,
        when: DateTime<Utc>,
    ) -> SettlementResult<()> {
        self.timers.cancel(intent_id).await;

        let intent = self
            .store
            .get_intent(intent_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("intent", intent_id))?;
        if !intent.is_active() {
            return Err(SettlementError::NotActive(intent_id.to_string()));
        }

        self.arm(intent_id, when).await;
        Ok(())
    }

    /// Same as [`PaymentScheduler::schedule_payment_job`]
    pub async fn reschedule(&self, intent_id: &str, when: DateTime<Utc>) -> SettlementResult<()> {
        self.schedule_payment_job(intent_id, when).await
    }

    pub async fn cancel(&self, intent_id: &str) -> bool {
        self.timers.cancel(intent_id).await
    }

    pub async fn armed_count(&self) -> usize {
        self.timers.armed_count().await
    }

    /// Abort every armed timer; in-flight renewals run to completion
    pub async fn shutdown(&self) {
        let cancelled = self.timers.cancel_all().await;
        info!(cancelled, "Payment scheduler stopped");
    }

    async fn arm(&self, intent_id: &str, when: DateTime<Utc>) {
        let delay = (when - self.clock.now()).to_std().unwrap_or_default();
        let scheduler = self.clone();
        let id = intent_id.to_string();
        self.timers
            .replace(intent_id, when, move |generation| {
                scheduler.timer_task(id, generation, delay)
            })
            .await;

        info!(
            due_at = %when,
            delay_secs = delay.as_secs(),
            "Renewal scheduled"
        );
        self.event_bus
            .publish(SubpayEvent::RenewalScheduled {
                intent_id: intent_id.to_string(),
                due_at: when,
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Try the renewal again shortly; arming needs no store access
    pub(crate) async fn retry_later(&self, intent_id: &str) {
        let when = self.clock.now() + chrono::Duration::seconds(STORE_RETRY_DELAY_SECS);
        self.arm(intent_id, when).await;
    }

    // Boxed so the timer future does not embed the scheduling future that
    // spawns it
    fn timer_task(
        self,
        intent_id: String,
        generation: u64,
        delay: std::time::Duration,
    ) -> BoxFuture<'static, ()> {
        async move {
            tokio::time::sleep(delay).await;
            // Drop our own entry first so re-arming never aborts this task
            self.timers.release(&intent_id, generation).await;
            self.fire(&intent_id).await;
        }
        .boxed()
    }

    #[instrument(skip(self))]
    async fn fire(&self, intent_id: &str) {
        match self.store.get_intent(intent_id).await {
            Ok(Some(intent)) if intent.is_active() => {}
            Ok(_) => {
                debug!("Stale timer, intent already terminated");
                return;
            }
            Err(e) => {
                error!(error = ?e, "Failed to load intent for due renewal, retrying later");
                self.retry_later(intent_id).await;
                return;
            }
        }

        match self.engine.process_renewal(intent_id).await {
            Ok(RenewalOutcome::Renewed {
                next_payment_due, ..
            }) => match self.schedule_payment_job(intent_id, next_payment_due).await {
                Ok(()) => {}
                Err(SettlementError::Store(e)) => {
                    // The renewal is recorded; only the existence check failed
                    warn!(error = ?e, "Store unavailable while re-arming renewal timer");
                    self.arm(intent_id, next_payment_due).await;
                }
                Err(e) => warn!(error = %e, "Failed to re-arm renewal timer"),
            },
            Ok(RenewalOutcome::Failed { .. }) => {
                self.timers.cancel(intent_id).await;
            }
            Err(SettlementError::Store(e)) => {
                error!(error = ?e, "Store unavailable for due renewal, retrying later");
                self.retry_later(intent_id).await;
            }
            Err(e) => {
                debug!(error = %e, "Renewal skipped");
                self.timers.cancel(intent_id).await;
            }
        }
    }
}
