use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use super::renewal::{RenewalEngine, RenewalOutcome};
use super::scheduler::PaymentScheduler;
use crate::core::clock::Clock;
use crate::error::SettlementError;
use crate::store::{IntentFilter, SubscriptionStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    /// Intents armed for a future due time
    pub scheduled: usize,
    /// Overdue intents renewed during startup
    pub renewed: usize,
    /// Intents whose catch-up renewal or scheduling failed
    pub failed: usize,
}

/// Rebuilds the in-memory timers from the store on process start
#[derive(Debug)]
pub struct Bootstrapper {
    store: SubscriptionStore,
    engine: Arc<RenewalEngine>,
    scheduler: PaymentScheduler,
    clock: Arc<dyn Clock>,
}

impl Bootstrapper {
    pub fn new(
        store: SubscriptionStore,
        engine: Arc<RenewalEngine>,
        scheduler: PaymentScheduler,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            engine,
            scheduler,
            clock,
        }
    }

    /// Schedule every active intent, renewing overdue ones first.
    /// A failure on one intent never stops the others.
    #[instrument(skip(self))]
    pub async fn run(&self) -> anyhow::Result<BootstrapReport> {
        let intents = self.store.find_intents(&IntentFilter::active()).await?;
        let mut report = BootstrapReport::default();

        info!(active_intents = intents.len(), "Bootstrapping renewal schedule");

        for intent in intents {
            let now = self.clock.now();
            let next_due = if intent.next_payment_due < now {
                // Catch up before any timer is armed for this intent
                match self.engine.process_renewal(&intent.id).await {
                    Ok(RenewalOutcome::Renewed {
                        next_payment_due, ..
                    }) => {
                        report.renewed += 1;
                        next_payment_due
                    }
                    Ok(RenewalOutcome::Failed { cause }) => {
                        warn!(intent_id = %intent.id, cause = %cause, "Catch-up renewal failed");
                        report.failed += 1;
                        continue;
                    }
                    Err(SettlementError::Store(e)) => {
                        warn!(
                            intent_id = %intent.id,
                            error = ?e,
                            "Store unavailable for catch-up renewal, retrying later"
                        );
                        self.scheduler.retry_later(&intent.id).await;
                        report.failed += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(intent_id = %intent.id, error = %e, "Catch-up renewal skipped");
                        report.failed += 1;
                        continue;
                    }
                }
            } else {
                intent.next_payment_due
            };

            match self.scheduler.schedule_payment_job(&intent.id, next_due).await {
                Ok(()) => {
                    if intent.next_payment_due >= now {
                        report.scheduled += 1;
                    }
                }
                Err(e) => {
                    warn!(intent_id = %intent.id, error = %e, "Failed to schedule renewal");
                    report.failed += 1;
                }
            }
        }

        info!(
            scheduled = report.scheduled,
            renewed = report.renewed,
            failed = report.failed,
            "Bootstrap complete"
        );
        Ok(report)
    }
}
