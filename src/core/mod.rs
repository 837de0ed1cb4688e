pub mod clock;
pub mod operations;
pub mod services;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::info;

use self::clock::{Clock, SystemClock};
use self::operations::{IntakeResponse, PaymentIntake, PaymentRequest};
use self::services::{
    BootstrapReport, Bootstrapper, PaymentScheduler, RenewalEngine, SettlementSettings,
    TimerRegistry, UnsubscribeOutcome,
};
use crate::config::Config;
use crate::database::{InstrumentedDatabase, SharedDatabase};
use crate::error::{SettlementError, SettlementResult};
use crate::events::handlers::{LoggingEventHandler, MetricsEventHandler};
use crate::events::EventBus;
use crate::ledger::{LedgerClient, LedgerGateway, RetryPolicy, TransactionSigner};
use crate::observability::correlation::RequestContext;
use crate::store::SubscriptionStore;
use crate::types::PaymentIntent;
use crate::webhooks::{Notifier, ObserverEvent, WebhookNotifier};

/// Replaceable collaborators; the defaults are the production ones
#[derive(Default)]
pub struct CoreOptions {
    /// Observer sink; a [`WebhookNotifier`] is started when unset
    pub notifier: Option<Arc<dyn Notifier>>,
    /// Defaults to [`SystemClock`]
    pub clock: Option<Arc<dyn Clock>>,
}

/// Main entry point for library consumers
pub struct SubpayCore {
    pub store: SubscriptionStore,
    pub event_bus: Arc<EventBus>,
    pub gateway: Arc<LedgerGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub timers: Arc<TimerRegistry>,
    pub engine: Arc<RenewalEngine>,
    pub scheduler: PaymentScheduler,
    pub intake: Arc<PaymentIntake>,
    pub bootstrapper: Arc<Bootstrapper>,
    pub clock: Arc<dyn Clock>,
    pub start_time: Instant,
    webhook_notifier: Option<WebhookNotifier>,
}

impl std::fmt::Debug for SubpayCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubpayCore")
            .field("event_bus", &self.event_bus)
            .field("scheduler", &self.scheduler)
            .field("webhook_notifier", &self.webhook_notifier)
            .finish_non_exhaustive()
    }
}

impl SubpayCore {
    pub async fn new(
        config: &Config,
        db: SharedDatabase,
        ledger_client: Arc<dyn LedgerClient>,
        signer: Arc<dyn TransactionSigner>,
    ) -> Result<Self> {
        Self::new_with_options(config, db, ledger_client, signer, CoreOptions::default()).await
    }

    pub async fn new_with_options(
        config: &Config,
        db: SharedDatabase,
        ledger_client: Arc<dyn LedgerClient>,
        signer: Arc<dyn TransactionSigner>,
        options: CoreOptions,
    ) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new(config.event_bus_capacity));

        event_bus
            .register_handler(Arc::new(LoggingEventHandler::new(false)))
            .await;
        event_bus
            .register_handler(Arc::new(MetricsEventHandler::new("subpayd")))
            .await;
        info!("Event bus initialized with all handlers");

        let db: SharedDatabase = Arc::new(InstrumentedDatabase::new(
            db,
            event_bus.clone(),
            "subpayd".to_string(),
        ));
        let store = SubscriptionStore::new(db);

        let (notifier, webhook_notifier) = match options.notifier {
            Some(notifier) => (notifier, None),
            None => {
                // The worker runs until every notifier clone is dropped
                let (webhooks, _worker) = WebhookNotifier::spawn(
                    config.webhooks.clone(),
                    store.clone(),
                    event_bus.clone(),
                )?;
                let notifier: Arc<dyn Notifier> = Arc::new(webhooks.clone());
                (notifier, Some(webhooks))
            }
        };

        let clock = options
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let settings = SettlementSettings::from(&config.ledger);
        let gateway = Arc::new(LedgerGateway::new(
            ledger_client,
            RetryPolicy::from(&config.ledger.retry),
            event_bus.clone(),
        ));
        let timers = Arc::new(TimerRegistry::new());

        let engine = Arc::new(RenewalEngine::new(
            store.clone(),
            gateway.clone(),
            signer,
            notifier.clone(),
            timers.clone(),
            event_bus.clone(),
            clock.clone(),
            settings.clone(),
        ));
        let scheduler = PaymentScheduler::new(
            store.clone(),
            engine.clone(),
            timers.clone(),
            event_bus.clone(),
            clock.clone(),
        );
        let intake = Arc::new(PaymentIntake::new(
            store.clone(),
            gateway.clone(),
            scheduler.clone(),
            notifier.clone(),
            event_bus.clone(),
            clock.clone(),
            settings,
        ));
        let bootstrapper = Arc::new(Bootstrapper::new(
            store.clone(),
            engine.clone(),
            scheduler.clone(),
            clock.clone(),
        ));

        Ok(Self {
            store,
            event_bus,
            gateway,
            notifier,
            timers,
            engine,
            scheduler,
            intake,
            bootstrapper,
            clock,
            start_time: Instant::now(),
            webhook_notifier,
        })
    }

    /// Get uptime since core was initialized
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Settle a client-signed payment
    pub async fn process_payment(
        &self,
        request: PaymentRequest,
        context: RequestContext,
    ) -> SettlementResult<IntakeResponse> {
        self.intake.process_payment(request, Some(context)).await
    }

    pub async fn get_intent(&self, intent_id: &str) -> SettlementResult<PaymentIntent> {
        self.store
            .get_intent(intent_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("intent", intent_id))
    }

    /// User-initiated unsubscribe; observers receive `unsubscribed`
    pub async fn unsubscribe(&self, intent_id: &str) -> SettlementResult<UnsubscribeOutcome> {
        self.engine
            .handle_unsubscribe(intent_id, true, ObserverEvent::Unsubscribed)
            .await
    }

    /// Rebuild the renewal schedule from the store
    pub async fn bootstrap(&self) -> Result<BootstrapReport> {
        self.bootstrapper.run().await
    }

    /// Whether the webhook delivery worker is running; true when a custom
    /// notifier was injected
    pub fn notifier_alive(&self) -> bool {
        self.webhook_notifier
            .as_ref()
            .map_or(true, WebhookNotifier::is_alive)
    }

    /// Stop arming renewals; in-flight work runs to completion
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
