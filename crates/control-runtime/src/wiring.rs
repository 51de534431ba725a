//! Application assembly and lifecycle.

use crate::handlers::{CrmHandler, OpsIntelHandler, PortfolioHandler};
use chrono::Utc;
use hs_03_cdc_publisher::{OutboxPublisher, PublisherHandle};
use hs_05_consumer_runtime::{Consumer, ConsumerHandle};
use hs_07_collector_ingest::{build_router, AppState, SessionAuth};
use hs_08_command_queue::{CommandService, SweeperHandle};
use hs_telemetry::LatencyTracker;
use shared_bus::{GroupSubscription, MessageBus};
use shared_store::retention::{self, RetentionPolicy};
use shared_store::Store;
use shared_types::events::DLQ_TOPIC;
use shared_types::{Authorize, CoreConfig, Domain, TenantScopedAuthorizer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Cadence for retention pruning.
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);
/// Cadence for rate-limiter window cleanup.
const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
/// Cadence for the command expiry sweeper.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// The fully constructed, not-yet-running control plane.
pub struct Application {
    pub config: CoreConfig,
    pub store: Store,
    pub bus: Arc<MessageBus>,
    pub commands: Arc<CommandService>,
    pub state: AppState,
    publisher: Arc<OutboxPublisher>,
    consumers: Vec<(Arc<Consumer>, GroupSubscription)>,
}

impl Application {
    /// Build everything in dependency order. Consumer groups register on
    /// the bus here, before the publisher ever runs, so no event can be
    /// published into a topic without its consumers attached.
    #[must_use]
    pub fn build(config: CoreConfig, sessions: Arc<dyn SessionAuth>) -> Self {
        let _ = hs_telemetry::register_metrics();

        let store = Store::new();
        let bus = Arc::new(MessageBus::new());
        for topic in Domain::all_topics() {
            bus.create_topic(topic, 3);
        }
        bus.create_topic(DLQ_TOPIC, 1);

        let latency = Arc::new(LatencyTracker::default());
        let authorizer: Arc<dyn Authorize> = Arc::new(TenantScopedAuthorizer);
        let commands = Arc::new(CommandService::new(store.clone(), config.command.clone()));

        let mut state = AppState::new(
            store.clone(),
            Arc::clone(&bus),
            Arc::clone(&commands),
            sessions,
            authorizer,
            config.ingest.clone(),
        );
        state.latency = Arc::clone(&latency);

        let transport: Arc<dyn shared_bus::Transport> = bus.clone();
        let publisher = Arc::new(OutboxPublisher::new(
            store.clone(),
            transport,
            config.outbox.clone(),
        ));

        let mut consumers = Vec::new();
        for (name, topic, handler) in [
            (
                "portfolio",
                Domain::Miner.topic(),
                Arc::new(PortfolioHandler) as Arc<dyn hs_05_consumer_runtime::EventHandler>,
            ),
            ("crm", Domain::Crm.topic(), Arc::new(CrmHandler) as _),
            ("ops-intel", Domain::Ops.topic(), Arc::new(OpsIntelHandler) as _),
        ] {
            let subscription = bus
                .subscribe(name, topic)
                .expect("topics are created above");
            let consumer = Arc::new(
                Consumer::new(name, store.clone(), handler, config.consumer.clone())
                    .with_latency_tracker(Arc::clone(&latency)),
            );
            consumers.push((consumer, subscription));
        }

        Self {
            config,
            store,
            bus,
            commands,
            state,
            publisher,
            consumers,
        }
    }

    /// The HTTP router over this application's state, with the operator
    /// DLQ surface merged in.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone()).merge(crate::admin::admin_router(self.state.clone()))
    }

    /// Start every background service.
    #[must_use]
    pub fn start(self) -> RunningApplication {
        info!("Control plane starting");
        let publisher = Arc::clone(&self.publisher).start();
        let consumer_handles: Vec<ConsumerHandle> = self
            .consumers
            .into_iter()
            .map(|(consumer, subscription)| consumer.start(subscription))
            .collect();
        let sweeper = self.commands.start_sweeper(SWEEP_INTERVAL);

        let (shutdown_tx, prune_task, limiter_task) =
            spawn_maintenance(self.store.clone(), self.state.clone());

        RunningApplication {
            publisher,
            consumers: consumer_handles,
            sweeper,
            shutdown: shutdown_tx,
            maintenance: vec![prune_task, limiter_task],
        }
    }
}

fn spawn_maintenance(
    store: Store,
    state: AppState,
) -> (watch::Sender<bool>, JoinHandle<()>, JoinHandle<()>) {
    let (shutdown_tx, mut prune_rx) = watch::channel(false);
    let mut limiter_rx = shutdown_tx.subscribe();

    let prune_task = tokio::spawn(async move {
        let policy = RetentionPolicy::default();
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = prune_rx.changed() => break,
                _ = ticker.tick() => {
                    retention::prune(&store, &policy, Utc::now());
                }
            }
        }
    });

    let limiter_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LIMITER_CLEANUP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = limiter_rx.changed() => break,
                _ = ticker.tick() => {
                    state.limiter.cleanup();
                }
            }
        }
    });

    (shutdown_tx, prune_task, limiter_task)
}

/// Handles to every running service, shut down in reverse dependency
/// order: publisher first (no new deliveries), consumers drain, then the
/// sweeper and maintenance loops.
pub struct RunningApplication {
    publisher: PublisherHandle,
    consumers: Vec<ConsumerHandle>,
    sweeper: SweeperHandle,
    shutdown: watch::Sender<bool>,
    maintenance: Vec<JoinHandle<()>>,
}

impl RunningApplication {
    /// Ordered, bounded shutdown. Safe to call exactly once; dropping
    /// without calling aborts the detached tasks with the runtime.
    pub async fn shutdown(self) {
        info!("Control plane stopping");
        self.publisher.shutdown().await;
        for consumer in self.consumers {
            consumer.shutdown().await;
        }
        self.sweeper.shutdown().await;
        let _ = self.shutdown.send(true);
        for task in self.maintenance {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
        info!("Control plane stopped");
    }
}
