//! Two-phase boot of the declared services.
//!
//! `start` brings up shared infrastructure (publisher, discovery, cache),
//! instantiates every enabled service from the catalog, then runs the
//! configure phase and the init phase. Each phase runs its services
//! concurrently behind a [`PhaseBarrier`] that spans every descriptor;
//! init never begins before the configure barrier has completed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use fleet_core::{ServiceDescriptor, ServiceState};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::barrier::PhaseBarrier;
use super::catalog::ServiceCatalog;
use super::context::{Infrastructure, Service, ServiceContext};
use super::error::{BootError, Phase, ServiceFailure};
use super::events::EventBus;
use super::registry::ServiceRegistry;
use crate::cache::CacheLayer;
use crate::config::{FailurePolicy, FleetConfig};
use crate::messaging::{BusTransport, MessagingFabric};
use crate::network::ShutdownController;
use crate::resolver::Resolver;
use crate::serial::{run_serial, step};

/// Outcome of a successful `start`.
#[derive(Debug)]
pub struct BootReport {
    /// Every declared service with its final state, in declaration order.
    pub states: Vec<(String, ServiceState)>,
    /// Failures tolerated under `FailurePolicy::CollectAndContinue`.
    pub failures: Vec<ServiceFailure>,
}

impl BootReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn state(&self, name: &str) -> Option<ServiceState> {
        self.states
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| *s)
    }
}

// ---------------------------------------------------------------------------
// Arrival guard
// ---------------------------------------------------------------------------

/// Guarantees exactly one barrier arrival per participant, even when the
/// service call panics or its task is aborted.
struct Arrival {
    barrier: PhaseBarrier,
    registry: Arc<ServiceRegistry>,
    name: String,
    arrived: bool,
}

impl Arrival {
    fn complete(mut self, outcome: anyhow::Result<()>, done: ServiceState) {
        self.registry.set_state(
            &self.name,
            if outcome.is_ok() { done } else { ServiceState::Failed },
        );
        self.barrier.arrive(&self.name, outcome);
        self.arrived = true;
    }
}

impl Drop for Arrival {
    fn drop(&mut self) {
        if !self.arrived {
            self.registry.set_state(&self.name, ServiceState::Failed);
            self.barrier
                .arrive(&self.name, Err(anyhow::anyhow!("service task ended without reporting")));
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Owns the node: configuration, catalog, shared infrastructure and the
/// service registry. Constructed by the entry point and passed by reference.
pub struct Orchestrator {
    config: FleetConfig,
    catalog: ServiceCatalog,
    resolver: Arc<Resolver>,
    transport: Option<Arc<dyn BusTransport>>,
    cache_override: Option<CacheLayer>,
    registry: Arc<ServiceRegistry>,
    events: Arc<EventBus>,
    lifecycle: Arc<ShutdownController>,
    infra: Option<Arc<Infrastructure>>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("catalog", &self.catalog)
            .field("registry", &self.registry)
            .field("health", &self.lifecycle.health_state())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator using the process environment and system DNS.
    #[must_use]
    pub fn new(config: FleetConfig, catalog: ServiceCatalog) -> Self {
        Self {
            config,
            catalog,
            resolver: Arc::new(Resolver::system()),
            transport: None,
            cache_override: None,
            registry: Arc::new(ServiceRegistry::new()),
            events: Arc::new(EventBus::new()),
            lifecycle: Arc::new(ShutdownController::new()),
            infra: None,
            stopped: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Uses `transport` instead of the one named in the bus configuration.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn BusTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Uses `cache` instead of building one from the cache configuration.
    #[must_use]
    pub fn with_cache_layer(mut self, cache: CacheLayer) -> Self {
        self.cache_override = Some(cache);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    #[must_use]
    pub fn lifecycle(&self) -> &Arc<ShutdownController> {
        &self.lifecycle
    }

    /// Shared infrastructure, once `start` got past the infrastructure step.
    #[must_use]
    pub fn infrastructure(&self) -> Option<&Arc<Infrastructure>> {
        self.infra.as_ref()
    }

    /// Boots infrastructure and every declared service.
    ///
    /// # Errors
    ///
    /// Infrastructure failures, unknown or failing factories, duplicate
    /// names, and (under `FailFast`) the first service failure of a phase.
    pub async fn start(&mut self) -> Result<BootReport, BootError> {
        if self.infra.is_some() {
            return Err(BootError::AlreadyStarted);
        }
        let started_at = Instant::now();
        let infra = Arc::new(self.boot_infrastructure().await?);
        self.infra = Some(Arc::clone(&infra));

        for descriptor in &self.config.services {
            if descriptor.enabled {
                let instance = self.catalog.instantiate(descriptor)?;
                self.registry.register(&descriptor.name, instance)?;
            } else {
                info!(service = %descriptor.name, "service disabled, skipping");
                self.registry.skip(&descriptor.name)?;
            }
        }

        let mut failures = self.run_phase(Phase::Configure, &infra).await?;
        failures.extend(self.run_phase(Phase::Init, &infra).await?);

        self.lifecycle.set_ready();
        let report = BootReport {
            states: self.registry.states(),
            failures,
        };
        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        info!(
            services = report.states.len(),
            failed = report.failures.len(),
            elapsed_ms,
            "node started"
        );
        Ok(report)
    }

    async fn boot_infrastructure(&mut self) -> Result<Infrastructure, BootError> {
        let fabric = match &self.transport {
            Some(transport) => MessagingFabric::new(
                Arc::clone(transport),
                Arc::clone(&self.resolver),
                self.config.bus.clone(),
            ),
            None => MessagingFabric::from_config(self.config.bus.clone(), Arc::clone(&self.resolver))?,
        };
        fabric.connect_publisher().await?;
        let discovery = fabric.discovery().await?;
        info!(transport = fabric.transport_name(), lookupd = %discovery, "messaging fabric ready");

        let cache = match self.cache_override.take() {
            Some(cache) => cache,
            None => CacheLayer::from_config(&self.config.cache, &self.resolver).await?,
        };

        Ok(Infrastructure {
            base_dir: self.config.base_dir.clone(),
            fabric: Arc::new(fabric),
            cache: Arc::new(cache),
            resolver: Arc::clone(&self.resolver),
            events: Arc::clone(&self.events),
            registry: Arc::clone(&self.registry),
            lifecycle: Arc::clone(&self.lifecycle),
        })
    }

    /// Runs one phase over every descriptor. Returns the failures tolerated
    /// under `CollectAndContinue`.
    async fn run_phase(
        &self,
        phase: Phase,
        infra: &Arc<Infrastructure>,
    ) -> Result<Vec<ServiceFailure>, BootError> {
        let (eligible, running, done) = match phase {
            Phase::Configure => (
                ServiceState::Unconfigured,
                ServiceState::Configuring,
                ServiceState::Configured,
            ),
            Phase::Init => (
                ServiceState::Configured,
                ServiceState::Initializing,
                ServiceState::Initialized,
            ),
        };

        let descriptors: &[ServiceDescriptor] = &self.config.services;
        let (barrier, wait) = PhaseBarrier::new(phase, descriptors.len());
        let mut tasks = JoinSet::new();
        let phase_started = Instant::now();
        let mut waiting: HashMap<String, Arc<dyn Service>> =
            self.registry.in_state(eligible).into_iter().collect();

        for descriptor in descriptors {
            let name = descriptor.name.clone();
            let Some(service) = waiting.remove(&name) else {
                // Disabled, or failed in an earlier phase.
                barrier.arrive(&name, Ok(()));
                continue;
            };

            self.registry.set_state(&name, running);
            let arrival = Arrival {
                barrier: barrier.clone(),
                registry: Arc::clone(&self.registry),
                name: name.clone(),
                arrived: false,
            };
            let ctx = ServiceContext::new(&name, Arc::clone(infra));
            let config = descriptor.config.clone();
            tasks.spawn(async move {
                let outcome = call_phase(phase, service.as_ref(), &ctx, &config).await;
                arrival.complete(outcome, done);
            });
        }

        let failures = match self.config.orchestrator.failure_policy {
            FailurePolicy::FailFast => {
                if let Err(failure) = wait.wait_first_failure().await {
                    error!(service = %failure.service, phase = %phase, error = %format!("{:#}", failure.error), "service failed, aborting startup");
                    tasks.abort_all();
                    return Err(failure.into());
                }
                Vec::new()
            }
            FailurePolicy::CollectAndContinue => {
                let failures = wait.wait_all().await;
                for failure in &failures {
                    warn!(service = %failure.service, phase = %phase, error = %format!("{:#}", failure.error), "service failed, continuing without it");
                }
                failures
            }
        };

        let elapsed = phase_started.elapsed();
        metrics::histogram!(crate::telemetry::PHASE_DURATION, "phase" => phase.to_string())
            .record(elapsed.as_secs_f64());
        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = elapsed.as_millis() as u64;
        info!(phase = %phase, services = descriptors.len(), elapsed_ms, "phase complete");
        Ok(failures)
    }

    /// Stops services in reverse declaration order, each within the
    /// configured step timeout, then tears down messaging. Idempotent.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.lifecycle.trigger_shutdown();
        info!("shutting down node");

        if let Some(infra) = &self.infra {
            let steps = self
                .registry
                .started()
                .into_iter()
                .rev()
                .map(|(name, service)| {
                    let ctx = ServiceContext::new(&name, Arc::clone(infra));
                    step(format!("shutdown {name}"), move || async move {
                        service.shutdown(&ctx).await
                    })
                })
                .collect();
            run_serial(steps, Some(self.config.orchestrator.shutdown_step_timeout())).await;
            infra.fabric.shutdown().await;
        }

        self.lifecycle.set_stopped();
        info!("node stopped");
    }
}

async fn call_phase(
    phase: Phase,
    service: &dyn Service,
    ctx: &ServiceContext,
    config: &serde_json::Value,
) -> anyhow::Result<()> {
    match phase {
        Phase::Configure => service.configure(ctx, config).await,
        Phase::Init => service.init(ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use fleet_core::MapEnv;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::config::{BackendConfig, BusConfig, TransportKind};
    use crate::messaging::MemoryBus;
    use crate::network::HealthState;
    use crate::resolver::DnsLookup;

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Clone, Default)]
    struct Probe {
        name: &'static str,
        log: Log,
        fail_in: Option<Phase>,
        panic_in_configure: bool,
        configure_delay: Duration,
        seen_config: Arc<Mutex<Option<serde_json::Value>>>,
    }

    impl Probe {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Service for Probe {
        async fn configure(&self, _ctx: &ServiceContext, config: &serde_json::Value) -> anyhow::Result<()> {
            tokio::time::sleep(self.configure_delay).await;
            assert!(!self.panic_in_configure, "probe {} exploded", self.name);
            *self.seen_config.lock() = Some(config.clone());
            self.log.lock().push(format!("configure {}", self.name));
            if self.fail_in == Some(Phase::Configure) {
                anyhow::bail!("{} refused to configure", self.name);
            }
            Ok(())
        }

        async fn init(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
            self.log.lock().push(format!("init {}", self.name));
            if self.fail_in == Some(Phase::Init) {
                anyhow::bail!("{} refused to init", self.name);
            }
            ctx.publish("boot", self.name).await?;
            Ok(())
        }

        async fn shutdown(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
            self.log.lock().push(format!("shutdown {}", self.name));
            Ok(())
        }
    }

    fn config(services: Vec<ServiceDescriptor>, policy: FailurePolicy) -> FleetConfig {
        let mut config = FleetConfig {
            bus: BusConfig {
                transport: TransportKind::Memory,
                nsqd: BackendConfig::new("NSQD", "127.0.0.1:4150"),
                nsqlookupd: BackendConfig::new("NSQLOOKUPD", "127.0.0.1:4161"),
                ..BusConfig::default()
            },
            services,
            ..FleetConfig::default()
        };
        config.orchestrator.failure_policy = policy;
        config
    }

    fn orchestrator(config: FleetConfig, catalog: ServiceCatalog, bus: &MemoryBus) -> Orchestrator {
        Orchestrator::new(config, catalog)
            .with_resolver(Resolver::new(Arc::new(MapEnv::new()), Arc::new(DnsLookup)))
            .with_transport(Arc::new(bus.clone()))
            .with_cache_layer(CacheLayer::new(Arc::new(MemoryCacheStore::new())))
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().clone()
    }

    #[tokio::test]
    async fn init_starts_only_after_every_configure_finished() {
        let log = Log::default();
        let slow = Probe {
            configure_delay: Duration::from_millis(50),
            ..Probe::new("slow", &log)
        };
        let fast = Probe::new("fast", &log);
        let catalog = ServiceCatalog::new()
            .with("slow", move || slow.clone())
            .with("fast", move || fast.clone());
        let bus = MemoryBus::new();
        let mut node = orchestrator(
            config(
                vec![ServiceDescriptor::enabled("slow"), ServiceDescriptor::enabled("fast")],
                FailurePolicy::FailFast,
            ),
            catalog,
            &bus,
        );

        let report = node.start().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.state("slow"), Some(ServiceState::Initialized));
        assert_eq!(report.state("fast"), Some(ServiceState::Initialized));

        let log = entries(&log);
        let last_configure = log.iter().rposition(|e| e.starts_with("configure")).unwrap();
        let first_init = log.iter().position(|e| e.starts_with("init")).unwrap();
        assert!(last_configure < first_init, "{log:?}");
        assert_eq!(bus.stats().published, 2);
        assert_eq!(node.lifecycle().health_state(), HealthState::Ready);
    }

    #[tokio::test]
    async fn configure_receives_the_descriptor_blob() {
        let log = Log::default();
        let probe = Probe::new("users", &log);
        let seen = Arc::clone(&probe.seen_config);
        let catalog = ServiceCatalog::new().with("users", move || probe.clone());
        let descriptor = ServiceDescriptor::enabled("users").with_config(json!({"page_size": 25}));
        let mut node = orchestrator(
            config(vec![descriptor], FailurePolicy::FailFast),
            catalog,
            &MemoryBus::new(),
        );

        node.start().await.unwrap();
        assert_eq!(*seen.lock(), Some(json!({"page_size": 25})));
    }

    #[tokio::test]
    async fn disabled_services_are_never_touched() {
        let log = Log::default();
        let on = Probe::new("on", &log);
        let off = Probe::new("off", &log);
        let catalog = ServiceCatalog::new()
            .with("on", move || on.clone())
            .with("off", move || off.clone());
        let mut node = orchestrator(
            config(
                vec![ServiceDescriptor::disabled("off"), ServiceDescriptor::enabled("on")],
                FailurePolicy::FailFast,
            ),
            catalog,
            &MemoryBus::new(),
        );

        let report = node.start().await.unwrap();
        assert_eq!(report.state("off"), Some(ServiceState::Skipped));
        assert_eq!(report.state("on"), Some(ServiceState::Initialized));
        assert!(entries(&log).iter().all(|e| !e.ends_with("off")));
        assert!(node.registry().get_by_name("off").is_none());
    }

    #[tokio::test]
    async fn fail_fast_aborts_startup_on_first_failure() {
        let log = Log::default();
        let bad = Probe {
            fail_in: Some(Phase::Configure),
            ..Probe::new("bad", &log)
        };
        let good = Probe::new("good", &log);
        let catalog = ServiceCatalog::new()
            .with("bad", move || bad.clone())
            .with("good", move || good.clone());
        let mut node = orchestrator(
            config(
                vec![ServiceDescriptor::enabled("good"), ServiceDescriptor::enabled("bad")],
                FailurePolicy::FailFast,
            ),
            catalog,
            &MemoryBus::new(),
        );

        let err = node.start().await.unwrap_err();
        match err {
            BootError::PhaseFailed { service, phase, .. } => {
                assert_eq!(service, "bad");
                assert_eq!(phase, Phase::Configure);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(entries(&log).iter().all(|e| !e.starts_with("init")));
        assert_eq!(node.registry().state("bad"), Some(ServiceState::Failed));
        assert_ne!(node.lifecycle().health_state(), HealthState::Ready);
    }

    #[tokio::test]
    async fn collect_and_continue_boots_the_survivors() {
        let log = Log::default();
        let bad = Probe {
            fail_in: Some(Phase::Configure),
            ..Probe::new("bad", &log)
        };
        let flaky = Probe {
            fail_in: Some(Phase::Init),
            ..Probe::new("flaky", &log)
        };
        let good = Probe::new("good", &log);
        let catalog = ServiceCatalog::new()
            .with("bad", move || bad.clone())
            .with("flaky", move || flaky.clone())
            .with("good", move || good.clone());
        let mut node = orchestrator(
            config(
                vec![
                    ServiceDescriptor::enabled("bad"),
                    ServiceDescriptor::enabled("flaky"),
                    ServiceDescriptor::enabled("good"),
                ],
                FailurePolicy::CollectAndContinue,
            ),
            catalog,
            &MemoryBus::new(),
        );

        let report = node.start().await.unwrap();
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.state("bad"), Some(ServiceState::Failed));
        assert_eq!(report.state("flaky"), Some(ServiceState::Failed));
        assert_eq!(report.state("good"), Some(ServiceState::Initialized));
        assert!(!entries(&log).contains(&"init bad".to_string()));
        assert!(report.failures.iter().any(|f| f.service == "flaky" && f.phase == Phase::Init));
    }

    #[tokio::test]
    async fn a_panicking_service_counts_as_failed() {
        let log = Log::default();
        let boom = Probe {
            panic_in_configure: true,
            ..Probe::new("boom", &log)
        };
        let good = Probe::new("good", &log);
        let catalog = ServiceCatalog::new()
            .with("boom", move || boom.clone())
            .with("good", move || good.clone());
        let mut node = orchestrator(
            config(
                vec![ServiceDescriptor::enabled("boom"), ServiceDescriptor::enabled("good")],
                FailurePolicy::CollectAndContinue,
            ),
            catalog,
            &MemoryBus::new(),
        );

        let report = tokio::time::timeout(Duration::from_secs(5), node.start())
            .await
            .expect("barrier must not hang")
            .unwrap();
        assert_eq!(report.state("boom"), Some(ServiceState::Failed));
        assert_eq!(report.state("good"), Some(ServiceState::Initialized));
    }

    #[tokio::test]
    async fn unknown_service_fails_before_any_phase() {
        let log = Log::default();
        let good = Probe::new("good", &log);
        let catalog = ServiceCatalog::new().with("good", move || good.clone());
        let mut node = orchestrator(
            config(
                vec![ServiceDescriptor::enabled("good"), ServiceDescriptor::enabled("ghost")],
                FailurePolicy::CollectAndContinue,
            ),
            catalog,
            &MemoryBus::new(),
        );

        let err = node.start().await.unwrap_err();
        assert!(matches!(err, BootError::UnknownService { ref name, .. } if name == "ghost"));
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut node = orchestrator(
            config(Vec::new(), FailurePolicy::FailFast),
            ServiceCatalog::new(),
            &MemoryBus::new(),
        );
        let report = node.start().await.unwrap();
        assert!(report.states.is_empty());
        assert!(matches!(node.start().await, Err(BootError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn shutdown_runs_in_reverse_order_once() {
        let log = Log::default();
        let first = Probe::new("first", &log);
        let second = Probe::new("second", &log);
        let catalog = ServiceCatalog::new()
            .with("first", move || first.clone())
            .with("second", move || second.clone());
        let mut node = orchestrator(
            config(
                vec![ServiceDescriptor::enabled("first"), ServiceDescriptor::enabled("second")],
                FailurePolicy::FailFast,
            ),
            catalog,
            &MemoryBus::new(),
        );
        node.start().await.unwrap();

        node.shutdown().await;
        node.shutdown().await;

        let shutdowns: Vec<_> = entries(&log)
            .into_iter()
            .filter(|e| e.starts_with("shutdown"))
            .collect();
        assert_eq!(shutdowns, vec!["shutdown second", "shutdown first"]);
        assert_eq!(node.lifecycle().health_state(), HealthState::Stopped);
        let infra = node.infrastructure().unwrap();
        assert_eq!(infra.fabric.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn services_find_each_other_through_the_registry() {
        let log = Log::default();
        let users = Probe::new("users", &log);
        let catalog = ServiceCatalog::new().with("users", move || users.clone());
        let mut node = orchestrator(
            config(vec![ServiceDescriptor::enabled("users")], FailurePolicy::FailFast),
            catalog,
            &MemoryBus::new(),
        );
        node.start().await.unwrap();

        let infra = node.infrastructure().unwrap();
        let ctx = ServiceContext::new("other", Arc::clone(infra));
        let found = ctx.service::<Probe>("users").unwrap();
        assert_eq!(found.name, "users");
        assert!(ctx.cache().is_enabled());
    }

    struct Pricing {
        lookups: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl Service for Pricing {
        async fn init(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
            let mut announcements = ctx.events().subscribe("pricing.loaded");
            for _ in 0..2 {
                let lookups = Arc::clone(&self.lookups);
                let price: u32 = ctx
                    .cached_call("price:sku-1", Some(60), move || async move {
                        lookups.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(42)
                    })
                    .await?;
                anyhow::ensure!(price == 42, "unexpected price {price}");
            }
            ctx.events().emit("pricing.loaded", json!({"skus": 1}));
            let announced = announcements.recv().await?;
            anyhow::ensure!(announced["skus"] == 1, "unexpected payload {announced}");
            Ok(())
        }
    }

    #[tokio::test]
    async fn services_share_the_cache_and_event_bus() {
        let lookups = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&lookups);
        let catalog = ServiceCatalog::new().with("pricing", move || Pricing {
            lookups: Arc::clone(&counter),
        });
        let mut node = orchestrator(
            config(vec![ServiceDescriptor::enabled("pricing")], FailurePolicy::FailFast),
            catalog,
            &MemoryBus::new(),
        );

        let report = node.start().await.unwrap();
        assert_eq!(report.state("pricing"), Some(ServiceState::Initialized));
        assert_eq!(lookups.load(std::sync::atomic::Ordering::SeqCst), 1);

        let cache = &node.infrastructure().unwrap().cache;
        assert_eq!(cache.get_cache::<u32>("price:sku-1").await.unwrap(), Some(42));
    }
}
