//! Managed services — the per-service locked lifecycle state machine.
//!
//! A [`Service`] supplies hooks; a [`ManagedService`] owns the state around
//! them. Every transition (`initialize`, `start`, `stop`) takes the service's
//! private lock for its whole duration, so two callers can never run hooks
//! for the same service concurrently. Status is mirrored in a separate
//! short-lived record lock so readers see `starting`/`stopping` while a hook
//! is in flight.
//!
//! On reaching RUNNING a background probe loop is spawned; leaving RUNNING
//! cancels it and waits for it to exit before the stop hook runs.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::config::ServiceOptions;
use crate::core::error::{BoxError, LoaderError, Phase};
use crate::lifecycle::health::{HealthReporter, ServiceHealth};
use crate::lifecycle::status::Status;
use crate::loader::host::Host;
use crate::loader::unit::{Capability, Dependencies};

/// Boxed future returned by lifecycle hooks.
pub type HookFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send + 'a>>;

/// Arguments for [`Service::initialize`].
#[derive(Debug, Clone)]
pub struct InitArgs {
    pub host: Host,
    /// `[services.<name>.options]` from config; empty for units.
    pub options: ServiceOptions,
    pub dependencies: Dependencies,
}

impl InitArgs {
    pub fn new(host: Host) -> Self {
        Self { host, options: ServiceOptions::new(), dependencies: Dependencies::new() }
    }

    pub fn with_options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Dependencies) -> Self {
        self.dependencies = dependencies;
        self
    }
}

// ── Service ───────────────────────────────────────────────────────────────────

/// Lifecycle hooks of a long-lived subsystem. Every hook defaults to a no-op.
///
/// Hooks take `&self`; implementations keep their mutable state behind their
/// own interior locks.
pub trait Service: Send + Sync + 'static {
    fn initialize(&self, _args: InitArgs) -> HookFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn start(&self) -> HookFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn stop(&self) -> HookFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Release resources after a successful stop.
    fn cleanup(&self) -> HookFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn health_check(&self) -> HookFuture<'_, serde_json::Value> {
        Box::pin(async { Ok(serde_json::Value::Object(serde_json::Map::new())) })
    }
}

// ── ServiceRecord ─────────────────────────────────────────────────────────────

/// Point-in-time view of a managed service.
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    pub name: String,
    pub status: Status,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    /// Monotonic counterpart of `started_at`, for uptime.
    pub running_since: Option<Instant>,
    pub instance: Option<Capability>,
}

impl ServiceRecord {
    fn new(name: &str, instance: Option<Capability>) -> Self {
        Self {
            name: name.to_string(),
            status: Status::Uninitialized,
            last_error: None,
            started_at: None,
            running_since: None,
            instance,
        }
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.running_since.map(|since| since.elapsed())
    }
}

// ── ManagedService ────────────────────────────────────────────────────────────

/// Shortest interval between background health probes.
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(100);

struct ProbeLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A service plus its lifecycle state, lock and health loop.
pub struct ManagedService {
    name: String,
    hooks: Arc<dyn Service>,
    reporter: HealthReporter,
    probe_interval: Duration,
    /// Transition lock. Also owns the probe loop, which only exists while RUNNING.
    transition: Mutex<Option<ProbeLoop>>,
    record: RwLock<ServiceRecord>,
}

impl ManagedService {
    /// Wrap a concrete service; its `Arc` doubles as the instance handed to consumers.
    pub fn new<S: Service>(
        name: impl Into<String>,
        service: Arc<S>,
        reporter: HealthReporter,
        probe_interval: Duration,
    ) -> Self {
        let instance: Capability = service.clone();
        Self::from_hooks(name, service, Some(instance), reporter, probe_interval)
    }

    pub(crate) fn from_hooks(
        name: impl Into<String>,
        hooks: Arc<dyn Service>,
        instance: Option<Capability>,
        reporter: HealthReporter,
        probe_interval: Duration,
    ) -> Self {
        let name = name.into();
        if probe_interval < MIN_PROBE_INTERVAL {
            warn!(
                service = %name,
                ?probe_interval,
                "health check interval too short, using {:?}",
                MIN_PROBE_INTERVAL
            );
        }
        let record = ServiceRecord::new(&name, instance);
        Self {
            name,
            hooks,
            reporter,
            probe_interval: probe_interval.max(MIN_PROBE_INTERVAL),
            transition: Mutex::new(None),
            record: RwLock::new(record),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> Status {
        self.read_record(|r| r.status)
    }

    pub fn record(&self) -> ServiceRecord {
        self.read_record(Clone::clone)
    }

    pub fn last_error(&self) -> Option<String> {
        self.read_record(|r| r.last_error.clone())
    }

    /// The instance consumers receive, downcast to `T`.
    pub fn instance<T: std::any::Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.read_record(|r| r.instance.clone())
            .and_then(|cap| cap.downcast::<T>().ok())
    }

    pub(crate) fn capability(&self) -> Option<Capability> {
        self.read_record(|r| r.instance.clone())
    }

    /// `true` while the background probe loop is alive.
    pub fn is_probing(&self) -> bool {
        self.transition
            .try_lock()
            .map(|slot| slot.as_ref().is_some_and(|p| !p.handle.is_finished()))
            .unwrap_or(false)
    }

    /// UNINITIALIZED → INITIALIZING → INITIALIZED. No-op from any other state.
    pub async fn initialize(&self, args: InitArgs) -> Result<(), LoaderError> {
        let _guard = self.transition.lock().await;
        let current = self.status();
        if current != Status::Uninitialized {
            debug!(service = %self.name, status = %current, "initialize skipped");
            return Ok(());
        }

        self.set_status(Status::Initializing);
        match self.hooks.initialize(args).await {
            Ok(()) => {
                self.set_status(Status::Initialized);
                debug!(service = %self.name, "initialized");
                Ok(())
            }
            Err(e) => Err(self.fail(Phase::Initialize, e)),
        }
    }

    /// INITIALIZED → STARTING → RUNNING. No-op from any other state.
    pub async fn start(&self) -> Result<(), LoaderError> {
        let mut probe = self.transition.lock().await;
        let current = self.status();
        if current != Status::Initialized {
            debug!(service = %self.name, status = %current, "start skipped");
            return Ok(());
        }

        self.set_status(Status::Starting);
        match self.hooks.start().await {
            Ok(()) => {
                self.write_record(|r| {
                    r.status = Status::Running;
                    r.started_at = Some(Utc::now());
                    r.running_since = Some(Instant::now());
                });
                *probe = Some(self.spawn_probe_loop());
                info!(service = %self.name, "running");
                Ok(())
            }
            Err(e) => Err(self.fail(Phase::Start, e)),
        }
    }

    /// RUNNING → STOPPING → STOPPED, then cleanup. No-op unless RUNNING.
    pub async fn stop(&self) -> Result<(), LoaderError> {
        let mut probe = self.transition.lock().await;
        let current = self.status();
        if current != Status::Running {
            debug!(service = %self.name, status = %current, "stop skipped");
            return Ok(());
        }

        if let Some(running) = probe.take() {
            running.token.cancel();
            if let Err(e) = running.handle.await {
                warn!(service = %self.name, "health loop ended abnormally: {e}");
            }
        }
        self.reporter.clear().await;

        self.write_record(|r| {
            r.status = Status::Stopping;
            r.running_since = None;
        });
        if let Err(e) = self.hooks.stop().await {
            return Err(self.fail(Phase::Stop, e));
        }
        self.set_status(Status::Stopped);
        info!(service = %self.name, "stopped");

        if let Err(e) = self.hooks.cleanup().await {
            warn!(service = %self.name, error = %e, "cleanup failed");
            self.write_record(|r| r.last_error = Some(format!("cleanup: {e}")));
        }
        Ok(())
    }

    /// Build a live health report. Never changes status.
    pub async fn health_check(&self) -> ServiceHealth {
        let record = self.record();
        let mut report = ServiceHealth {
            name: record.name.clone(),
            status: record.status,
            uptime_secs: record.uptime().map(|d| d.as_secs_f64()),
            started_at: record.started_at.filter(|_| record.status == Status::Running),
            last_error: record.last_error.clone(),
            message: "ok".to_string(),
            details: None,
        };

        match record.status {
            Status::Running => match self.hooks.health_check().await {
                Ok(details) => report.details = Some(details),
                Err(e) => {
                    warn!(service = %self.name, error = %e, "health check failed");
                    report.message = e.to_string();
                }
            },
            Status::Error => {
                report.message = record.last_error.unwrap_or_else(|| "error".to_string());
            }
            other => report.message = other.to_string(),
        }
        report
    }

    fn spawn_probe_loop(&self) -> ProbeLoop {
        let token = CancellationToken::new();
        let handle = tokio::spawn(probe_loop(
            self.name.clone(),
            Arc::clone(&self.hooks),
            self.reporter.clone(),
            self.probe_interval,
            token.clone(),
        ));
        ProbeLoop { token, handle }
    }

    fn fail(&self, phase: Phase, err: BoxError) -> LoaderError {
        error!(service = %self.name, %phase, error = %err, "lifecycle hook failed");
        let e = LoaderError::lifecycle(&self.name, phase, &err);
        self.write_record(|r| {
            r.status = Status::Error;
            r.last_error = Some(err.to_string());
            r.running_since = None;
        });
        e
    }

    fn set_status(&self, status: Status) {
        self.write_record(|r| r.status = status);
    }

    fn read_record<T>(&self, f: impl FnOnce(&ServiceRecord) -> T) -> T {
        f(&self.record.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write_record(&self, f: impl FnOnce(&mut ServiceRecord)) {
        f(&mut self.record.write().unwrap_or_else(PoisonError::into_inner));
    }
}

impl Drop for ManagedService {
    fn drop(&mut self) {
        if let Some(running) = self.transition.get_mut().take() {
            running.token.cancel();
        }
    }
}

impl std::fmt::Debug for ManagedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedService")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

/// Probe `hooks` every `interval` until `token` is cancelled.
///
/// Failures are logged and cached; they never touch lifecycle status.
async fn probe_loop(
    name: String,
    hooks: Arc<dyn Service>,
    reporter: HealthReporter,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            r = hooks.health_check() => r,
        };

        match result {
            Ok(details) => reporter.record_ok(details).await,
            Err(e) => {
                warn!(service = %name, error = %e, "health check failed");
                reporter.record_failure(e.to_string()).await;
            }
        }
    }
    debug!(service = %name, "health loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::lifecycle::health::HealthRegistry;

    #[derive(Default)]
    struct Probe {
        inits: AtomicUsize,
        starts: AtomicUsize,
        stops: AtomicUsize,
        cleanups: AtomicUsize,
        probes: AtomicUsize,
        fail_init: AtomicBool,
        fail_stop: AtomicBool,
        fail_health: AtomicBool,
    }

    impl Service for Probe {
        fn initialize(&self, args: InitArgs) -> HookFuture<'_, ()> {
            Box::pin(async move {
                self.inits.fetch_add(1, Ordering::SeqCst);
                if self.fail_init.load(Ordering::SeqCst) {
                    return Err(format!("bad options: {:?}", args.options.keys().collect::<Vec<_>>()).into());
                }
                Ok(())
            })
        }

        fn start(&self) -> HookFuture<'_, ()> {
            Box::pin(async {
                self.starts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }

        fn stop(&self) -> HookFuture<'_, ()> {
            Box::pin(async {
                self.stops.fetch_add(1, Ordering::SeqCst);
                if self.fail_stop.load(Ordering::SeqCst) {
                    return Err("socket already closed".into());
                }
                Ok(())
            })
        }

        fn cleanup(&self) -> HookFuture<'_, ()> {
            Box::pin(async {
                self.cleanups.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }

        fn health_check(&self) -> HookFuture<'_, serde_json::Value> {
            Box::pin(async {
                self.probes.fetch_add(1, Ordering::SeqCst);
                if self.fail_health.load(Ordering::SeqCst) {
                    return Err("ping timed out".into());
                }
                Ok(serde_json::json!({ "connections": 2 }))
            })
        }
    }

    fn managed(probe: Arc<Probe>, registry: &HealthRegistry) -> ManagedService {
        ManagedService::new("probe", probe, registry.reporter("probe"), Duration::from_secs(10))
    }

    fn args() -> InitArgs {
        InitArgs::new(Host::new("test"))
    }

    #[tokio::test]
    async fn happy_path_transitions() {
        let registry = HealthRegistry::new();
        let probe = Arc::new(Probe::default());
        let svc = managed(probe.clone(), &registry);

        assert_eq!(svc.status(), Status::Uninitialized);
        svc.initialize(args()).await.unwrap();
        assert_eq!(svc.status(), Status::Initialized);
        svc.start().await.unwrap();
        assert_eq!(svc.status(), Status::Running);
        assert!(svc.record().started_at.is_some());
        svc.stop().await.unwrap();
        assert_eq!(svc.status(), Status::Stopped);

        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
        assert_eq!(probe.cleanups.load(Ordering::SeqCst), 1);
        assert!(svc.record().uptime().is_none());
    }

    #[tokio::test]
    async fn initialize_twice_runs_hook_once() {
        let registry = HealthRegistry::new();
        let probe = Arc::new(Probe::default());
        let svc = managed(probe.clone(), &registry);

        svc.initialize(args()).await.unwrap();
        svc.initialize(args()).await.unwrap();

        assert_eq!(probe.inits.load(Ordering::SeqCst), 1);
        assert_eq!(svc.status(), Status::Initialized);
    }

    #[tokio::test]
    async fn start_when_running_is_noop() {
        let registry = HealthRegistry::new();
        let probe = Arc::new(Probe::default());
        let svc = managed(probe.clone(), &registry);
        svc.initialize(args()).await.unwrap();
        svc.start().await.unwrap();
        let started_at = svc.record().started_at;

        svc.start().await.unwrap();

        assert_eq!(probe.starts.load(Ordering::SeqCst), 1);
        assert_eq!(svc.status(), Status::Running);
        assert_eq!(svc.record().started_at, started_at);
        svc.stop().await.unwrap();
    }

    #[tokio::test]
    async fn start_before_initialize_is_noop() {
        let registry = HealthRegistry::new();
        let probe = Arc::new(Probe::default());
        let svc = managed(probe.clone(), &registry);

        svc.start().await.unwrap();

        assert_eq!(probe.starts.load(Ordering::SeqCst), 0);
        assert_eq!(svc.status(), Status::Uninitialized);
    }

    #[tokio::test]
    async fn stop_when_not_running_is_noop() {
        let registry = HealthRegistry::new();
        let probe = Arc::new(Probe::default());
        let svc = managed(probe.clone(), &registry);
        svc.initialize(args()).await.unwrap();

        svc.stop().await.unwrap();

        assert_eq!(probe.stops.load(Ordering::SeqCst), 0);
        assert_eq!(svc.status(), Status::Initialized);
    }

    #[tokio::test]
    async fn initialize_failure_records_error_and_propagates() {
        let registry = HealthRegistry::new();
        let probe = Arc::new(Probe::default());
        probe.fail_init.store(true, Ordering::SeqCst);
        let svc = managed(probe, &registry);

        let err = svc.initialize(args()).await.unwrap_err();

        assert!(matches!(err, LoaderError::Lifecycle { phase: Phase::Initialize, .. }));
        assert_eq!(svc.status(), Status::Error);
        assert!(svc.last_error().unwrap().contains("bad options"));
        // ERROR is terminal for start.
        svc.start().await.unwrap();
        assert_eq!(svc.status(), Status::Error);
    }

    #[tokio::test]
    async fn stop_failure_sets_error_and_skips_cleanup() {
        let registry = HealthRegistry::new();
        let probe = Arc::new(Probe::default());
        probe.fail_stop.store(true, Ordering::SeqCst);
        let svc = managed(probe.clone(), &registry);
        svc.initialize(args()).await.unwrap();
        svc.start().await.unwrap();

        let err = svc.stop().await.unwrap_err();

        assert!(err.to_string().contains("failed to stop"));
        assert_eq!(svc.status(), Status::Error);
        assert_eq!(probe.cleanups.load(Ordering::SeqCst), 0);
        assert!(!svc.is_probing());
    }

    #[tokio::test]
    async fn health_check_while_running_reports_uptime_and_details() {
        let registry = HealthRegistry::new();
        let probe = Arc::new(Probe::default());
        let svc = managed(probe, &registry);
        svc.initialize(args()).await.unwrap();
        svc.start().await.unwrap();

        let report = svc.health_check().await;

        assert_eq!(report.name, "probe");
        assert_eq!(report.status, Status::Running);
        assert!(report.uptime_secs.is_some());
        assert_eq!(report.details.unwrap()["connections"], 2);
        assert!(report.started_at.is_some());
        svc.stop().await.unwrap();
    }

    #[tokio::test]
    async fn failing_health_hook_never_changes_status() {
        let registry = HealthRegistry::new();
        let probe = Arc::new(Probe::default());
        probe.fail_health.store(true, Ordering::SeqCst);
        let svc = managed(probe, &registry);
        svc.initialize(args()).await.unwrap();
        svc.start().await.unwrap();

        let report = svc.health_check().await;

        assert_eq!(report.status, Status::Running);
        assert_eq!(report.message, "ping timed out");
        assert!(!report.is_healthy());
        assert_eq!(svc.status(), Status::Running);
        svc.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn probe_loop_runs_while_running_and_stops_on_stop() {
        let registry = HealthRegistry::new();
        let probe = Arc::new(Probe::default());
        let svc = managed(probe.clone(), &registry);
        svc.initialize(args()).await.unwrap();
        svc.start().await.unwrap();
        assert!(svc.is_probing());

        tokio::time::sleep(Duration::from_secs(25)).await;
        let probed = probe.probes.load(Ordering::SeqCst);
        assert_eq!(probed, 2);
        assert!(registry.reporter("probe").current().await.unwrap().healthy);

        svc.stop().await.unwrap();
        assert!(!svc.is_probing());
        assert!(registry.snapshot().await.is_empty());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.probes.load(Ordering::SeqCst), probed);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failures_are_cached_not_fatal() {
        let registry = HealthRegistry::new();
        let probe = Arc::new(Probe::default());
        probe.fail_health.store(true, Ordering::SeqCst);
        let svc = managed(probe, &registry);
        svc.initialize(args()).await.unwrap();
        svc.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;

        let cached = registry.reporter("probe").current().await.unwrap();
        assert!(!cached.healthy);
        assert_eq!(cached.message, "ping timed out");
        assert_eq!(svc.status(), Status::Running);
        svc.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_probe_interval_is_clamped() {
        let registry = HealthRegistry::new();
        let probe = Arc::new(Probe::default());
        let svc = ManagedService::new("probe", probe.clone(), registry.reporter("probe"), Duration::ZERO);
        svc.initialize(args()).await.unwrap();
        svc.start().await.unwrap();

        tokio::time::sleep(MIN_PROBE_INTERVAL * 3 + Duration::from_millis(10)).await;

        assert!(svc.is_probing());
        assert_eq!(probe.probes.load(Ordering::SeqCst), 3);
        svc.stop().await.unwrap();
    }

    #[tokio::test]
    async fn instance_downcasts_to_concrete_service() {
        let registry = HealthRegistry::new();
        let probe = Arc::new(Probe::default());
        let svc = managed(probe.clone(), &registry);

        let inst = svc.instance::<Probe>().unwrap();
        assert!(Arc::ptr_eq(&inst, &probe));
        assert!(svc.instance::<String>().is_none());
    }
}
