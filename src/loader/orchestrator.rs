//! Orchestrator — boots services and units in dependency order and tears
//! them down in reverse.
//!
//! # Boot
//!
//! 1. Discover units from the [`Catalog`] (once).
//! 2. Build the [`DependencyGraph`] and compute order and levels. Missing
//!    dependencies, cycles and ambiguous providers fail here, before any
//!    hook runs.
//! 3. Bring every registered service up, all at once.
//! 4. For each unit level: resolve dependencies and bring every member up
//!    concurrently; join the whole level before starting the next one.
//!
//! Any failure stops further levels, tears down whatever already reached
//! RUNNING, and returns the original error.
//!
//! # Teardown
//!
//! [`Orchestrator::stop_all`] stops records in the exact reverse of the
//! order they reached RUNNING. A failing stop is reported, not allowed to
//! block the rest.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use crate::core::config::{Config, ServiceOptions};
use crate::core::error::LoaderError;
use crate::lifecycle::{
    HealthRegistry, HookFuture, InitArgs, ManagedService, ProbeResult, Service, ServiceHealth,
    Status,
};
use crate::loader::discovery::{self, Catalog};
use crate::loader::graph::{DependencyGraph, Level};
use crate::loader::host::Host;
use crate::loader::unit::{Capability, Dependencies, Unit};

// ── Settings ──────────────────────────────────────────────────────────────────

/// Knobs the orchestrator takes from configuration.
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub health_check_interval: Duration,
    pub disabled_units: HashSet<String>,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self { health_check_interval: Duration::from_secs(30), disabled_units: HashSet::new() }
    }
}

impl LoaderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            health_check_interval: config.health_check_interval,
            disabled_units: config.disabled_units.clone(),
        }
    }
}

// ── Plan / report ─────────────────────────────────────────────────────────────

/// Resolved unit order and its level partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    pub order: Vec<String>,
    pub levels: Vec<Level>,
}

/// Outcome of [`Orchestrator::stop_all`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Names stopped cleanly, in the order they were stopped.
    pub stopped: Vec<String>,
    pub failures: Vec<(String, LoaderError)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ── Unit adapter ──────────────────────────────────────────────────────────────

/// Runs a unit's hooks through the service lifecycle.
struct UnitService(Arc<dyn Unit>);

impl Service for UnitService {
    fn initialize(&self, args: InitArgs) -> HookFuture<'_, ()> {
        Box::pin(async move {
            let InitArgs { host, dependencies, .. } = args;
            self.0.setup(&host, dependencies).await
        })
    }

    fn start(&self) -> HookFuture<'_, ()> {
        self.0.start()
    }

    fn stop(&self) -> HookFuture<'_, ()> {
        self.0.teardown()
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

struct RegisteredService {
    record: Arc<ManagedService>,
    options: ServiceOptions,
}

/// Owns every unit and service record for one boot.
///
/// Construct one per process (or per test) and pass it by reference; there
/// is no global instance.
pub struct Orchestrator {
    catalog: Catalog,
    settings: LoaderSettings,
    health: HealthRegistry,
    discovered: bool,
    units: HashMap<String, Arc<dyn Unit>>,
    /// Registered services, plus units and their capabilities once discovered.
    graph: DependencyGraph,
    /// Pre-registered services, by name.
    services: HashMap<String, RegisteredService>,
    /// Lifecycle records for units, by unit name.
    unit_records: HashMap<String, Arc<ManagedService>>,
    /// Names in the order they reached RUNNING.
    running_order: Mutex<Vec<String>>,
}

impl Orchestrator {
    pub fn new(catalog: Catalog, settings: LoaderSettings) -> Self {
        Self {
            catalog,
            settings,
            health: HealthRegistry::new(),
            discovered: false,
            units: HashMap::new(),
            graph: DependencyGraph::new(),
            services: HashMap::new(),
            unit_records: HashMap::new(),
            running_order: Mutex::new(Vec::new()),
        }
    }

    /// Pre-register a long-lived service that units can depend on by `name`.
    pub fn register_service<S: Service>(
        &mut self,
        name: &str,
        service: Arc<S>,
        options: ServiceOptions,
    ) -> Result<(), LoaderError> {
        if self.services.contains_key(name) || self.unit_records.contains_key(name) {
            return Err(LoaderError::DuplicateService(name.to_string()));
        }
        let record = Arc::new(ManagedService::new(
            name,
            service,
            self.health.reporter(name),
            self.settings.health_check_interval,
        ));
        self.services.insert(name.to_string(), RegisteredService { record, options });
        self.graph.register_service(name);
        info!(service = %name, "service registered");
        Ok(())
    }

    /// Instantiate catalog units and create their lifecycle records.
    pub fn discover(&mut self) -> Result<(), LoaderError> {
        if self.discovered {
            return Ok(());
        }
        let disabled = &self.settings.disabled_units;
        let found = discovery::discover(&self.catalog, |name| !disabled.contains(name))?;

        let mut graph = self.graph.clone();
        for unit in &found {
            let name = unit.name();
            if self.services.contains_key(name) {
                return Err(LoaderError::DuplicateService(name.to_string()));
            }
            graph.register(name, unit.dependencies().iter().map(|d| d.name().to_string()))?;
            for cap in unit.provider().map(|p| p.provides()).unwrap_or_default() {
                graph.register_provider(name, &cap)?;
            }
        }

        for unit in found {
            let name = unit.name().to_string();
            let record = ManagedService::from_hooks(
                name.as_str(),
                Arc::new(UnitService(Arc::clone(&unit))),
                None,
                self.health.reporter(name.as_str()),
                self.settings.health_check_interval,
            );
            self.unit_records.insert(name.clone(), Arc::new(record));
            self.units.insert(name, unit);
        }
        self.graph = graph;
        self.discovered = true;
        Ok(())
    }

    /// Graph over the registered services and the discovered units.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn plan(&self) -> Result<LoadPlan, LoaderError> {
        let order = self.graph.resolve_order()?;
        let levels = self.graph.group_by_level(&order)?;
        Ok(LoadPlan { order, levels })
    }

    /// Discover, resolve, and bring everything up level by level.
    ///
    /// On failure, everything that reached RUNNING is stopped before the
    /// original error is returned.
    pub async fn load_all(&mut self, host: &Host) -> Result<LoadPlan, LoaderError> {
        self.discover()?;
        let plan = self.plan()?;
        info!(order = ?plan.order, levels = plan.levels.len(), "resolved unit load order");

        if let Err(e) = self.load_levels(host, &plan.levels).await {
            error!(error = %e, "boot failed — stopping everything that started");
            let report = self.stop_all().await;
            if !report.is_clean() {
                warn!(failures = report.failures.len(), "teardown after failed boot was not clean");
            }
            return Err(e);
        }

        info!(units = plan.order.len(), services = self.services.len(), "all units loaded");
        Ok(plan)
    }

    async fn load_levels(&self, host: &Host, levels: &[Level]) -> Result<(), LoaderError> {
        self.start_services(host).await?;

        for (i, level) in levels.iter().enumerate() {
            debug!(level = i, units = ?level, "loading level");
            let results = join_all(level.iter().map(|name| self.load_unit(name, host))).await;
            // Siblings have all finished; surface the first failure.
            if let Some(err) = results.into_iter().find_map(Result::err) {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Initialize and start every registered service concurrently.
    pub async fn start_services(&self, host: &Host) -> Result<(), LoaderError> {
        let mut names: Vec<&String> = self.services.keys().collect();
        names.sort();
        let results = join_all(names.into_iter().map(|name| {
            let svc = &self.services[name];
            let args = InitArgs::new(host.clone()).with_options(svc.options.clone());
            self.bring_up(&svc.record, args)
        }))
        .await;
        results.into_iter().collect()
    }

    /// Resolve one unit's dependencies and bring it up.
    ///
    /// A no-op if the unit is already RUNNING.
    pub async fn load_unit(&self, name: &str, host: &Host) -> Result<(), LoaderError> {
        let unit = self.get_unit(name)?;
        let record = self
            .unit_records
            .get(name)
            .ok_or_else(|| LoaderError::unit_not_found(name))?;
        if record.status() == Status::Running {
            return Ok(());
        }

        let deps = self.resolve_dependencies(unit.as_ref())?;
        info!(unit = %name, deps = ?deps, "loading unit");
        let args = InitArgs::new(host.clone()).with_dependencies(deps);
        self.bring_up(record, args).await
    }

    fn resolve_dependencies(&self, unit: &dyn Unit) -> Result<Dependencies, LoaderError> {
        let mut deps = Dependencies::new();
        for dep in unit.dependencies() {
            let cap = self.resolve_capability(unit.name(), dep.name())?;
            if !dep.accepts(&cap) {
                return Err(LoaderError::TypeMismatch {
                    unit: unit.name().to_string(),
                    dependency: dep.name().to_string(),
                    expected: dep.type_name(),
                });
            }
            deps.insert(dep.name(), cap);
        }
        Ok(deps)
    }

    /// Sibling provider first, then a RUNNING service of the same name.
    fn resolve_capability(&self, unit: &str, dependency: &str) -> Result<Capability, LoaderError> {
        let not_running = |status| LoaderError::DependencyNotRunning {
            unit: unit.to_string(),
            dependency: dependency.to_string(),
            status,
        };
        let missing = || LoaderError::MissingDependency {
            unit: unit.to_string(),
            dependency: dependency.to_string(),
        };

        if let Some(provider_name) = self.graph.provider_of(dependency) {
            let status = self.unit_records[provider_name].status();
            if status != Status::Running {
                return Err(not_running(status));
            }
            return self.units[provider_name]
                .provider()
                .and_then(|p| p.get(dependency))
                .ok_or_else(missing);
        }

        let svc = self.services.get(dependency).ok_or_else(missing)?;
        let status = svc.record.status();
        if status != Status::Running {
            return Err(not_running(status));
        }
        svc.record.capability().ok_or_else(missing)
    }

    /// initialize → start, appending to the running order on success.
    ///
    /// A record left in ERROR or STOPPED by an earlier attempt skips both
    /// hooks; that is reported as [`LoaderError::NotStartable`].
    async fn bring_up(&self, record: &ManagedService, args: InitArgs) -> Result<(), LoaderError> {
        record.initialize(args).await?;
        let was_running = record.status() == Status::Running;
        record.start().await?;

        let status = record.status();
        if status != Status::Running {
            return Err(LoaderError::NotStartable {
                service: record.name().to_string(),
                status,
                last_error: record.last_error(),
            });
        }
        if !was_running {
            self.running_order
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(record.name().to_string());
        }
        Ok(())
    }

    /// Stop everything in reverse RUNNING order, collecting every failure.
    pub async fn stop_all(&self) -> ShutdownReport {
        let order = std::mem::take(
            &mut *self.running_order.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let mut report = ShutdownReport::default();

        for name in order.iter().rev() {
            let Some(record) = self.record(name) else {
                continue;
            };
            match record.stop().await {
                Ok(()) => report.stopped.push(name.clone()),
                Err(e) => {
                    error!(service = %name, error = %e, "stop failed — continuing teardown");
                    report.failures.push((name.clone(), e));
                }
            }
        }

        info!(
            stopped = report.stopped.len(),
            failed = report.failures.len(),
            "teardown complete"
        );
        report
    }

    /// Lifecycle record of a registered service or a discovered unit.
    pub fn get_service(&self, name: &str) -> Result<Arc<ManagedService>, LoaderError> {
        self.record(name)
            .cloned()
            .ok_or_else(|| LoaderError::service_not_found(name))
    }

    /// A RUNNING service's instance as its concrete type.
    ///
    /// `None` if unknown, not RUNNING, or not a `T`.
    pub fn service<T: std::any::Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let record = self.record(name)?;
        if record.status() != Status::Running {
            return None;
        }
        record.instance::<T>()
    }

    pub fn get_unit(&self, name: &str) -> Result<Arc<dyn Unit>, LoaderError> {
        self.units
            .get(name)
            .cloned()
            .ok_or_else(|| LoaderError::unit_not_found(name))
    }

    /// Names in the order they reached RUNNING (cleared by `stop_all`).
    pub fn running_order(&self) -> Vec<String> {
        self.running_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Live health of every record, keyed by name.
    pub async fn health_check(&self) -> BTreeMap<String, ServiceHealth> {
        let records: Vec<&Arc<ManagedService>> = self
            .services
            .values()
            .map(|s| &s.record)
            .chain(self.unit_records.values())
            .collect();
        join_all(records.into_iter().map(|r| r.health_check()))
            .await
            .into_iter()
            .map(|h| (h.name.clone(), h))
            .collect()
    }

    /// Cached results of the background probes.
    pub async fn health_snapshot(&self) -> Vec<ProbeResult> {
        self.health.snapshot().await
    }

    fn record(&self, name: &str) -> Option<&Arc<ManagedService>> {
        self.services
            .get(name)
            .map(|s| &s.record)
            .or_else(|| self.unit_records.get(name))
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut units: Vec<_> = self.units.keys().collect();
        units.sort();
        let mut services: Vec<_> = self.services.keys().collect();
        services.sort();
        f.debug_struct("Orchestrator")
            .field("units", &units)
            .field("services", &services)
            .field("discovered", &self.discovered)
            .finish()
    }
}
