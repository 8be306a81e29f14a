//! End-to-end boot tests against the public API and the shipped config.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use nexus_loader::builtin::{self, CacheService, ChatUnit, DatabaseService};
use nexus_loader::core::config;
use nexus_loader::lifecycle::{HookFuture, InitArgs, Service, Status};
use nexus_loader::loader::{
    Catalog, Dependencies, Dependency, DependencyGraph, Host, LoaderSettings, Orchestrator, Unit,
};
use nexus_loader::LoaderError;

fn shipped_config() -> config::Config {
    config::load_from(Path::new("config/default.toml"), None, None).unwrap()
}

#[test]
fn test_default_config_parses() {
    let cfg = shipped_config();
    assert_eq!(cfg.bot_name, "nexus");
    assert!(cfg.service_enabled("database"));
    assert!(cfg.service_enabled("cache"));
    assert!(cfg.unit_enabled("chat"));
    assert_eq!(cfg.service_options("database")["pool_size"].as_integer(), Some(4));
}

#[tokio::test]
async fn test_boot_with_default_config() {
    let cfg = shipped_config();
    let mut orch = Orchestrator::new(builtin::catalog(), LoaderSettings::from_config(&cfg));
    builtin::register_services(&mut orch, &cfg).unwrap();
    let host = Host::new(cfg.bot_name.clone());

    let plan = orch.load_all(&host).await.unwrap();

    assert_eq!(plan.order, vec!["memory", "chat"]);
    assert_eq!(plan.levels.len(), 2);
    for name in ["database", "cache", "memory", "chat"] {
        assert_eq!(orch.get_service(name).unwrap().status(), Status::Running, "{name}");
    }

    let db = orch.service::<DatabaseService>("database").unwrap();
    assert_eq!(db.url().as_deref(), Some("memory://nexus"));
    let cache = orch.service::<CacheService>("cache").unwrap();
    assert_eq!(cache.get(ChatUnit::READY_KEY).as_deref(), Some("nexus"));

    let health = orch.health_check().await;
    assert_eq!(health.len(), 4);
    assert!(health.values().all(|h| h.is_healthy()));
    assert_eq!(health["database"].details.as_ref().unwrap()["connected"], true);

    let report = orch.stop_all().await;
    assert!(report.is_clean());
    assert_eq!(report.stopped, vec!["chat", "memory", "database", "cache"]);
    assert!(!db.is_connected());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_disabled_chat_unit_is_skipped() {
    let mut cfg = shipped_config();
    cfg.disabled_units.insert("chat".into());
    let mut orch = Orchestrator::new(builtin::catalog(), LoaderSettings::from_config(&cfg));
    builtin::register_services(&mut orch, &cfg).unwrap();

    let plan = orch.load_all(&Host::new("nexus")).await.unwrap();

    assert_eq!(plan.order, vec!["memory"]);
    assert!(orch.get_unit("chat").is_err());
    orch.stop_all().await;
}

#[tokio::test]
async fn test_bad_service_options_abort_boot() {
    let mut cfg = shipped_config();
    let db = cfg.services.get_mut("database").unwrap();
    db.options.insert("pool_size".into(), toml::Value::Integer(-1));
    let mut orch = Orchestrator::new(builtin::catalog(), LoaderSettings::from_config(&cfg));
    builtin::register_services(&mut orch, &cfg).unwrap();

    let err = orch.load_all(&Host::new("nexus")).await.unwrap_err();

    assert!(matches!(err, LoaderError::Lifecycle { ref service, .. } if service == "database"));
    assert_eq!(orch.get_service("database").unwrap().status(), Status::Error);
    assert_eq!(orch.get_service("chat").unwrap().status(), Status::Uninitialized);
    assert!(orch.running_order().is_empty());
}

#[test]
fn test_graph_levels_for_independent_units() {
    let mut graph = DependencyGraph::new();
    graph.register("db", Vec::<String>::new()).unwrap();
    graph.register("cache", Vec::<String>::new()).unwrap();
    graph.register("chat", ["db_conn", "cache_conn"]).unwrap();
    graph.register_provider("db", "db_conn").unwrap();
    graph.register_provider("cache", "cache_conn").unwrap();

    let order = graph.resolve_order().unwrap();
    let levels = graph.group_by_level(&order).unwrap();

    assert_eq!(order.last().map(String::as_str), Some("chat"));
    assert_eq!(levels.len(), 2);
    assert!(levels[0].contains("db") && levels[0].contains("cache"));
    assert!(levels[1].contains("chat"));
}

// ── custom units through the public API ───────────────────────────────────────

struct Greeter;

impl Unit for Greeter {
    fn name(&self) -> &str {
        "greeter"
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::of::<Clock>("clock")]
    }

    fn setup<'a>(&'a self, _host: &'a Host, deps: Dependencies) -> HookFuture<'a, ()> {
        Box::pin(async move {
            let clock = deps.require::<Clock>("clock")?;
            clock.ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        })
    }
}

#[derive(Default)]
struct Clock {
    ticks: std::sync::atomic::AtomicUsize,
}

impl Service for Clock {
    fn initialize(&self, args: InitArgs) -> HookFuture<'_, ()> {
        Box::pin(async move {
            if args.options.contains_key("broken") {
                return Err("clock is broken".into());
            }
            Ok(())
        })
    }
}

#[tokio::test]
async fn test_custom_unit_receives_typed_service() {
    let catalog = Catalog::new().with(|| Box::new(Greeter) as Box<dyn Unit>);
    let settings = LoaderSettings { health_check_interval: Duration::from_secs(5), ..Default::default() };
    let mut orch = Orchestrator::new(catalog, settings);
    let clock = Arc::new(Clock::default());
    orch.register_service("clock", Arc::clone(&clock), Default::default()).unwrap();

    orch.load_all(&Host::new("t")).await.unwrap();

    assert_eq!(clock.ticks.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(orch.running_order(), vec!["clock", "greeter"]);
    let report = orch.stop_all().await;
    assert_eq!(report.stopped, vec!["greeter", "clock"]);
}

#[tokio::test(start_paused = true)]
async fn test_probe_results_appear_after_interval() {
    let catalog = Catalog::new();
    let settings = LoaderSettings { health_check_interval: Duration::from_secs(5), ..Default::default() };
    let mut orch = Orchestrator::new(catalog, settings);
    orch.register_service("clock", Arc::new(Clock::default()), Default::default()).unwrap();
    orch.load_all(&Host::new("t")).await.unwrap();
    assert!(orch.health_snapshot().await.is_empty());

    tokio::time::sleep(Duration::from_secs(6)).await;

    let snapshot = orch.health_snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].service, "clock");
    assert!(snapshot[0].healthy);

    orch.stop_all().await;
    assert!(orch.health_snapshot().await.is_empty());
}
