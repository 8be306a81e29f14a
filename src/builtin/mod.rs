//! Built-in catalog — the services and units the `nexus` binary boots.
//!
//! - **services** — `database` and `cache` in-memory stand-ins.
//! - **units** — `memory` (provides `short_term_memory`) and `chat`.

pub mod services;
pub mod units;

use std::sync::Arc;

use tracing::info;

use crate::core::config::Config;
use crate::core::error::LoaderError;
use crate::loader::{Catalog, Orchestrator};

pub use services::{CacheService, DatabaseService};
pub use units::{ChatUnit, MemoryUnit, SHORT_TERM_MEMORY, ShortTermMemory};

/// Static registration list of built-in units.
pub fn catalog() -> Catalog {
    Catalog::from_fns(&[units::memory_unit, units::chat_unit])
}

/// Register the built-in services that `config` leaves enabled.
pub fn register_services(orch: &mut Orchestrator, config: &Config) -> Result<(), LoaderError> {
    if config.service_enabled("database") {
        orch.register_service("database", Arc::new(DatabaseService::new()), config.service_options("database"))?;
    } else {
        info!(service = "database", "service disabled by config");
    }
    if config.service_enabled("cache") {
        orch.register_service("cache", Arc::new(CacheService::new()), config.service_options("cache"))?;
    } else {
        info!(service = "cache", "service disabled by config");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ServiceConfig;
    use crate::loader::{Host, LoaderSettings};

    #[tokio::test]
    async fn builtin_catalog_boots_and_stops() {
        let config = Config::test_default();
        let mut orch = Orchestrator::new(catalog(), LoaderSettings::from_config(&config));
        register_services(&mut orch, &config).unwrap();

        let plan = orch.load_all(&Host::new("nexus")).await.unwrap();

        assert_eq!(plan.order, vec!["memory", "chat"]);
        let cache = orch.service::<CacheService>("cache").unwrap();
        assert_eq!(cache.get(ChatUnit::READY_KEY).as_deref(), Some("nexus"));

        let report = orch.stop_all().await;
        assert!(report.is_clean());
        assert_eq!(report.stopped, vec!["chat", "memory", "database", "cache"]);
    }

    #[tokio::test]
    async fn disabling_a_required_service_fails_boot() {
        let mut config = Config::test_default();
        config
            .services
            .insert("cache".into(), ServiceConfig { enabled: false, ..ServiceConfig::default() });
        let mut orch = Orchestrator::new(catalog(), LoaderSettings::from_config(&config));
        register_services(&mut orch, &config).unwrap();

        let err = orch.load_all(&Host::new("nexus")).await.unwrap_err();

        assert!(matches!(err, LoaderError::MissingDependency { ref dependency, .. } if dependency == "cache"));
    }
}
