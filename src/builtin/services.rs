//! In-memory stand-ins for the `database` and `cache` services.
//!
//! Neither talks to a real backend. They track their own connection state,
//! read their options from `[services.<name>.options]`, and report both from
//! `health_check`, which is enough for units to depend on them and for the
//! health loop to have something to probe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use serde_json::json;
use tracing::{debug, info};

use crate::core::config::ServiceOptions;
use crate::core::error::BoxError;
use crate::lifecycle::{HookFuture, InitArgs, Service};

fn string_option(options: &ServiceOptions, key: &str, default: &str) -> Result<String, BoxError> {
    match options.get(key) {
        None => Ok(default.to_string()),
        Some(toml::Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(format!("option '{key}' must be a string, got {}", other.type_str()).into()),
    }
}

// ── Database ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct DatabaseSettings {
    url: String,
    pool_size: u32,
}

/// Pretend connection pool.
#[derive(Debug)]
pub struct DatabaseService {
    settings: RwLock<Option<DatabaseSettings>>,
    connected: AtomicBool,
    queries: AtomicU64,
}

impl DatabaseService {
    pub const DEFAULT_URL: &'static str = "memory://nexus";
    pub const DEFAULT_POOL_SIZE: u32 = 4;

    pub fn new() -> Self {
        Self {
            settings: RwLock::new(None),
            connected: AtomicBool::new(false),
            queries: AtomicU64::new(0),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn url(&self) -> Option<String> {
        self.read_settings().map(|s| s.url)
    }

    pub fn pool_size(&self) -> Option<u32> {
        self.read_settings().map(|s| s.pool_size)
    }

    /// Count a statement against the pool. Fails when not connected.
    pub fn execute(&self, statement: &str) -> Result<u64, BoxError> {
        if !self.is_connected() {
            return Err("database is not connected".into());
        }
        debug!(%statement, "database execute");
        Ok(self.queries.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    fn read_settings(&self) -> Option<DatabaseSettings> {
        self.settings.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn parse(options: &ServiceOptions) -> Result<DatabaseSettings, BoxError> {
        let url = string_option(options, "url", Self::DEFAULT_URL)?;
        let pool_size = match options.get("pool_size") {
            None => Self::DEFAULT_POOL_SIZE,
            Some(toml::Value::Integer(n)) if *n > 0 => u32::try_from(*n)?,
            Some(other) => {
                return Err(format!("option 'pool_size' must be a positive integer, got {other}").into());
            }
        };
        Ok(DatabaseSettings { url, pool_size })
    }
}

impl Default for DatabaseService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for DatabaseService {
    fn initialize(&self, args: InitArgs) -> HookFuture<'_, ()> {
        Box::pin(async move {
            let settings = Self::parse(&args.options)?;
            info!(url = %settings.url, pool_size = settings.pool_size, "database configured");
            *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Some(settings);
            Ok(())
        })
    }

    fn start(&self) -> HookFuture<'_, ()> {
        Box::pin(async {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn stop(&self) -> HookFuture<'_, ()> {
        Box::pin(async {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        })
    }

    fn cleanup(&self) -> HookFuture<'_, ()> {
        Box::pin(async {
            self.queries.store(0, Ordering::SeqCst);
            Ok(())
        })
    }

    fn health_check(&self) -> HookFuture<'_, serde_json::Value> {
        Box::pin(async {
            if !self.is_connected() {
                return Err("database connection lost".into());
            }
            Ok(json!({
                "url": self.url(),
                "pool_size": self.pool_size(),
                "connected": true,
                "queries": self.query_count(),
            }))
        })
    }
}

// ── Cache ─────────────────────────────────────────────────────────────────────

/// Namespaced in-memory key/value store.
#[derive(Debug, Default)]
pub struct CacheService {
    namespace: RwLock<String>,
    entries: RwLock<HashMap<String, String>>,
    connected: AtomicBool,
}

impl CacheService {
    pub const DEFAULT_NAMESPACE: &'static str = "nexus";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(&self) -> String {
        self.namespace.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let key = self.qualify(key);
        self.entries.read().unwrap_or_else(PoisonError::into_inner).get(&key).cloned()
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        let key = self.qualify(key);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        let key = self.qualify(key);
        self.entries.write().unwrap_or_else(PoisonError::into_inner).remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn qualify(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace())
    }
}

impl Service for CacheService {
    fn initialize(&self, args: InitArgs) -> HookFuture<'_, ()> {
        Box::pin(async move {
            let namespace = string_option(&args.options, "namespace", Self::DEFAULT_NAMESPACE)?;
            if namespace.is_empty() {
                return Err("option 'namespace' must not be empty".into());
            }
            info!(%namespace, "cache configured");
            *self.namespace.write().unwrap_or_else(PoisonError::into_inner) = namespace;
            Ok(())
        })
    }

    fn start(&self) -> HookFuture<'_, ()> {
        Box::pin(async {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn stop(&self) -> HookFuture<'_, ()> {
        Box::pin(async {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        })
    }

    fn cleanup(&self) -> HookFuture<'_, ()> {
        Box::pin(async {
            self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
            Ok(())
        })
    }

    fn health_check(&self) -> HookFuture<'_, serde_json::Value> {
        Box::pin(async {
            if !self.is_connected() {
                return Err("cache connection lost".into());
            }
            Ok(json!({ "namespace": self.namespace(), "entries": self.len() }))
        })
    }
}
