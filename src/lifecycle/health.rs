//! Health reporting — live reports and the push-based probe registry.
//!
//! Two views exist side by side:
//!
//! - [`ServiceHealth`] is built on demand by
//!   [`ManagedService::health_check`](super::ManagedService::health_check):
//!   lifecycle status, uptime and the hook's details, fetched live.
//! - [`HealthRegistry`] caches the last result of each service's background
//!   probe loop. Each RUNNING service writes through its own
//!   [`HealthReporter`]; readers take a snapshot without calling into any
//!   service, so health endpoints stay fast.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::status::Status;

// ── ServiceHealth ─────────────────────────────────────────────────────────────

/// Live health report for one service or unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    pub status: Status,
    /// Seconds since the service reached RUNNING; `None` when not running.
    pub uptime_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// `"ok"`, or the health hook's failure message.
    pub message: String,
    /// Structured output of the service's health hook.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServiceHealth {
    /// `true` when running and the hook did not fail.
    pub fn is_healthy(&self) -> bool {
        self.status == Status::Running && self.message == "ok"
    }
}

// ── ProbeResult ───────────────────────────────────────────────────────────────

/// Outcome of one background health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub service: String,
    pub healthy: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub checked_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn ok(service: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            service: service.into(),
            healthy: true,
            message: "ok".into(),
            details: Some(details),
            checked_at: Utc::now(),
        }
    }

    pub fn failed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            healthy: false,
            message: message.into(),
            details: None,
            checked_at: Utc::now(),
        }
    }
}

// ── HealthRegistry ────────────────────────────────────────────────────────────

/// Shared cache of the latest probe result per service.
///
/// Clone freely — it is backed by an `Arc` and is `Send + Sync`.
#[derive(Clone, Default)]
pub struct HealthRegistry {
    inner: Arc<RwLock<HashMap<String, ProbeResult>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reporter handle that writes under `service`.
    pub fn reporter(&self, service: impl Into<String>) -> HealthReporter {
        HealthReporter { service: service.into(), registry: self.clone() }
    }

    /// Snapshot all current probe results, sorted by service name.
    pub async fn snapshot(&self) -> Vec<ProbeResult> {
        let map = self.inner.read().await;
        let mut v: Vec<_> = map.values().cloned().collect();
        v.sort_by(|a, b| a.service.cmp(&b.service));
        v
    }
}

// ── HealthReporter ────────────────────────────────────────────────────────────

/// Per-service write handle into the [`HealthRegistry`].
#[derive(Clone)]
pub struct HealthReporter {
    service: String,
    registry: HealthRegistry,
}

impl HealthReporter {
    pub async fn record_ok(&self, details: serde_json::Value) {
        self.write(ProbeResult::ok(&self.service, details)).await;
    }

    pub async fn record_failure(&self, message: impl Into<String>) {
        self.write(ProbeResult::failed(&self.service, message)).await;
    }

    /// Drop the cached result; called when the service leaves RUNNING.
    pub async fn clear(&self) {
        self.registry.inner.write().await.remove(&self.service);
    }

    /// Latest probe for this service, or `None` before the first probe.
    pub async fn current(&self) -> Option<ProbeResult> {
        self.registry.inner.read().await.get(&self.service).cloned()
    }

    async fn write(&self, p: ProbeResult) {
        self.registry.inner.write().await.insert(self.service.clone(), p);
    }
}
