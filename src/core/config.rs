//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` (or the path given on the command line), then
//! applies `NEXUS_LOG_LEVEL` and `NEXUS_LOG_FILE` env overrides.

use std::{
    collections::{BTreeMap, HashSet},
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::bootstrap::logger;
use crate::core::error::AppError;

/// Options table handed to a service's `initialize` hook.
pub type ServiceOptions = toml::Table;

/// Per-service configuration from `[services.<name>]`.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub enabled: bool,
    pub options: ServiceOptions,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_name: String,
    pub log_level: String,
    /// Append log output here instead of stderr (already expanded, no `~`).
    pub log_file: Option<PathBuf>,
    /// Interval between background health probes of a RUNNING service.
    pub health_check_interval: Duration,
    pub services: BTreeMap<String, ServiceConfig>,
    /// Units whose `[units.<name>]` section sets `enabled = false`.
    pub disabled_units: HashSet<String>,
}

impl Config {
    /// Services default to enabled when they have no section at all.
    pub fn service_enabled(&self, name: &str) -> bool {
        self.services.get(name).map_or(true, |s| s.enabled)
    }

    pub fn service_options(&self, name: &str) -> ServiceOptions {
        self.services
            .get(name)
            .map(|s| s.options.clone())
            .unwrap_or_default()
    }

    pub fn unit_enabled(&self, name: &str) -> bool {
        !self.disabled_units.contains(name)
    }
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    loader: RawLoader,
    #[serde(default)]
    services: BTreeMap<String, RawService>,
    #[serde(default)]
    units: BTreeMap<String, RawUnit>,
}

#[derive(Deserialize)]
struct RawLoader {
    bot_name: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
    #[serde(default = "default_health_check_interval_secs")]
    health_check_interval_secs: u64,
}

#[derive(Deserialize)]
struct RawService {
    /// Defaults to `true`; set to `false` to skip registration.
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    options: toml::Table,
}

#[derive(Deserialize)]
struct RawUnit {
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Load config from `path` (default `config/default.toml`), then apply env-var overrides.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    let log_level_override = env::var("NEXUS_LOG_LEVEL").ok();
    let log_file_override = env::var("NEXUS_LOG_FILE").ok();
    load_from(
        Path::new(path.unwrap_or("config/default.toml")),
        log_level_override.as_deref(),
        log_file_override.as_deref(),
    )
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    log_level_override: Option<&str>,
    log_file_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse(&raw, log_level_override, log_file_override)
        .map_err(|e| AppError::Config(format!("{} in {}", e, path.display())))
}

fn parse(
    raw: &str,
    log_level_override: Option<&str>,
    log_file_override: Option<&str>,
) -> Result<Config, String> {
    let parsed: RawConfig = toml::from_str(raw).map_err(|e| format!("parse error: {e}"))?;
    let l = parsed.loader;

    if l.health_check_interval_secs == 0 {
        return Err("health_check_interval_secs must be greater than zero".into());
    }

    let log_level = log_level_override.unwrap_or(&l.log_level).to_string();
    validate_log_level(&log_level)?;

    let log_file = log_file_override
        .map(str::to_string)
        .or(l.log_file)
        .filter(|p| !p.is_empty())
        .map(|p| expand_home(&p));

    Ok(Config {
        bot_name: l.bot_name,
        log_level,
        log_file,
        health_check_interval: Duration::from_secs(l.health_check_interval_secs),
        services: parsed
            .services
            .into_iter()
            .map(|(name, s)| (name, ServiceConfig { enabled: s.enabled, options: s.options }))
            .collect(),
        disabled_units: parsed
            .units
            .into_iter()
            .filter(|(_, u)| !u.enabled)
            .map(|(name, _)| name)
            .collect(),
    })
}

/// Plain level names must parse; full `EnvFilter` directives are left to the logger.
fn validate_log_level(level: &str) -> Result<(), String> {
    if level.contains(['=', ',']) {
        return Ok(());
    }
    logger::parse_level(level).map(|_| ()).map_err(|e| e.to_string())
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

#[cfg(test)]
impl Config {
    pub fn test_default() -> Self {
        Self {
            bot_name: "test".into(),
            log_level: "info".into(),
            log_file: None,
            health_check_interval: Duration::from_secs(30),
            services: BTreeMap::new(),
            disabled_units: HashSet::new(),
        }
    }
}
