//! Service lifecycle — status machine, hooks and health reporting.
//!
//! - **status** — the [`Status`] enum.
//! - **service** — [`Service`] hooks and the locked [`ManagedService`] wrapper.
//! - **health** — live [`ServiceHealth`] reports and the probe [`HealthRegistry`].

pub mod health;
pub mod service;
pub mod status;

pub use health::{HealthRegistry, HealthReporter, ProbeResult, ServiceHealth};
pub use service::{HookFuture, InitArgs, MIN_PROBE_INTERVAL, ManagedService, Service, ServiceRecord};
pub use status::Status;
