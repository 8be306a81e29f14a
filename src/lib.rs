//! Nexus loader — dependency-aware boot and teardown of services and units.
//!
//! - **core** — configuration and error types.
//! - **bootstrap** — logger initialisation.
//! - **lifecycle** — per-service status machine and health reporting.
//! - **loader** — unit contracts, dependency graph, discovery and the orchestrator.
//! - **builtin** — the demonstration services and units the binary boots.

pub mod bootstrap;
pub mod builtin;
pub mod core;
pub mod lifecycle;
pub mod loader;

pub use crate::core::error::{AppError, BoxError, LoaderError, Phase};
pub use lifecycle::{ManagedService, Service, ServiceHealth, Status};
pub use loader::{Catalog, Dependencies, Dependency, Host, Orchestrator, Provider, Unit};
