//! Loader — discovers units, resolves their dependency graph and drives
//! services and units through their lifecycles.
//!
//! - **unit** — the [`Unit`] and [`Provider`] contracts and typed dependencies.
//! - **graph** — load order and parallel levels.
//! - **discovery** — the static [`Catalog`] of unit constructors.
//! - **orchestrator** — boot and teardown.

pub mod discovery;
pub mod graph;
pub mod host;
pub mod orchestrator;
pub mod unit;

pub use discovery::Catalog;
pub use graph::{DependencyGraph, Level};
pub use host::Host;
pub use orchestrator::{LoadPlan, LoaderSettings, Orchestrator, ShutdownReport};
pub use unit::{Capability, Dependencies, Dependency, Provider, Unit};
