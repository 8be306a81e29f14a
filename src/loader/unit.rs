//! Unit contract — what the loader consumes from pluggable feature units.
//!
//! A [`Unit`] declares the dependencies it needs as typed [`Dependency`]
//! descriptors. At load time the orchestrator resolves each one to a
//! [`Capability`] (a sibling unit's [`Provider`] output, or a RUNNING
//! service's instance), checks its type, and hands the lot to
//! [`Unit::setup`] as a [`Dependencies`] bag.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::error::BoxError;
use crate::lifecycle::HookFuture;
use crate::loader::host::Host;

/// A type-erased instance one unit or service produces for others.
pub type Capability = Arc<dyn Any + Send + Sync>;

// ── Dependency ────────────────────────────────────────────────────────────────

/// Named dependency with the concrete type the consumer expects.
#[derive(Clone)]
pub struct Dependency {
    name: String,
    expected: Option<(TypeId, &'static str)>,
}

impl Dependency {
    /// Require `name` and check at resolution time that it is a `T`.
    pub fn of<T: Any + Send + Sync>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expected: Some((TypeId::of::<T>(), std::any::type_name::<T>())),
        }
    }

    /// Require `name` without a type check; the unit downcasts itself.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), expected: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully-qualified name of the expected type, or `"any"`.
    pub fn type_name(&self) -> &'static str {
        self.expected.map_or("any", |(_, name)| name)
    }

    pub(crate) fn accepts(&self, capability: &Capability) -> bool {
        match self.expected {
            Some((id, _)) => Any::type_id(capability.as_ref()) == id,
            None => true,
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.type_name())
    }
}

// ── Dependencies ──────────────────────────────────────────────────────────────

/// Resolved dependency instances, keyed by dependency name.
#[derive(Clone, Default)]
pub struct Dependencies {
    entries: HashMap<String, Capability>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed lookup; `None` if absent or of a different type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.entries
            .get(name)
            .and_then(|cap| Arc::clone(cap).downcast::<T>().ok())
    }

    /// Like [`get`](Self::get) but returns an error suitable for `?` in setup.
    pub fn require<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, BoxError> {
        self.get::<T>(name).ok_or_else(|| {
            format!("dependency '{name}' is not a {}", std::any::type_name::<T>()).into()
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, name: impl Into<String>, capability: Capability) {
        self.entries.insert(name.into(), capability);
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_set().entries(names).finish()
    }
}

// ── Provider ──────────────────────────────────────────────────────────────────

/// Capabilities a unit advertises to its siblings.
///
/// `provides` is read before any setup runs, to build the dependency graph.
/// `get` is only called after the providing unit has reached RUNNING.
pub trait Provider: Send + Sync {
    fn provides(&self) -> Vec<String>;

    fn get(&self, capability: &str) -> Option<Capability>;
}

// ── Unit ──────────────────────────────────────────────────────────────────────

/// A feature module loaded once at boot.
///
/// The loader wraps every unit in its own lifecycle record: `setup` runs as
/// the initialize step, `start` as the start step and `teardown` on stop.
pub trait Unit: Send + Sync + 'static {
    /// Unique name; also the node name in the dependency graph.
    fn name(&self) -> &str;

    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    /// Wire the unit up with its resolved dependencies.
    fn setup<'a>(&'a self, host: &'a Host, deps: Dependencies) -> HookFuture<'a, ()>;

    fn start(&self) -> HookFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn teardown(&self) -> HookFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn provider(&self) -> Option<&dyn Provider> {
        None
    }
}
