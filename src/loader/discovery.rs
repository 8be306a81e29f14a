//! Unit discovery over a static registration list.
//!
//! Units are not found by scanning anything: the application assembles a
//! [`Catalog`] of constructors at startup, and [`discover`] instantiates the
//! enabled ones. Discovery is a pure function of the catalog and the filter.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::core::error::LoaderError;
use crate::loader::unit::Unit;

type UnitCtor = Box<dyn Fn() -> Box<dyn Unit> + Send + Sync>;

/// Ordered list of unit constructors.
#[derive(Default)]
pub struct Catalog {
    entries: Vec<UnitCtor>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from plain constructor functions, e.g. a `const` array.
    pub fn from_fns(ctors: &[fn() -> Box<dyn Unit>]) -> Self {
        ctors.iter().fold(Self::new(), |cat, &ctor| cat.with(ctor))
    }

    /// Append a constructor. Closures may capture shared state.
    pub fn with(mut self, ctor: impl Fn() -> Box<dyn Unit> + Send + Sync + 'static) -> Self {
        self.entries.push(Box::new(ctor));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").field("entries", &self.entries.len()).finish()
    }
}

/// Instantiate every catalog entry whose name passes `enabled`.
///
/// Fails if two enabled entries share a name.
pub fn discover(
    catalog: &Catalog,
    enabled: impl Fn(&str) -> bool,
) -> Result<Vec<Arc<dyn Unit>>, LoaderError> {
    let mut seen = HashSet::new();
    let mut units = Vec::with_capacity(catalog.len());

    for ctor in &catalog.entries {
        let unit: Arc<dyn Unit> = Arc::from(ctor());
        let name = unit.name().to_string();
        if !enabled(&name) {
            info!(unit = %name, "unit disabled by config");
            continue;
        }
        if !seen.insert(name.clone()) {
            return Err(LoaderError::DuplicateUnit(name));
        }
        debug!(unit = %name, deps = ?unit.dependencies(), "discovered unit");
        units.push(unit);
    }

    info!(count = units.len(), "unit discovery complete");
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::HookFuture;
    use crate::loader::host::Host;
    use crate::loader::unit::Dependencies;

    struct Named(&'static str);

    impl Unit for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn setup<'a>(&'a self, _host: &'a Host, _deps: Dependencies) -> HookFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    fn chat() -> Box<dyn Unit> {
        Box::new(Named("chat"))
    }

    fn memory() -> Box<dyn Unit> {
        Box::new(Named("memory"))
    }

    #[test]
    fn discovers_in_catalog_order() {
        let catalog = Catalog::from_fns(&[memory, chat]);
        let units = discover(&catalog, |_| true).unwrap();
        let names: Vec<_> = units.iter().map(|u| u.name().to_string()).collect();
        assert_eq!(names, vec!["memory", "chat"]);
    }

    #[test]
    fn disabled_units_are_skipped() {
        let catalog = Catalog::from_fns(&[memory, chat]);
        let units = discover(&catalog, |name| name != "chat").unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].name(), "memory");
    }

    #[test]
    fn duplicate_names_rejected() {
        let catalog = Catalog::from_fns(&[chat]).with(|| Box::new(Named("chat")));
        assert!(matches!(
            discover(&catalog, |_| true),
            Err(LoaderError::DuplicateUnit(name)) if name == "chat"
        ));
    }

    #[test]
    fn disabled_duplicate_is_not_an_error() {
        let catalog = Catalog::from_fns(&[chat, chat]);
        assert!(discover(&catalog, |_| false).unwrap().is_empty());
    }
}
