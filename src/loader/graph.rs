//! Dependency graph — load order and parallel levels for units.
//!
//! Nodes are unit names. For every dependency a unit declares, the edge runs
//! provider → consumer, where the provider is the sibling unit advertising a
//! capability of that name. Dependencies satisfied by a registered service
//! add no edge (services are up before any unit loads); dependencies with
//! neither are rejected here, before any setup runs.
//!
//! Ordering is Kahn's algorithm, O(V + E). Levels are longest-path depths
//! computed in one pass over the topological order. Ties are broken by name
//! so the same input always yields the same plan.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::core::error::LoaderError;

/// Units that may be set up concurrently.
pub type Level = BTreeSet<String>;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// unit → declared dependency names
    nodes: BTreeMap<String, BTreeSet<String>>,
    /// capability → providing unit
    providers: BTreeMap<String, String>,
    /// Names of pre-registered services.
    services: BTreeSet<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit node with the names of the dependencies it requires.
    pub fn register<I, S>(&mut self, unit: &str, dependencies: I) -> Result<(), LoaderError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.nodes.contains_key(unit) {
            return Err(LoaderError::DuplicateUnit(unit.to_string()));
        }
        let deps = dependencies.into_iter().map(Into::into).collect();
        self.nodes.insert(unit.to_string(), deps);
        Ok(())
    }

    /// Record that `unit` advertises `capability`.
    pub fn register_provider(&mut self, unit: &str, capability: &str) -> Result<(), LoaderError> {
        match self.providers.get(capability) {
            Some(existing) if existing != unit => Err(LoaderError::AmbiguousProvider {
                capability: capability.to_string(),
                first: existing.clone(),
                second: unit.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.providers.insert(capability.to_string(), unit.to_string());
                Ok(())
            }
        }
    }

    /// Record a pre-registered service that can satisfy dependencies by name.
    pub fn register_service(&mut self, name: &str) {
        self.services.insert(name.to_string());
    }

    /// The sibling unit providing `capability`, if any.
    pub fn provider_of(&self, capability: &str) -> Option<&str> {
        self.providers.get(capability).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Unit-to-unit prerequisites of every node (provider names).
    ///
    /// Fails on the first dependency that neither a sibling nor a service satisfies.
    fn prerequisites(&self) -> Result<BTreeMap<&str, BTreeSet<&str>>, LoaderError> {
        let mut prereqs = BTreeMap::new();
        for (unit, deps) in &self.nodes {
            let mut set = BTreeSet::new();
            for dep in deps {
                if let Some(provider) = self.providers.get(dep) {
                    set.insert(provider.as_str());
                } else if !self.services.contains(dep) {
                    return Err(LoaderError::MissingDependency {
                        unit: unit.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            prereqs.insert(unit.as_str(), set);
        }
        Ok(prereqs)
    }

    /// Topological order of all units: every provider precedes its consumers.
    pub fn resolve_order(&self) -> Result<Vec<String>, LoaderError> {
        let prereqs = self.prerequisites()?;

        let mut consumers: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        for (&unit, deps) in &prereqs {
            in_degree.insert(unit, deps.len());
            for &p in deps {
                consumers.entry(p).or_default().push(unit);
            }
        }

        let mut ready: VecDeque<&str> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&u, _)| u)
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(unit) = ready.pop_front() {
            order.push(unit.to_string());
            // `prereqs` iterates in name order, so each consumer list is sorted.
            for &c in consumers.get(unit).map(Vec::as_slice).unwrap_or_default() {
                if let Some(d) = in_degree.get_mut(c) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(c);
                    }
                }
            }
        }

        if order.len() < in_degree.len() {
            let stuck: BTreeSet<&str> = in_degree
                .iter()
                .filter(|&(_, &d)| d > 0)
                .map(|(&u, _)| u)
                .collect();
            let units = trim_to_cycles(stuck, &prereqs)
                .into_iter()
                .map(str::to_string)
                .collect();
            return Err(LoaderError::CycleDetected { units });
        }
        Ok(order)
    }

    /// Partition a topological `order` into levels.
    ///
    /// A unit's level is the length of the longest prerequisite chain leading
    /// to it, so everything in level `n` depends only on levels `< n`.
    pub fn group_by_level(&self, order: &[String]) -> Result<Vec<Level>, LoaderError> {
        let prereqs = self.prerequisites()?;
        let mut depth: HashMap<&str, usize> = HashMap::with_capacity(order.len());
        let mut levels: Vec<Level> = Vec::new();

        for unit in order {
            let Some(deps) = prereqs.get(unit.as_str()) else {
                return Err(LoaderError::unit_not_found(unit));
            };
            let mut d = 0;
            for &p in deps {
                let Some(&pd) = depth.get(p) else {
                    return Err(LoaderError::InvalidOrder {
                        unit: unit.clone(),
                        prerequisite: p.to_string(),
                    });
                };
                d = d.max(pd + 1);
            }
            depth.insert(unit.as_str(), d);
            if levels.len() <= d {
                levels.resize_with(d + 1, Level::new);
            }
            levels[d].insert(unit.clone());
        }
        Ok(levels)
    }

    /// Convenience: order then levels.
    pub fn levels(&self) -> Result<Vec<Level>, LoaderError> {
        let order = self.resolve_order()?;
        self.group_by_level(&order)
    }
}

/// Drop nodes that merely sit downstream of a cycle, leaving the members
/// (and any nodes trapped between cycles).
fn trim_to_cycles<'a>(
    mut stuck: BTreeSet<&'a str>,
    prereqs: &BTreeMap<&'a str, BTreeSet<&'a str>>,
) -> Vec<&'a str> {
    loop {
        let sinks: Vec<&str> = stuck
            .iter()
            .copied()
            .filter(|&u| {
                !stuck
                    .iter()
                    .any(|&other| prereqs.get(other).is_some_and(|p| p.contains(u)))
            })
            .collect();
        if sinks.is_empty() {
            return stuck.into_iter().collect();
        }
        for s in sinks {
            stuck.remove(s);
        }
    }
}
