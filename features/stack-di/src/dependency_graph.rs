use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::dependency::Dependency;

/// Graph of all dependencies of a definition, by name
///
/// Used to check the definition and to compute the order resources are constructed in.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    map: BTreeMap<String, BTreeSet<String>>,
}
impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph of registered dependencies and validates it
    pub fn from_dependencies<'a>(
        dependencies: impl IntoIterator<Item = &'a Dependency>,
    ) -> Result<Self, DependencyGraphErrors> {
        let mut graph = Self::new();
        let mut errors = Vec::new();

        for dependency in dependencies {
            if let Err(error) = graph.add(dependency.name(), dependency.references()) {
                errors.push(error);
            }
        }

        if let Err(check) = graph.check() {
            errors.extend(check.errors);
        }

        if !errors.is_empty() {
            return Err(DependencyGraphErrors { errors });
        }

        Ok(graph)
    }

    /// Adds `name` depending on each of `references`
    ///
    /// Names must be unique and never empty.
    pub fn add<'a>(
        &mut self,
        name: &str,
        references: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), DependencyGraphError> {
        if name.is_empty() {
            return Err(DependencyGraphError::EmptyName);
        }
        if self.map.contains_key(name) {
            return Err(DependencyGraphError::Duplicate(name.to_string()));
        }

        let references = references.into_iter().map(str::to_string).collect();
        self.map.insert(name.to_string(), references);

        Ok(())
    }

    /// Validate the graph
    ///
    /// Returns a list of all references to names which are not part of the graph.
    /// Cycles are reported by [DependencyGraph::resolution_order].
    pub fn check(&self) -> Result<(), DependencyGraphErrors> {
        let errors: Vec<_> = self
            .map
            .iter()
            .flat_map(|(name, references)| {
                references
                    .iter()
                    .filter(|reference| !self.map.contains_key(reference.as_str()))
                    .map(move |reference| DependencyGraphError::MissingDependency {
                        dependency: reference.clone(),
                        required_by: name.clone(),
                    })
            })
            .collect();

        if !errors.is_empty() {
            return Err(DependencyGraphErrors { errors });
        }

        Ok(())
    }

    /// Computes the order in which the dependencies can be constructed
    ///
    /// Every name comes after all names it depends on. Whenever several names are ready,
    /// the lexicographically smallest goes first, so the order is the same on every run.
    /// References to unknown names are not edges.
    pub fn resolution_order(&self) -> Result<Vec<String>, DependencyGraphError> {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependants: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (name, references) in &self.map {
            let known = references
                .iter()
                .filter(|reference| self.map.contains_key(reference.as_str()));

            let mut degree = 0;
            for reference in known {
                degree += 1;
                dependants
                    .entry(reference.as_str())
                    .or_default()
                    .push(name.as_str());
            }
            in_degree.insert(name.as_str(), degree);
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(self.map.len());

        while let Some(name) = ready.pop_first() {
            order.push(name.to_string());

            for dependant in dependants.get(name).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependant) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependant);
                    }
                }
            }
        }

        if order.len() != self.map.len() {
            let pending = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(name, _)| name.to_string())
                .collect();

            return Err(DependencyGraphError::CircularDependency {
                resolved: order,
                pending,
            });
        }

        Ok(order)
    }

    /// Names the given dependency refers to
    pub fn dependencies_of(&self, name: &str) -> Option<impl Iterator<Item = &str>> {
        self.map
            .get(name)
            .map(|references| references.iter().map(String::as_str))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyGraphError {
    #[error("A dependency has been registered without a name")]
    EmptyName,
    #[error("A dependency has been registered twice: '{0}'")]
    Duplicate(String),
    #[error("'{required_by}' needs '{dependency}' but it is missing")]
    MissingDependency {
        dependency: String,
        required_by: String,
    },
    #[error("Cannot resolve dependencies: circular dependency detected (resolved: {resolved:?}, pending: {pending:?})")]
    CircularDependency {
        resolved: Vec<String>,
        pending: Vec<String>,
    },
}
impl std::fmt::Display for DependencyGraphErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("The dependency graph had one or more errors:")?;
        for error in &self.errors {
            write!(f, "\n- {error}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraphErrors {
    pub errors: Vec<DependencyGraphError>,
}
impl From<DependencyGraphError> for DependencyGraphErrors {
    fn from(error: DependencyGraphError) -> Self {
        DependencyGraphErrors {
            errors: vec![error],
        }
    }
}
