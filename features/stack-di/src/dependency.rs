use std::{
    any::type_name,
    collections::BTreeMap,
    fmt::Debug,
    sync::Arc,
};

use crate::{
    cleanup::Cleanup,
    errors::{RequireError, ResolveError},
    factories::{DynFactory, Factory},
    types::{DynError, Injectable, Instance, TypeInfo},
};

/// Resources constructed so far, by dependency name
pub type Resolved = BTreeMap<String, Instance>;

/// A single declared argument of a [Dependency]
#[derive(Debug, Clone)]
pub enum Argument {
    /// Passed to the factory unchanged
    Value(Instance),
    /// The resource of another dependency, by name
    Dependency(String),
}

/// Declarative construction rule for one named resource
///
/// A dependency pairs a [Factory] with its arguments. Arguments are either literal values
/// or references to other dependencies of the same definition; references are what the
/// resolution order is computed from.
///
/// The name is assigned when the dependency is registered on a
/// [Definition](crate::builder::Definition) and never changes afterwards.
pub struct Dependency {
    name: String,
    factory: Box<dyn DynFactory>,
    arguments: BTreeMap<String, Argument>,
}
impl Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("name", &self.name)
            .field("supplies", &self.factory.supplies().name())
            .field("arguments", &self.arguments)
            .finish()
    }
}

impl Dependency {
    pub fn new<T: Injectable>(factory: Factory<T>) -> Self {
        Dependency {
            name: String::new(),
            factory: Box::new(factory),
            arguments: BTreeMap::new(),
        }
    }

    /// Passes a literal value as `parameter`
    pub fn with_value<V: Injectable>(mut self, parameter: impl Into<String>, value: V) -> Self {
        self.arguments
            .insert(parameter.into(), Argument::Value(Instance::new(value)));
        self
    }

    /// Passes the resource of the dependency registered as `dependency` as `parameter`
    pub fn with_dependency(
        mut self,
        parameter: impl Into<String>,
        dependency: impl Into<String>,
    ) -> Self {
        self.arguments
            .insert(parameter.into(), Argument::Dependency(dependency.into()));
        self
    }

    /// The registered name, empty until registered
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        debug_assert!(self.name.is_empty(), "dependency '{}' renamed", self.name);
        self.name = name;
    }

    pub fn supplies(&self) -> TypeInfo {
        self.factory.supplies()
    }

    pub fn arguments(&self) -> impl Iterator<Item = (&str, &Argument)> {
        self.arguments
            .iter()
            .map(|(parameter, argument)| (parameter.as_str(), argument))
    }

    /// Names of the dependencies referenced by the arguments
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.arguments.values().filter_map(|argument| match argument {
            Argument::Dependency(name) => Some(name.as_str()),
            Argument::Value(_) => None,
        })
    }

    pub fn has_cleanup(&self) -> bool {
        self.factory.has_cleanup()
    }

    /// Builds the resource from the already resolved dependencies
    ///
    /// Invokes the factory exactly once. Every referenced dependency must already be part of
    /// `resolved`, which always holds when resolving in resolution order.
    pub async fn resolve(&self, resolved: &Resolved) -> Result<Instance, ResolveError> {
        let mut args = Args::default();
        for (parameter, argument) in &self.arguments {
            let value = match argument {
                Argument::Value(value) => value.clone(),
                Argument::Dependency(dependency) => resolved
                    .get(dependency)
                    .cloned()
                    .ok_or_else(|| ResolveError::DependencyNotResolved {
                        dependency: dependency.clone(),
                        required_by: self.name.clone(),
                    })?,
            };
            args.values.insert(parameter.clone(), value);
        }

        self.factory
            .construct(args)
            .await
            .map_err(|error| ResolveError::FactoryFailed {
                name: self.name.clone(),
                error: Arc::new(error),
            })
    }

    pub(crate) fn extract_cleanup(&self, instance: &Instance) -> Option<Result<Cleanup, DynError>> {
        self.factory.extract_cleanup(instance)
    }
}

/// Arguments handed to a factory, by parameter name
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: BTreeMap<String, Instance>,
}
impl Args {
    /// Gets the argument passed as `parameter`
    pub fn get<T: Injectable>(&self, parameter: &str) -> Result<Arc<T>, RequireError> {
        require(&self.values, parameter)
    }

    /// Gets a clone of the argument passed as `parameter`
    pub fn cloned<T: Injectable + Clone>(&self, parameter: &str) -> Result<T, RequireError> {
        self.get::<T>(parameter).map(|value| value.as_ref().clone())
    }

    pub fn contains(&self, parameter: &str) -> bool {
        self.values.contains_key(parameter)
    }

    pub fn parameters(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Looks up `name` and downcasts it to `T`
pub(crate) fn require<T: Injectable>(
    instances: &BTreeMap<String, Instance>,
    name: &str,
) -> Result<Arc<T>, RequireError> {
    let instance = instances
        .get(name)
        .ok_or_else(|| RequireError::Missing(name.to_string()))?;

    instance
        .downcast()
        .map_err(|actual_type| RequireError::DowncastFailed {
            name: name.to_string(),
            required_type: type_name::<T>(),
            actual_type,
        })
}
