use std::{
    any::{type_name, TypeId},
    collections::{BTreeMap, HashMap},
    sync::{Arc, OnceLock, PoisonError, RwLock},
};

use crate::{
    container::Container,
    dependency::Dependency,
    dependency_graph::{DependencyGraph, DependencyGraphErrors},
    resources::FromResources,
    types::Injectable,
};

//////////////////////////////////////////////////////////////////////
//
// A container is defined in two steps.
// 1. The Definition where one registers all named dependencies
// 2. The Blueprint, the checked definition together with its resolution order

/// A type declaring the dependencies of a container
///
/// The blueprint of a definition type is only built once and shared by all containers of
/// that type, see [Blueprint::cached].
///
/// ```
/// use stack_di::{ContainerDefinition, Definition, Dependency, DynError, Factory, Resources};
///
/// struct Settings {
///     url: String,
/// }
///
/// struct AppContainer;
/// impl ContainerDefinition for AppContainer {
///     type Settings = Settings;
///     type Resources = Resources<Settings>;
///
///     fn define(definition: Definition) -> Definition {
///         definition
///             .register("url", Dependency::new(Factory::from_sync(|_| {
///                 Ok::<_, DynError>("postgres://localhost".to_string())
///             })))
///             .register(
///                 "client",
///                 Dependency::new(Factory::from_sync(|args| args.cloned::<String>("url")))
///                     .with_dependency("url", "url"),
///             )
///     }
/// }
/// ```
pub trait ContainerDefinition: 'static {
    /// Opaque settings handed to the bundle
    type Settings: Injectable;
    /// The bundle handed out by an opened container
    type Resources: FromResources<Self::Settings>;

    /// Registers all dependencies of the container
    fn define(definition: Definition) -> Definition;

    /// Creates a fresh, unopened container of this definition
    fn container(settings: Self::Settings) -> Container<Self::Settings, Self::Resources>
    where
        Self: Sized,
    {
        Container::of::<Self>(settings)
    }
}

/// Registration of named dependencies
#[derive(Debug, Default)]
pub struct Definition {
    dependencies: Vec<Dependency>,
}

impl Definition {
    pub fn new() -> Self {
        Definition {
            dependencies: Vec::new(),
        }
    }

    /// Registers `dependency` under `name`
    ///
    /// Names must be unique and not empty, violations are reported by [Definition::build].
    pub fn register(mut self, name: impl Into<String>, mut dependency: Dependency) -> Self {
        dependency.set_name(name.into());
        tracing::debug!(
            "Registered dependency {} providing {}",
            dependency.name(),
            dependency.supplies()
        );
        self.dependencies.push(dependency);
        self
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Checks the definition and computes its resolution order
    pub fn build(self) -> Result<Blueprint, DependencyGraphErrors> {
        let graph = DependencyGraph::from_dependencies(&self.dependencies)?;
        let order = graph.resolution_order()?;
        tracing::debug!("Resolution order: {}", order.join(" -> "));

        let dependencies = self
            .dependencies
            .into_iter()
            .map(|dependency| (dependency.name().to_string(), dependency))
            .collect();

        Ok(Blueprint {
            dependencies,
            graph,
            order,
        })
    }
}

/// A checked definition with its resolution order
///
/// Only depends on the static definition, never on runtime values, so it can be shared
/// between any number of containers.
#[derive(Debug)]
pub struct Blueprint {
    dependencies: BTreeMap<String, Dependency>,
    graph: DependencyGraph,
    order: Vec<String>,
}

type BlueprintCache = RwLock<HashMap<TypeId, Result<Arc<Blueprint>, DependencyGraphErrors>>>;

fn blueprint_cache() -> &'static BlueprintCache {
    static CACHE: OnceLock<BlueprintCache> = OnceLock::new();
    CACHE.get_or_init(Default::default)
}

impl Blueprint {
    /// Returns the blueprint of `D`, building it on first use
    ///
    /// Failed builds are cached as well, the outcome only depends on the definition.
    pub fn cached<D: ContainerDefinition>() -> Result<Arc<Blueprint>, DependencyGraphErrors> {
        let key = TypeId::of::<D>();
        if let Some(cached) = blueprint_cache()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return cached.clone();
        }

        tracing::debug!("Building blueprint for {}", type_name::<D>());
        let built = D::define(Definition::new()).build().map(Arc::new);

        // Another container may have built it in the meantime, first one wins
        blueprint_cache()
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(built)
            .clone()
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.values()
    }

    pub fn dependency(&self, name: &str) -> Option<&Dependency> {
        self.dependencies.get(name)
    }

    /// Names in the order they are constructed in
    pub fn resolution_order(&self) -> &[String] {
        &self.order
    }

    /// Dependencies in resolution order
    pub fn ordered_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.order
            .iter()
            .filter_map(|name| self.dependencies.get(name))
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        dependency_graph::DependencyGraphError, factories::Factory, resources::Resources,
        types::DynError,
    };

    fn unit() -> Dependency {
        Dependency::new(Factory::from_sync(|_| Ok::<_, DynError>(())))
    }

    #[test]
    fn register_names_the_dependency() {
        let blueprint = Definition::new()
            .register("pool", unit())
            .register("repository", unit().with_dependency("pool", "pool"))
            .build()
            .unwrap();

        assert_eq!(blueprint.dependency("pool").unwrap().name(), "pool");
        assert_eq!(blueprint.resolution_order(), ["pool", "repository"]);
        assert_eq!(
            blueprint
                .graph()
                .dependencies_of("repository")
                .unwrap()
                .collect::<Vec<_>>(),
            vec!["pool"]
        );
    }

    #[test]
    fn build_reports_all_definition_errors() {
        let errors = Definition::new()
            .register("pool", unit())
            .register("pool", unit())
            .register("service", unit().with_dependency("cache", "cache"))
            .build()
            .unwrap_err();

        assert_eq!(
            errors.errors,
            vec![
                DependencyGraphError::Duplicate("pool".to_string()),
                DependencyGraphError::MissingDependency {
                    dependency: "cache".to_string(),
                    required_by: "service".to_string(),
                },
            ]
        );
    }

    #[test]
    fn empty_names_never_reach_the_order() {
        let errors = Definition::new()
            .register("", unit())
            .register("b", unit().with_dependency("x", ""))
            .build()
            .unwrap_err();

        assert_eq!(
            errors.errors,
            vec![
                DependencyGraphError::EmptyName,
                DependencyGraphError::MissingDependency {
                    dependency: String::new(),
                    required_by: "b".to_string(),
                },
            ]
        );
    }

    #[test]
    fn build_rejects_cycles() {
        let errors = Definition::new()
            .register("X", unit().with_dependency("y", "Y"))
            .register("Y", unit().with_dependency("x", "X"))
            .build()
            .unwrap_err();

        assert_eq!(
            errors.errors,
            vec![DependencyGraphError::CircularDependency {
                resolved: vec![],
                pending: vec!["X".to_string(), "Y".to_string()],
            }]
        );
    }

    static DEFINE_CALLS: AtomicUsize = AtomicUsize::new(0);

    struct CountedDefinition;
    impl ContainerDefinition for CountedDefinition {
        type Settings = ();
        type Resources = Resources<()>;

        fn define(definition: Definition) -> Definition {
            DEFINE_CALLS.fetch_add(1, Ordering::SeqCst);
            definition.register("unit", unit())
        }
    }

    #[test]
    fn blueprints_are_built_once_per_definition() {
        let first = Blueprint::cached::<CountedDefinition>().unwrap();
        let second = Blueprint::cached::<CountedDefinition>().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(DEFINE_CALLS.load(Ordering::SeqCst), 1);
    }

    struct CyclicDefinition;
    impl ContainerDefinition for CyclicDefinition {
        type Settings = ();
        type Resources = Resources<()>;

        fn define(definition: Definition) -> Definition {
            definition.register("self", unit().with_dependency("me", "self"))
        }
    }

    #[test]
    fn failed_blueprints_are_cached_too() {
        let first = Blueprint::cached::<CyclicDefinition>().unwrap_err();
        let second = Blueprint::cached::<CyclicDefinition>().unwrap_err();

        assert_eq!(first, second);
    }
}
