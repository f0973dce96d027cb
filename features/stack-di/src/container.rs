use std::{
    collections::BTreeMap,
    fmt::Debug,
    future::Future,
    marker::PhantomData,
    panic::{resume_unwind, AssertUnwindSafe},
    sync::Arc,
};

use futures::FutureExt;

use crate::{
    builder::{Blueprint, ContainerDefinition, Definition},
    dependency::Resolved,
    dependency_graph::DependencyGraphErrors,
    errors::{ContainerError, ResolveError, TeardownErrors},
    exit_stack::{panic_message, ExitStack},
    resources::{FromResources, Resources},
    types::{Injectable, TypeInfo},
};

/// Lifecycle of a [Container], it only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Unopened,
    Opening,
    Open,
    Closed,
}

enum Source {
    /// Shared blueprint of a definition type
    Cached(fn() -> Result<Arc<Blueprint>, DependencyGraphErrors>),
    /// Blueprint owned by this container
    Built(Result<Arc<Blueprint>, DependencyGraphErrors>),
}

/// Builds all resources of a definition and tears them down again
///
/// A container is single use: it is opened once, handing out the resource bundle, and
/// closed once, running the cleanups of every constructed resource in reverse
/// construction order. If opening fails part way, everything built so far is torn down
/// before the error is returned.
///
/// ```
/// use stack_di::{Container, Definition, Dependency, DynError, Factory, Resources};
///
/// let definition = Definition::new()
///     .register("greeting", Dependency::new(Factory::from_sync(|_| {
///         Ok::<_, DynError>("hello".to_string())
///     })));
///
/// let container = Container::new(definition, ());
/// let length = futures::executor::block_on(container.run(|resources: Resources<()>| async move {
///     resources.require::<String>("greeting").map(|greeting| greeting.len())
/// }));
/// assert_eq!(length.unwrap().unwrap(), 5);
/// ```
pub struct Container<S, R = Resources<S>> {
    source: Source,
    settings: Arc<S>,
    state: ContainerState,
    stack: Option<ExitStack>,
    _resources: PhantomData<fn() -> R>,
}
impl<S, R> Debug for Container<S, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered = self.stack.as_ref().map(ExitStack::len).unwrap_or_default();
        f.debug_struct("Container")
            .field("state", &self.state)
            .field("cleanups", &registered)
            .finish()
    }
}

impl<S: Injectable> Container<S> {
    /// Creates a container for an ad-hoc definition, handing out [Resources]
    pub fn new(definition: Definition, settings: S) -> Self {
        Self::with_source(Source::Built(definition.build().map(Arc::new)), settings)
    }
}

impl<S: Injectable, R: FromResources<S>> Container<S, R> {
    /// Creates a container for the definition type `D`
    ///
    /// The blueprint of `D` is shared with every other container of `D`.
    pub fn of<D>(settings: S) -> Self
    where
        D: ContainerDefinition<Settings = S, Resources = R>,
    {
        Self::with_source(Source::Cached(Blueprint::cached::<D>), settings)
    }

    /// Creates a container from an already built blueprint
    pub fn from_blueprint(blueprint: Arc<Blueprint>, settings: S) -> Self {
        Self::with_source(Source::Built(Ok(blueprint)), settings)
    }

    fn with_source(source: Source, settings: S) -> Self {
        Container {
            source,
            settings: Arc::new(settings),
            state: ContainerState::Unopened,
            stack: None,
            _resources: PhantomData,
        }
    }

    /// Where the container currently is in its single open and close cycle
    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Settings handed to the bundle on open
    pub fn settings(&self) -> &Arc<S> {
        &self.settings
    }

    /// The checked definition of this container
    pub fn blueprint(&self) -> Result<Arc<Blueprint>, DependencyGraphErrors> {
        match &self.source {
            Source::Cached(cached) => cached(),
            Source::Built(built) => built.clone(),
        }
    }

    /// Names in the order they will be constructed in
    pub fn resolution_order(&self) -> Result<Vec<String>, DependencyGraphErrors> {
        self.blueprint()
            .map(|blueprint| blueprint.resolution_order().to_vec())
    }

    /// Registered names and the type each of them provides
    pub fn dependencies(&self) -> Result<BTreeMap<String, TypeInfo>, DependencyGraphErrors> {
        let blueprint = self.blueprint()?;
        Ok(blueprint
            .dependencies()
            .map(|dependency| (dependency.name().to_string(), dependency.supplies()))
            .collect())
    }

    /// Constructs every resource in resolution order and returns the bundle
    ///
    /// Each resource's cleanup is registered right after it was built. On failure all
    /// registered cleanups run, newest first, before the error is returned and the
    /// container is closed for good. A panicking factory is handled the same way, the
    /// panic resumes once everything is torn down.
    ///
    /// A container can only be opened once, any further call fails with
    /// [ContainerError::Reuse].
    pub async fn open(&mut self) -> Result<R, ContainerError> {
        if self.state != ContainerState::Unopened {
            return Err(ContainerError::Reuse);
        }
        self.state = ContainerState::Opening;

        let blueprint = match self.blueprint() {
            Ok(blueprint) => blueprint,
            Err(errors) => {
                self.state = ContainerState::Closed;
                return Err(errors.into());
            }
        };
        tracing::debug!(
            "Opening container with {} dependencies",
            blueprint.resolution_order().len()
        );

        let stack = self.stack.insert(ExitStack::new());
        stack.enter()?;

        let settings = self.settings.clone();
        let outcome = AssertUnwindSafe(construct_all::<S, R>(&blueprint, stack, settings))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(resources)) => {
                self.state = ContainerState::Open;
                tracing::debug!("Container opened");
                Ok(resources)
            }
            Ok(Err(error)) => {
                tracing::debug!("Opening container failed, unwinding: {}", error);
                let teardown = self.unwind().await;
                Err(error.unwound(teardown))
            }
            Err(panic) => {
                tracing::error!(
                    "Factory panicked while opening container, unwinding: {}",
                    panic_message(panic.as_ref())
                );
                if let Some(teardown) = self.unwind().await {
                    tracing::warn!("{}", teardown);
                }
                resume_unwind(panic)
            }
        }
    }

    /// Runs all registered cleanups, newest first
    ///
    /// Every cleanup runs even if others fail, the failures are returned together.
    /// Closing a container which holds no scope, because it was never opened or is
    /// already closed, does nothing.
    pub async fn close(&mut self) -> Result<(), ContainerError> {
        match self.unwind().await {
            Some(teardown) => Err(teardown.into()),
            None => Ok(()),
        }
    }

    /// Opens the container, hands the bundle to `consumer` and closes it again
    ///
    /// The container is always closed, also if the consumer panics, in which case the
    /// panic resumes after teardown. Teardown failures are returned in place of the
    /// consumer's output.
    pub async fn run<F, Fut, T>(mut self, consumer: F) -> Result<T, ContainerError>
    where
        F: FnOnce(R) -> Fut,
        Fut: Future<Output = T>,
    {
        let resources = self.open().await?;

        let outcome = AssertUnwindSafe(async move { consumer(resources).await })
            .catch_unwind()
            .await;
        let closed = self.close().await;

        match outcome {
            Ok(output) => closed.map(|()| output),
            Err(panic) => {
                if let Err(error) = closed {
                    tracing::warn!("{}", error);
                }
                resume_unwind(panic)
            }
        }
    }

    /// Closes and releases the scope, if any
    async fn unwind(&mut self) -> Option<TeardownErrors> {
        let stack = self.stack.as_mut()?;
        let result = stack.close().await;

        self.stack = None;
        self.state = ContainerState::Closed;
        tracing::debug!("Container closed");

        result.err()
    }
}

/// Constructs every dependency of `blueprint` in order, registering cleanups on `stack`
async fn construct_all<S: Injectable, R: FromResources<S>>(
    blueprint: &Blueprint,
    stack: &mut ExitStack,
    settings: Arc<S>,
) -> Result<R, ContainerError> {
    let mut resolved = Resolved::new();

    for dependency in blueprint.ordered_dependencies() {
        let name = dependency.name();
        let instance = dependency.resolve(&resolved).await?;
        tracing::debug!("Constructed {} ({})", name, instance.info.name());

        let cleanup = dependency.extract_cleanup(&instance);
        resolved.insert(name.to_string(), instance);

        if let Some(cleanup) = cleanup {
            let cleanup = cleanup.map_err(|error| ResolveError::CleanupExtractorFailed {
                name: name.to_string(),
                error: Arc::new(error),
            })?;
            stack.push_cleanup(name, cleanup)?;
        }
    }

    R::from_resources(Resources::new(settings, resolved))
        .map_err(|error| ResolveError::Assemble(error).into())
}
