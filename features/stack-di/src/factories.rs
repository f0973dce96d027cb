use std::{
    any::{type_name, Any},
    convert::Infallible,
    future::Future,
    marker::PhantomData,
    sync::Arc,
};

use futures::FutureExt;

use crate::{
    cleanup::Cleanup,
    dependency::Args,
    errors::RequireError,
    types::{BoxFuture, DynError, Injectable, Instance, TypeInfo},
};

type Construct = Arc<dyn Fn(Args) -> BoxFuture<Result<Instance, DynError>> + Send + Sync>;
type ExtractCleanup =
    Arc<dyn Fn(&Arc<dyn Any + Send + Sync>) -> Result<Cleanup, DynError> + Send + Sync>;

/// A Factory providing instances of `T`
///
/// Sync and async construction functions are normalized into the same boxed future,
/// so the container always awaits construction the same way.
///
/// ```
/// use std::sync::Arc;
/// use stack_di::{Cleanup, DynError, Factory};
///
/// struct Pool;
/// impl Pool {
///     async fn close(&self) {}
/// }
///
/// let factory = Factory::from_async(|_args| async { Ok::<_, DynError>(Pool) })
///     .on_exit(|pool: &Arc<Pool>| {
///         let pool = pool.clone();
///         Cleanup::from_async(move || async move {
///             pool.close().await;
///             Ok::<_, DynError>(())
///         })
///     });
/// ```
pub struct Factory<T> {
    construct: Construct,
    on_exit: Option<ExtractCleanup>,
    _provides: PhantomData<fn() -> T>,
}

impl<T: Injectable> Factory<T> {
    /// Uses an async function to construct the instance
    pub fn from_async<F, Fut, E>(factory: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<DynError>,
    {
        let construct: Construct = Arc::new(move |args: Args| {
            let construction_fut = factory(args);
            async move {
                construction_fut
                    .await
                    .map(Instance::new)
                    .map_err(Into::<DynError>::into)
            }
            .boxed()
        });

        Self::with_construct(construct)
    }

    /// Uses a plain function to construct the instance
    pub fn from_sync<F, E>(factory: F) -> Self
    where
        F: Fn(Args) -> Result<T, E> + Send + Sync + 'static,
        E: Into<DynError>,
    {
        let construct: Construct = Arc::new(move |args: Args| {
            let result = factory(args)
                .map(Instance::new)
                .map_err(Into::<DynError>::into);
            futures::future::ready(result).boxed()
        });

        Self::with_construct(construct)
    }

    fn with_construct(construct: Construct) -> Self {
        Factory {
            construct,
            on_exit: None,
            _provides: PhantomData,
        }
    }

    /// Attaches a cleanup extractor
    ///
    /// Once an instance was constructed the extractor is asked for its teardown action,
    /// which the container runs when its scope closes.
    pub fn on_exit<G>(self, extractor: G) -> Self
    where
        G: Fn(&Arc<T>) -> Cleanup + Send + Sync + 'static,
    {
        self.try_on_exit(move |instance| Ok::<_, Infallible>(extractor(instance)))
    }

    /// Attaches a cleanup extractor which may fail
    ///
    /// A failing extractor aborts the open, the instance it was given is not cleaned up.
    pub fn try_on_exit<G, E>(mut self, extractor: G) -> Self
    where
        G: Fn(&Arc<T>) -> Result<Cleanup, E> + Send + Sync + 'static,
        E: Into<DynError>,
    {
        let extract: ExtractCleanup = Arc::new(
            move |instance: &Arc<dyn Any + Send + Sync>| -> Result<Cleanup, DynError> {
                let instance = Arc::downcast::<T>(instance.clone()).map_err(|_| {
                    DynError::from(RequireError::DowncastFailed {
                        name: "cleanup extractor".to_string(),
                        required_type: type_name::<T>(),
                        actual_type: "unknown",
                    })
                })?;
                extractor(&instance).map_err(Into::into)
            },
        );
        self.on_exit = Some(extract);
        self
    }
}

/// Wrapper Trait for factories, providing instances of Any
pub trait DynFactory: Send + Sync {
    fn supplies(&self) -> TypeInfo;

    /// Constructs a new instance from the resolved arguments
    fn construct(&self, args: Args) -> BoxFuture<Result<Instance, DynError>>;

    /// Returns whether a cleanup extractor is attached
    fn has_cleanup(&self) -> bool;

    /// Extracts the teardown action of a constructed instance
    ///
    /// Returns `None` if the factory carries no cleanup extractor.
    fn extract_cleanup(&self, instance: &Instance) -> Option<Result<Cleanup, DynError>>;
}
impl<T: Injectable> DynFactory for Factory<T> {
    fn supplies(&self) -> TypeInfo {
        TypeInfo::of::<T>()
    }

    fn construct(&self, args: Args) -> BoxFuture<Result<Instance, DynError>> {
        (self.construct)(args)
    }

    fn has_cleanup(&self) -> bool {
        self.on_exit.is_some()
    }

    fn extract_cleanup(&self, instance: &Instance) -> Option<Result<Cleanup, DynError>> {
        self.on_exit
            .as_ref()
            .map(|extractor| extractor(&instance.instance))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::executor::block_on;

    use super::*;

    #[derive(Debug)]
    struct Connection {
        closed: Mutex<bool>,
    }

    fn connection_factory() -> Factory<Connection> {
        Factory::from_sync(|_| {
            Ok::<_, DynError>(Connection {
                closed: Mutex::new(false),
            })
        })
    }

    #[test]
    fn sync_and_async_factories_construct_the_same_way() {
        let sync = connection_factory();
        let asynchronous = Factory::from_async(|_| async {
            Ok::<_, DynError>(Connection {
                closed: Mutex::new(false),
            })
        });

        for factory in [&sync as &dyn DynFactory, &asynchronous] {
            let instance = block_on(factory.construct(Args::default())).unwrap();
            assert_eq!(instance.info, TypeInfo::of::<Connection>());
            assert!(instance.downcast::<Connection>().is_ok());
        }
    }

    #[test]
    fn factory_errors_are_boxed() {
        let factory: Factory<Connection> = Factory::from_sync(|_| Err("refused"));

        let error = block_on(factory.construct(Args::default())).unwrap_err();
        assert_eq!(error.to_string(), "refused");
    }

    #[test]
    fn cleanup_is_extracted_from_the_constructed_instance() {
        let factory = connection_factory().on_exit(|connection: &Arc<Connection>| {
            let connection = connection.clone();
            Cleanup::from_sync(move || {
                *connection.closed.lock().unwrap() = true;
                Ok::<_, DynError>(())
            })
        });
        assert!(factory.has_cleanup());

        let instance = block_on(factory.construct(Args::default())).unwrap();
        let cleanup = factory.extract_cleanup(&instance).unwrap().unwrap();
        block_on(cleanup.into_thunk()()).unwrap();

        let connection = instance.downcast::<Connection>().unwrap();
        assert!(*connection.closed.lock().unwrap());
    }

    #[test]
    fn without_extractor_there_is_no_cleanup() {
        let factory = connection_factory();
        let instance = block_on(factory.construct(Args::default())).unwrap();

        assert!(!factory.has_cleanup());
        assert!(factory.extract_cleanup(&instance).is_none());
    }

    #[test]
    fn failing_extractor_reports_its_error() {
        let factory = connection_factory().try_on_exit(|_| Err::<Cleanup, _>("no handle"));
        let instance = block_on(factory.construct(Args::default())).unwrap();

        let error = factory.extract_cleanup(&instance).unwrap().unwrap_err();
        assert_eq!(error.to_string(), "no handle");
    }
}
