use std::{fmt::Debug, future::Future};

use futures::FutureExt;

use crate::types::{BoxFuture, DynError};

/// A zero-argument teardown action which can always be awaited
pub type AsyncThunk = Box<dyn FnOnce() -> BoxFuture<Result<(), DynError>> + Send>;

/// Teardown action of a resource, as returned by a cleanup extractor
///
/// Both flavours end up as an [AsyncThunk] on the exit stack, see [Cleanup::into_thunk].
pub enum Cleanup {
    Sync(Box<dyn FnOnce() -> Result<(), DynError> + Send>),
    Async(AsyncThunk),
}
impl Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cleanup::Sync(_) => f.write_str("Cleanup::Sync(..)"),
            Cleanup::Async(_) => f.write_str("Cleanup::Async(..)"),
        }
    }
}

impl Cleanup {
    pub fn from_sync<F, E>(cleanup: F) -> Self
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<DynError>,
    {
        Cleanup::Sync(Box::new(move || cleanup().map_err(Into::<DynError>::into)))
    }

    pub fn from_async<F, Fut, E>(cleanup: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<DynError>,
    {
        Cleanup::Async(Box::new(move || {
            async move { cleanup().await.map_err(Into::<DynError>::into) }.boxed()
        }))
    }

    /// Uses an already normalized thunk as is
    pub fn from_thunk(thunk: AsyncThunk) -> Self {
        Cleanup::Async(thunk)
    }

    /// Normalizes the cleanup into a single awaitable shape
    ///
    /// Async cleanups are passed through untouched. Sync cleanups run when the thunk is
    /// called and hand back an already completed future. Errors are never altered.
    pub fn into_thunk(self) -> AsyncThunk {
        match self {
            Cleanup::Async(thunk) => thunk,
            Cleanup::Sync(cleanup) => Box::new(move || {
                let result = cleanup();
                futures::future::ready(result).boxed()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use futures::executor::block_on;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk full")]
    struct DiskFull;

    #[test]
    fn sync_cleanup_runs_when_thunk_is_called() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let thunk = Cleanup::from_sync(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, DynError>(())
        })
        .into_thunk();

        let pending = thunk();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        block_on(pending).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn async_cleanup_runs_when_awaited() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let thunk = Cleanup::from_async(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, DynError>(())
        })
        .into_thunk();

        let pending = thunk();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        block_on(pending).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn errors_pass_through_unchanged() {
        let sync = Cleanup::from_sync(|| Err(DiskFull)).into_thunk();
        let error = block_on(sync()).unwrap_err();
        assert!(error.downcast_ref::<DiskFull>().is_some());

        let asynchronous = Cleanup::from_async(|| async { Err(DiskFull) }).into_thunk();
        let error = block_on(asynchronous()).unwrap_err();
        assert!(error.downcast_ref::<DiskFull>().is_some());
    }

    #[test]
    fn from_thunk_is_not_rewrapped() {
        let cleanup = Cleanup::from_thunk(Box::new(|| {
            futures::future::ready(Ok::<_, DynError>(())).boxed()
        }));

        assert!(matches!(cleanup, Cleanup::Async(_)));
        assert!(block_on(cleanup.into_thunk()()).is_ok());
    }
}
