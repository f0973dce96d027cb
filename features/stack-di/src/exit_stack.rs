use std::{any::Any, panic::AssertUnwindSafe};

use futures::FutureExt;

use crate::{
    cleanup::{AsyncThunk, Cleanup},
    errors::{ContainerError, TeardownError, TeardownErrors},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackState {
    Fresh,
    Entered,
    Closed,
}

struct Callback {
    label: String,
    thunk: AsyncThunk,
}

/// Ordered list of teardown actions, unwound newest first
///
/// A stack is entered once, collects cleanups while resources are being built and runs all
/// of them in reverse registration order when closed. A failing or panicking cleanup never
/// stops the ones registered before it, every failure is reported by [ExitStack::close].
pub struct ExitStack {
    state: StackState,
    callbacks: Vec<Callback>,
}
impl Default for ExitStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ExitStack {
    pub fn new() -> Self {
        ExitStack {
            state: StackState::Fresh,
            callbacks: Vec::new(),
        }
    }

    /// Enters the scope, a stack can only be entered once
    pub fn enter(&mut self) -> Result<(), ContainerError> {
        if self.state != StackState::Fresh {
            return Err(ContainerError::Reuse);
        }

        self.state = StackState::Entered;
        Ok(())
    }

    /// Registers a cleanup, it will run before every cleanup registered earlier
    pub fn push(
        &mut self,
        label: impl Into<String>,
        thunk: AsyncThunk,
    ) -> Result<(), ContainerError> {
        if self.state != StackState::Entered {
            return Err(ContainerError::ScopeInactive);
        }

        let label = label.into();
        tracing::debug!("Registered cleanup for {}", label);
        self.callbacks.push(Callback { label, thunk });
        Ok(())
    }

    /// Normalizes and registers a cleanup
    pub fn push_cleanup(
        &mut self,
        label: impl Into<String>,
        cleanup: Cleanup,
    ) -> Result<(), ContainerError> {
        self.push(label, cleanup.into_thunk())
    }

    /// Runs all registered cleanups, most recently registered first
    ///
    /// Every cleanup runs exactly once, regardless of earlier failures. Closing a stack which
    /// is not entered does nothing.
    pub async fn close(&mut self) -> Result<(), TeardownErrors> {
        if self.state != StackState::Entered {
            return Ok(());
        }

        tracing::debug!("Closing scope with {} cleanups", self.callbacks.len());
        let mut errors = Vec::new();

        // Popping one at a time keeps the remaining cleanups registered if this is cancelled
        while let Some(Callback { label, thunk }) = self.callbacks.pop() {
            tracing::debug!("Running cleanup for {}", label);

            let outcome = AssertUnwindSafe(async move { thunk().await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!("Cleanup for {} failed: {}", label, error);
                    errors.push(TeardownError::Failed {
                        resource: label,
                        error: error.into(),
                    });
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::warn!("Cleanup for {} panicked: {}", label, message);
                    errors.push(TeardownError::Panicked {
                        resource: label,
                        message,
                    });
                }
            }
        }

        self.state = StackState::Closed;

        if !errors.is_empty() {
            return Err(TeardownErrors { errors });
        }

        Ok(())
    }

    /// Labels of the registered cleanups, in registration order
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.callbacks.iter().map(|callback| callback.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn is_entered(&self) -> bool {
        self.state == StackState::Entered
    }

    pub fn is_closed(&self) -> bool {
        self.state == StackState::Closed
    }
}

impl Drop for ExitStack {
    fn drop(&mut self) {
        if self.state == StackState::Entered && !self.callbacks.is_empty() {
            let leaked: Vec<_> = self.labels().collect();
            tracing::error!(
                "Scope dropped without being closed, cleanups never ran for: {}",
                leaked.join(", ")
            );
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures::executor::block_on;

    use super::*;
    use crate::types::DynError;

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(log: &Log, label: &str) -> Cleanup {
        let log = log.clone();
        let label = label.to_string();
        Cleanup::from_sync(move || {
            log.lock().unwrap().push(label);
            Ok::<_, DynError>(())
        })
    }

    async fn explode() -> Result<(), DynError> {
        panic!("boom")
    }

    fn entered() -> ExitStack {
        let mut stack = ExitStack::new();
        stack.enter().unwrap();
        stack
    }

    #[test]
    fn cleanups_run_in_reverse_registration_order() {
        let log = Log::default();
        let mut stack = entered();
        for label in ["first", "second", "third"] {
            stack.push_cleanup(label, record(&log, label)).unwrap();
        }

        block_on(stack.close()).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["third", "second", "first"]);
        assert!(stack.is_closed());
        assert!(stack.is_empty());
    }

    #[test]
    fn failures_do_not_stop_earlier_cleanups() {
        let log = Log::default();
        let mut stack = entered();
        stack.push_cleanup("first", record(&log, "first")).unwrap();
        stack
            .push_cleanup("broken", Cleanup::from_sync(|| Err("flush failed")))
            .unwrap();
        stack
            .push_cleanup("exploding", Cleanup::from_async(explode))
            .unwrap();
        stack.push_cleanup("last", record(&log, "last")).unwrap();

        let errors = block_on(stack.close()).unwrap_err();

        assert_eq!(*log.lock().unwrap(), vec!["last", "first"]);
        let failed: Vec<_> = errors.errors.iter().map(TeardownError::resource).collect();
        assert_eq!(failed, vec!["exploding", "broken"]);
        assert!(matches!(
            &errors.errors[0],
            TeardownError::Panicked { message, .. } if message == "boom"
        ));
        assert!(matches!(
            &errors.errors[1],
            TeardownError::Failed { error, .. } if error.to_string() == "flush failed"
        ));
    }

    #[test]
    fn sync_cleanup_panicking_on_call_is_caught() {
        let log = Log::default();
        let mut stack = entered();
        stack.push_cleanup("first", record(&log, "first")).unwrap();
        stack
            .push_cleanup(
                "panics",
                Cleanup::from_sync(|| -> Result<(), DynError> { panic!("{}", "sync boom") }),
            )
            .unwrap();

        let errors = block_on(stack.close()).unwrap_err();

        assert_eq!(*log.lock().unwrap(), vec!["first"]);
        assert!(matches!(
            &errors.errors[0],
            TeardownError::Panicked { message, .. } if message == "sync boom"
        ));
    }

    #[test]
    fn close_twice_is_a_noop() {
        let log = Log::default();
        let mut stack = entered();
        stack.push_cleanup("only", record(&log, "only")).unwrap();

        block_on(stack.close()).unwrap();
        block_on(stack.close()).unwrap();

        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn stack_can_only_be_entered_once() {
        let mut stack = entered();
        assert!(matches!(stack.enter(), Err(ContainerError::Reuse)));

        block_on(stack.close()).unwrap();
        assert!(matches!(stack.enter(), Err(ContainerError::Reuse)));
    }

    #[test]
    fn cleanups_need_an_entered_scope() {
        let log = Log::default();
        let mut stack = ExitStack::new();
        assert!(matches!(
            stack.push_cleanup("early", record(&log, "early")),
            Err(ContainerError::ScopeInactive)
        ));

        stack.enter().unwrap();
        block_on(stack.close()).unwrap();
        assert!(matches!(
            stack.push_cleanup("late", record(&log, "late")),
            Err(ContainerError::ScopeInactive)
        ));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn closing_a_fresh_stack_does_nothing() {
        let mut stack = ExitStack::new();
        block_on(stack.close()).unwrap();

        assert!(!stack.is_closed());
        stack.enter().unwrap();
        assert!(stack.is_entered());
    }
}
