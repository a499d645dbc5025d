//! LIFO stack of deferred resource-release actions scoped to one run.
//!
//! A payload pushes an action every time it acquires something that must be
//! released (a browser window, a temp file, a mounted share). When the run
//! ends, however it ends, the execution unit calls [`CleanupStack::run_all`],
//! which releases everything newest first. One failing action never keeps
//! the older ones from running.

use futures::FutureExt;
use futures::future::BoxFuture;
use mimic_core::{MimicError, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

type CleanupAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Identifies one pushed task so it can be popped out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupHandle(u64);

/// A deferred action plus the label it is logged under.
pub struct CleanupTask {
    handle: CleanupHandle,
    label: String,
    action: CleanupAction,
}

impl CleanupTask {
    pub fn handle(&self) -> CleanupHandle {
        self.handle
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the action now. Used for tasks popped off the stack early.
    pub async fn run(self) -> Result<()> {
        (self.action)().await
    }
}

impl std::fmt::Debug for CleanupTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupTask")
            .field("handle", &self.handle)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// What happened during [`CleanupStack::run_all`].
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Labels in the order they ran.
    pub executed: Vec<String>,
    /// One `CleanupTask` error per failed or panicked action.
    pub failures: Vec<MimicError>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Default)]
struct StackInner {
    next_handle: u64,
    tasks: Vec<CleanupTask>,
}

/// Shared, clonable cleanup stack. Clones refer to the same tasks.
#[derive(Clone, Default)]
pub struct CleanupStack {
    inner: Arc<Mutex<StackInner>>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an async action.
    pub fn push<F, Fut>(&self, label: impl Into<String>, action: F) -> CleanupHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let boxed: CleanupAction = Box::new(move || action().boxed());
        let mut inner = self.inner.lock();
        let handle = CleanupHandle(inner.next_handle);
        inner.next_handle += 1;
        let label = label.into();
        debug!(label = %label, depth = inner.tasks.len() + 1, "cleanup task pushed");
        inner.tasks.push(CleanupTask {
            handle,
            label,
            action: boxed,
        });
        handle
    }

    /// Push a synchronous action.
    pub fn push_sync<F>(&self, label: impl Into<String>, action: F) -> CleanupHandle
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.push(label, move || async move { action() })
    }

    /// Remove a task without running it: the newest one, or the one with `handle`.
    pub fn pop(&self, handle: Option<CleanupHandle>) -> Result<CleanupTask> {
        let mut inner = self.inner.lock();
        match handle {
            None => inner
                .tasks
                .pop()
                .ok_or_else(|| MimicError::CleanupStack("pop from empty cleanup stack".into())),
            Some(h) => {
                let index = inner
                    .tasks
                    .iter()
                    .position(|t| t.handle == h)
                    .ok_or_else(|| {
                        MimicError::CleanupStack(format!("no cleanup task with handle {}", h.0))
                    })?;
                Ok(inner.tasks.remove(index))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().tasks.is_empty()
    }

    /// Labels from oldest to newest.
    pub fn labels(&self) -> Vec<String> {
        self.inner.lock().tasks.iter().map(|t| t.label.clone()).collect()
    }

    /// Run every task newest first and leave the stack empty. Never fails:
    /// errors and panics are logged, collected in the report, and the
    /// remaining tasks still run.
    pub async fn run_all(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        loop {
            // The lock must not be held across the await below.
            let next = self.inner.lock().tasks.pop();
            let Some(task) = next else { break };

            let label = task.label.clone();
            match AssertUnwindSafe(task.run()).catch_unwind().await {
                Ok(Ok(())) => {
                    debug!(label = %label, "cleanup task done");
                }
                Ok(Err(e)) => {
                    warn!(label = %label, error = %e, "cleanup task failed");
                    report.failures.push(MimicError::CleanupTask {
                        label: label.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    error!(label = %label, reason = %reason, "cleanup task panicked");
                    report.failures.push(MimicError::CleanupTask {
                        label: label.clone(),
                        reason,
                    });
                }
            }
            report.executed.push(label);
        }
        report
    }
}

impl std::fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupStack")
            .field("labels", &self.labels())
            .finish()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_lifo_and_by_handle() {
        let stack = CleanupStack::new();
        let first = stack.push_sync("first", || Ok(()));
        stack.push_sync("second", || Ok(()));
        stack.push_sync("third", || Ok(()));

        assert_eq!(stack.pop(None).unwrap().label(), "third");
        assert_eq!(stack.pop(Some(first)).unwrap().label(), "first");
        assert_eq!(stack.labels(), vec!["second".to_string()]);
    }

    #[test]
    fn test_pop_errors() {
        let stack = CleanupStack::new();
        assert!(matches!(stack.pop(None), Err(MimicError::CleanupStack(_))));

        let h = stack.push_sync("only", || Ok(()));
        stack.pop(Some(h)).unwrap();
        assert!(matches!(stack.pop(Some(h)), Err(MimicError::CleanupStack(_))));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn test_popped_task_can_run_early() {
        let stack = CleanupStack::new();
        let hit = Arc::new(Mutex::new(false));
        let h2 = hit.clone();
        stack.push_sync("flag", move || {
            *h2.lock() = true;
            Ok(())
        });
        stack.pop(None).unwrap().run().await.unwrap();
        assert!(*hit.lock());
        assert!(stack.run_all().await.executed.is_empty());
    }
}
