//! Bounded executor for part-write tasks.
//!
//! One executor is shared by every transfer on the node. A fair semaphore
//! caps the number of tasks running at once; everything beyond the ceiling
//! waits in FIFO order. The queue is unbounded, so admission control is up to
//! the caller.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::TransferError;

/// Default concurrency ceiling.
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Cooperative cancellation signal.
///
/// Clones share state. A child token is cancelled whenever its parent is,
/// but cancelling a child leaves the parent untouched.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
    parent: Option<CancelToken>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child_token(&self) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                parent: Some(self.clone()),
                ..Default::default()
            }),
        }
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(CancelToken::is_cancelled)
    }

    /// Resolves once this token or any ancestor is cancelled.
    pub fn cancelled(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            match &self.inner.parent {
                None => self.own_cancelled().await,
                Some(parent) => {
                    tokio::select! {
                        _ = self.own_cancelled() => {}
                        _ = parent.cancelled() => {}
                    }
                }
            }
        })
    }

    async fn own_cancelled(&self) {
        loop {
            // Registered before the check so a concurrent cancel is not missed
            let notified = self.inner.notify.notified();
            if self.inner.cancelled.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    /// Returns a guard that cancels this token when dropped.
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }

    /// `Err(Cancelled)` if cancellation was requested. Call at checkpoints.
    pub fn check(&self) -> Result<(), TransferError> {
        if self.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Cancels the wrapped token on drop.
#[derive(Debug)]
pub struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Decrements a gauge when dropped, including on panic or abort.
struct GaugeGuard(Arc<AtomicUsize>);

impl GaugeGuard {
    fn enter(gauge: &Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(gauge.clone())
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shared pool with a fixed concurrency ceiling.
#[derive(Debug)]
pub struct BoundedExecutor {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    queued: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl BoundedExecutor {
    pub fn new(max_concurrency: usize) -> Result<Self, TransferError> {
        if max_concurrency == 0 {
            return Err(TransferError::Executor(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            queued: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Tasks waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Tasks currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Queue a task.
    ///
    /// The task is handed the token so it can stop at its own checkpoints.
    /// If the token fires while the task is still queued, the task never
    /// starts and the handle resolves to [`TransferError::Cancelled`].
    pub fn submit<F, Fut, T>(&self, cancel: CancelToken, task: F) -> TaskHandle<T>
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TransferError>> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let queued = GaugeGuard::enter(&self.queued);
        let active = self.active.clone();

        let handle = tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    trace!("Task cancelled before start");
                    return Err(TransferError::Cancelled);
                }
                permit = semaphore.acquire_owned() => permit
                    .map_err(|_| TransferError::Executor("executor is shut down".to_string()))?,
            };
            drop(queued);
            let _active = GaugeGuard::enter(&active);
            let _permit = permit;

            cancel.check()?;
            task(cancel).await
        });

        TaskHandle { handle }
    }

    /// Stop accepting work. Queued and later submissions fail with an
    /// executor error; running tasks finish normally.
    pub fn close(&self) {
        debug!(active = self.active(), queued = self.queued(), "Closing executor");
        self.semaphore.close();
    }
}

impl Default for BoundedExecutor {
    fn default() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENCY)),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            queued: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Completion handle for a submitted task.
///
/// Dropping the handle detaches the task; use the task's [`CancelToken`] to
/// stop it.
#[derive(Debug)]
pub struct TaskHandle<T> {
    handle: JoinHandle<Result<T, TransferError>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TransferError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(TransferError::Cancelled),
            Err(e) => Err(TransferError::Executor(format!("task panicked: {}", e))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(matches!(
            BoundedExecutor::new(0),
            Err(TransferError::Executor(_))
        ));
        assert_eq!(BoundedExecutor::default().max_concurrency(), DEFAULT_MAX_CONCURRENCY);
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        let executor = BoundedExecutor::new(3).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                executor.submit(CancelToken::new(), move |_| async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let values: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..12).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(executor.active(), 0);
        assert_eq!(executor.queued(), 0);
    }

    #[tokio::test]
    async fn test_cancel_queued_task_never_starts() {
        let executor = BoundedExecutor::new(1).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let started = Arc::new(AtomicBool::new(false));

        let blocker = executor.submit(CancelToken::new(), move |_| async move {
            let _ = release_rx.await;
            Ok(())
        });

        let token = CancelToken::new();
        let flag = started.clone();
        let queued = executor.submit(token.clone(), move |_| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(executor.active(), 1);
        assert_eq!(executor.queued(), 1);

        token.cancel();
        assert_eq!(queued.await, Err(TransferError::Cancelled));
        assert!(!started.load(Ordering::SeqCst));

        let _ = release_tx.send(());
        assert_eq!(blocker.await, Ok(()));
        assert_eq!(executor.queued(), 0);
    }

    #[tokio::test]
    async fn test_close_fails_queued_tasks() {
        let executor = BoundedExecutor::new(1).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let running = executor.submit(CancelToken::new(), move |_| async move {
            let _ = release_rx.await;
            Ok("finished")
        });
        let queued = executor.submit(CancelToken::new(), |_| async move { Ok("never") });
        tokio::time::sleep(Duration::from_millis(20)).await;

        executor.close();
        assert!(matches!(queued.await, Err(TransferError::Executor(_))));

        // Work already running is left to finish
        let _ = release_tx.send(());
        assert_eq!(running.await, Ok("finished"));

        let late = executor.submit(CancelToken::new(), |_| async move { Ok(()) });
        assert!(matches!(late.await, Err(TransferError::Executor(_))));
        assert_eq!(executor.queued(), 0);
        assert_eq!(executor.active(), 0);
    }

    #[tokio::test]
    async fn test_running_task_observes_cancel() {
        let executor = BoundedExecutor::new(2).unwrap();
        let token = CancelToken::new();

        let handle = executor.submit(token.clone(), |cancel| async move {
            cancel.cancelled().await;
            cancel.check()?;
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        assert_eq!(handle.await, Err(TransferError::Cancelled));
    }

    #[tokio::test]
    async fn test_child_token_follows_parent() {
        let parent = CancelToken::new();
        let child = parent.child_token();
        let sibling = parent.child_token();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!sibling.is_cancelled());

        parent.cancel();
        assert!(sibling.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), sibling.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_drop_guard_cancels() {
        let token = CancelToken::new();
        {
            let _guard = token.drop_guard();
        }
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_panicking_task_reports_executor_error() {
        let executor = BoundedExecutor::new(1).unwrap();
        let handle = executor.submit(CancelToken::new(), |_| async move {
            if true {
                panic!("sink exploded");
            }
            Ok(())
        });
        assert!(matches!(handle.await, Err(TransferError::Executor(_))));

        // The slot is released after the panic
        let handle = executor.submit(CancelToken::new(), |_| async move { Ok(7) });
        assert_eq!(handle.await, Ok(7));
    }
}
