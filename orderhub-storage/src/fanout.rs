//! Structured concurrency for the save and hydration pipelines.
//!
//! A [`FanOut`] group runs independent sub-operations as tokio tasks, waits
//! for all of them, and on the first failure cancels the group's token so
//! siblings stop issuing new backend calls. Calls already dispatched are
//! allowed to finish; nothing is rolled back.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use orderhub_core::{Stage, StoreError, StoreResult};
use tokio::sync::Notify;
use tokio::task::JoinSet;

// ============================================================================
// CANCELLATION TOKEN
// ============================================================================

struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<TokenInner>>>,
}

impl TokenInner {
    fn new(cancelled: bool) -> Self {
        Self {
            cancelled: AtomicBool::new(cancelled),
            notify: Notify::new(),
            children: Mutex::new(Vec::new()),
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();
        let children = std::mem::take(
            &mut *self.children.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// Caller-supplied cancellation, threaded into every fan-out task.
///
/// Cancelling a token cancels every child derived from it. Cancellation is
/// cooperative: tasks call [`CancelToken::check`] before dispatching work.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner::new(false)),
        }
    }

    /// Derive a token that is cancelled with this one, and can also be
    /// cancelled on its own without affecting the parent.
    pub fn child(&self) -> CancelToken {
        let mut children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let cancelled = self.is_cancelled();
        let child = Arc::new(TokenInner::new(cancelled));
        if !cancelled {
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        CancelToken { inner: child }
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`StoreError::Cancelled`] once cancelled.
    pub fn check(&self) -> StoreResult<()> {
        if self.is_cancelled() {
            Err(StoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// ============================================================================
// FAN-OUT GROUP
// ============================================================================

/// Fan out / wait-all / cancel-on-first-error.
///
/// Results come back in spawn order. The first failing task's error is
/// returned wrapped as [`StoreError::PartialAggregate`] with the group's
/// stage; later failures are discarded.
pub struct FanOut<T> {
    stage: Stage,
    token: CancelToken,
    tasks: JoinSet<(usize, StoreResult<T>)>,
    spawned: usize,
}

impl<T: Send + 'static> FanOut<T> {
    /// Open a group whose token is a child of `parent`.
    pub fn new(stage: Stage, parent: &CancelToken) -> Self {
        Self {
            stage,
            token: parent.child(),
            tasks: JoinSet::new(),
            spawned: 0,
        }
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn len(&self) -> usize {
        self.spawned
    }

    pub fn is_empty(&self) -> bool {
        self.spawned == 0
    }

    /// Spawn a task; it receives the group token.
    pub fn spawn<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = StoreResult<T>> + Send + 'static,
    {
        let index = self.spawned;
        self.spawned += 1;
        let fut = task(self.token.clone());
        self.tasks.spawn(async move { (index, fut.await) });
    }

    /// Wait for every task. Tasks already running when the first failure
    /// arrives are drained, not aborted.
    pub async fn join(mut self) -> StoreResult<Vec<T>> {
        let mut slots: Vec<Option<T>> = (0..self.spawned).map(|_| None).collect();
        let mut first_error: Option<StoreError> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let outcome = match joined {
                Ok((index, result)) => result.map(|value| (index, value)),
                Err(e) => Err(StoreError::TaskFailed {
                    reason: e.to_string(),
                }),
            };

            match outcome {
                Ok((index, value)) => slots[index] = Some(value),
                Err(err) if first_error.is_none() => {
                    tracing::debug!(stage = %self.stage, error = %err, "Fan-out task failed, cancelling group");
                    self.token.cancel();
                    first_error = Some(err);
                }
                Err(err) => {
                    tracing::trace!(stage = %self.stage, error = %err, "Discarding sibling failure");
                }
            }
        }

        if let Some(source) = first_error {
            return Err(StoreError::PartialAggregate {
                stage: self.stage,
                source: Box::new(source),
            });
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| StoreError::TaskFailed {
                    reason: format!("{} task produced no result", self.stage),
                })
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use orderhub_core::EntityKind;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_child_cancelled_with_parent() {
        let parent = CancelToken::new();
        let child = parent.child();
        let grandchild = child.child();

        parent.cancel();

        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert!(matches!(grandchild.check(), Err(StoreError::Cancelled)));
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = CancelToken::new();
        let child = parent.child();

        child.cancel();

        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(parent.check().is_ok());
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let parent = CancelToken::new();
        parent.cancel();
        assert!(parent.child().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancelled() should resolve")
            .expect("waiter task should not panic");
    }

    #[tokio::test]
    async fn test_results_in_spawn_order() {
        let token = CancelToken::new();
        let mut group = FanOut::new(Stage::SaveItems, &token);
        for i in 0..5u64 {
            group.spawn(move |_| async move {
                tokio::time::sleep(Duration::from_millis(25 - i * 5)).await;
                Ok(i)
            });
        }
        assert_eq!(group.len(), 5);
        assert_eq!(group.join().await.unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_empty_group_joins_to_empty() {
        let group: FanOut<u8> = FanOut::new(Stage::SaveItems, &CancelToken::new());
        assert!(group.is_empty());
        assert!(group.join().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_error_cancels_siblings_and_is_wrapped() {
        let token = CancelToken::new();
        let dispatched = Arc::new(AtomicUsize::new(0));
        let mut group = FanOut::new(Stage::SaveItems, &token);

        group.spawn(|_| async {
            Err::<(), _>(StoreError::not_found(EntityKind::Item, 7).at(Stage::UpsertItem))
        });
        for _ in 0..3 {
            let dispatched = Arc::clone(&dispatched);
            group.spawn(move |token| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                token.check()?;
                dispatched.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        let group_token = group.token().clone();

        let err = group.join().await.unwrap_err();

        assert_eq!(err.failing_stage(), Some(Stage::SaveItems));
        assert_eq!(err.stages(), vec![Stage::SaveItems, Stage::UpsertItem]);
        assert!(err.is_not_found());
        assert!(group_token.is_cancelled());
        assert_eq!(dispatched.load(Ordering::SeqCst), 0);
        assert!(!token.is_cancelled(), "group failure must not cancel the caller");
    }

    #[tokio::test]
    async fn test_in_flight_work_completes_after_cancel() {
        let token = CancelToken::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let mut group = FanOut::new(Stage::Hydrate, &token);

        {
            let finished = Arc::clone(&finished);
            group.spawn(move |token| async move {
                token.check()?;
                // Already dispatched: runs to completion regardless.
                tokio::time::sleep(Duration::from_millis(40)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        group.spawn(|_| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(StoreError::connectivity("fetch", "reset"))
        });

        assert!(group.join().await.is_err());
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_task_reported() {
        let mut group = FanOut::new(Stage::Hydrate, &CancelToken::new());
        group.spawn(|_| async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        let err = group.join().await.unwrap_err();
        assert!(matches!(err.root_cause(), StoreError::TaskFailed { .. }));
    }

    #[tokio::test]
    async fn test_parent_cancel_stops_new_work() {
        let token = CancelToken::new();
        token.cancel();
        let mut group = FanOut::new(Stage::FetchRecent, &token);
        group.spawn(|token| async move {
            token.check()?;
            Ok(1)
        });
        let err = group.join().await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
