use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

type Settled = Shared<BoxFuture<'static, ()>>;

/// Registry of in-flight background tasks.
///
/// A task is registered before it is spawned and deregistered when it
/// settles, whether it completed, failed or panicked. [`wait`] joins the
/// tasks registered at the time of the call; tasks spawned afterwards are
/// left for a later wait.
///
/// [`wait`]: PendingTasks::wait
#[derive(Clone, Default)]
pub struct PendingTasks {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    tasks: DashMap<u64, Settled>,
}

struct Deregister {
    inner: Arc<Inner>,
    id: u64,
    _done: oneshot::Sender<()>,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.inner.tasks.remove(&self.id);
    }
}

impl PendingTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` on the current tokio runtime and tracks it until it
    /// settles. Returns `false` (and drops the task) when called outside a
    /// runtime.
    pub fn spawn<F>(&self, label: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(handle) = Handle::try_current() else {
            tracing::error!(task = label, "no tokio runtime available; task dropped");
            return false;
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let settled: Settled = done_rx.map(|_| ()).boxed().shared();
        self.inner.tasks.insert(id, settled);

        let guard = Deregister {
            inner: self.inner.clone(),
            id,
            _done: done_tx,
        };
        handle.spawn(async move {
            let _guard = guard;
            if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                tracing::error!(task = label, "background task panicked");
            }
        });
        true
    }

    /// Waits for every task pending at the time of the call.
    pub async fn wait(&self) {
        let snapshot: Vec<Settled> = self
            .inner
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        join_all(snapshot).await;
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn wait_returns_immediately_when_idle() {
        let pending = PendingTasks::new();
        pending.wait().await;
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn wait_joins_registered_tasks_and_deregisters_them() {
        let pending = PendingTasks::new();
        let finished = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let finished = finished.clone();
            pending.spawn("test", async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }
        pending.wait().await;
        assert_eq!(finished.load(Ordering::SeqCst), 5);
        tokio::task::yield_now().await;
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn panicking_task_still_settles() {
        let pending = PendingTasks::new();
        pending.spawn("test", async {
            panic!("boom");
        });
        pending.wait().await;
        tokio::task::yield_now().await;
        assert!(pending.is_empty());
    }

    #[test]
    fn spawn_outside_runtime_is_rejected() {
        let pending = PendingTasks::new();
        assert!(!pending.spawn("test", async {}));
        assert!(pending.is_empty());
    }
}
