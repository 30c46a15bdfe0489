//! Controller worker harness.
//!
//! One worker per resource kind: a watch stream feeds a work queue keyed by
//! `(namespace, name)` with at-most-one-in-flight per key, processed by a
//! bounded pool. Reconciles run under a per-attempt deadline and the retry
//! helper; a periodic resync re-lists the kind to cover missed events.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::meta::ResourceKind;
use crate::domain::ports::resource_store::ResourceStore;
use crate::services::retry::RetryPolicy;

/// Object key within a kind.
pub type ObjectKey = (String, String);

/// A control loop driving observed state toward declared state for one
/// resource kind.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn kind(&self) -> ResourceKind;

    /// Bring one object into agreement with its declaration. Must be
    /// idempotent and must not mutate state after observing cancellation.
    async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> ControlResult<()>;
}

/// Keyed work queue with at-most-one-in-flight per key. Keys enqueued while
/// their reconcile is running are marked dirty and re-queued on completion.
pub struct WorkQueue {
    state: std::sync::Mutex<QueueState>,
    notify: Notify,
}

#[derive(Default)]
struct QueueState {
    queued: VecDeque<ObjectKey>,
    queued_set: HashSet<ObjectKey>,
    active: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    pub fn enqueue(&self, key: ObjectKey) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.active.contains(&key) {
            state.dirty.insert(key);
        } else if state.queued_set.insert(key.clone()) {
            state.queued.push_back(key);
        }
        drop(state);
        // Permit semantics: a notify issued before a worker starts waiting
        // is not lost.
        self.notify.notify_one();
    }

    /// Next key to process, or `None` once `shutdown` fires. Queued backlog
    /// is abandoned on shutdown; only in-flight reconciles drain.
    pub async fn pop(&self, shutdown: &CancellationToken) -> Option<ObjectKey> {
        loop {
            if shutdown.is_cancelled() {
                return None;
            }
            let notified = self.notify.notified();
            {
                let mut state = self
                    .state
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if let Some(key) = state.queued.pop_front() {
                    state.queued_set.remove(&key);
                    state.active.insert(key.clone());
                    return Some(key);
                }
            }
            tokio::select! {
                () = notified => {}
                () = shutdown.cancelled() => {}
            }
        }
    }

    /// Mark a key finished; a dirty key goes straight back on the queue.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.active.remove(key);
        if state.dirty.remove(key) && state.queued_set.insert(key.clone()) {
            state.queued.push_back(key.clone());
        }
        drop(state);
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        let state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.queued.len() + state.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs one reconciler against the store's watch stream.
pub struct ControllerWorker {
    reconciler: Arc<dyn Reconciler>,
    store: Arc<dyn ResourceStore>,
    retry: RetryPolicy,
    deadline: Duration,
    workers: usize,
    resync_interval: Duration,
}

impl ControllerWorker {
    pub fn new(
        reconciler: Arc<dyn Reconciler>,
        store: Arc<dyn ResourceStore>,
        retry: RetryPolicy,
        deadline: Duration,
        workers: usize,
        resync_interval: Duration,
    ) -> Self {
        Self {
            reconciler,
            store,
            retry,
            deadline,
            workers: workers.max(1),
            resync_interval,
        }
    }

    /// Run until `shutdown` fires, then drain in-flight reconciles.
    pub async fn run(&self, shutdown: CancellationToken) -> ControlResult<()> {
        let kind = self.reconciler.kind();
        let queue = Arc::new(WorkQueue::new());

        info!(kind = %kind, workers = self.workers, "starting controller");
        self.resync(&queue).await?;

        let mut tasks = JoinSet::new();

        // Watch feeder. On stream end it resyncs after a fixed delay and
        // re-subscribes, replaying from a full list.
        {
            let store = Arc::clone(&self.store);
            let queue = Arc::clone(&queue);
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                loop {
                    let mut stream = match store.watch(kind).await {
                        Ok(stream) => stream,
                        Err(err) => {
                            warn!(kind = %kind, error = %err, "watch failed; backing off");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                            continue;
                        }
                    };
                    loop {
                        tokio::select! {
                            event = stream.next() => match event {
                                Some(event) => {
                                    let meta = &event.resource.meta;
                                    queue.enqueue((meta.namespace.clone(), meta.name.clone()));
                                }
                                None => break,
                            },
                            () = shutdown.cancelled() => return,
                        }
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    if shutdown.is_cancelled() {
                        return;
                    }
                    if let Err(err) = resync_kind(store.as_ref(), kind, &queue).await {
                        warn!(kind = %kind, error = %err, "resync after watch loss failed");
                    }
                }
            });
        }

        // Periodic full resync.
        {
            let store = Arc::clone(&self.store);
            let queue = Arc::clone(&queue);
            let shutdown = shutdown.clone();
            let interval = self.resync_interval;
            tasks.spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // immediate first tick consumed
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(err) = resync_kind(store.as_ref(), kind, &queue).await {
                                warn!(kind = %kind, error = %err, "periodic resync failed");
                            }
                        }
                        () = shutdown.cancelled() => return,
                    }
                }
            });
        }

        // Reconcile workers.
        for worker_id in 0..self.workers {
            let reconciler = Arc::clone(&self.reconciler);
            let queue = Arc::clone(&queue);
            let shutdown = shutdown.clone();
            let retry = self.retry.clone();
            let deadline = self.deadline;
            tasks.spawn(async move {
                while let Some((namespace, name)) = queue.pop(&shutdown).await {
                    process_one(
                        reconciler.as_ref(),
                        &retry,
                        deadline,
                        &namespace,
                        &name,
                        &shutdown,
                    )
                    .await;
                    queue.done(&(namespace, name));
                }
                debug!(kind = %kind, worker_id, "worker drained");
            });
        }

        while tasks.join_next().await.is_some() {}
        info!(kind = %kind, "controller stopped");
        Ok(())
    }

    async fn resync(&self, queue: &WorkQueue) -> ControlResult<()> {
        resync_kind(self.store.as_ref(), self.reconciler.kind(), queue).await
    }
}

async fn resync_kind(
    store: &dyn ResourceStore,
    kind: ResourceKind,
    queue: &WorkQueue,
) -> ControlResult<()> {
    let resources = store.list(kind, None, &Default::default()).await?;
    for resource in resources {
        queue.enqueue((resource.meta.namespace, resource.meta.name));
    }
    Ok(())
}

async fn process_one(
    reconciler: &dyn Reconciler,
    retry: &RetryPolicy,
    deadline: Duration,
    namespace: &str,
    name: &str,
    cancel: &CancellationToken,
) {
    let result = retry
        .execute(|| async {
            match tokio::time::timeout(deadline, reconciler.reconcile(namespace, name, cancel))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ControlError::Transient(format!(
                    "reconcile deadline of {:?} exceeded",
                    deadline
                ))),
            }
        })
        .await;

    match result {
        Ok(()) => {}
        Err(err) if err.retryable() => {
            warn!(
                kind = %reconciler.kind(),
                object = %format!("{}/{}", namespace, name),
                error = %err,
                "reconcile retries exhausted"
            );
        }
        Err(err) => {
            // Spec violations surface via status and events inside the
            // reconciler; nothing further to do here.
            warn!(
                kind = %reconciler.kind(),
                object = %format!("{}/{}", namespace, name),
                error = %err,
                "reconcile failed terminally"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_queue_deduplicates_pending_keys() {
        let queue = WorkQueue::new();
        let key = ("default".to_string(), "a".to_string());
        queue.enqueue(key.clone());
        queue.enqueue(key.clone());
        assert_eq!(queue.len(), 1);

        let shutdown = CancellationToken::new();
        let popped = queue.pop(&shutdown).await.unwrap();
        assert_eq!(popped, key);
        queue.done(&key);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_queue_requeues_dirty_keys() {
        let queue = WorkQueue::new();
        let key = ("default".to_string(), "a".to_string());
        queue.enqueue(key.clone());

        let shutdown = CancellationToken::new();
        let popped = queue.pop(&shutdown).await.unwrap();
        // Event arrives while the key is being processed.
        queue.enqueue(key.clone());
        assert_eq!(queue.len(), 1, "active key is not double-queued");

        queue.done(&popped);
        // Dirty key went back on the queue.
        let again = queue.pop(&shutdown).await.unwrap();
        assert_eq!(again, key);
    }

    #[tokio::test]
    async fn test_pop_returns_none_on_shutdown() {
        let queue = Arc::new(WorkQueue::new());
        let shutdown = CancellationToken::new();

        let popper = {
            let queue = Arc::clone(&queue);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { queue.pop(&shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        assert!(popper.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_abandons_queued_backlog() {
        let queue = WorkQueue::new();
        let shutdown = CancellationToken::new();
        queue.enqueue(("ns".to_string(), "a".to_string()));
        shutdown.cancel();
        // Backlog is abandoned; only in-flight work drains.
        assert!(queue.pop(&shutdown).await.is_none());
    }

    struct CountingReconciler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Reconciler for CountingReconciler {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Channel
        }

        async fn reconcile(
            &self,
            _namespace: &str,
            _name: &str,
            _cancel: &CancellationToken,
        ) -> ControlResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_process_one_counts_single_attempt() {
        let reconciler = CountingReconciler { calls: AtomicUsize::new(0) };
        let retry = RetryPolicy::new(2, crate::services::retry::Backoff::Constant, 1, 5);
        process_one(
            &reconciler,
            &retry,
            Duration::from_secs(1),
            "default",
            "a",
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 1);
    }
}
