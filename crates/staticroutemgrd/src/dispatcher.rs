//! Event dispatch: one worker task per resource.
//!
//! Events enter a keyed, coalescing [`Consumer`]. The dispatch loop routes
//! them to the resource's worker over an mpsc channel; each worker runs its
//! reconciliations strictly in order and takes a semaphore permit for each
//! one, which bounds how many resources reconcile at once.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use staticroute_common::{Consumer, ConsumerConfig, KeyOp, Operation};
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::StaticRouteConfig;
use crate::reconciler::{ReconcileRequest, RouteReconciler};
use crate::types::{DesiredRouteSpec, ReconciliationOutcome, ResourceRef, RouteEntry};

/// Payload of a dispatcher event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Desired spec; `None` for deletions
    pub spec: Option<DesiredRouteSpec>,
    /// Seen by the first scan after a (re)start
    pub resumed: bool,
}

impl Observation {
    pub fn observed(spec: DesiredRouteSpec) -> Self {
        Self {
            spec: Some(spec),
            resumed: false,
        }
    }

    pub fn resumed(spec: DesiredRouteSpec) -> Self {
        Self {
            spec: Some(spec),
            resumed: true,
        }
    }

    pub fn deleted() -> Self {
        Self {
            spec: None,
            resumed: false,
        }
    }
}

/// A keyed dispatcher event (key = resource name).
pub type RouteEvent = KeyOp<Observation>;

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_concurrent: usize,
    pub retry_base: Duration,
    pub retry_max: Duration,
    /// 0 retries forever
    pub max_retries: u32,
    pub batch_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
            max_retries: 10,
            batch_size: 128,
        }
    }
}

impl From<&StaticRouteConfig> for DispatcherConfig {
    fn from(config: &StaticRouteConfig) -> Self {
        Self {
            max_concurrent: config.dispatch.max_concurrent_reconciles,
            retry_base: config.retry_base(),
            retry_max: config.retry_max(),
            max_retries: config.dispatch.max_retries,
            ..Self::default()
        }
    }
}

impl DispatcherConfig {
    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.retry_max)
    }

    fn may_retry(&self, attempt: u32) -> bool {
        self.max_retries == 0 || attempt < self.max_retries
    }
}

/// True if a NotReady outcome could still converge by retrying.
fn worth_retrying(outcome: &ReconciliationOutcome) -> bool {
    outcome.failures().any(|s| s.retryable)
}

struct WorkerHandle {
    tx: mpsc::UnboundedSender<RouteEvent>,
    /// Events handed to the worker so far
    sent: u64,
}

/// A worker reporting that it holds no routes and has nothing queued.
#[derive(Debug)]
struct Retired {
    name: String,
    /// Events the worker had received when it went idle
    received: u64,
}

/// Routes resource events to per-resource workers.
pub struct Dispatcher {
    reconciler: Arc<RouteReconciler>,
    config: DispatcherConfig,
    queue: Mutex<Consumer<Observation>>,
    notify: Notify,
    permits: Arc<Semaphore>,
    workers: Mutex<HashMap<String, WorkerHandle>>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Dispatcher {
    pub fn new(reconciler: Arc<RouteReconciler>, config: DispatcherConfig) -> Self {
        let queue = Consumer::new(
            ConsumerConfig::new("StaticRoute").with_batch_size(config.batch_size),
        );
        Self {
            reconciler,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            queue: Mutex::new(queue),
            notify: Notify::new(),
            workers: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Queues events for dispatch.
    pub fn enqueue(&self, events: impl IntoIterator<Item = RouteEvent>) {
        let mut queue = self.queue.lock();
        queue.add_to_sync(events);
        if queue.has_pending() {
            self.notify.notify_one();
        }
    }

    /// Events queued but not yet handed to a worker.
    pub fn pending(&self) -> usize {
        self.queue.lock().pending_count()
    }

    /// Resources that currently have a worker.
    pub fn active_workers(&self) -> usize {
        self.workers.lock().len()
    }

    /// Dispatch loop; returns once `shutdown` fires and every worker has
    /// finished its current reconciliation.
    pub async fn run(&self, shutdown: CancellationToken) {
        let (retired_tx, mut retired_rx) = mpsc::unbounded_channel();
        info!("Dispatcher started ({} workers max)", self.config.max_concurrent);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.notify.notified() => self.dispatch_pending(&retired_tx, &shutdown),
                Some(retired) = retired_rx.recv() => self.retire(retired),
            }
        }

        self.workers.lock().clear();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        info!("Dispatcher stopping, waiting for {} workers", tasks.len());
        for (name, task) in tasks {
            if let Err(e) = task.await {
                warn!("Worker for {} ended abnormally: {}", name, e);
            }
        }
    }

    fn dispatch_pending(&self, retired: &mpsc::UnboundedSender<Retired>, shutdown: &CancellationToken) {
        loop {
            let batch = self.queue.lock().pop_batch();
            if batch.is_empty() {
                break;
            }
            for event in batch {
                self.route(event, retired, shutdown);
            }
        }
    }

    fn route(&self, event: RouteEvent, retired: &mpsc::UnboundedSender<Retired>, shutdown: &CancellationToken) {
        debug!("Dispatching {} {}", event.op, event.key);
        let mut workers = self.workers.lock();
        let worker = workers
            .entry(event.key.clone())
            .or_insert_with(|| self.spawn_worker(&event.key, retired, shutdown));
        match worker.tx.send(event) {
            Ok(()) => worker.sent += 1,
            Err(mpsc::error::SendError(event)) => {
                warn!("Worker for {} is gone; dropping {} event", event.key, event.op)
            }
        }
    }

    /// Drops the worker unless events reached it after it went idle.
    fn retire(&self, retired: Retired) {
        let mut workers = self.workers.lock();
        if workers
            .get(&retired.name)
            .is_some_and(|w| w.sent == retired.received)
        {
            workers.remove(&retired.name);
            debug!("Retired worker for {}", retired.name);
        }
        drop(workers);

        self.tasks.lock().retain(|(_, task)| !task.is_finished());
    }

    fn spawn_worker(
        &self,
        name: &str,
        retired: &mpsc::UnboundedSender<Retired>,
        shutdown: &CancellationToken,
    ) -> WorkerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = ResourceWorker {
            resource: ResourceRef::new(name),
            reconciler: self.reconciler.clone(),
            permits: self.permits.clone(),
            config: self.config.clone(),
            applied: None,
            stale: BTreeSet::new(),
            received: 0,
        };
        let task = tokio::spawn(
            worker
                .run(rx, retired.clone(), shutdown.clone())
                .instrument(info_span!("worker", resource = %name)),
        );
        self.tasks.lock().push((name.to_string(), task));
        WorkerHandle { tx, sent: 0 }
    }
}

/// What interrupted a retry wait.
enum Interrupted {
    Shutdown,
    Superseded(Option<RouteEvent>),
}

/// Owns one resource: its pending events and the routes it last left
/// installed.
struct ResourceWorker {
    resource: ResourceRef,
    reconciler: Arc<RouteReconciler>,
    permits: Arc<Semaphore>,
    config: DispatcherConfig,
    applied: Option<DesiredRouteSpec>,
    stale: BTreeSet<RouteEntry>,
    received: u64,
}

impl ResourceWorker {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<RouteEvent>,
        retired: mpsc::UnboundedSender<Retired>,
        shutdown: CancellationToken,
    ) {
        let mut pending = Consumer::new(ConsumerConfig::new(self.resource.name.clone()));

        loop {
            if !pending.has_pending() {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    event = rx.recv() => match event {
                        Some(event) => {
                            self.received += 1;
                            pending.add_to_sync([event]);
                        }
                        None => return,
                    },
                }
            }
            while let Ok(event) = rx.try_recv() {
                self.received += 1;
                pending.add_to_sync([event]);
            }

            let mut batch = pending.drain().into_iter().peekable();
            while let Some(event) = batch.next() {
                let has_newer = batch.peek().is_some();
                match self.handle(event, has_newer, &mut rx, &shutdown).await {
                    Ok(()) => {}
                    Err(Interrupted::Shutdown) => return,
                    Err(Interrupted::Superseded(Some(newer))) => pending.add_to_sync([newer]),
                    Err(Interrupted::Superseded(None)) => {}
                }
            }

            if !pending.has_pending() && self.applied.is_none() && self.stale.is_empty() {
                let idle = Retired {
                    name: self.resource.name.clone(),
                    received: self.received,
                };
                if retired.send(idle).is_err() {
                    return;
                }
            }
        }
    }

    fn request_for(&self, event: RouteEvent) -> Option<ReconcileRequest> {
        let resource = self.resource.clone();
        let request = match (event.op, event.data.spec, &self.applied) {
            (Operation::Del, _, Some(applied)) => ReconcileRequest::delete(resource, applied.clone()),
            (Operation::Del, _, None) if !self.stale.is_empty() => ReconcileRequest::cleanup(resource),
            (Operation::Del, _, None) => return None,
            (Operation::Set, Some(spec), Some(applied)) => {
                ReconcileRequest::update(resource, applied.clone(), spec)
            }
            (Operation::Set, Some(spec), None) if event.data.resumed => {
                ReconcileRequest::resume(resource, spec)
            }
            (Operation::Set, Some(spec), None) => ReconcileRequest::create(resource, spec),
            (Operation::Set, None, _) => return None,
        };
        Some(request.with_stale(self.stale.clone()))
    }

    /// Reconciles one event, retrying a NotReady outcome with backoff.
    async fn handle(
        &mut self,
        event: RouteEvent,
        has_newer: bool,
        rx: &mut mpsc::UnboundedReceiver<RouteEvent>,
        shutdown: &CancellationToken,
    ) -> Result<(), Interrupted> {
        let Some(mut request) = self.request_for(event) else {
            debug!("Nothing to do for {}", self.resource);
            return Ok(());
        };

        let mut attempt = 0u32;
        loop {
            let outcome = {
                let Ok(_permit) = self.permits.acquire().await else {
                    return Err(Interrupted::Shutdown);
                };
                self.reconciler.reconcile(&request).await
            };

            self.applied = outcome.applied.clone();
            self.stale = outcome.stale.clone();

            if outcome.is_ready() || !worth_retrying(&outcome) {
                return Ok(());
            }
            if has_newer {
                debug!("Newer event queued for {}; not retrying", self.resource);
                return Ok(());
            }
            if !self.config.may_retry(attempt) {
                warn!(
                    "Giving up on {} ({}) after {} retries",
                    self.resource, request.trigger, attempt
                );
                return Ok(());
            }

            let delay = self.config.backoff(attempt);
            attempt += 1;
            info!(
                "Retrying {} in {}ms (attempt {})",
                self.resource,
                delay.as_millis(),
                attempt
            );
            tokio::select! {
                _ = shutdown.cancelled() => return Err(Interrupted::Shutdown),
                newer = rx.recv() => {
                    if newer.is_some() {
                        self.received += 1;
                    }
                    debug!("Retry of {} superseded", self.resource);
                    return Err(Interrupted::Superseded(newer));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            request = request.with_prior(outcome.statuses);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_backoff_is_capped() {
        let config = DispatcherConfig {
            retry_base: Duration::from_millis(100),
            retry_max: Duration::from_millis(1000),
            ..DispatcherConfig::default()
        };
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(800));
        assert_eq!(config.backoff(4), Duration::from_millis(1000));
        assert_eq!(config.backoff(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_may_retry() {
        let unlimited = DispatcherConfig {
            max_retries: 0,
            ..DispatcherConfig::default()
        };
        assert!(unlimited.may_retry(1_000));

        let limited = DispatcherConfig {
            max_retries: 2,
            ..DispatcherConfig::default()
        };
        assert!(limited.may_retry(1));
        assert!(!limited.may_retry(2));
    }

    #[test]
    fn test_worth_retrying_follows_retryable_flag() {
        use crate::types::{DestinationStatus, Readiness, RouteAction};

        let failed = |retryable| DestinationStatus {
            destination: "10.1.0.0/24".into(),
            gateway: "10.0.2.1".into(),
            action: RouteAction::Add,
            outcome: Readiness::NotReady,
            reason: "RouteCreateFailed".into(),
            message: "boom".into(),
            retryable,
        };
        let outcome = |statuses| ReconciliationOutcome {
            overall: Readiness::NotReady,
            statuses,
            applied: None,
            stale: BTreeSet::new(),
        };

        assert!(!worth_retrying(&outcome(vec![failed(false)])));
        assert!(worth_retrying(&outcome(vec![failed(false), failed(true)])));
    }

    #[test]
    fn test_config_from_file_settings() {
        let mut file = StaticRouteConfig::default();
        file.dispatch.max_concurrent_reconciles = 9;
        file.dispatch.retry_base_ms = 250;
        let config = DispatcherConfig::from(&file);
        assert_eq!(config.max_concurrent, 9);
        assert_eq!(config.retry_base, Duration::from_millis(250));
    }
}
