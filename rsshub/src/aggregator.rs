use crate::control::AggregatorState;
use crate::dispatcher::Dispatcher;
use crate::scheduler::{Scheduler, MAX_PERIOD};
use crate::traits::{FeedFetcher, Repository};
use crate::types::{AggregatorError, FeedJob, Result};
use crate::worker::{FeedProcessor, WorkerPool};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorSettings {
    pub interval: Duration,
    pub worker_count: usize,
    /// How long `stop` waits for in-flight jobs before aborting workers.
    pub shutdown_grace: Duration,
}

impl AggregatorSettings {
    pub fn validate(&self) -> Result<()> {
        validate_interval(self.interval)?;
        validate_worker_count(self.worker_count)
    }
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(180),
            worker_count: 3,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

pub(crate) fn validate_interval(interval: Duration) -> Result<()> {
    if interval.is_zero() {
        return Err(AggregatorError::Validation("interval must be positive".to_string()));
    }
    if interval > MAX_PERIOD {
        return Err(AggregatorError::Validation(format!(
            "interval must not exceed {:?}",
            MAX_PERIOD
        )));
    }
    Ok(())
}

pub(crate) fn validate_worker_count(workers: usize) -> Result<()> {
    if workers == 0 {
        return Err(AggregatorError::Validation("worker count must be positive".to_string()));
    }
    Ok(())
}

/// Handle to the aggregator engine. Clones share the same instance.
#[derive(Clone)]
pub struct RssAggregator {
    shared: Arc<Shared>,
}

struct Shared {
    repo: Arc<dyn Repository>,
    processor: Arc<FeedProcessor>,
    shutdown_grace: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    interval: Duration,
    worker_count: usize,
    runtime: Option<Runtime>,
}

/// Everything that only exists between `start` and `stop`.
struct Runtime {
    shutdown: CancellationToken,
    scheduler: Scheduler,
    scheduler_task: JoinHandle<()>,
    queue: mpsc::Sender<FeedJob>,
    pool: WorkerPool,
}

impl RssAggregator {
    pub fn new(
        repo: Arc<dyn Repository>,
        fetcher: Arc<dyn FeedFetcher>,
        settings: AggregatorSettings,
    ) -> Result<Self> {
        settings.validate()?;

        let processor = Arc::new(FeedProcessor::new(repo.clone(), fetcher));
        Ok(Self {
            shared: Arc::new(Shared {
                repo,
                processor,
                shutdown_grace: settings.shutdown_grace,
                inner: Mutex::new(Inner {
                    interval: settings.interval,
                    worker_count: settings.worker_count,
                    runtime: None,
                }),
            }),
        })
    }

    /// Spawn the worker pool and the scheduler. The first dispatch cycle runs
    /// right away.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        if inner.runtime.is_some() {
            return Err(AggregatorError::AlreadyRunning { pid: std::process::id() });
        }

        let shutdown = CancellationToken::new();
        let (queue_tx, queue_rx) = mpsc::channel(inner.worker_count);

        let mut pool = WorkerPool::new(
            self.shared.processor.clone(),
            Arc::new(Mutex::new(queue_rx)),
            shutdown.clone(),
        );
        pool.resize(inner.worker_count);

        let (scheduler, scheduler_task) = Scheduler::spawn(
            inner.interval,
            shutdown.clone(),
            dispatch_cycle(
                Arc::downgrade(&self.shared),
                Dispatcher::new(self.shared.repo.clone()),
                queue_tx.clone(),
                shutdown.clone(),
            ),
        );

        inner.runtime = Some(Runtime {
            shutdown,
            scheduler,
            scheduler_task,
            queue: queue_tx,
            pool,
        });

        info!(
            "Aggregator started (interval = {:?}, workers = {})",
            inner.interval, inner.worker_count
        );
        Ok(())
    }

    /// Stop the scheduler, close the queue and drain the workers. A no-op
    /// when not running.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        let Some(runtime) = inner.runtime.take() else {
            return Ok(());
        };

        let Runtime {
            shutdown,
            scheduler,
            scheduler_task,
            queue,
            pool,
        } = runtime;

        shutdown.cancel();
        if let Err(e) = scheduler_task.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
        drop(scheduler);

        // The scheduler task owned the only other sender, so this closes the
        // queue.
        drop(queue);

        let aborted = pool.drain(self.shared.shutdown_grace).await;
        if aborted > 0 {
            warn!("Aborted {} workers that exceeded the shutdown grace period", aborted);
        }

        info!("Aggregator stopped");
        Ok(())
    }

    pub async fn set_interval(&self, interval: Duration) -> Result<()> {
        validate_interval(interval)?;

        let mut inner = self.shared.inner.lock().await;
        inner.interval = interval;
        if let Some(runtime) = &inner.runtime {
            runtime.scheduler.reset(interval);
        }
        Ok(())
    }

    /// Change the target worker count. When running, workers are spawned or
    /// retired immediately; retired workers finish their current job first.
    pub async fn resize(&self, workers: usize) -> Result<()> {
        validate_worker_count(workers)?;

        let mut inner = self.shared.inner.lock().await;
        inner.worker_count = workers;
        if let Some(runtime) = &mut inner.runtime {
            runtime.pool.resize(workers);
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.shared.inner.lock().await.runtime.is_some()
    }

    pub async fn interval(&self) -> Duration {
        self.shared.inner.lock().await.interval
    }

    pub async fn worker_count(&self) -> usize {
        self.shared.inner.lock().await.worker_count
    }

    /// Workers currently consuming from the queue; zero when stopped.
    pub async fn live_workers(&self) -> usize {
        let inner = self.shared.inner.lock().await;
        inner.runtime.as_ref().map_or(0, |rt| rt.pool.len())
    }

    /// Snapshot for the state file, stamped with this process id.
    pub async fn state(&self) -> AggregatorState {
        let inner = self.shared.inner.lock().await;
        AggregatorState {
            running: inner.runtime.is_some(),
            interval: inner.interval,
            worker_count: inner.worker_count,
            pid: std::process::id(),
        }
    }
}

/// Build the per-tick callback. It holds a weak reference so the scheduler
/// task does not keep the aggregator alive.
fn dispatch_cycle(
    shared: Weak<Shared>,
    dispatcher: Dispatcher,
    queue: mpsc::Sender<FeedJob>,
    shutdown: CancellationToken,
) -> impl FnMut() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static {
    move || {
        let shared = shared.clone();
        let dispatcher = dispatcher.clone();
        let queue = queue.clone();
        let shutdown = shutdown.clone();

        Box::pin(async move {
            let Some(shared) = shared.upgrade() else {
                return;
            };

            // `stop` holds the lock while it waits for this task, so never
            // wait on the lock once shutdown has begun.
            let batch = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                inner = shared.inner.lock() => inner.worker_count,
            };
            drop(shared);

            match dispatcher.dispatch(batch, &queue, &shutdown).await {
                Ok(sent) => info!("Dispatched {} feeds for update", sent),
                Err(e) => error!("Failed to fetch outdated feeds: {}", e),
            }
        })
    }
}
