use crate::dates;
use crate::traits::{FeedFetcher, Repository};
use crate::types::{FeedJob, NewArticle, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receiving end of the job queue, shared by every worker.
pub type JobReceiver = Arc<Mutex<mpsc::Receiver<FeedJob>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The feed was deleted between dispatch and processing.
    Missing,
    /// Retrieval or parsing failed; the feed keeps its old `updated_at`.
    FetchFailed,
    Processed { items: usize, inserted: usize },
}

/// Fetches one feed and stores its articles.
pub struct FeedProcessor {
    repo: Arc<dyn Repository>,
    fetcher: Arc<dyn FeedFetcher>,
}

impl FeedProcessor {
    pub fn new(repo: Arc<dyn Repository>, fetcher: Arc<dyn FeedFetcher>) -> Self {
        Self { repo, fetcher }
    }

    pub async fn process_feed(&self, worker_id: usize, job: FeedJob) -> Result<FeedOutcome> {
        let Some(feed) = self.repo.get_feed(job.feed_id).await? else {
            warn!(worker = worker_id, feed_id = %job.feed_id, "Feed no longer exists, skipping");
            return Ok(FeedOutcome::Missing);
        };

        info!(worker = worker_id, feed = %feed.name, url = %feed.url, "Processing feed");

        let channel = match self.fetcher.fetch(&feed.url).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(worker = worker_id, feed = %feed.name, "Failed to fetch feed: {}", e);
                return Ok(FeedOutcome::FetchFailed);
            }
        };

        let items = channel.items.len();
        let mut inserted = 0;

        for item in channel.items {
            let Some(link) = item.link else {
                warn!(worker = worker_id, feed = %feed.name, "Skipping item without link: {}", item.title);
                continue;
            };

            let article = NewArticle {
                feed_id: feed.id,
                title: item.title,
                link,
                description: item.description,
                published_at: dates::published_at(item.pub_date.as_deref()),
            };

            match self.repo.add_article(&article).await {
                Ok(true) => inserted += 1,
                Ok(false) => debug!(worker = worker_id, "Article already stored: {}", article.link),
                Err(e) => warn!(worker = worker_id, "Failed to store article {}: {}", article.link, e),
            }
        }

        self.repo.update_feed_timestamp(feed.id).await?;

        info!(
            worker = worker_id,
            feed = %feed.name,
            "Feed processed: {} items, {} new articles",
            items,
            inserted
        );
        Ok(FeedOutcome::Processed { items, inserted })
    }
}

struct WorkerSlot {
    id: usize,
    token: CancellationToken,
}

/// Resizable set of worker loops consuming one shared queue.
///
/// Every worker gets a child token of the pool's shutdown token, so shrinking
/// can retire exactly the excess workers. A retired worker finishes its
/// current job before exiting.
pub struct WorkerPool {
    processor: Arc<FeedProcessor>,
    queue: JobReceiver,
    shutdown: CancellationToken,
    live: Vec<WorkerSlot>,
    tasks: JoinSet<()>,
    next_id: usize,
}

impl WorkerPool {
    pub fn new(processor: Arc<FeedProcessor>, queue: JobReceiver, shutdown: CancellationToken) -> Self {
        Self {
            processor,
            queue,
            shutdown,
            live: Vec::new(),
            tasks: JoinSet::new(),
            next_id: 0,
        }
    }

    /// Number of workers not yet told to stop.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn resize(&mut self, workers: usize) {
        while self.live.len() < workers {
            self.spawn_worker();
        }
        while self.live.len() > workers {
            if let Some(slot) = self.live.pop() {
                debug!(worker = slot.id, "Retiring worker");
                slot.token.cancel();
            }
        }
    }

    fn spawn_worker(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let token = self.shutdown.child_token();
        self.tasks.spawn(run_worker(
            id,
            self.processor.clone(),
            self.queue.clone(),
            token.clone(),
        ));
        self.live.push(WorkerSlot { id, token });
    }

    /// Stop every worker and wait up to `grace` for in-flight jobs. Returns
    /// how many workers had to be aborted.
    pub async fn drain(mut self, grace: Duration) -> usize {
        for slot in self.live.drain(..) {
            slot.token.cancel();
        }

        let joined = tokio::time::timeout(grace, async {
            while let Some(result) = self.tasks.join_next().await {
                if let Err(e) = result {
                    warn!("Worker task ended abnormally: {}", e);
                }
            }
        })
        .await;

        if joined.is_ok() {
            return 0;
        }

        let remaining = self.tasks.len();
        warn!("{} workers still busy after {:?}, aborting them", remaining, grace);
        self.tasks.abort_all();
        remaining
    }
}

async fn run_worker(
    id: usize,
    processor: Arc<FeedProcessor>,
    queue: JobReceiver,
    token: CancellationToken,
) {
    debug!(worker = id, "Worker started");

    loop {
        let job = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            job = next_job(&queue) => job,
        };

        let Some(job) = job else {
            debug!(worker = id, "Job queue closed");
            break;
        };

        if let Err(e) = processor.process_feed(id, job).await {
            warn!(worker = id, feed_id = %job.feed_id, "Feed processing failed: {}", e);
        }
    }

    debug!(worker = id, "Worker stopped");
}

async fn next_job(queue: &JobReceiver) -> Option<FeedJob> {
    queue.lock().await.recv().await
}
