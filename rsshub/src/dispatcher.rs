use crate::traits::Repository;
use crate::types::{FeedJob, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Selects the stalest feeds and hands them to the worker queue.
#[derive(Clone)]
pub struct Dispatcher {
    repo: Arc<dyn Repository>,
}

impl Dispatcher {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Run one dispatch cycle and return how many jobs were enqueued.
    ///
    /// Feeds are enqueued oldest `updated_at` first. The cycle ends early,
    /// without error, once `shutdown` fires or the queue is closed.
    pub async fn dispatch(
        &self,
        batch: usize,
        queue: &mpsc::Sender<FeedJob>,
        shutdown: &CancellationToken,
    ) -> Result<usize> {
        let feeds = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(0),
            feeds = self.repo.get_outdated_feeds(batch) => feeds?,
        };

        debug!("Fetched {} outdated feeds for dispatch", feeds.len());

        let mut sent = 0;
        for feed in feeds {
            let job = FeedJob { feed_id: feed.id };
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Dispatch interrupted by shutdown after {} jobs", sent);
                    return Ok(sent);
                }
                result = queue.send(job) => {
                    if result.is_err() {
                        debug!("Job queue closed, ending dispatch cycle after {} jobs", sent);
                        return Ok(sent);
                    }
                    sent += 1;
                }
            }
        }

        Ok(sent)
    }
}
