use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Longest period the timer accepts. Larger periods are clamped.
pub const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Repeating timer driving dispatch cycles.
///
/// The timer lives in its own task; this handle only carries the period.
/// Changing the period rebuilds the timer, so the next cycle fires one full
/// period after the reset rather than on the old deadline. A reset is taken
/// even while a cycle is still running; the next cycle starts once the
/// running one has finished.
pub struct Scheduler {
    period: watch::Sender<Duration>,
}

impl Scheduler {
    /// Spawn the timer task. `on_tick` runs once immediately and then once
    /// per period until `shutdown` is cancelled.
    pub fn spawn<F, Fut>(
        period: Duration,
        shutdown: CancellationToken,
        mut on_tick: F,
    ) -> (Self, JoinHandle<()>)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = watch::channel(period);

        let handle = tokio::spawn(async move {
            let mut ticker = ticker_from_now(period);
            info!("Scheduler started (interval = {:?})", period);

            let mut cycle = Some(Box::pin(on_tick()));

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let period = *rx.borrow_and_update();
                        ticker = ticker_from_now(period);
                        debug!("Scheduler timer reset (interval = {:?})", period);
                    }
                    _ = finish_cycle(&mut cycle), if cycle.is_some() => cycle = None,
                    _ = ticker.tick(), if cycle.is_none() => cycle = Some(Box::pin(on_tick())),
                }
            }

            info!("Scheduler stopped");
        });

        (Self { period: tx }, handle)
    }

    /// Change the period, measured from now.
    pub fn reset(&self, period: Duration) {
        self.period.send_replace(period);
    }

    pub fn period(&self) -> Duration {
        *self.period.borrow()
    }
}

async fn finish_cycle<Fut: Future<Output = ()>>(cycle: &mut Option<Pin<Box<Fut>>>) {
    if let Some(running) = cycle {
        running.await;
    }
}

fn ticker_from_now(period: Duration) -> Interval {
    let period = period.min(MAX_PERIOD);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Semaphore};
    use tokio::time::sleep;

    fn recording_scheduler(
        period: Duration,
        shutdown: CancellationToken,
    ) -> (Scheduler, JoinHandle<()>, mpsc::UnboundedReceiver<Instant>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (scheduler, handle) = Scheduler::spawn(period, shutdown, move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(Instant::now());
            }
        });
        (scheduler, handle, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_immediately_then_every_period() {
        let shutdown = CancellationToken::new();
        let (_scheduler, handle, mut ticks) =
            recording_scheduler(Duration::from_secs(10), shutdown.clone());

        let first = ticks.recv().await.unwrap();
        let second = ticks.recv().await.unwrap();
        let third = ticks.recv().await.unwrap();

        assert_eq!(second - first, Duration::from_secs(10));
        assert_eq!(third - second, Duration::from_secs(10));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reset_is_measured_from_the_reset_instant() {
        let shutdown = CancellationToken::new();
        let (scheduler, handle, mut ticks) =
            recording_scheduler(Duration::from_secs(10), shutdown.clone());

        ticks.recv().await.unwrap();
        sleep(Duration::from_secs(7)).await;

        let reset_at = Instant::now();
        scheduler.reset(Duration::from_secs(10));
        assert_eq!(scheduler.period(), Duration::from_secs(10));

        let next = ticks.recv().await.unwrap();
        assert!(next >= reset_at + Duration::from_secs(10));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shorter_period_takes_effect_from_reset() {
        let shutdown = CancellationToken::new();
        let (scheduler, handle, mut ticks) =
            recording_scheduler(Duration::from_secs(60), shutdown.clone());

        ticks.recv().await.unwrap();
        sleep(Duration::from_secs(5)).await;

        let reset_at = Instant::now();
        scheduler.reset(Duration::from_secs(2));

        let next = ticks.recv().await.unwrap();
        assert_eq!(next, reset_at + Duration::from_secs(2));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reset_during_a_slow_cycle_counts_from_the_reset() {
        let shutdown = CancellationToken::new();
        let gate = Arc::new(Semaphore::new(0));
        let (tx, mut ticks) = mpsc::unbounded_channel();

        let (scheduler, handle) = Scheduler::spawn(Duration::from_secs(60), shutdown.clone(), {
            let gate = gate.clone();
            move || {
                let gate = gate.clone();
                let tx = tx.clone();
                async move {
                    let _ = tx.send(Instant::now());
                    if let Ok(permit) = gate.acquire().await {
                        permit.forget();
                    }
                }
            }
        });

        let start = ticks.recv().await.unwrap();
        sleep(Duration::from_secs(5)).await;
        scheduler.reset(Duration::from_secs(10));

        // The first cycle is still blocked when the period changes.
        sleep(Duration::from_secs(3)).await;
        gate.add_permits(100);

        let next = ticks.recv().await.unwrap();
        assert_eq!(next - start, Duration::from_secs(15));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_period_is_clamped() {
        let shutdown = CancellationToken::new();
        let (scheduler, handle, mut ticks) =
            recording_scheduler(Duration::from_secs(10), shutdown.clone());

        ticks.recv().await.unwrap();
        scheduler.reset(Duration::from_secs(u64::MAX / 2));
        sleep(Duration::from_secs(1)).await;

        // The timer task survived and still honours later resets.
        assert!(!handle.is_finished());
        let reset_at = Instant::now();
        scheduler.reset(Duration::from_secs(2));
        assert_eq!(ticks.recv().await.unwrap(), reset_at + Duration::from_secs(2));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let (_scheduler, handle, mut ticks) =
            recording_scheduler(Duration::from_secs(1), shutdown.clone());

        ticks.recv().await.unwrap();
        shutdown.cancel();
        handle.await.unwrap();

        // Sender inside the task is gone once it exits.
        while ticks.recv().await.is_some() {}
    }
}
