//! Cross-process control: a state file at a well-known path plus POSIX
//! signals, letting a separate invocation reconfigure or stop the running
//! aggregator.

mod signals;
mod state;

pub use signals::{listen_for_signals, signal_process, ControlEvent, ControlSignal};
pub use state::{is_process_alive, AggregatorState, StateStore, DEFAULT_STATE_PATH};

use crate::aggregator::{validate_interval, validate_worker_count, RssAggregator};
use crate::types::{AggregatorError, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Run the control loop of the running instance until it is told to stop.
///
/// Reload events apply only the field they concern. Errors while reloading are
/// logged and the loop keeps going.
pub async fn serve(
    aggregator: RssAggregator,
    store: StateStore,
    mut events: mpsc::Receiver<ControlEvent>,
) -> Result<()> {
    loop {
        match events.recv().await {
            Some(ControlEvent::ReloadInterval) => {
                if let Err(e) = reload_interval(&aggregator, &store).await {
                    error!("Failed to reload interval: {}", e);
                }
            }
            Some(ControlEvent::ReloadWorkers) => {
                if let Err(e) = reload_workers(&aggregator, &store).await {
                    error!("Failed to reload worker count: {}", e);
                }
            }
            Some(ControlEvent::Terminate) => {
                info!("Termination requested, shutting down");
                break;
            }
            None => {
                warn!("Control event channel closed, shutting down");
                break;
            }
        }
    }

    aggregator.stop().await?;
    store.clear()?;
    Ok(())
}

async fn reload_interval(aggregator: &RssAggregator, store: &StateStore) -> Result<()> {
    let state = store.load()?;
    aggregator.set_interval(state.interval).await?;
    info!(interval = ?state.interval, "Interval reloaded");
    Ok(())
}

async fn reload_workers(aggregator: &RssAggregator, store: &StateStore) -> Result<()> {
    let state = store.load()?;
    aggregator.resize(state.worker_count).await?;
    info!(workers = state.worker_count, "Worker count reloaded");
    Ok(())
}

/// Refuse to start a second instance while a live one is recorded.
pub fn ensure_not_running(store: &StateStore) -> Result<()> {
    let state = store.load()?;
    if state.running {
        return Err(AggregatorError::AlreadyRunning { pid: state.pid });
    }
    Ok(())
}

/// Persist a new interval for the running instance and tell it to reload.
pub fn request_interval(store: &StateStore, interval: Duration) -> Result<AggregatorState> {
    validate_interval(interval)?;
    update_and_signal(store, ControlSignal::ReloadInterval, |state| {
        state.interval = interval;
    })
}

/// Persist a new worker count for the running instance and tell it to reload.
pub fn request_workers(store: &StateStore, workers: usize) -> Result<AggregatorState> {
    validate_worker_count(workers)?;
    update_and_signal(store, ControlSignal::ReloadWorkers, |state| {
        state.worker_count = workers;
    })
}

/// Ask the running instance to shut down gracefully.
pub fn request_stop(store: &StateStore) -> Result<AggregatorState> {
    let state = store.load()?;
    signal_process(&state, ControlSignal::Terminate)?;
    Ok(state)
}

fn update_and_signal(
    store: &StateStore,
    signal: ControlSignal,
    update: impl FnOnce(&mut AggregatorState),
) -> Result<AggregatorState> {
    let mut state = store.load()?;
    if !state.running {
        return Err(AggregatorError::NotRunning);
    }

    update(&mut state);
    store.save(&state)?;
    signal_process(&state, signal)?;
    Ok(state)
}
