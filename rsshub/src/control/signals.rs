use super::state::AggregatorState;
use crate::types::{AggregatorError, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::debug;

/// Notification a separate invocation can deliver to the running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// SIGTERM: graceful stop.
    Terminate,
    /// SIGUSR1: re-read the interval from the state file.
    ReloadInterval,
    /// SIGUSR2: re-read the worker count from the state file.
    ReloadWorkers,
}

impl ControlSignal {
    pub fn signo(self) -> libc::c_int {
        match self {
            ControlSignal::Terminate => libc::SIGTERM,
            ControlSignal::ReloadInterval => libc::SIGUSR1,
            ControlSignal::ReloadWorkers => libc::SIGUSR2,
        }
    }
}

/// What the running instance's control loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Terminate,
    ReloadInterval,
    ReloadWorkers,
}

/// Deliver `signal` to the process recorded in `state`.
pub fn signal_process(state: &AggregatorState, signal: ControlSignal) -> Result<()> {
    if !state.running {
        return Err(AggregatorError::NotRunning);
    }

    let pid = libc::pid_t::try_from(state.pid)
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| AggregatorError::Signal {
            pid: state.pid,
            source: std::io::Error::from_raw_os_error(libc::ESRCH),
        })?;

    // SAFETY: plain kill(2) on a positive pid with a valid signal number.
    if unsafe { libc::kill(pid, signal.signo()) } != 0 {
        return Err(AggregatorError::Signal {
            pid: state.pid,
            source: std::io::Error::last_os_error(),
        });
    }

    debug!("Sent {:?} to pid {}", signal, state.pid);
    Ok(())
}

/// Install handlers for SIGTERM, SIGINT, SIGUSR1 and SIGUSR2 and forward them
/// as [`ControlEvent`]s. Once installed, these signals no longer kill the
/// process.
pub fn listen_for_signals() -> Result<mpsc::Receiver<ControlEvent>> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut reload_interval = signal(SignalKind::user_defined1())?;
    let mut reload_workers = signal(SignalKind::user_defined2())?;

    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = terminate.recv() => ControlEvent::Terminate,
                _ = interrupt.recv() => ControlEvent::Terminate,
                _ = reload_interval.recv() => ControlEvent::ReloadInterval,
                _ = reload_workers.recv() => ControlEvent::ReloadWorkers,
            };
            debug!("Received control signal: {:?}", event);
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}
