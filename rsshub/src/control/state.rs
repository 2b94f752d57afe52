use crate::types::Result;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_STATE_PATH: &str = "/tmp/rsshub_state.json";

/// The cross-process coordination record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorState {
    pub running: bool,
    #[serde(with = "interval_millis")]
    pub interval: Duration,
    pub worker_count: usize,
    pub pid: u32,
}

mod interval_millis {
    use serde::{ser::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis())
            .map_err(|_| S::Error::custom(format!("interval {value:?} does not fit in milliseconds")))?;
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// State file at a well-known path.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record. A missing file means "not running", and so does a
    /// record whose process has since died.
    pub fn load(&self) -> Result<AggregatorState> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(AggregatorState::default()),
            Err(e) => return Err(e.into()),
        };

        let state: AggregatorState = serde_json::from_slice(&data)?;
        if state.running && !is_process_alive(state.pid) {
            debug!("Ignoring stale state file left by pid {}", state.pid);
            return Ok(AggregatorState::default());
        }
        Ok(state)
    }

    /// Overwrite the record. Readers never observe a partial write.
    pub fn save(&self, state: &AggregatorState) -> Result<()> {
        let data = serde_json::to_vec(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Non-destructive liveness check (`kill(pid, 0)`). A process we may not
/// signal still exists.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // 0 and negatives address process groups, not a process.
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 performs only the existence and permission checks.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AggregatorError;
    use uuid::Uuid;

    fn temp_store() -> StateStore {
        StateStore::new(std::env::temp_dir().join(format!("rsshub-state-{}.json", Uuid::new_v4())))
    }

    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn missing_file_means_not_running() {
        let store = temp_store();
        assert_eq!(store.load().unwrap(), AggregatorState::default());
    }

    #[test]
    fn round_trips_a_live_record() {
        let store = temp_store();
        let state = AggregatorState {
            running: true,
            interval: Duration::from_secs(90),
            worker_count: 4,
            pid: std::process::id(),
        };

        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);

        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
    }

    #[test]
    fn stale_record_self_heals() {
        let store = temp_store();
        store
            .save(&AggregatorState {
                running: true,
                interval: Duration::from_secs(60),
                worker_count: 2,
                pid: dead_pid(),
            })
            .unwrap();

        assert!(!store.load().unwrap().running);
        store.clear().unwrap();
    }

    #[test]
    fn interval_is_stored_in_milliseconds() {
        let json = serde_json::to_value(AggregatorState {
            running: false,
            interval: Duration::from_millis(2500),
            worker_count: 1,
            pid: 7,
        })
        .unwrap();
        assert_eq!(json["interval"], 2500);
        assert_eq!(json["worker_count"], 1);
    }

    #[test]
    fn unrepresentable_interval_is_not_saved() {
        let store = temp_store();
        let result = store.save(&AggregatorState {
            running: true,
            interval: Duration::from_millis(u64::MAX) + Duration::from_millis(1001),
            worker_count: 1,
            pid: std::process::id(),
        });

        assert!(matches!(result, Err(AggregatorError::Serialization(_))));
        assert!(!store.path().exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let store = temp_store();
        std::fs::write(store.path(), b"{not json").unwrap();
        assert!(matches!(store.load(), Err(AggregatorError::Serialization(_))));
        store.clear().unwrap();
    }

    #[test]
    fn liveness_check() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(dead_pid()));
        assert!(!is_process_alive(u32::MAX));
    }
}
