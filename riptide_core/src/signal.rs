use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors that can occur while producing the plateau-signal file.
///
/// Only the writer side reports errors; the reader side is deliberately
/// infallible and degrades to "no signal" (see [`read_signal`]).
#[derive(Error, Debug)]
pub enum SignalError {
    /// An I/O error occurred while creating or writing the temporary file.
    /// Contains a string describing the underlying I/O error.
    #[error("Signal I/O error: {0}")]
    Io(String),

    /// The signal payload could not be encoded as JSON.
    #[error("Signal encoding error: {0}")]
    Encode(String),

    /// The atomic rename of the temporary file onto the destination failed.
    #[error("Signal replace error: {0}")]
    Replace(String),
}

impl From<std::io::Error> for SignalError {
    fn from(err: std::io::Error) -> Self {
        SignalError::Io(err.to_string())
    }
}
impl From<serde_json::Error> for SignalError {
    fn from(err: serde_json::Error) -> Self {
        SignalError::Encode(err.to_string())
    }
}
impl From<tempfile::PersistError> for SignalError {
    fn from(err: tempfile::PersistError) -> Self {
        SignalError::Replace(err.to_string())
    }
}

/// Payload of the plateau-signal file exchanged between the stagnation
/// sidecar (writer) and fuzzing processes (readers).
///
/// Extra keys in the file are ignored on read so the producer can attach
/// diagnostics without breaking older consumers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlateauSignal {
    pub plateau: bool,
}

/// Reads the plateau signal from `path`, treating every failure as "no signal".
///
/// A missing file, a torn write in progress, or malformed content all yield
/// `false`. The writer and readers are uncoordinated processes, so this
/// tolerance is the whole synchronization story: a stale or lost read is
/// simply retried on a later poll.
pub fn read_signal(path: &Path) -> bool {
    let Ok(bytes) = std::fs::read(path) else {
        return false;
    };
    match serde_json::from_slice::<PlateauSignal>(&bytes) {
        Ok(signal) => signal.plateau,
        Err(_) => false,
    }
}

/// Atomically replaces the signal file at `path` with `{"plateau": <value>}`.
///
/// The payload is written to a temporary file in the destination directory
/// and renamed into place, so readers observe either the previous complete
/// file or the new complete file, never a partial write.
pub fn write_signal(path: &Path, plateau: bool) -> Result<(), SignalError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, &PlateauSignal { plateau })?;
    tmp.persist(path)?;
    Ok(())
}

/// A throttled reader of the plateau-signal file.
///
/// The mutation hot path asks for the signal on every trial; re-reading the
/// file each time would put file I/O on that path for no benefit, since the
/// producer only rewrites it every few seconds. The poller caches the last
/// value and re-reads once `interval` has elapsed. An interval of zero
/// disables the cache entirely.
#[derive(Debug)]
pub struct PlateauPoller {
    path: PathBuf,
    interval: Duration,
    last_poll: Option<Instant>,
    cached: bool,
}

impl PlateauPoller {
    pub fn new(path: PathBuf, interval: Duration) -> Self {
        Self {
            path,
            interval,
            last_poll: None,
            cached: false,
        }
    }

    /// Returns the current signal value, re-reading the file if the poll
    /// interval has elapsed since the last read (or if no read happened yet).
    pub fn current(&mut self) -> bool {
        let now = Instant::now();
        let due = match self.last_poll {
            None => true,
            Some(at) => now.duration_since(at) >= self.interval,
        };
        if due {
            let fresh = read_signal(&self.path);
            if fresh != self.cached {
                log::debug!(
                    "Plateau signal at {:?} changed: {} -> {}",
                    self.path,
                    self.cached,
                    fresh
                );
            }
            self.cached = fresh;
            self.last_poll = Some(now);
        }
        self.cached
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn write_then_read_round_trips_both_values() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("plateau.json");

        write_signal(&path, true).expect("Writing signal=true should succeed");
        assert!(read_signal(&path), "A written true signal should read back true");

        write_signal(&path, false).expect("Writing signal=false should succeed");
        assert!(
            !read_signal(&path),
            "A written false signal should read back false"
        );
    }

    #[test]
    fn written_file_is_exactly_the_expected_json_object() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("plateau.json");

        write_signal(&path, true).expect("Writing signal should succeed");
        let content = std::fs::read_to_string(&path).expect("Signal file should exist");
        assert_eq!(
            content, r#"{"plateau":true}"#,
            "Signal file should contain the compact JSON payload"
        );
    }

    #[test]
    fn missing_file_reads_as_no_signal() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("does_not_exist.json");
        assert!(!read_signal(&path), "A missing file must read as false");
    }

    #[test]
    fn torn_or_malformed_content_reads_as_no_signal() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");

        let torn = dir.path().join("torn.json");
        let mut file = std::fs::File::create(&torn).expect("Failed to create torn file");
        file.write_all(b"{\"plat").expect("Failed to write torn content");
        assert!(!read_signal(&torn), "A torn write must read as false");

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, b"\xff\xfe not json at all")
            .expect("Failed to write garbage file");
        assert!(!read_signal(&garbage), "Garbage content must read as false");

        let wrong_shape = dir.path().join("wrong_shape.json");
        std::fs::write(&wrong_shape, b"[1,2,3]").expect("Failed to write wrong-shape file");
        assert!(
            !read_signal(&wrong_shape),
            "JSON of the wrong shape must read as false"
        );
    }

    #[test]
    fn extra_keys_from_a_newer_producer_are_tolerated() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("plateau.json");
        std::fs::write(&path, br#"{"plateau":true,"paths-seen":1445,"window-secs":180}"#)
            .expect("Failed to write signal file");
        assert!(
            read_signal(&path),
            "Extra diagnostic keys must not prevent reading the signal"
        );
    }

    #[test]
    fn poller_with_zero_interval_always_rereads() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("plateau.json");
        let mut poller = PlateauPoller::new(path.clone(), Duration::ZERO);

        assert!(!poller.current(), "No file yet, poller should report false");

        write_signal(&path, true).expect("Writing signal should succeed");
        assert!(poller.current(), "Zero interval should pick up the new value");

        write_signal(&path, false).expect("Writing signal should succeed");
        assert!(!poller.current(), "Zero interval should pick up the rollback");
    }

    #[test]
    fn poller_with_long_interval_serves_the_cached_value() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("plateau.json");
        write_signal(&path, true).expect("Writing signal should succeed");

        let mut poller = PlateauPoller::new(path.clone(), Duration::from_secs(3600));
        assert!(poller.current(), "First poll always reads the file");

        write_signal(&path, false).expect("Writing signal should succeed");
        assert!(
            poller.current(),
            "Within the interval the poller must serve the cached value"
        );
    }
}
