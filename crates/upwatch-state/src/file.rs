//! A state database on disk that is opened per use.
//!
//! redb locks its file for as long as a `Database` is alive. The daemon
//! therefore reaches the store through a [`StoreFile`], which opens the
//! database for one unit of work and closes it again, so CLI commands can
//! read history or change the template while the monitor is running.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::store::StateStore;

/// How long [`StoreFile::open`] waits for another handle to let go.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(2);

const LOCK_RETRY: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct StoreFile {
    path: PathBuf,
    lock_wait: Duration,
}

impl StoreFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the database, retrying while another handle holds the lock.
    ///
    /// Fails with [`StateError::Locked`] once `lock_wait` has passed.
    pub fn open(&self) -> StateResult<StateStore> {
        let deadline = Instant::now() + self.lock_wait;
        loop {
            match StateStore::open(&self.path) {
                Err(StateError::Locked(_)) if Instant::now() < deadline => {
                    debug!(path = ?self.path, "state database busy, retrying");
                    std::thread::sleep(LOCK_RETRY);
                }
                result => return result,
            }
        }
    }

    /// Open the database, run `f` against it, and close it again.
    pub fn with_store<T>(&self, f: impl FnOnce(&StateStore) -> StateResult<T>) -> StateResult<T> {
        let store = self.open()?;
        f(&store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MonitoredTarget;

    fn target(id: &str) -> MonitoredTarget {
        MonitoredTarget {
            id: id.to_string(),
            name: id.to_uppercase(),
            public_url: format!("https://{id}.example.com"),
            check_url: None,
            min_downtime_seconds: None,
            online: true,
        }
    }

    #[test]
    fn lock_is_released_between_uses() {
        let dir = tempfile::tempdir().unwrap();
        let file = StoreFile::new(dir.path().join("state.redb"));

        file.with_store(|s| s.put_target(&target("api"))).unwrap();

        // Another handle can open the file once the unit of work is done.
        let other = StateStore::open(file.path()).unwrap();
        other.set_notification_template("!name: !status").unwrap();
        drop(other);

        let template = file.with_store(|s| s.notification_template()).unwrap();
        assert_eq!(template.as_deref(), Some("!name: !status"));
        assert_eq!(file.with_store(|s| s.list_targets()).unwrap().len(), 1);
    }

    #[test]
    fn gives_up_while_held_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");
        let held = StateStore::open(&path).unwrap();

        let file = StoreFile::new(&path).with_lock_wait(Duration::from_millis(60));
        let err = file.open().err().unwrap();
        assert!(matches!(err, StateError::Locked(_)));

        drop(held);
        assert!(file.open().is_ok());
    }

    #[test]
    fn waits_for_a_short_lived_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");
        let held = StateStore::open(&path).unwrap();

        let release = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            drop(held);
        });

        let file = StoreFile::new(&path);
        assert!(file.open().is_ok());
        release.join().unwrap();
    }
}
