//! File-backed quota store with lock-file mutual exclusion.
//!
//! State lives in a pretty-printed JSON file (default
//! `~/.quotagate/state.json`). Writers serialize through a sibling `.lock`
//! file created with `create_new`; the create-or-fail semantics give
//! cross-process mutual exclusion without platform-specific locking.
//! Acquisition is bounded: a writer that cannot get the lock within the
//! timeout fails with a `Store` error instead of blocking forever. A lock
//! left behind by a crashed writer is reclaimed once its mtime exceeds
//! the staleness bound, so a crash does not wedge later writers.
//!
//! Reads are lock-free; the state file is replaced atomically (write to a
//! temp file, then rename), so a reader sees either the old or the new
//! state, never a torn one. Slightly stale reads are acceptable by design.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::QuotaDefaults;
use crate::error::{GateError, Result};

use super::{QuotaState, QuotaStore, QuotaUpdate};

/// How long a writer keeps retrying the lock before giving up.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause between lock acquisition attempts.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Age past which a lock file is presumed abandoned by a crashed writer.
/// A healthy critical section is a read, a fold and a write, well under
/// the lock timeout.
const DEFAULT_LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

/// JSON-file [`QuotaStore`] shared by concurrent processes.
#[derive(Debug)]
pub struct FileQuotaStore {
    path: PathBuf,
    lock_path: PathBuf,
    defaults: QuotaDefaults,
    lock_timeout: Duration,
    lock_stale_after: Duration,
}

impl FileQuotaStore {
    /// Store rooted at an explicit state-file path.
    pub fn new(path: impl Into<PathBuf>, defaults: QuotaDefaults) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            defaults,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_stale_after: DEFAULT_LOCK_STALE_AFTER,
        }
    }

    /// Store at the canonical location, `~/.quotagate/state.json`.
    pub fn at_default_location(defaults: QuotaDefaults) -> Self {
        let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join(".quotagate").join("state.json"), defaults)
    }

    /// Override the bounded lock-acquisition timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Override the age at which an existing lock file is reclaimed.
    pub fn with_lock_stale_after(mut self, stale_after: Duration) -> Self {
        self.lock_stale_after = stale_after;
        self
    }

    /// Load state from disk; fresh defaults when absent or corrupt.
    fn load(&self) -> QuotaState {
        match std::fs::read_to_string(&self.path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %self.path.display(), "quota state file is corrupt, starting fresh: {e}");
                    QuotaState::fresh(&self.defaults)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                QuotaState::fresh(&self.defaults)
            }
            Err(e) => {
                warn!(path = %self.path.display(), "failed to read quota state, starting fresh: {e}");
                QuotaState::fresh(&self.defaults)
            }
        }
    }

    /// Persist state atomically: temp file in the same directory, then
    /// rename over the live file.
    fn save(&self, state: &QuotaState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GateError::Store(format!("create {}: {e}", parent.display())))?;
        }
        let data = serde_json::to_string_pretty(state)
            .map_err(|e| GateError::Store(format!("serialize quota state: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data)
            .map_err(|e| GateError::Store(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| GateError::Store(format!("replace {}: {e}", self.path.display())))?;
        Ok(())
    }

    /// Acquire the lock file, retrying until the bounded timeout.
    async fn acquire_lock(&self) -> Result<LockGuard> {
        let deadline = tokio::time::Instant::now() + self.lock_timeout;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(_) => return Ok(LockGuard::new(&self.lock_path)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.lock_is_stale() {
                        warn!(
                            path = %self.lock_path.display(),
                            "reclaiming stale quota lock left by a crashed writer"
                        );
                        // Losing the removal race to the holder is fine;
                        // the next iteration recreates or re-contends.
                        let _ = std::fs::remove_file(&self.lock_path);
                        continue;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(GateError::Store(format!(
                            "timed out waiting for quota lock {}",
                            self.lock_path.display()
                        )));
                    }
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Parent directory does not exist yet.
                    if let Some(parent) = self.lock_path.parent() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            GateError::Store(format!("create {}: {e}", parent.display()))
                        })?;
                    }
                }
                Err(e) => {
                    return Err(GateError::Store(format!(
                        "acquire quota lock {}: {e}",
                        self.lock_path.display()
                    )))
                }
            }
        }
    }

    /// Whether the current lock file is older than the staleness bound.
    /// Unreadable metadata (racing removal, clock skew) reads as fresh.
    fn lock_is_stale(&self) -> bool {
        std::fs::metadata(&self.lock_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| mtime.elapsed().ok())
            .is_some_and(|age| age >= self.lock_stale_after)
    }
}

#[async_trait]
impl QuotaStore for FileQuotaStore {
    async fn read(&self) -> Result<QuotaState> {
        Ok(self.load())
    }

    async fn update(&self, update: QuotaUpdate) -> Result<QuotaState> {
        let _lock = self.acquire_lock().await?;
        let mut state = self.load();
        state.fold(&update);
        self.save(&state)?;
        Ok(state)
    }
}

/// Removes the lock file when the update finishes (or unwinds).
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "failed to release quota lock: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CallOutcome;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store_in(tmp: &TempDir) -> FileQuotaStore {
        FileQuotaStore::new(tmp.path().join("state.json"), QuotaDefaults::default())
    }

    fn failure() -> QuotaUpdate {
        QuotaUpdate::Outcome(CallOutcome {
            success: false,
            snapshot: None,
            latency: Some(Duration::from_millis(100)),
            circuit: None,
        })
    }

    #[tokio::test]
    async fn test_read_absent_file_returns_defaults() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let state = store.read().await.unwrap();
        assert_eq!(state, QuotaState::fresh(&QuotaDefaults::default()));
    }

    #[tokio::test]
    async fn test_update_persists_across_instances() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");

        let first = FileQuotaStore::new(&path, QuotaDefaults::default());
        first.update(failure()).await.unwrap();
        drop(first);

        let second = FileQuotaStore::new(&path, QuotaDefaults::default());
        let state = second.read().await.unwrap();
        assert_eq!(state.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileQuotaStore::new(&path, QuotaDefaults::default());
        let state = store.read().await.unwrap();
        assert_eq!(state, QuotaState::fresh(&QuotaDefaults::default()));

        // And the store recovers: the next update rewrites a valid file.
        let state = store.update(failure()).await.unwrap();
        assert_eq!(state.consecutive_failures, 1);
        let reread: QuotaState =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reread, state);
    }

    #[tokio::test]
    async fn test_lock_released_after_update() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        store.update(failure()).await.unwrap();
        assert!(
            !tmp.path().join("state.lock").exists(),
            "lock file must be removed after the update"
        );
    }

    #[tokio::test]
    async fn test_held_lock_times_out() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp).with_lock_timeout(Duration::from_millis(50));
        // Simulate another writer holding the lock.
        std::fs::write(tmp.path().join("state.lock"), b"").unwrap();

        let result = store.update(failure()).await;
        assert!(
            matches!(result, Err(GateError::Store(_))),
            "expected bounded lock timeout, got {result:?}"
        );
    }

    #[tokio::test]
    async fn test_stale_lock_is_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp)
            .with_lock_timeout(Duration::from_millis(200))
            .with_lock_stale_after(Duration::from_millis(20));
        // A lock left behind by a writer that never came back.
        std::fs::write(tmp.path().join("state.lock"), b"").unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let state = store.update(failure()).await.unwrap();
        assert_eq!(state.consecutive_failures, 1, "update proceeded past the dead lock");
        assert!(
            !tmp.path().join("state.lock").exists(),
            "reclaimed lock released after the update"
        );
    }

    #[tokio::test]
    async fn test_concurrent_writers_lose_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = Arc::new(
                FileQuotaStore::new(&path, QuotaDefaults::default())
                    .with_lock_timeout(Duration::from_secs(10)),
            );
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    store.update(failure()).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let store = FileQuotaStore::new(&path, QuotaDefaults::default());
        assert_eq!(store.read().await.unwrap().consecutive_failures, 20);
    }
}
