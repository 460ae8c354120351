//! In-process quota store backed by a `tokio` mutex.
//!
//! The "in-memory actor" backing: suitable when all handlers share one
//! process, and the default store in tests. The mutex makes each delta
//! fold atomic; critical sections are a clone and a fold, nothing more.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::QuotaDefaults;
use crate::error::Result;

use super::{QuotaState, QuotaStore, QuotaUpdate};

/// Mutex-guarded [`QuotaState`] for single-process deployments.
#[derive(Debug)]
pub struct MemoryQuotaStore {
    state: Mutex<QuotaState>,
}

impl MemoryQuotaStore {
    /// Create a store seeded with full-quota defaults.
    pub fn new(defaults: &QuotaDefaults) -> Self {
        Self {
            state: Mutex::new(QuotaState::fresh(defaults)),
        }
    }

    /// Create a store starting from a specific state (tests, warm boots).
    pub fn with_state(state: QuotaState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn read(&self) -> Result<QuotaState> {
        Ok(self.state.lock().await.clone())
    }

    async fn update(&self, update: QuotaUpdate) -> Result<QuotaState> {
        let mut guard = self.state.lock().await;
        guard.fold(&update);
        Ok(guard.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CallOutcome;
    use std::sync::Arc;
    use std::time::Duration;

    fn store() -> MemoryQuotaStore {
        MemoryQuotaStore::new(&QuotaDefaults::default())
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
    async fn test_read_returns_defaults() {
        let store = store();
        let state = store.read().await.unwrap();
        assert_eq!(state, QuotaState::fresh(&QuotaDefaults::default()));
    }

    #[tokio::test]
    async fn test_update_returns_folded_state() {
        let store = store();
        let state = store.update(failure()).await.unwrap();
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(store.read().await.unwrap().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_lose_nothing() {
        // 32 tasks, 8 failures each: every increment must land.
        let store = Arc::new(store());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..8 {
                    store.update(failure()).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let state = store.read().await.unwrap();
        assert_eq!(state.consecutive_failures, 32 * 8);
    }
}
