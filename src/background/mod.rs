//! Fire-and-forget cache writes.
//!
//! The proxy never waits for a cache refill before answering. Each refill
//! runs as its own Tokio task; failures are logged at `warn` and swallowed so
//! they can never reach the response path. Outstanding tasks are tracked so a
//! shutdown (or a test) can [`drain`](BackgroundWrites::drain) them.

use std::sync::{Mutex, PoisonError};

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::Partition;
use crate::http::Response;

/// Tracker for in-flight background cache writes.
#[derive(Debug)]
pub struct BackgroundWrites {
    tasks: Mutex<JoinSet<()>>,
}

impl Default for BackgroundWrites {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundWrites {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Stores `response` under `key` in `partition` without blocking the caller.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn store(&self, partition: Partition, key: String, response: Response) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        // Reap whatever already finished so the set does not grow unbounded.
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            match partition.put(&key, response).await {
                Ok(()) => debug!(partition = partition.name(), key = %key, "cache refilled"),
                Err(e) => warn!(
                    partition = partition.name(),
                    key = %key,
                    error = %e,
                    "background cache write failed"
                ),
            }
        });
    }

    /// Number of writes spawned and not yet reaped.
    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Waits for every write spawned so far to finish.
    pub async fn drain(&self) {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, JoinSet::new())
        };

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "background cache write task did not complete");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::{CacheStore, MemoryStore};
    use crate::http::StatusCode;

    #[tokio::test]
    async fn drained_writes_are_visible() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let partition = Partition::open(Arc::clone(&store), "api@1");
        let writes = BackgroundWrites::new();

        writes.store(
            partition.clone(),
            "/get_rights".to_owned(),
            Response::new(StatusCode::OK).body("rights"),
        );
        writes.drain().await;

        assert_eq!(writes.pending(), 0);
        assert!(partition.lookup("/get_rights").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_write_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CacheStore> =
            Arc::new(crate::cache::DiskStore::open(dir.path()).await.unwrap());
        let writes = BackgroundWrites::new();

        writes.store(
            Partition::open(store, "../escape"),
            "k".to_owned(),
            Response::new(StatusCode::OK),
        );
        writes.drain().await;
    }
}
