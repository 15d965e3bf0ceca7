//! Versioned cache partitions backed by a pluggable blob store.
//!
//! A [`CacheStore`] holds named partitions, each a key-value map from a cache
//! key to a stored [`Response`]. The proxy only ever talks to two of them,
//! `files@<version>` and `api@<version>` (see [`PartitionName`]), through a
//! [`Partition`] handle.
//!
//! Backends:
//!
//! - [`MemoryStore`]: process-local, lost on restart.
//! - [`DiskStore`]: one directory per partition, survives restarts so the
//!   proxy can serve offline right after boot.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::BoxFuture;
use crate::http::Response;

pub mod disk;
pub mod key;
pub mod memory;
pub mod partition;

pub use disk::DiskStore;
pub use memory::MemoryStore;
pub use partition::{PartitionKind, PartitionName, Whitelist};

/// Errors produced by cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt cache entry at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("invalid partition name: {name:?}")]
    InvalidPartition { name: String },
}

/// A named, partitioned key-value blob store.
///
/// Partitions are created lazily by the first [`put`](Self::put). Writes are
/// last-writer-wins with no cross-key transactions.
pub trait CacheStore: Send + Sync {
    /// Returns the response stored under `key` in `partition`, if any.
    fn lookup<'a>(
        &'a self,
        partition: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>>;

    /// Stores `response` under `key` in `partition`, replacing any previous entry.
    fn put<'a>(
        &'a self,
        partition: &'a str,
        key: &'a str,
        response: Response,
    ) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Deletes a whole partition. Returns `false` if it did not exist.
    fn delete<'a>(&'a self, partition: &'a str) -> BoxFuture<'a, Result<bool, CacheError>>;

    /// Lists the names of all existing partitions.
    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>>;
}

/// A handle to one partition of a shared store.
///
/// Opening a handle is free; the partition itself only comes into existence
/// when something is written to it.
#[derive(Clone)]
pub struct Partition {
    store: Arc<dyn CacheStore>,
    name: String,
}

impl Partition {
    pub fn open(store: Arc<dyn CacheStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn lookup(&self, key: &str) -> Result<Option<Response>, CacheError> {
        self.store.lookup(&self.name, key).await
    }

    pub async fn put(&self, key: &str, response: Response) -> Result<(), CacheError> {
        self.store.put(&self.name, key, response).await
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition").field("name", &self.name).finish()
    }
}
