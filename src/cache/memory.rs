//! In-process cache backend.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::{CacheError, CacheStore};
use crate::BoxFuture;
use crate::http::Response;

/// A [`CacheStore`] that keeps every partition in memory.
///
/// # Examples
///
/// ```
/// use swproxy::cache::{CacheStore, MemoryStore};
/// use swproxy::http::{Response, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.put("files@1", "/index.html", Response::new(StatusCode::OK)).await.unwrap();
/// assert!(store.lookup("files@1", "/index.html").await.unwrap().is_some());
/// assert_eq!(store.keys().await.unwrap(), vec!["files@1".to_owned()]);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: RwLock<HashMap<String, HashMap<String, Response>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn lookup<'a>(
        &'a self,
        partition: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>> {
        Box::pin(async move {
            let partitions = self.partitions.read().await;
            Ok(partitions
                .get(partition)
                .and_then(|entries| entries.get(key))
                .cloned())
        })
    }

    fn put<'a>(
        &'a self,
        partition: &'a str,
        key: &'a str,
        response: Response,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let mut partitions = self.partitions.write().await;
            partitions
                .entry(partition.to_owned())
                .or_default()
                .insert(key.to_owned(), response);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, partition: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(async move { Ok(self.partitions.write().await.remove(partition).is_some()) })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        Box::pin(async move {
            let mut names: Vec<String> = self.partitions.read().await.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StatusCode;

    #[tokio::test]
    async fn partitions_are_isolated() {
        let store = MemoryStore::new();
        store
            .put("api@1", "/get_rights", Response::new(StatusCode::OK).body("v1"))
            .await
            .unwrap();

        assert!(store.lookup("api@2", "/get_rights").await.unwrap().is_none());
        assert!(store.lookup("files@1", "/get_rights").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let store = MemoryStore::new();
        store
            .put("api@1", "k", Response::new(StatusCode::OK).body("first"))
            .await
            .unwrap();
        store
            .put("api@1", "k", Response::new(StatusCode::OK).body("second"))
            .await
            .unwrap();

        let hit = store.lookup("api@1", "k").await.unwrap().unwrap();
        assert_eq!(hit.body_ref().as_ref(), b"second");
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = MemoryStore::new();
        store
            .put("files@1", "/", Response::new(StatusCode::OK))
            .await
            .unwrap();

        assert!(store.delete("files@1").await.unwrap());
        assert!(!store.delete("files@1").await.unwrap());
        assert!(store.keys().await.unwrap().is_empty());
    }
}
