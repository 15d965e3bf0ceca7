//! Persistent cache backend on the local filesystem.
//!
//! Layout:
//!
//! ```text
//! <root>/
//!   files@1700000000/
//!     <sha256(key)>.entry
//!   api@1700000000/
//!     ...
//! ```
//!
//! An entry file is a big-endian `u32` metadata length, the JSON metadata
//! (status, headers, original key, body length), then the raw body. Each
//! entry is written to a temp file and renamed into place in one step, so a
//! reader sees one writer's complete entry or none at all.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{CacheError, CacheStore};
use crate::BoxFuture;
use crate::http::{Headers, Response, StatusCode};

const META_LEN_PREFIX: usize = 4;

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    status: u16,
    headers: Headers,
    body_len: usize,
}

fn corrupt(path: &Path, reason: impl Into<String>) -> CacheError {
    CacheError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn encode_entry(path: &Path, meta: &EntryMeta, body: &Bytes) -> Result<BytesMut, CacheError> {
    let meta = serde_json::to_vec(meta)?;
    let meta_len = u32::try_from(meta.len())
        .map_err(|_| corrupt(path, format!("metadata too large ({} bytes)", meta.len())))?;

    let mut buf = BytesMut::with_capacity(META_LEN_PREFIX + meta.len() + body.len());
    buf.put_u32(meta_len);
    buf.put_slice(&meta);
    buf.put_slice(body);
    Ok(buf)
}

fn decode_entry(path: &Path, raw: Vec<u8>) -> Result<(EntryMeta, Bytes), CacheError> {
    let mut raw = Bytes::from(raw);
    if raw.len() < META_LEN_PREFIX {
        return Err(corrupt(path, "truncated length prefix"));
    }
    let meta_len = raw.get_u32() as usize;
    if raw.len() < meta_len {
        return Err(corrupt(
            path,
            format!("expected {meta_len} metadata bytes, found {}", raw.len()),
        ));
    }

    let meta: EntryMeta = serde_json::from_slice(&raw.split_to(meta_len))
        .map_err(|e| corrupt(path, e.to_string()))?;
    if raw.len() != meta.body_len {
        return Err(corrupt(
            path,
            format!("expected {} body bytes, found {}", meta.body_len, raw.len()),
        ));
    }
    Ok((meta, raw))
}

/// A [`CacheStore`] that keeps one directory per partition under `root`.
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    tmp_seq: AtomicU64,
}

impl DiskStore {
    /// Opens (creating if necessary) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| CacheError::Io {
                path: root.clone(),
                source,
            })?;
        Ok(Self {
            root,
            tmp_seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, partition: &str) -> Result<PathBuf, CacheError> {
        let valid = !partition.is_empty()
            && partition != "."
            && partition != ".."
            && !partition.contains(['/', '\\']);
        if !valid {
            return Err(CacheError::InvalidPartition {
                name: partition.to_owned(),
            });
        }
        Ok(self.root.join(partition))
    }

    fn entry_path(dir: &Path, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        dir.join(format!("{digest}.entry"))
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), CacheError> {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp{seq}"));

        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|source| CacheError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|source| CacheError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, CacheError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CacheError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl CacheStore for DiskStore {
    fn lookup<'a>(
        &'a self,
        partition: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>> {
        Box::pin(async move {
            let dir = self.partition_dir(partition)?;
            let path = Self::entry_path(&dir, key);

            let Some(raw) = read_optional(&path).await? else {
                return Ok(None);
            };
            let (meta, body) = decode_entry(&path, raw)?;

            if meta.key != key {
                debug!(partition, key, stored = %meta.key, "digest collision, treating as miss");
                return Ok(None);
            }

            Ok(Some(Response::from_parts(
                StatusCode::from_u16(meta.status),
                meta.headers,
                body,
            )))
        })
    }

    fn put<'a>(
        &'a self,
        partition: &'a str,
        key: &'a str,
        response: Response,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let dir = self.partition_dir(partition)?;
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| CacheError::Io {
                    path: dir.clone(),
                    source,
                })?;

            let path = Self::entry_path(&dir, key);
            let meta = EntryMeta {
                key: key.to_owned(),
                status: response.status().as_u16(),
                headers: response.headers().clone(),
                body_len: response.body_ref().len(),
            };
            let entry = encode_entry(&path, &meta, response.body_ref())?;
            self.write_atomic(&path, &entry).await
        })
    }

    fn delete<'a>(&'a self, partition: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(async move {
            let dir = self.partition_dir(partition)?;
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(source) => Err(CacheError::Io { path: dir, source }),
            }
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        Box::pin(async move {
            let io_err = |source: std::io::Error| CacheError::Io {
                path: self.root.clone(),
                source,
            };
            let mut entries = tokio::fs::read_dir(&self.root).await.map_err(io_err)?;
            let mut names = Vec::new();
            while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
                let is_dir = entry.file_type().await.map_err(io_err)?.is_dir();
                if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                    names.push(name.to_owned());
                }
            }
            names.sort();
            Ok(names)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn sample() -> Response {
        Response::new(StatusCode::OK)
            .header("Content-Type", "application/json")
            .header("Set-Cookie", "a=1")
            .header("Set-Cookie", "b=2")
            .body(r#"{"@":"d:a"}"#)
    }

    #[tokio::test]
    async fn entry_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DiskStore::open(dir.path()).await.unwrap();
            store.put("api@1", "/get_individual?uri=d:a", sample()).await.unwrap();
        }

        let store = DiskStore::open(dir.path()).await.unwrap();
        let hit = store
            .lookup("api@1", "/get_individual?uri=d:a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.status(), StatusCode::OK);
        assert_eq!(hit.body_ref().as_ref(), br#"{"@":"d:a"}"#);
        let cookies: Vec<_> = hit.headers().get_all("set-cookie").collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[tokio::test]
    async fn empty_body_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        store
            .put("files@1", "/", Response::new(StatusCode::NO_CONTENT))
            .await
            .unwrap();

        let hit = store.lookup("files@1", "/").await.unwrap().unwrap();
        assert_eq!(hit.status(), StatusCode::NO_CONTENT);
        assert!(hit.body_ref().is_empty());
    }

    #[tokio::test]
    async fn miss_on_absent_partition() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        assert!(store.lookup("files@1", "/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keys_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        store.put("files@1", "/", sample()).await.unwrap();
        store.put("api@1", "/get_rights", sample()).await.unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["api@1", "files@1"]);
        assert!(store.delete("files@1").await.unwrap());
        assert!(!store.delete("files@1").await.unwrap());
        assert_eq!(store.keys().await.unwrap(), vec!["api@1"]);
    }

    #[tokio::test]
    async fn truncated_entry_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        store.put("api@1", "k", sample()).await.unwrap();

        let path = DiskStore::entry_path(&dir.path().join("api@1"), "k");
        let full = std::fs::read(&path).unwrap();
        std::fs::write(&path, &full[..full.len() - 1]).unwrap();

        assert!(matches!(
            store.lookup("api@1", "k").await,
            Err(CacheError::Corrupt { .. })
        ));

        std::fs::write(&path, &full[..2]).unwrap();
        assert!(matches!(
            store.lookup("api@1", "k").await,
            Err(CacheError::Corrupt { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_puts_never_mix_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DiskStore::open(dir.path()).await.unwrap());

        for round in 0..100 {
            let writers: Vec<_> = ["a", "b", "c", "d"]
                .into_iter()
                .map(|tag| {
                    let store = Arc::clone(&store);
                    tokio::spawn(async move {
                        let response = Response::new(StatusCode::OK)
                            .header("X-V", tag)
                            .body(tag.repeat(4));
                        store.put("api@1", "k", response).await.unwrap();
                    })
                })
                .collect();
            for writer in writers {
                writer.await.unwrap();
            }

            let hit = store.lookup("api@1", "k").await.unwrap().unwrap();
            let tag = hit.headers().get("x-v").unwrap();
            assert_eq!(
                hit.body_ref().as_ref(),
                tag.repeat(4).as_bytes(),
                "round {round}: header X-V={tag} does not match body"
            );
        }
    }

    #[tokio::test]
    async fn rejects_path_like_partition_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        for bad in ["..", "a/b", ""] {
            assert!(matches!(
                store.put(bad, "k", sample()).await,
                Err(CacheError::InvalidPartition { .. })
            ));
        }
    }
}
