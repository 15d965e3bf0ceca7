//! Test doubles: a call-counting cache store and a scripted upstream.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;

use crate::BoxFuture;
use crate::cache::{CacheError, CacheStore, MemoryStore};
use crate::http::{Request, Response, StatusCode};
use crate::upstream::{FetchError, Upstream};

/// A [`MemoryStore`] that records every call made to it.
///
/// `put` can be held back with [`SpyStore::blocking_puts`] to prove that the
/// caller did not wait for it.
#[derive(Default)]
pub struct SpyStore {
    inner: MemoryStore,
    pub lookups: Mutex<Vec<(String, String)>>,
    pub puts: Mutex<Vec<(String, String)>>,
    pub deletes: Mutex<Vec<String>>,
    pub key_listings: AtomicUsize,
    put_gate: Option<Semaphore>,
    fail_lookups: bool,
}

impl SpyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `put` calls wait until [`release_puts`](Self::release_puts).
    pub fn blocking_puts() -> Self {
        Self {
            put_gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// A store whose every lookup fails as if the entry were corrupt.
    pub fn failing_lookups() -> Self {
        Self {
            fail_lookups: true,
            ..Self::default()
        }
    }

    pub fn release_puts(&self) {
        if let Some(gate) = &self.put_gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Seeds an entry without recording a call.
    pub async fn seed(&self, partition: &str, key: &str, response: Response) {
        self.inner.put(partition, key, response).await.unwrap();
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.lock().unwrap().len()
    }

    pub fn put_keys(&self) -> Vec<(String, String)> {
        self.puts.lock().unwrap().clone()
    }

    /// Total number of calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.lookup_count()
            + self.puts.lock().unwrap().len()
            + self.deletes.lock().unwrap().len()
            + self.key_listings.load(Ordering::SeqCst)
    }
}

impl CacheStore for SpyStore {
    fn lookup<'a>(
        &'a self,
        partition: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>> {
        self.lookups
            .lock()
            .unwrap()
            .push((partition.to_owned(), key.to_owned()));
        if self.fail_lookups {
            return Box::pin(async move {
                Err(CacheError::Corrupt {
                    path: PathBuf::from(partition).join(key),
                    reason: "unreadable entry".to_owned(),
                })
            });
        }
        self.inner.lookup(partition, key)
    }

    fn put<'a>(
        &'a self,
        partition: &'a str,
        key: &'a str,
        response: Response,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        self.puts
            .lock()
            .unwrap()
            .push((partition.to_owned(), key.to_owned()));
        Box::pin(async move {
            if let Some(gate) = &self.put_gate {
                let _permit = gate.acquire().await.unwrap();
            }
            self.inner.put(partition, key, response).await
        })
    }

    fn delete<'a>(&'a self, partition: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        self.deletes.lock().unwrap().push(partition.to_owned());
        self.inner.delete(partition)
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        self.key_listings.fetch_add(1, Ordering::SeqCst);
        self.inner.keys()
    }
}

/// What the scripted upstream does for a target.
#[derive(Clone)]
pub enum Scripted {
    Respond(Response),
    Fail,
}

/// An [`Upstream`] that answers from a table keyed by `METHOD target`.
///
/// Unscripted requests fail with a network error. Every call is recorded.
#[derive(Default)]
pub struct ScriptedUpstream {
    script: Mutex<HashMap<String, Scripted>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: &str, target: &str, response: Response) {
        self.script
            .lock()
            .unwrap()
            .insert(format!("{method} {target}"), Scripted::Respond(response));
    }

    pub fn ok(&self, target: &str, body: &str) {
        self.respond("GET", target, Response::new(StatusCode::OK).body(body));
    }

    pub fn status(&self, target: &str, status: StatusCode) {
        self.respond("GET", target, Response::new(status));
    }

    pub fn fail(&self, target: &str) {
        self.script
            .lock()
            .unwrap()
            .insert(format!("GET {target}"), Scripted::Fail);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Upstream for ScriptedUpstream {
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
        let id = format!("{} {}", request.method(), request.target());
        self.calls.lock().unwrap().push(id.clone());
        let outcome = self.script.lock().unwrap().get(&id).cloned();
        Box::pin(async move {
            match outcome {
                Some(Scripted::Respond(response)) => Ok(response),
                Some(Scripted::Fail) => Err(FetchError::network(request.target(), "offline")),
                None => Err(FetchError::network(request.target(), "not scripted")),
            }
        })
    }
}

/// Body of a response as UTF-8, for assertions.
pub fn body_text(response: &Response) -> String {
    String::from_utf8(response.body_ref().to_vec()).unwrap()
}
