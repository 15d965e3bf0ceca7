//! The offline cache proxy.
//!
//! [`OfflineProxy`] mirrors a service worker's lifecycle:
//!
//! 1. [`install`](OfflineProxy::install) pre-populates `files@<version>` with
//!    the asset manifest. Any missing asset fails the install.
//! 2. [`activate`](OfflineProxy::activate) starts intercepting requests and,
//!    concurrently, deletes every partition from older versions.
//! 3. [`fetch`](OfflineProxy::fetch) answers each request according to its
//!    [`Route`].
//!
//! Until activation the proxy is transparent: every request goes straight to
//! the network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::background::BackgroundWrites;
use crate::cache::{CacheError, CacheStore, Partition, PartitionName, Whitelist, key};
use crate::http::{Request, Response, StatusCode};
use crate::route::{ApiPolicy, Route, RouteTable};
use crate::upstream::{FetchError, Upstream};

mod policy;

use policy::Strategy;

/// Errors that abort [`OfflineProxy::install`].
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to fetch {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: FetchError,
    },

    #[error("fetching {path} returned {status}")]
    Status { path: String, status: StatusCode },

    #[error("failed to cache {path}: {source}")]
    Cache {
        path: String,
        #[source]
        source: CacheError,
    },
}

/// Static settings the proxy is built from.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Build/install stamp; names the partitions.
    pub version: u64,
    /// Asset paths cached at install time.
    pub files_to_cache: Vec<String>,
    /// API function names (last path segments) handled by the API engine.
    pub api_fns: Vec<String>,
}

/// Intercepts `GET` requests and answers them from cache, network, or both.
pub struct OfflineProxy {
    upstream: Arc<dyn Upstream>,
    store: Arc<dyn CacheStore>,
    routes: RouteTable,
    manifest: Vec<String>,
    version: u64,
    files: Partition,
    api: Partition,
    writes: BackgroundWrites,
    claimed: AtomicBool,
}

impl OfflineProxy {
    pub fn new(
        settings: ProxySettings,
        store: Arc<dyn CacheStore>,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        let files = Partition::open(
            Arc::clone(&store),
            PartitionName::files(settings.version).to_string(),
        );
        let api = Partition::open(
            Arc::clone(&store),
            PartitionName::api(settings.version).to_string(),
        );

        Self {
            upstream,
            store,
            routes: RouteTable::new(settings.api_fns),
            manifest: settings.files_to_cache,
            version: settings.version,
            files,
            api,
            writes: BackgroundWrites::new(),
            claimed: AtomicBool::new(false),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Pre-populates the `files` partition with every manifest entry.
    ///
    /// Assets are fetched concurrently. Each failure is logged; the first one
    /// is returned and the install counts as failed even if other assets were
    /// stored. Returns the number of assets cached.
    pub async fn install(&self) -> Result<usize, InstallError> {
        info!(
            version = self.version,
            assets = self.manifest.len(),
            partition = self.files.name(),
            "installing"
        );

        let results = join_all(self.manifest.iter().map(|path| self.precache(path))).await;

        let mut stored = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(()) => stored += 1,
                Err(e) => {
                    error!(error = %e, "install step failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(version = self.version, stored, "install complete");
                Ok(stored)
            }
        }
    }

    async fn precache(&self, path: &str) -> Result<(), InstallError> {
        let request = Request::get(path);
        let response =
            self.upstream
                .fetch(&request)
                .await
                .map_err(|source| InstallError::Fetch {
                    path: path.to_owned(),
                    source,
                })?;

        if !response.is_ok() {
            return Err(InstallError::Status {
                path: path.to_owned(),
                status: response.status(),
            });
        }

        self.files
            .put(&key::asset_key(&request), response)
            .await
            .map_err(|source| InstallError::Cache {
                path: path.to_owned(),
                source,
            })?;
        debug!(path, "precached");
        Ok(())
    }

    /// Claims clients and evicts stale partitions, concurrently.
    ///
    /// Returns the names of the deleted partitions.
    pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
        let whitelist = Whitelist::for_version(self.version);
        let claim = async { self.claim() };
        let ((), evicted) = tokio::join!(claim, self.evict(&whitelist));
        let evicted = evicted?;
        info!(version = self.version, evicted = evicted.len(), "activated");
        Ok(evicted)
    }

    /// Starts intercepting requests immediately.
    pub fn claim(&self) {
        if !self.claimed.swap(true, Ordering::SeqCst) {
            debug!(version = self.version, "clients claimed");
        }
    }

    /// `true` once [`claim`](Self::claim) has run.
    pub fn is_controlling(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }

    /// Deletes every partition whose name is not in `whitelist`.
    pub async fn evict(&self, whitelist: &Whitelist) -> Result<Vec<String>, CacheError> {
        let existing = self.store.keys().await?;
        let stale: Vec<&str> = whitelist.stale(&existing).collect();

        let deletions = join_all(stale.iter().map(|name| self.store.delete(*name))).await;
        let mut evicted = Vec::with_capacity(stale.len());
        for (name, deleted) in stale.into_iter().zip(deletions) {
            if deleted? {
                info!(partition = name, "deleted stale partition");
                evicted.push(name.to_owned());
            }
        }
        Ok(evicted)
    }

    /// Answers one intercepted request.
    pub async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        if !self.is_controlling() {
            return self.upstream.fetch(request).await;
        }

        let route = self.routes.classify(request);
        debug!(method = %request.method(), path = request.path(), ?route, "classified");

        match route {
            Route::Bypass | Route::Api(ApiPolicy::NetworkOnly) => self.upstream.fetch(request).await,
            Route::StaticAsset => {
                self.strategy(&self.files)
                    .cache_first(request, &key::asset_key(request))
                    .await
            }
            Route::Api(ApiPolicy::CacheFirst) => {
                self.strategy(&self.api)
                    .cache_first_with_recheck(request, &key::api_key(request))
                    .await
            }
            Route::Api(ApiPolicy::NetworkFirst) => {
                self.strategy(&self.api)
                    .network_first(request, &key::api_key(request))
                    .await
            }
        }
    }

    fn strategy<'a>(&'a self, partition: &'a Partition) -> Strategy<'a> {
        Strategy {
            upstream: self.upstream.as_ref(),
            partition,
            writes: &self.writes,
        }
    }

    /// Background cache writes not yet reaped.
    pub fn pending_writes(&self) -> usize {
        self.writes.pending()
    }

    /// Waits for all background cache writes spawned so far.
    pub async fn flush(&self) {
        self.writes.drain().await;
    }
}
