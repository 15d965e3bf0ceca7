//! The caching strategies.
//!
//! Each strategy answers one request exactly once, with either a real network
//! response, a real cached response, or the original [`FetchError`]. Cache
//! writes go through [`BackgroundWrites`] and never delay the answer.

use tracing::{debug, warn};

use crate::background::BackgroundWrites;
use crate::cache::Partition;
use crate::http::{Request, Response};
use crate::upstream::{FetchError, Upstream};

/// Everything a strategy needs for one request.
pub(crate) struct Strategy<'a> {
    pub upstream: &'a dyn Upstream,
    pub partition: &'a Partition,
    pub writes: &'a BackgroundWrites,
}

impl Strategy<'_> {
    /// Cache lookup where a store failure counts as a miss.
    async fn cached(&self, key: &str) -> Option<Response> {
        match self.partition.lookup(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(
                    partition = self.partition.name(),
                    key,
                    error = %e,
                    "cache lookup failed, treating as miss"
                );
                None
            }
        }
    }

    fn refill(&self, key: &str, response: &Response) {
        self.writes
            .store(self.partition.clone(), key.to_owned(), response.clone());
    }

    /// Static assets: serve a hit, otherwise fetch and refill on success.
    pub async fn cache_first(&self, request: &Request, key: &str) -> Result<Response, FetchError> {
        if let Some(hit) = self.cached(key).await {
            debug!(key, "asset served from cache");
            return Ok(hit);
        }

        let response = self.upstream.fetch(request).await?;
        if response.is_ok() {
            self.refill(key, &response);
        }
        Ok(response)
    }

    /// Individual fetches: like [`cache_first`](Self::cache_first), but a
    /// failed network attempt gets a second look at the cache in case a
    /// concurrent request filled it meanwhile.
    pub async fn cache_first_with_recheck(
        &self,
        request: &Request,
        key: &str,
    ) -> Result<Response, FetchError> {
        if let Some(hit) = self.cached(key).await {
            debug!(key, "served from cache");
            return Ok(hit);
        }

        match self.upstream.fetch(request).await {
            Ok(response) if response.is_ok() => {
                self.refill(key, &response);
                Ok(response)
            }
            Ok(response) if response.status().is_transport_failure() => {
                debug!(key, status = response.status().as_u16(), "origin unreachable");
                Ok(self.cached(key).await.unwrap_or(response))
            }
            Ok(response) => Ok(response),
            Err(e) => {
                debug!(key, error = %e, "network error");
                self.cached(key).await.ok_or(e)
            }
        }
    }

    /// Rights and membership: fresh answers first, cached ones when offline.
    pub async fn network_first(&self, request: &Request, key: &str) -> Result<Response, FetchError> {
        match self.upstream.fetch(request).await {
            Ok(response) if response.is_ok() => {
                self.refill(key, &response);
                Ok(response)
            }
            Ok(response) if response.status().is_transport_failure() => {
                debug!(
                    key,
                    status = response.status().as_u16(),
                    "origin unreachable, trying cache"
                );
                Ok(self.cached(key).await.unwrap_or(response))
            }
            Ok(response) => Ok(response),
            Err(e) => {
                debug!(key, error = %e, "network error, trying cache");
                self.cached(key).await.ok_or(e)
            }
        }
    }
}
