//! # swproxy
//!
//! An offline-capable HTTP cache proxy. It sits between a client application
//! and its origin server and answers each `GET` with one of three caching
//! strategies (cache-first, network-first, network-only), keeping responses
//! in two versioned cache partitions so the application keeps working while
//! the origin is unreachable.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use swproxy::cache::{CacheStore, MemoryStore};
//! use swproxy::config::Config;
//! use swproxy::middleware::{LoggerMiddleware, Pipeline, ProxyMiddleware};
//! use swproxy::proxy::OfflineProxy;
//! use swproxy::server::Server;
//! use swproxy::upstream::{HttpUpstream, Upstream};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
//!     let upstream: Arc<dyn Upstream> = Arc::new(HttpUpstream::new(&config.upstream)?);
//!
//!     let proxy = Arc::new(OfflineProxy::new(config.proxy_settings(), store, upstream));
//!     proxy.install().await?;
//!     proxy.activate().await?;
//!
//!     let handler = Pipeline::new()
//!         .with(Arc::new(LoggerMiddleware))
//!         .with(Arc::new(ProxyMiddleware::new(proxy)))
//!         .into_handler();
//!     Server::bind(&config.listen).await?.run(handler).await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod background;
pub mod cache;
pub mod config;
pub mod http;
pub mod middleware;
pub mod proxy;
pub mod route;
pub mod server;
pub mod upstream;

#[cfg(test)]
mod testing;

/// A boxed, `Send` future: the return type of every async trait method here.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use proxy::{InstallError, OfflineProxy, ProxySettings};
pub use server::{Server, ServerError};
