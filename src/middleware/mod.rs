//! Middleware pipeline in front of the proxy.
//!
//! Each middleware wraps the next layer and may inspect the request,
//! short-circuit with its own response, or decorate the downstream response.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`Pipeline`]: an ordered stack, itself usable as a server handler.
//! - [`LoggerMiddleware`]: one log line per request.
//! - [`ProxyMiddleware`]: terminal layer that hands the request to an
//!   [`OfflineProxy`] and turns a propagated network error into `502`.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::BoxFuture;
use crate::http::{Request, Response, StatusCode};
use crate::proxy::OfflineProxy;

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler =
    Arc<dyn Fn(Request, Next) -> BoxFuture<'static, Response> + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |request: Request, next: Next| middleware.handle(request, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so each middleware can forward
/// at most once.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    index: usize,
}

impl Next {
    fn new(middlewares: Arc<[MiddlewareHandler]>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// An exhausted chain answers `500 Internal Server Error`.
    pub async fn run(mut self, request: Request) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(request, self).await
            }
            None => Response::new(StatusCode::INTERNAL_SERVER_ERROR)
                .body("No response generated by middleware pipeline"),
        }
    }
}

/// The core trait for all middleware.
///
/// Implementations must be `Send + Sync` (they are shared across Tokio
/// tasks) and return a `'static` future, so anything they need after the
/// first `.await` has to be cloned into it.
pub trait Middleware: Send + Sync {
    fn handle(&self, request: Request, next: Next) -> BoxFuture<'static, Response>;
}

/// An ordered middleware stack.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use swproxy::middleware::{LoggerMiddleware, Pipeline};
///
/// let pipeline = Pipeline::new().with(Arc::new(LoggerMiddleware));
/// assert_eq!(pipeline.len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    middlewares: Vec<MiddlewareHandler>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer. Layers run in the order they were added.
    #[must_use]
    pub fn with<M: Middleware + 'static>(mut self, middleware: Arc<M>) -> Self {
        self.middlewares.push(from_middleware(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Freezes the stack into a cloneable request handler.
    pub fn into_handler(
        self,
    ) -> impl Fn(Request) -> BoxFuture<'static, Response> + Send + Sync + 'static {
        let middlewares: Arc<[MiddlewareHandler]> = self.middlewares.into();
        move |request: Request| -> BoxFuture<'static, Response> {
            let next = Next::new(Arc::clone(&middlewares));
            Box::pin(next.run(request))
        }
    }
}

/// Logs each request's method, target, status, and duration.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, request: Request, next: Next) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            let start = Instant::now();
            let method = request.method().to_string();
            let uri = request.target();

            let response = next.run(request).await;

            info!(
                method = %method,
                uri = %uri,
                status = response.status().as_u16(),
                elapsed = ?start.elapsed(),
                "request handled"
            );
            response
        })
    }
}

/// Terminal layer: answers through the [`OfflineProxy`].
pub struct ProxyMiddleware {
    proxy: Arc<OfflineProxy>,
}

impl ProxyMiddleware {
    pub fn new(proxy: Arc<OfflineProxy>) -> Self {
        Self { proxy }
    }
}

impl Middleware for ProxyMiddleware {
    fn handle(&self, request: Request, _next: Next) -> BoxFuture<'static, Response> {
        let proxy = Arc::clone(&self.proxy);
        Box::pin(async move {
            match proxy.fetch(&request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(path = request.path(), error = %e, "no response available");
                    Response::new(StatusCode::BAD_GATEWAY).body(format!("Bad Gateway: {e}"))
                }
            }
        })
    }
}
