//! Outbound network: replaying intercepted requests against the origin.
//!
//! The proxy only depends on the [`Upstream`] trait; [`HttpUpstream`] is the
//! production implementation built on `reqwest`.

use thiserror::Error;
use tracing::{debug, trace};

use crate::BoxFuture;
use crate::http::{Headers, Request, Response, StatusCode};

/// A request that never produced a response.
///
/// This is the "network exception" case: DNS failure, refused connection,
/// reset mid-body. A response with status `0` or `503` is *not* an error at
/// this level; the caching policies decide what to do with it.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("network error fetching {target}: {message}")]
    Network { target: String, message: String },

    #[error("method {method} cannot be forwarded")]
    InvalidMethod { method: String },

    #[error("invalid upstream origin {origin:?}: {reason}")]
    InvalidOrigin { origin: String, reason: String },
}

impl FetchError {
    pub fn network(target: impl Into<String>, message: impl ToString) -> Self {
        Self::Network {
            target: target.into(),
            message: message.to_string(),
        }
    }
}

/// Something that can perform a network fetch for an intercepted request.
pub trait Upstream: Send + Sync {
    /// Sends `request` (method, end-to-end headers and body preserved).
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>>;
}

/// [`Upstream`] that forwards to a fixed origin such as `http://127.0.0.1:8081`.
///
/// Redirects are not followed; they are relayed to the client like any other
/// response.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    origin: String,
}

impl HttpUpstream {
    pub fn new(origin: &str) -> Result<Self, FetchError> {
        let invalid = |reason: String| FetchError::InvalidOrigin {
            origin: origin.to_owned(),
            reason,
        };

        let parsed = reqwest::Url::parse(origin).map_err(|e| invalid(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
        }

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            client,
            origin: origin.trim_end_matches('/').to_owned(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn url_for(&self, request: &Request) -> String {
        format!("{}{}", self.origin, request.target())
    }
}

impl Upstream for HttpUpstream {
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
        Box::pin(async move {
            let target = request.target();
            let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
                .map_err(|_| FetchError::InvalidMethod {
                    method: request.method().to_string(),
                })?;

            let mut builder = self.client.request(method, self.url_for(request));
            for (name, value) in request.headers().end_to_end().iter() {
                if name.eq_ignore_ascii_case("host") {
                    continue;
                }
                builder = builder.header(name, value);
            }
            if !request.body().is_empty() {
                builder = builder.body(request.body().clone());
            }

            let upstream = builder
                .send()
                .await
                .map_err(|e| FetchError::network(&target, e))?;

            let status = StatusCode::from_u16(upstream.status().as_u16());
            let headers: Headers = upstream
                .headers()
                .iter()
                .filter_map(|(name, value)| match value.to_str() {
                    Ok(value) => Some((name.as_str().to_owned(), value.to_owned())),
                    Err(_) => {
                        debug!(
                            request = %target,
                            header = name.as_str(),
                            "dropping non-ASCII header value from origin"
                        );
                        None
                    }
                })
                .collect();
            let body = upstream
                .bytes()
                .await
                .map_err(|e| FetchError::network(&target, e))?;

            trace!(
                request = %target,
                status = status.as_u16(),
                bytes = body.len(),
                "upstream responded"
            );

            // HEAD and 304 answers have no body but still describe one.
            let mut relayed = headers.end_to_end();
            if body.is_empty() {
                if let Some(length) = headers.get("content-length") {
                    relayed.insert("Content-Length", length);
                }
            }
            Ok(Response::from_parts(status, relayed, body))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_trailing_slash_is_trimmed() {
        let up = HttpUpstream::new("http://127.0.0.1:8081/").unwrap();
        assert_eq!(up.origin(), "http://127.0.0.1:8081");
        let req = Request::get("/get_rights?ticket=t");
        assert_eq!(up.url_for(&req), "http://127.0.0.1:8081/get_rights?ticket=t");
    }

    #[test]
    fn rejects_non_http_origin() {
        assert!(matches!(
            HttpUpstream::new("ftp://example.com"),
            Err(FetchError::InvalidOrigin { .. })
        ));
        assert!(matches!(
            HttpUpstream::new("not a url"),
            Err(FetchError::InvalidOrigin { .. })
        ));
    }

    #[tokio::test]
    async fn head_keeps_origin_content_length() {
        let origin = crate::server::Server::bind("127.0.0.1:0").await.unwrap();
        let addr = origin.local_addr();
        tokio::spawn(origin.run(|_req: Request| async {
            Response::new(StatusCode::OK).header("Content-Length", "42")
        }));

        let up = HttpUpstream::new(&format!("http://{addr}")).unwrap();
        let head = Request::new(crate::http::Method::Head, "/js/app.js");
        let response = up.fetch(&head).await.unwrap();

        assert!(response.body_ref().is_empty());
        assert_eq!(response.headers().get("content-length"), Some("42"));
    }

    #[tokio::test]
    async fn refused_connection_is_a_network_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let up = HttpUpstream::new(&format!("http://{addr}")).unwrap();
        let err = up.fetch(&Request::get("/get_rights")).await.unwrap_err();
        assert!(matches!(err, FetchError::Network { .. }));
    }
}
