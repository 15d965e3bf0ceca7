//! HTTP/1.1 response type.
//!
//! Responses come from three places: the upstream origin, a cache partition,
//! or the server itself (error pages). All of them are serialized the same way.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, StatusCode};

/// An HTTP/1.1 response.
///
/// Cloning is cheap: the body is a reference-counted [`Bytes`] buffer, which is
/// what lets the proxy hand one copy to the caller and another to the cache.
///
/// # Examples
///
/// ```
/// use swproxy::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
        }
    }

    /// Assembles a response from already-parsed parts.
    pub fn from_parts(status: StatusCode, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            keep_alive: true,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place, for middleware that decorates a downstream response.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets a text body, defaulting `Content-Type` to `text/plain`.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        if !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Mirrors the fetch API's `response.ok`: a 2xx status.
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_ref(&self) -> &Bytes {
        &self.body
    }

    /// Serializes the response into HTTP/1.1 wire format.
    ///
    /// `Content-Length` is computed from the body, except that an empty body
    /// keeps a stored length (a relayed `HEAD` or `304` answer) and `1xx`/`204`
    /// responses carry neither the header nor a body. Any stored `Connection`
    /// header is replaced.
    pub fn into_bytes(mut self) -> BytesMut {
        let declared = if self.body.is_empty() {
            self.headers.get("content-length").map(str::to_owned)
        } else {
            None
        };
        let content_length = match declared {
            _ if self.status.is_bodiless() => None,
            Some(declared) => Some(declared),
            None if self.status == StatusCode::NOT_MODIFIED => None,
            None => Some(self.body.len().to_string()),
        };

        self.headers.remove("content-length");
        self.headers.remove("connection");

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.insert("Connection", connection);

        let estimated_size = 128 + self.headers.len() * 64 + self.body.len();
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        if let Some(content_length) = content_length {
            buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        }
        buf.put(&b"\r\n"[..]);

        if !self.body.is_empty() && !self.status.is_bodiless() {
            buf.put(self.body);
        }

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let r = Response::new(StatusCode::OK).body("Hello");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn stale_content_length_is_replaced() {
        let r = Response::new(StatusCode::OK)
            .header("Content-Length", "999")
            .header("Connection", "close")
            .body("abc");
        let s = to_string(r.into_bytes());
        assert!(!s.contains("999"));
        assert_eq!(s.matches("Content-Length").count(), 1);
        assert!(s.contains("Connection: keep-alive\r\n"));
    }

    #[test]
    fn clone_shares_body() {
        let r = Response::new(StatusCode::OK).body_bytes(Bytes::from_static(b"shared"));
        let copy = r.clone();
        assert_eq!(copy.body_ref(), r.body_ref());
        assert!(copy.is_ok());
    }

    #[test]
    fn empty_body_keeps_declared_length() {
        let r = Response::new(StatusCode::OK).header("Content-Length", "4096");
        let s = to_string(r.into_bytes());
        assert!(s.contains("Content-Length: 4096\r\n"));
        assert_eq!(s.matches("Content-Length").count(), 1);
    }

    #[test]
    fn no_content_has_no_length_or_body() {
        let r = Response::new(StatusCode::NO_CONTENT)
            .header("Content-Length", "3")
            .body_bytes(Bytes::from_static(b"abc"));
        let s = to_string(r.into_bytes());
        assert!(!s.contains("Content-Length"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn not_modified_without_length_sends_none() {
        let r = Response::new(StatusCode::NOT_MODIFIED).header("ETag", "\"v1\"");
        let s = to_string(r.into_bytes());
        assert!(!s.contains("Content-Length"));
    }

    #[test]
    fn raw_body_gets_no_content_type() {
        let r = Response::new(StatusCode::OK).body_bytes(Bytes::from_static(b"\x00\x01"));
        let s = String::from_utf8_lossy(&r.into_bytes()).into_owned();
        assert!(!s.contains("Content-Type"));
    }

    #[test]
    fn gateway_error_page() {
        let r = Response::new(StatusCode::BAD_GATEWAY)
            .body("upstream unreachable")
            .keep_alive(false);
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(s.contains("Connection: close\r\n"));
    }
}
