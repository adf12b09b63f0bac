//! HTTP/1.1 request parsing using the [`httparse`] crate.

use std::collections::HashMap;

use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A parsed HTTP/1.1 request.
///
/// # Examples
///
/// ```
/// use geopin::http::request::Request;
///
/// let raw = b"GET /reverse?lat=12.9716&lon=77.5946 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.path(), "/reverse");
/// assert_eq!(request.query_param("lat"), Some("12.9716"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: HashMap<String, String>,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Parses a request head from `buf`.
    ///
    /// Returns the request and the offset at which the body begins. Bodies are
    /// not kept; the server skips `Content-Length` bytes past the offset.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] if the head has not fully arrived.
    /// - [`RequestError::Parse`] if the bytes are not valid HTTP/1.x.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Request::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = raw
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse()
            .unwrap_or_else(|never| match never {});

        let target = raw.path.ok_or(RequestError::MissingField { field: "path" })?;
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), parse_query_string(query)),
            None => (target.to_owned(), HashMap::new()),
        };

        let version = raw
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                query,
            },
            body_offset,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// HTTP/1.1 keeps the connection open unless told otherwise; HTTP/1.0
    /// closes it unless `Connection: keep-alive` is sent.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }
}

// `+` is decoded as a space; no percent-decoding, numeric coordinates never need it.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key.replace('+', " "), value.replace('+', " "))
        })
        .collect()
}
