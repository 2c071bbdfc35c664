// Per-request value object

use crate::body::{BodyValue, RawBody};
use crate::decorators::DecoratorTable;
use crate::error::Error;
use crate::extensions::Extensions;
use http::{HeaderMap, Method, Uri, Version, header};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Incoming request handle.
///
/// Cloning is cheap; every clone refers to the same request. Hooks and
/// handlers receive their own clone and may keep it past their return.
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

struct RequestInner {
    id: String,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    remote_addr: Option<SocketAddr>,
    body: Mutex<Option<BodyValue>>,
    raw_body: Mutex<Option<RawBody>>,
    extensions: Mutex<Extensions>,
    decorations: Mutex<Arc<DecoratorTable>>,
    span: tracing::Span,
}

/// Everything needed to build a `Request` at dispatch time.
pub(crate) struct RequestParts {
    pub id: String,
    pub parts: http::request::Parts,
    pub params: HashMap<String, String>,
    pub raw_body: Option<RawBody>,
    pub decorations: Arc<DecoratorTable>,
    pub span: tracing::Span,
}

impl Request {
    pub(crate) fn new(parts: RequestParts) -> Self {
        let RequestParts {
            id,
            parts,
            params,
            raw_body,
            decorations,
            span,
        } = parts;
        let query = parts.uri.query().map(parse_query).unwrap_or_default();
        let remote_addr = parts.extensions.get::<SocketAddr>().copied();

        Self {
            inner: Arc::new(RequestInner {
                id,
                method: parts.method,
                uri: parts.uri,
                version: parts.version,
                headers: parts.headers,
                params,
                query,
                remote_addr,
                body: Mutex::new(None),
                raw_body: Mutex::new(raw_body),
                extensions: Mutex::new(Extensions::new()),
                decorations: Mutex::new(decorations),
                span,
            }),
        }
    }

    /// Request id, taken from the configured header or generated.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// Full request target, including the query string.
    pub fn url(&self) -> String {
        self.inner
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| self.inner.uri.path().to_string())
    }

    pub fn path(&self) -> &str {
        self.inner.uri.path()
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn version(&self) -> Version {
        self.inner.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    /// Declared `Content-Length`. An unparseable value is a client error.
    pub fn content_length(&self) -> Result<Option<usize>, Error> {
        match self.inner.headers.get(header::CONTENT_LENGTH) {
            None => Ok(None),
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse::<usize>().ok())
                .map(Some)
                .ok_or_else(|| Error::BadRequest("Invalid Content-Length header".to_string())),
        }
    }

    /// Whether the request announces a body at all.
    pub(crate) fn has_body(&self) -> bool {
        let headers = &self.inner.headers;
        if headers.contains_key(header::TRANSFER_ENCODING) {
            return true;
        }
        match headers.get(header::CONTENT_LENGTH) {
            Some(v) => v.to_str().map(|s| s.trim() != "0").unwrap_or(true),
            None => false,
        }
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.inner.params
    }

    /// Get a path parameter by name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner.params.get(name).map(String::as_str)
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.inner.query
    }

    /// Get a query parameter by name
    pub fn query(&self, name: &str) -> Option<&str> {
        self.inner.query.get(name).map(String::as_str)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// Parsed body. `None` before body parsing, for bodiless requests, and
    /// once the handler pipeline has completed.
    pub fn body(&self) -> Option<BodyValue> {
        self.inner.body.lock().clone()
    }

    /// Replace the parsed body.
    pub fn set_body(&self, body: Option<BodyValue>) {
        *self.inner.body.lock() = body;
    }

    /// Deserialize the parsed body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        match self.inner.body.lock().as_ref() {
            Some(body) => body.deserialize(),
            None => Err(Error::BadRequest("Request has no body".to_string())),
        }
    }

    pub(crate) fn take_raw_body(&self) -> Option<RawBody> {
        self.inner.raw_body.lock().take()
    }

    /// Attach typed per-request data.
    pub fn insert_extension<T: Send + Sync + 'static>(&self, value: T) {
        self.inner.extensions.lock().insert(value);
    }

    pub fn extension<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner.extensions.lock().get::<T>()
    }

    pub fn remove_extension<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner.extensions.lock().remove::<T>()
    }

    /// Request decorator visible from the serving context's scope.
    pub fn decoration<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        let decorations = self.inner.decorations.lock().clone();
        decorations.get::<T>(name)
    }

    pub fn has_decoration(&self, name: &str) -> bool {
        let decorations = self.inner.decorations.lock().clone();
        decorations.contains(name)
    }

    /// Switch to another context's decorators (not-found dispatch).
    pub(crate) fn set_decorations(&self, decorations: Arc<DecoratorTable>) {
        *self.inner.decorations.lock() = decorations;
    }

    /// Span every log line of this request is recorded under.
    pub fn span(&self) -> &tracing::Span {
        &self.inner.span
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.inner.id)
            .field("method", &self.inner.method)
            .field("uri", &self.inner.uri)
            .finish()
    }
}

/// Parse a query string; later duplicates win.
fn parse_query(query: &str) -> HashMap<String, String> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .map(|pairs| pairs.into_iter().collect())
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn request(method: &str, uri: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().method(method).uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        Request::new(RequestParts {
            id: "req-1".to_string(),
            parts,
            params: HashMap::new(),
            raw_body: None,
            decorations: Arc::new(DecoratorTable::default()),
            span: tracing::Span::none(),
        })
    }

    #[test]
    fn test_query_parsing() {
        let req = request("GET", "/search?q=rust%20lang&page=2", &[]);
        assert_eq!(req.query("q"), Some("rust lang"));
        assert_eq!(req.query("page"), Some("2"));
        assert_eq!(req.path(), "/search");
        assert_eq!(req.url(), "/search?q=rust%20lang&page=2");
    }

    #[test]
    fn test_content_length() {
        let req = request("POST", "/", &[("content-length", "12")]);
        assert_eq!(req.content_length().unwrap(), Some(12));
        assert!(req.has_body());

        let bad = request("POST", "/", &[("content-length", "twelve")]);
        assert_eq!(bad.content_length().unwrap_err().status_code(), 400);

        let empty = request("POST", "/", &[("content-length", "0")]);
        assert!(!empty.has_body());
        assert!(!request("GET", "/", &[]).has_body());
    }

    #[test]
    fn test_body_and_extensions() {
        let req = request("POST", "/", &[]);
        assert!(req.json::<serde_json::Value>().is_err());
        req.set_body(Some(BodyValue::Json(serde_json::json!({"a": 1}))));
        let value: serde_json::Value = req.json().unwrap();
        assert_eq!(value["a"], 1);

        req.insert_extension(42u32);
        let clone = req.clone();
        assert_eq!(clone.extension::<u32>().as_deref(), Some(&42));
    }
}
