//! Content-type parsers and request body reading.
//!
//! Each scope holds an ordered parser table, cloned on fork. Selection for a
//! request's `Content-Type` is:
//!
//! 1. exact media-type match (parameters such as `charset` are ignored),
//! 2. the first registered parser whose name is contained in the header,
//! 3. the `*` catch-all parser.
//!
//! Body size limits resolve route limit, then parser limit, then the app
//! default, and are enforced both against `Content-Length` and against the
//! bytes actually received.

use crate::body::{BodyValue, RawBody};
use crate::error::{Error, RegistrationError};
use crate::request::Request;
use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use http::Method;
use http_body_util::BodyExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::trace;

pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_PLAIN: &str = "text/plain";
/// Catch-all parser name.
pub const ANY: &str = "*";

type ParseFn =
    Arc<dyn Fn(Request, Bytes) -> BoxFuture<'static, Result<BodyValue, Error>> + Send + Sync>;

/// A body parser for one content type.
#[derive(Clone)]
pub struct ContentTypeParser {
    parse: ParseFn,
    body_limit: Option<usize>,
}

impl ContentTypeParser {
    /// Parser over the fully received body.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BodyValue, Error>> + Send + 'static,
    {
        Self {
            parse: Arc::new(move |req, bytes| Box::pin(f(req, bytes))),
            body_limit: None,
        }
    }

    /// Synchronous parser.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Bytes) -> Result<BodyValue, Error> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |_req, bytes| {
            let f = f.clone();
            async move { f(&bytes) }
        })
    }

    /// Body limit for this parser; a route limit still takes precedence.
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = Some(limit);
        self
    }

    pub fn limit(&self) -> Option<usize> {
        self.body_limit
    }

    pub async fn parse(&self, request: Request, body: Bytes) -> Result<BodyValue, Error> {
        (self.parse)(request, body).await
    }
}

impl fmt::Debug for ContentTypeParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentTypeParser")
            .field("body_limit", &self.body_limit)
            .finish()
    }
}

fn parse_json(bytes: &Bytes) -> Result<BodyValue, Error> {
    if bytes.is_empty() {
        return Err(Error::BadRequest(
            "Body cannot be empty when content-type is set to 'application/json'".to_string(),
        ));
    }
    serde_json::from_slice(bytes)
        .map(BodyValue::Json)
        .map_err(|e| Error::BadRequest(format!("Body is not valid JSON: {}", e)))
}

fn parse_text(bytes: &Bytes) -> Result<BodyValue, Error> {
    String::from_utf8(bytes.to_vec())
        .map(BodyValue::Text)
        .map_err(|_| Error::BadRequest("Body is not valid UTF-8".to_string()))
}

#[derive(Clone)]
struct Entry {
    name: String,
    parser: ContentTypeParser,
    builtin: bool,
}

/// Ordered parser table of a scope.
#[derive(Clone)]
pub struct ContentTypeParsers {
    entries: Vec<Entry>,
}

impl Default for ContentTypeParsers {
    fn default() -> Self {
        Self {
            entries: vec![
                Entry {
                    name: APPLICATION_JSON.to_string(),
                    parser: ContentTypeParser::from_fn(parse_json),
                    builtin: true,
                },
                Entry {
                    name: TEXT_PLAIN.to_string(),
                    parser: ContentTypeParser::from_fn(parse_text),
                    builtin: true,
                },
            ],
        }
    }
}

impl ContentTypeParsers {
    /// Register a parser. Built-in parsers may be replaced once; a second
    /// parser for the same content type is an error.
    pub fn add(
        &mut self,
        content_type: &str,
        parser: ContentTypeParser,
    ) -> Result<(), RegistrationError> {
        let name = normalize(content_type);
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) if entry.builtin => {
                entry.parser = parser;
                entry.builtin = false;
                Ok(())
            }
            Some(_) => Err(RegistrationError::ContentTypeParserExists(name)),
            None => {
                self.entries.push(Entry {
                    name,
                    parser,
                    builtin: false,
                });
                Ok(())
            }
        }
    }

    pub fn has(&self, content_type: &str) -> bool {
        let name = normalize(content_type);
        self.entries.iter().any(|e| e.name == name)
    }

    /// Remove every parser, built-ins included.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Pick the parser for a request's content type.
    pub fn select(&self, content_type: &str) -> Option<&ContentTypeParser> {
        let header = content_type.to_ascii_lowercase();
        let media = normalize(&header);

        if media != ANY {
            if let Some(entry) = self.entries.iter().find(|e| e.name == media) {
                return Some(&entry.parser);
            }
        }

        self.entries
            .iter()
            .find(|e| e.name != ANY && !e.name.is_empty() && header.contains(&e.name))
            .or_else(|| self.entries.iter().find(|e| e.name == ANY))
            .map(|e| &e.parser)
    }
}

impl fmt::Debug for ContentTypeParsers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Media type without parameters, lowercased.
fn normalize(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Whether the request's body has to go through a parser.
pub(crate) fn should_parse(request: &Request) -> bool {
    let method = request.method();
    if method == Method::POST || method == Method::PUT || method == Method::PATCH {
        request.content_type().is_some() || request.has_body()
    } else if method == Method::OPTIONS || method == Method::DELETE {
        request.content_type().is_some()
            && (request.has_body()
                || request.headers().contains_key(http::header::CONTENT_LENGTH))
    } else {
        false
    }
}

/// Read the whole body, enforcing `limit` on the declared and received size.
pub(crate) async fn read_body(
    body: Option<RawBody>,
    declared: Option<usize>,
    limit: usize,
) -> Result<Bytes, Error> {
    if let Some(declared) = declared {
        if declared > limit {
            return Err(Error::PayloadTooLarge(format!(
                "Request body is too large (limit {} bytes)",
                limit
            )));
        }
    }

    let Some(mut body) = body else {
        return match declared {
            Some(n) if n > 0 => Err(size_mismatch()),
            _ => Ok(Bytes::new()),
        };
    };

    let mut buf = BytesMut::with_capacity(declared.unwrap_or(0));
    while let Some(frame) = body.frame().await {
        let frame =
            frame.map_err(|e| Error::BadRequest(format!("Failed to read request body: {}", e)))?;
        if let Ok(data) = frame.into_data() {
            if buf.len() + data.len() > limit {
                return Err(Error::PayloadTooLarge(format!(
                    "Request body is too large (limit {} bytes)",
                    limit
                )));
            }
            buf.extend_from_slice(&data);
        }
    }

    if let Some(declared) = declared {
        if declared != buf.len() {
            return Err(size_mismatch());
        }
    }

    trace!(bytes = buf.len(), "request body received");
    Ok(buf.freeze())
}

fn size_mismatch() -> Error {
    Error::BadRequest("Request body size did not match Content-Length".to_string())
}

/// Run body parsing for a request against its route context.
pub(crate) async fn parse_request_body(
    parsers: &ContentTypeParsers,
    route_limit: Option<usize>,
    default_limit: usize,
    request: &Request,
) -> Result<(), Error> {
    if !should_parse(request) {
        return Ok(());
    }

    let content_type = request.content_type().unwrap_or_default().to_string();
    let parser = parsers.select(&content_type).ok_or_else(|| {
        Error::UnsupportedMediaType(format!("Unsupported Media Type: {}", content_type))
    })?;

    let limit = route_limit.or(parser.limit()).unwrap_or(default_limit);
    let declared = request.content_length()?;
    let bytes = read_body(request.take_raw_body(), declared, limit).await?;

    let parsed = parser.parse(request.clone(), bytes).await?;
    request.set_body(Some(parsed));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::request;
    use http_body_util::{BodyExt, Full};
    use serde_json::json;

    fn raw(data: &'static str) -> Option<RawBody> {
        Some(
            Full::new(Bytes::from_static(data.as_bytes()))
                .map_err(|never| match never {})
                .boxed_unsync(),
        )
    }

    fn tagged(tag: &'static str) -> ContentTypeParser {
        ContentTypeParser::from_fn(move |_| Ok(BodyValue::Text(tag.to_string())))
    }

    async fn pick(parsers: &ContentTypeParsers, content_type: &str) -> Option<String> {
        let parser = parsers.select(content_type)?;
        let out = parser
            .parse(request("POST", "/", &[]), Bytes::from_static(b"{}"))
            .await
            .ok()?;
        Some(match out {
            BodyValue::Text(s) => s,
            BodyValue::Json(_) => "json".to_string(),
            BodyValue::Bytes(_) => "bytes".to_string(),
        })
    }

    #[tokio::test]
    async fn test_select_order() {
        let mut parsers = ContentTypeParsers::default();
        parsers.add("application/vnd.api", tagged("vnd")).unwrap();
        parsers.add("*", tagged("any")).unwrap();

        assert_eq!(
            pick(&parsers, "application/json; charset=utf-8").await.as_deref(),
            Some("json")
        );
        assert_eq!(
            pick(&parsers, "application/vnd.api+json").await.as_deref(),
            Some("vnd")
        );
        assert_eq!(pick(&parsers, "image/png").await.as_deref(), Some("any"));
    }

    #[test]
    fn test_no_match_without_catch_all() {
        let parsers = ContentTypeParsers::default();
        assert!(parsers.select("image/png").is_none());
        assert!(parsers.select("").is_none());
    }

    #[test]
    fn test_builtin_override_once() {
        let mut parsers = ContentTypeParsers::default();
        parsers.add("application/json", tagged("custom")).unwrap();
        assert_eq!(
            parsers.add("application/json", tagged("again")),
            Err(RegistrationError::ContentTypeParserExists(
                "application/json".to_string()
            ))
        );

        parsers.add("text/csv", tagged("csv")).unwrap();
        assert!(parsers.add("Text/CSV", tagged("csv")).is_err());
        assert!(parsers.has("text/csv"));
    }

    #[test]
    fn test_default_json_parser() {
        assert_eq!(
            parse_json(&Bytes::from_static(br#"{"a":1}"#)).unwrap(),
            BodyValue::Json(json!({"a": 1}))
        );
        let empty = parse_json(&Bytes::new()).unwrap_err();
        assert_eq!(
            empty.message(),
            "Body cannot be empty when content-type is set to 'application/json'"
        );
        assert_eq!(parse_json(&Bytes::from_static(b"{oops")).unwrap_err().status_code(), 400);
        assert!(parse_text(&Bytes::from_static(&[0xff, 0xfe])).is_err());
    }

    #[tokio::test]
    async fn test_read_body_limits() {
        assert_eq!(read_body(raw("abcd"), Some(4), 4).await.unwrap(), "abcd");

        let declared = read_body(raw("abcde"), Some(5), 4).await.unwrap_err();
        assert_eq!(declared.status_code(), 413);

        let streamed = read_body(raw("abcde"), None, 4).await.unwrap_err();
        assert_eq!(streamed.status_code(), 413);

        let mismatch = read_body(raw("abc"), Some(4), 10).await.unwrap_err();
        assert_eq!(mismatch.message(), "Request body size did not match Content-Length");
    }

    #[test]
    fn test_should_parse() {
        assert!(should_parse(&request("POST", "/", &[("content-type", "text/plain")])));
        assert!(should_parse(&request("PUT", "/", &[("content-length", "3")])));
        assert!(!should_parse(&request("POST", "/", &[])));
        assert!(!should_parse(&request("GET", "/", &[("content-type", "text/plain")])));
        assert!(!should_parse(&request("DELETE", "/", &[])));
        assert!(should_parse(&request(
            "DELETE",
            "/",
            &[("content-type", "application/json"), ("content-length", "2")]
        )));
    }
}
