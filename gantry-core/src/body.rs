// Body value types flowing through the lifecycle:
// raw request body -> BodyValue (parsed) ; ReplyBody (sent) -> Payload (serialized)

use crate::error::{BoxError, Error};
use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Unread request body as handed over by the transport.
pub type RawBody = UnsyncBoxBody<Bytes, BoxError>;

/// Streaming response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// Parsed request body produced by a content-type parser.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyValue {
    Json(Value),
    Text(String),
    Bytes(Bytes),
}

impl BodyValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            BodyValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            BodyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            BodyValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Deserialize the body into `T`. Shape mismatches are client errors.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let result = match self {
            BodyValue::Json(v) => serde_json::from_value(v.clone()),
            BodyValue::Text(s) => serde_json::from_str(s),
            BodyValue::Bytes(b) => serde_json::from_slice(b),
        };
        result.map_err(|e| Error::BadRequest(e.to_string()))
    }
}

/// Value handed to `Reply::send`, before serialization.
pub enum ReplyBody {
    Empty,
    Json(Value),
    Text(String),
    Bytes(Bytes),
    Stream(BodyStream),
}

impl ReplyBody {
    /// Wrap any byte stream.
    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        ReplyBody::Stream(stream.map(|chunk| chunk.map_err(Into::into)).boxed())
    }

    /// Serialize any value to a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, Error> {
        Ok(ReplyBody::Json(serde_json::to_value(value)?))
    }
}

impl fmt::Debug for ReplyBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyBody::Empty => f.write_str("Empty"),
            ReplyBody::Json(v) => f.debug_tuple("Json").field(v).finish(),
            ReplyBody::Text(s) => f.debug_tuple("Text").field(s).finish(),
            ReplyBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            ReplyBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Value> for ReplyBody {
    fn from(value: Value) -> Self {
        ReplyBody::Json(value)
    }
}

impl From<String> for ReplyBody {
    fn from(value: String) -> Self {
        ReplyBody::Text(value)
    }
}

impl From<&str> for ReplyBody {
    fn from(value: &str) -> Self {
        ReplyBody::Text(value.to_string())
    }
}

impl From<Bytes> for ReplyBody {
    fn from(value: Bytes) -> Self {
        ReplyBody::Bytes(value)
    }
}

impl From<Vec<u8>> for ReplyBody {
    fn from(value: Vec<u8>) -> Self {
        ReplyBody::Bytes(Bytes::from(value))
    }
}

impl From<()> for ReplyBody {
    fn from(_: ()) -> Self {
        ReplyBody::Empty
    }
}

/// JSON response helper
#[derive(Debug, Clone)]
pub struct Json<T: Serialize>(pub T);

/// Conversion of handler return values.
///
/// `Ok(None)` means the handler did not produce a body and the reply is
/// either already sent or will be sent later.
pub trait IntoReplyBody {
    fn into_reply_body(self) -> Result<Option<ReplyBody>, Error>;
}

impl IntoReplyBody for () {
    fn into_reply_body(self) -> Result<Option<ReplyBody>, Error> {
        Ok(None)
    }
}

impl IntoReplyBody for ReplyBody {
    fn into_reply_body(self) -> Result<Option<ReplyBody>, Error> {
        Ok(Some(self))
    }
}

impl IntoReplyBody for Value {
    fn into_reply_body(self) -> Result<Option<ReplyBody>, Error> {
        Ok(Some(ReplyBody::Json(self)))
    }
}

impl IntoReplyBody for String {
    fn into_reply_body(self) -> Result<Option<ReplyBody>, Error> {
        Ok(Some(ReplyBody::Text(self)))
    }
}

impl IntoReplyBody for &'static str {
    fn into_reply_body(self) -> Result<Option<ReplyBody>, Error> {
        Ok(Some(ReplyBody::Text(self.to_string())))
    }
}

impl IntoReplyBody for Bytes {
    fn into_reply_body(self) -> Result<Option<ReplyBody>, Error> {
        Ok(Some(ReplyBody::Bytes(self)))
    }
}

impl IntoReplyBody for Vec<u8> {
    fn into_reply_body(self) -> Result<Option<ReplyBody>, Error> {
        Ok(Some(ReplyBody::Bytes(Bytes::from(self))))
    }
}

impl<T: Serialize> IntoReplyBody for Json<T> {
    fn into_reply_body(self) -> Result<Option<ReplyBody>, Error> {
        ReplyBody::json(&self.0).map(Some)
    }
}

impl<T: IntoReplyBody> IntoReplyBody for Option<T> {
    fn into_reply_body(self) -> Result<Option<ReplyBody>, Error> {
        match self {
            Some(inner) => inner.into_reply_body(),
            None => Ok(None),
        }
    }
}

/// Stream handle that can be cloned through the onSend chain and taken once.
#[derive(Clone)]
pub struct SharedStream(Arc<Mutex<Option<BodyStream>>>);

impl SharedStream {
    pub fn new(stream: BodyStream) -> Self {
        Self(Arc::new(Mutex::new(Some(stream))))
    }

    /// Take the stream out; later calls return `None`.
    pub fn take(&self) -> Option<BodyStream> {
        self.0.lock().take()
    }
}

/// Serialized body threaded through onSend hooks and written to the transport.
#[derive(Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    Bytes(Bytes),
    Stream(SharedStream),
}

impl Payload {
    pub fn stream(stream: BodyStream) -> Self {
        Payload::Stream(SharedStream::new(stream))
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// UTF-8 view of a byte payload.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Known length; streams have none.
    pub fn len(&self) -> Option<usize> {
        match self {
            Payload::Empty => Some(0),
            Payload::Bytes(b) => Some(b.len()),
            Payload::Stream(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Payload::Stream(_))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Empty => f.write_str("Empty"),
            Payload::Bytes(b) => f.debug_tuple("Bytes").field(b).finish(),
            Payload::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Bytes(Bytes::from(value))
    }
}

impl From<&'static str> for Payload {
    fn from(value: &'static str) -> Self {
        Payload::Bytes(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Bytes(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(value))
    }
}
