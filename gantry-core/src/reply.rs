// Per-request reply handle guarding the single-send invariant

use crate::body::ReplyBody;
use crate::decorators::DecoratorTable;
use crate::error::Error;
use crate::extensions::Extensions;
use crate::route::{RouteContext, Serializer};
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Terminal operation recorded on the reply, consumed by the lifecycle.
pub(crate) enum Outcome {
    Body(ReplyBody),
    Error(Error),
    NotFound,
}

/// Outgoing reply handle.
///
/// `send`, `error`, `redirect` and `call_not_found` are terminal: the first
/// one wins and every later call returns [`Error::ReplyAlreadySent`].
/// The lifecycle picks the recorded outcome up as soon as it is set, even
/// when it comes from a task spawned by a handler.
#[derive(Clone)]
pub struct Reply {
    inner: Arc<ReplyInner>,
}

struct ReplyInner {
    state: Mutex<ReplyState>,
    sent_tx: watch::Sender<bool>,
}

struct ReplyState {
    status: u16,
    headers: HeaderMap,
    sent: bool,
    committed: bool,
    is_error: bool,
    outcome: Option<Outcome>,
    serializer: Option<Serializer>,
    context: Arc<RouteContext>,
    state: Extensions,
}

impl Reply {
    pub(crate) fn new(context: Arc<RouteContext>) -> Self {
        let (sent_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ReplyInner {
                state: Mutex::new(ReplyState {
                    status: 200,
                    headers: HeaderMap::new(),
                    sent: false,
                    committed: false,
                    is_error: false,
                    outcome: None,
                    serializer: None,
                    context,
                    state: Extensions::new(),
                }),
                sent_tx,
            }),
        }
    }

    /// Set the status code.
    pub fn code(&self, status: u16) -> Result<&Self, Error> {
        if !(100..=599).contains(&status) {
            return Err(Error::InvalidStatusCode(status));
        }
        self.inner.state.lock().status = status;
        Ok(self)
    }

    pub fn status(&self) -> u16 {
        self.inner.state.lock().status
    }

    /// Set a response header, replacing any previous value.
    pub fn header(&self, name: &str, value: impl AsRef<str>) -> Result<&Self, Error> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidHeader(format!("invalid header name '{}'", name)))?;
        let value = HeaderValue::from_str(value.as_ref())
            .map_err(|_| Error::InvalidHeader(format!("invalid value for header '{}'", name)))?;
        self.inner.state.lock().headers.insert(name, value);
        Ok(self)
    }

    pub fn get_header(&self, name: &str) -> Option<String> {
        self.inner
            .state
            .lock()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.inner.state.lock().headers.contains_key(name)
    }

    pub fn remove_header(&self, name: &str) -> &Self {
        self.inner.state.lock().headers.remove(name);
        self
    }

    /// Set the `Content-Type` header.
    pub fn content_type(&self, value: &str) -> Result<&Self, Error> {
        self.header(header::CONTENT_TYPE.as_str(), value)
    }

    /// Serializer for JSON bodies of this reply when the route has none for the status.
    pub fn serializer<F>(&self, serializer: F) -> &Self
    where
        F: Fn(&serde_json::Value) -> Result<String, Error> + Send + Sync + 'static,
    {
        self.inner.state.lock().serializer = Some(Arc::new(serializer));
        self
    }

    /// Send a body.
    pub fn send(&self, body: impl Into<ReplyBody>) -> Result<(), Error> {
        self.finish(Outcome::Body(body.into()))
    }

    /// Serialize `value` and send it as JSON.
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<(), Error> {
        let body = ReplyBody::json(value)?;
        self.send(body)
    }

    /// End the request through the error path.
    pub fn error(&self, err: Error) -> Result<(), Error> {
        self.finish(Outcome::Error(err))
    }

    /// Redirect with `302 Found`.
    pub fn redirect(&self, url: &str) -> Result<(), Error> {
        self.redirect_with(StatusCode::FOUND.as_u16(), url)
    }

    pub fn redirect_with(&self, status: u16, url: &str) -> Result<(), Error> {
        if self.is_sent() {
            return Err(Error::ReplyAlreadySent);
        }
        self.header(header::LOCATION.as_str(), url)?.code(status)?;
        self.send(ReplyBody::Empty)
    }

    /// Hand the request over to the not-found handler of the route's scope.
    pub fn call_not_found(&self) -> Result<(), Error> {
        self.finish(Outcome::NotFound)
    }

    /// Whether a terminal operation has been called.
    pub fn is_sent(&self) -> bool {
        self.inner.state.lock().sent
    }

    /// Attach typed application state to this reply.
    pub fn set_state<T: Send + Sync + 'static>(&self, value: T) {
        self.inner.state.lock().state.insert(value);
    }

    pub fn state<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner.state.lock().state.get::<T>()
    }

    /// Reply decorator visible from the serving context's scope.
    pub fn decoration<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.decorations().get::<T>(name)
    }

    pub fn has_decoration(&self, name: &str) -> bool {
        self.decorations().contains(name)
    }

    fn decorations(&self) -> Arc<DecoratorTable> {
        self.inner.state.lock().context.reply_decorations.clone()
    }

    /// Route context currently serving this reply.
    pub fn context(&self) -> Arc<RouteContext> {
        self.inner.state.lock().context.clone()
    }

    /// Route config of the serving context.
    pub fn config(&self) -> serde_json::Value {
        self.inner.state.lock().context.config.clone()
    }

    fn finish(&self, outcome: Outcome) -> Result<(), Error> {
        {
            let mut state = self.inner.state.lock();
            if state.sent {
                return Err(Error::ReplyAlreadySent);
            }
            state.sent = true;
            state.outcome = Some(outcome);
        }
        self.inner.sent_tx.send_replace(true);
        Ok(())
    }

    // ----- lifecycle internals -----

    pub(crate) fn take_outcome(&self) -> Option<Outcome> {
        self.inner.state.lock().outcome.take()
    }

    /// Allow the error or not-found path to send again. No-op once headers
    /// are committed.
    pub(crate) fn reopen(&self) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.committed {
                return false;
            }
            state.sent = false;
            state.outcome = None;
        }
        self.inner.sent_tx.send_replace(false);
        true
    }

    /// Close the reply for a response the lifecycle built itself.
    pub(crate) fn mark_sent(&self) {
        self.inner.state.lock().sent = true;
        self.inner.sent_tx.send_replace(true);
    }

    /// Wait until a terminal operation has been called.
    pub(crate) async fn sent(&self) {
        let mut rx = self.inner.sent_tx.subscribe();
        // The sender lives as long as `self`, so this only returns once sent.
        let _ = rx.wait_for(|sent| *sent).await;
    }

    pub(crate) fn is_committed(&self) -> bool {
        self.inner.state.lock().committed
    }

    pub(crate) fn mark_error(&self) {
        self.inner.state.lock().is_error = true;
    }

    pub(crate) fn is_error(&self) -> bool {
        self.inner.state.lock().is_error
    }

    pub(crate) fn set_context(&self, context: Arc<RouteContext>) {
        self.inner.state.lock().context = context;
    }

    pub(crate) fn custom_serializer(&self) -> Option<Serializer> {
        self.inner.state.lock().serializer.clone()
    }

    pub(crate) fn set_default_header(&self, name: HeaderName, value: HeaderValue) {
        let mut state = self.inner.state.lock();
        if !state.headers.contains_key(&name) {
            state.headers.insert(name, value);
        }
    }

    pub(crate) fn set_header_value(&self, name: HeaderName, value: HeaderValue) {
        self.inner.state.lock().headers.insert(name, value);
    }

    /// Freeze status and headers for transmission.
    pub(crate) fn commit(&self) -> (u16, HeaderMap) {
        let mut state = self.inner.state.lock();
        state.committed = true;
        state.sent = true;
        (state.status, state.headers.clone())
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Reply")
            .field("status", &state.status)
            .field("sent", &state.sent)
            .finish()
    }
}
