// Response bodies handed to the transport

use crate::body::BodyStream;
use crate::error::BoxError;
use crate::hook_runner::run_finished_hooks;
use crate::reply::Reply;
use crate::request::Request;
use bytes::Bytes;
use futures_util::StreamExt;
use http::{HeaderMap, StatusCode};
use hyper::body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::{Instrument, debug, error, info};

/// Called when a response fails after its headers were written.
pub type TransportErrorFn = Arc<dyn Fn(&Request, &BoxError) + Send + Sync>;

pub(crate) fn log_transport_error() -> TransportErrorFn {
    Arc::new(|request: &Request, err: &BoxError| {
        error!(parent: request.span(), error = %err, "response stream failed after headers were sent");
    })
}

/// Body contents of a committed response.
pub(crate) enum BodyKind {
    Empty,
    Full(Option<Bytes>),
    Stream {
        first: Option<Bytes>,
        rest: BodyStream,
    },
}

/// Status, headers and body ready to be written.
pub(crate) struct Prepared {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: BodyKind,
}

impl Prepared {
    pub fn into_response(
        self,
        finish: FinishNotifier,
        on_error: TransportErrorFn,
    ) -> http::Response<ResponseBody> {
        let request = finish.request.clone();
        let body = ResponseBody {
            kind: self.body,
            finish: Some(finish),
            on_error: Some((on_error, request)),
        };
        let mut response = http::Response::new(body);
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        *response.headers_mut() = self.headers;
        response
    }
}

/// Fires the end-of-request work exactly once: when the body is fully
/// written, or when the response or request future is dropped.
pub(crate) struct FinishNotifier {
    request: Request,
    reply: Reply,
    started: Instant,
    log: bool,
}

impl FinishNotifier {
    pub fn new(request: Request, reply: Reply, started: Instant, log: bool) -> Self {
        Self {
            request,
            reply,
            started,
            log,
        }
    }
}

impl Drop for FinishNotifier {
    fn drop(&mut self) {
        self.request.set_body(None);

        if self.log {
            let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
            if self.reply.is_committed() {
                info!(
                    parent: self.request.span(),
                    status = self.reply.status(),
                    response_time_ms = elapsed_ms,
                    "request completed"
                );
            } else {
                info!(
                    parent: self.request.span(),
                    response_time_ms = elapsed_ms,
                    "request aborted before the response was sent"
                );
            }
        }

        let context = self.reply.context();
        let Some(hooks) = context.hooks.on_finished.clone() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                let request = self.request.clone();
                let reply = self.reply.clone();
                let span = request.span().clone();
                handle.spawn(
                    async move { run_finished_hooks(Some(&hooks), &request, &reply).await }
                        .instrument(span),
                );
            }
            Err(_) => debug!("no runtime available, onFinished hooks skipped"),
        }
    }
}

/// Body of a response produced by the engine.
pub struct ResponseBody {
    kind: BodyKind,
    finish: Option<FinishNotifier>,
    on_error: Option<(TransportErrorFn, Request)>,
}

impl ResponseBody {
    /// Whether the whole body is known up front.
    pub fn is_buffered(&self) -> bool {
        !matches!(self.kind, BodyKind::Stream { .. })
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let this = self.get_mut();
        let polled = match &mut this.kind {
            BodyKind::Empty => Poll::Ready(None),
            BodyKind::Full(data) => Poll::Ready(data.take().map(|b| Ok(Frame::data(b)))),
            BodyKind::Stream { first, rest } => match first.take() {
                Some(chunk) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
                None => rest
                    .poll_next_unpin(cx)
                    .map(|item| item.map(|chunk| chunk.map(Frame::data))),
            },
        };

        match &polled {
            Poll::Ready(None) => {
                this.finish.take();
            }
            Poll::Ready(Some(Err(err))) => {
                if let Some((on_error, request)) = this.on_error.take() {
                    on_error(&request, err);
                }
                this.finish.take();
            }
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.kind, BodyKind::Empty | BodyKind::Full(None))
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            BodyKind::Empty | BodyKind::Full(None) => SizeHint::with_exact(0),
            BodyKind::Full(Some(data)) => SizeHint::with_exact(data.len() as u64),
            BodyKind::Stream { .. } => SizeHint::default(),
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            BodyKind::Empty => "empty",
            BodyKind::Full(_) => "full",
            BodyKind::Stream { .. } => "stream",
        };
        f.debug_struct("ResponseBody").field("kind", &kind).finish()
    }
}
