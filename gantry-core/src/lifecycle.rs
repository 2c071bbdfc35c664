//! The request lifecycle.
//!
//! ```text
//! onRequest -> body parsing -> preHandler -> handler -> serialize -> onSend -> transmit
//!                  \______________ any failure ______________/
//!                                   |
//!                     onError -> error handler -> serialize -> onSend -> transmit
//! ```
//!
//! A terminal operation on the reply (send, error, call_not_found) ends the
//! request phase early: remaining hooks are skipped and the recorded outcome
//! is processed. onFinished hooks run from [`FinishNotifier`] once the
//! response is out or the client is gone.
//!
//! [`FinishNotifier`]: crate::transmit::FinishNotifier

use crate::body::{Payload, ReplyBody};
use crate::content_type::parse_request_body;
use crate::engine::Engine;
use crate::error::{Error, status_text};
use crate::hook_runner::{Flow, run_error_hooks, run_request_hooks, run_send_hooks, until_sent};
use crate::reply::{Outcome, Reply};
use crate::request::Request;
use crate::route::RouteContext;
use crate::transmit::{BodyKind, Prepared};
use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{self, HeaderMap, HeaderValue};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

const JSON_CONTENT_TYPE: &str = "application/json";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    error: &'static str,
    message: String,
}

/// Next thing the lifecycle has to do.
enum Step {
    Send(ReplyBody),
    Fail(Error),
    NotFound,
    Done(Prepared),
}

impl From<Outcome> for Step {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Body(body) => Step::Send(body),
            Outcome::Error(err) => Step::Fail(err),
            Outcome::NotFound => Step::NotFound,
        }
    }
}

/// Outcome of a reply a hook or handler has sent.
fn sent_step(reply: &Reply) -> Step {
    match reply.take_outcome() {
        Some(outcome) => outcome.into(),
        None => Step::Fail(Error::Internal(
            "reply marked as sent without an outcome".to_string(),
        )),
    }
}

/// A failing hook or handler; late failures lose to the sent reply.
fn failed_step(reply: &Reply, err: Error) -> Step {
    if reply.is_sent() {
        warn!(error = %err, "failure after the reply was sent, keeping the sent reply");
        sent_step(reply)
    } else {
        Step::Fail(err)
    }
}

fn fixed_response(reply: &Reply, status: u16, content_type: &'static str, body: &'static str) -> Prepared {
    let _ = reply.code(status);
    reply.commit();
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    Prepared {
        status,
        headers,
        body: BodyKind::Full(Some(Bytes::from_static(body.as_bytes()))),
    }
}

/// Last-resort response when rendering an error fails.
fn fallback_500(reply: &Reply) -> Prepared {
    fixed_response(
        reply,
        500,
        JSON_CONTENT_TYPE,
        r#"{"statusCode":500,"error":"Internal Server Error","message":"Failed to render error response"}"#,
    )
}

/// Answer for a not-found handler that itself asks for not-found handling.
fn minimal_404(reply: &Reply) -> Prepared {
    fixed_response(reply, 404, TEXT_CONTENT_TYPE, "404 Not Found")
}

impl Engine {
    /// Drive one request through its route context.
    pub(crate) async fn run_lifecycle(
        &self,
        context: Arc<RouteContext>,
        request: &Request,
        reply: &Reply,
    ) -> Prepared {
        let mut step = self.run_route(&context, request, reply).await;
        loop {
            step = match step {
                Step::Done(prepared) => return prepared,
                Step::Send(body) => match self.send(request, reply, body).await {
                    Ok(prepared) => Step::Done(prepared),
                    Err(err) if reply.is_error() => {
                        error!(error = %err, "failed to send error response");
                        Step::Done(fallback_500(reply))
                    }
                    Err(err) => Step::Fail(err),
                },
                Step::Fail(err) => self.on_error(request, reply, err).await,
                Step::NotFound => self.call_not_found(request, reply).await,
            };
        }
    }

    async fn run_route(&self, context: &Arc<RouteContext>, request: &Request, reply: &Reply) -> Step {
        if context.is_not_found {
            let _ = reply.code(404);
        }

        match run_request_hooks(context.hooks.on_request.as_ref(), request, reply).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Sent) => return sent_step(reply),
            Err(err) => return failed_step(reply, err),
        }

        if let Err(err) = parse_request_body(
            &context.parsers,
            context.body_limit,
            context.default_body_limit,
            request,
        )
        .await
        {
            return failed_step(reply, err);
        }

        self.pre_handler_and_handler(context, request, reply).await
    }

    async fn pre_handler_and_handler(
        &self,
        context: &Arc<RouteContext>,
        request: &Request,
        reply: &Reply,
    ) -> Step {
        match run_request_hooks(context.hooks.pre_handler.as_ref(), request, reply).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Sent) => return sent_step(reply),
            Err(err) => return failed_step(reply, err),
        }

        if reply.is_sent() {
            return sent_step(reply);
        }

        let handler = context.handler.call(request.clone(), reply.clone());
        match until_sent(handler, reply).await {
            None => sent_step(reply),
            Some(Ok(Some(body))) => {
                if reply.send(body).is_err() {
                    warn!("handler returned a value after sending the reply, value ignored");
                }
                sent_step(reply)
            }
            Some(Ok(None)) => {
                reply.sent().await;
                sent_step(reply)
            }
            Some(Err(err)) => failed_step(reply, err),
        }
    }

    /// Serialize, run onSend hooks and freeze the response.
    async fn send(&self, request: &Request, reply: &Reply, body: ReplyBody) -> Result<Prepared, Error> {
        let context = reply.context();
        let payload = serialize(&context, reply, body)?;
        let payload = run_send_hooks(context.hooks.on_send.as_ref(), request, reply, payload).await?;

        let body = match payload {
            Payload::Empty => BodyKind::Empty,
            Payload::Bytes(bytes) => {
                reply.set_header_value(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                BodyKind::Full(Some(bytes))
            }
            Payload::Stream(shared) => {
                let mut stream = shared.take().ok_or_else(|| {
                    Error::Internal("stream payload was already consumed".to_string())
                })?;
                // An error before the first chunk can still become an error response.
                match stream.next().await {
                    Some(Ok(first)) => BodyKind::Stream {
                        first: Some(first),
                        rest: stream,
                    },
                    Some(Err(err)) => return Err(Error::Handler(err)),
                    None => BodyKind::Empty,
                }
            }
        };

        let (status, headers) = reply.commit();
        Ok(Prepared {
            status,
            headers,
            body,
        })
    }

    async fn on_error(&self, request: &Request, reply: &Reply, err: Error) -> Step {
        if reply.is_error() {
            error!(error = %err, "failed while rendering an error response");
            return Step::Done(fallback_500(reply));
        }
        if err.is_not_found() {
            return Step::NotFound;
        }

        if err.is_server_error() {
            error!(error = %err, "request errored");
        } else {
            info!(error = %err, "request errored");
        }

        reply.mark_error();
        if !reply.reopen() {
            return Step::Done(fallback_500(reply));
        }

        let context = reply.context();
        let err = run_error_hooks(context.hooks.on_error.as_ref(), request, reply, Arc::new(err)).await;
        if reply.is_sent() {
            return self.error_outcome(reply);
        }

        let Some(handler) = context.error_handler.clone() else {
            return self.default_error(reply, &err);
        };

        match until_sent(handler(request.clone(), reply.clone(), err.clone()), reply).await {
            Some(Ok(())) if !reply.is_sent() => {
                warn!("error handler returned without sending, using the default error response");
                self.default_error(reply, &err)
            }
            Some(Err(replacement)) if !reply.is_sent() => {
                error!(error = %replacement, "error handler failed");
                self.default_error(reply, &replacement)
            }
            _ => self.error_outcome(reply),
        }
    }

    /// Whatever the error hooks or handler sent.
    fn error_outcome(&self, reply: &Reply) -> Step {
        match reply.take_outcome() {
            Some(Outcome::Error(err)) => self.default_error(reply, &err),
            Some(outcome) => outcome.into(),
            None => Step::Done(fallback_500(reply)),
        }
    }

    /// `{statusCode, error, message}` with the error's own 4xx/5xx status,
    /// or 500.
    fn default_error(&self, reply: &Reply, err: &Error) -> Step {
        let status = err.declared_status().unwrap_or(500);
        let _ = reply.code(status);
        reply.set_header_value(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        let body = ErrorBody {
            status_code: status,
            error: status_text(status),
            message: err.message(),
        };
        match serde_json::to_value(&body) {
            Ok(value) => {
                // The response is decided; later terminal calls must fail.
                reply.mark_sent();
                Step::Send(ReplyBody::Json(value))
            }
            Err(err) => {
                error!(error = %err, "failed to build the default error body");
                Step::Done(fallback_500(reply))
            }
        }
    }

    async fn call_not_found(&self, request: &Request, reply: &Reply) -> Step {
        let current = reply.context();
        if current.is_not_found {
            warn!("not-found handling requested from a not-found handler");
            return Step::Done(minimal_404(reply));
        }

        let target = current
            .not_found
            .clone()
            .unwrap_or_else(|| self.root_not_found.clone());
        if !reply.reopen() {
            return Step::Done(minimal_404(reply));
        }
        reply.set_context(target.clone());
        request.set_decorations(target.request_decorations.clone());
        let _ = reply.code(404);

        self.pre_handler_and_handler(&target, request, reply).await
    }
}

fn serialize(context: &RouteContext, reply: &Reply, body: ReplyBody) -> Result<Payload, Error> {
    let payload = match body {
        ReplyBody::Empty => Payload::Empty,
        ReplyBody::Json(value) => {
            let out = if let Some(serializer) = context.serializer_for(reply.status()) {
                serializer(&value)?
            } else if let Some(serializer) = reply.custom_serializer() {
                serializer(&value)?
            } else {
                serde_json::to_string(&value)?
            };
            reply.set_default_header(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            Payload::from(out)
        }
        ReplyBody::Text(text) => {
            reply.set_default_header(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_CONTENT_TYPE));
            Payload::from(text)
        }
        ReplyBody::Bytes(bytes) => {
            reply.set_default_header(header::CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
            Payload::Bytes(bytes)
        }
        ReplyBody::Stream(stream) => {
            reply.set_default_header(header::CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
            Payload::stream(stream)
        }
    };
    Ok(payload)
}
