//! Sequential hook execution.
//!
//! Hooks of one phase run strictly one after another. Request phases are
//! gated on the reply: once it has been sent, the remaining hooks are
//! skipped, and a hook still running when the reply is sent is detached so
//! the lifecycle can move on.

use crate::body::Payload;
use crate::error::Error;
use crate::hooks::{ErrorHookFn, RequestHookFn, SendHookFn};
use crate::reply::Reply;
use crate::request::Request;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Where a request-phase run left the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Sent,
}

/// Drive `fut` until it completes or the reply is sent, whichever is first.
///
/// Returns `None` when the reply won; the future keeps running in the
/// background and its result is only logged.
pub(crate) async fn until_sent<T>(
    mut fut: BoxFuture<'static, Result<T, Error>>,
    reply: &Reply,
) -> Option<Result<T, Error>>
where
    T: Send + 'static,
{
    tokio::select! {
        biased;
        result = &mut fut => return Some(result),
        _ = reply.sent() => {}
    }

    trace!("reply sent while a hook or handler was pending, detaching it");
    tokio::spawn(async move {
        if let Err(err) = fut.await {
            debug!(error = %err, "detached task failed after reply was sent");
        }
    });
    None
}

/// Run onRequest or preHandler hooks.
pub(crate) async fn run_request_hooks(
    hooks: Option<&Arc<[RequestHookFn]>>,
    request: &Request,
    reply: &Reply,
) -> Result<Flow, Error> {
    let Some(hooks) = hooks else {
        return Ok(Flow::Continue);
    };

    for (index, hook) in hooks.iter().enumerate() {
        if reply.is_sent() {
            trace!(hook_index = index, "reply sent, skipping remaining hooks");
            return Ok(Flow::Sent);
        }
        match until_sent(hook(request.clone(), reply.clone()), reply).await {
            Some(result) => result?,
            None => return Ok(Flow::Sent),
        }
    }

    Ok(if reply.is_sent() {
        Flow::Sent
    } else {
        Flow::Continue
    })
}

/// Run onSend hooks, threading the payload through.
pub(crate) async fn run_send_hooks(
    hooks: Option<&Arc<[SendHookFn]>>,
    request: &Request,
    reply: &Reply,
    mut payload: Payload,
) -> Result<Payload, Error> {
    let Some(hooks) = hooks else {
        return Ok(payload);
    };

    for hook in hooks.iter() {
        if let Some(replacement) = hook(request.clone(), reply.clone(), payload.clone()).await? {
            payload = replacement;
        }
    }
    Ok(payload)
}

/// Run onError hooks. A hook failing with a new error replaces the error
/// the following hooks see. Stops as soon as a hook sends.
pub(crate) async fn run_error_hooks(
    hooks: Option<&Arc<[ErrorHookFn]>>,
    request: &Request,
    reply: &Reply,
    mut error: Arc<Error>,
) -> Arc<Error> {
    let Some(hooks) = hooks else {
        return error;
    };

    for hook in hooks.iter() {
        if reply.is_sent() {
            break;
        }
        match until_sent(hook(request.clone(), reply.clone(), error.clone()), reply).await {
            Some(Ok(())) => {}
            Some(Err(replacement)) => {
                debug!(error = %replacement, "onError hook replaced the error");
                error = Arc::new(replacement);
            }
            None => break,
        }
    }
    error
}

/// Run onFinished hooks. Failures are logged; the response is already out.
pub(crate) async fn run_finished_hooks(
    hooks: Option<&Arc<[RequestHookFn]>>,
    request: &Request,
    reply: &Reply,
) {
    let Some(hooks) = hooks else {
        return;
    };

    for hook in hooks.iter() {
        if let Err(err) = hook(request.clone(), reply.clone()).await {
            warn!(error = %err, "onFinished hook failed");
        }
    }
}
