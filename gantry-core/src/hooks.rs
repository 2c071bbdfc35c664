// Lifecycle hooks: phases, callback/async normalization and hook chains

use crate::body::Payload;
use crate::error::Error;
use crate::reply::Reply;
use crate::request::Request;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Lifecycle phase a hook belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    OnRequest,
    PreHandler,
    OnSend,
    OnFinished,
    OnError,
}

impl HookPhase {
    pub const ALL: [HookPhase; 5] = [
        HookPhase::OnRequest,
        HookPhase::PreHandler,
        HookPhase::OnSend,
        HookPhase::OnFinished,
        HookPhase::OnError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::OnRequest => "onRequest",
            HookPhase::PreHandler => "preHandler",
            HookPhase::OnSend => "onSend",
            HookPhase::OnFinished => "onFinished",
            HookPhase::OnError => "onError",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Normalized continuation types. Every hook, whatever form it was registered
// in, is stored as one of these.
pub(crate) type RequestHookFn =
    Arc<dyn Fn(Request, Reply) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;
pub(crate) type SendHookFn = Arc<
    dyn Fn(Request, Reply, Payload) -> BoxFuture<'static, Result<Option<Payload>, Error>>
        + Send
        + Sync,
>;
pub(crate) type ErrorHookFn =
    Arc<dyn Fn(Request, Reply, Arc<Error>) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// Continuation handed to callback-style hooks.
///
/// Call it exactly once. A `Next` that is dropped without being called
/// stalls the request, the same as a hook that never completes.
pub struct Next<T> {
    tx: oneshot::Sender<Result<T, Error>>,
}

impl<T> Next<T> {
    fn channel() -> (Self, oneshot::Receiver<Result<T, Error>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Resume the chain with `result`; `Err` short-circuits to onError.
    pub fn call(self, result: Result<T, Error>) {
        let _ = self.tx.send(result);
    }

    pub fn fail(self, err: Error) {
        self.call(Err(err))
    }
}

impl Next<()> {
    pub fn proceed(self) {
        self.call(Ok(()))
    }
}

impl Next<Option<Payload>> {
    /// Continue with the current payload unchanged.
    pub fn proceed(self) {
        self.call(Ok(None))
    }

    /// Continue with a replacement payload.
    pub fn replace(self, payload: Payload) {
        self.call(Ok(Some(payload)))
    }
}

async fn resume<T>(rx: oneshot::Receiver<Result<T, Error>>) -> Result<T, Error> {
    match rx.await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("hook dropped its continuation without calling it; request stalls");
            std::future::pending().await
        }
    }
}

/// Struct-based hook for the request phases (onRequest, preHandler, onFinished).
#[async_trait]
pub trait LifecycleHook: Send + Sync + 'static {
    async fn run(&self, request: &Request, reply: &Reply) -> Result<(), Error>;
}

/// Hook for onRequest, preHandler and onFinished.
#[derive(Clone)]
pub enum RequestHook {
    Callback(Arc<dyn Fn(Request, Reply, Next<()>) + Send + Sync>),
    Async(RequestHookFn),
}

impl RequestHook {
    /// Hook returning a future.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        RequestHook::Async(Arc::new(move |req, reply| Box::pin(f(req, reply))))
    }

    /// Hook signalling completion through `next`.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Request, Reply, Next<()>) + Send + Sync + 'static,
    {
        RequestHook::Callback(Arc::new(f))
    }

    pub fn from_hook<H: LifecycleHook>(hook: H) -> Self {
        let hook = Arc::new(hook);
        RequestHook::Async(Arc::new(move |req, reply| {
            let hook = hook.clone();
            Box::pin(async move { hook.run(&req, &reply).await })
        }))
    }

    pub(crate) fn normalize(self) -> RequestHookFn {
        match self {
            RequestHook::Async(f) => f,
            RequestHook::Callback(f) => Arc::new(move |req, reply| {
                let (next, rx) = Next::channel();
                f(req, reply, next);
                Box::pin(resume(rx))
            }),
        }
    }
}

/// Hook for onSend. Returning `Some` replaces the payload.
#[derive(Clone)]
pub enum SendHook {
    Callback(Arc<dyn Fn(Request, Reply, Payload, Next<Option<Payload>>) + Send + Sync>),
    Async(SendHookFn),
}

impl SendHook {
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Reply, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Payload>, Error>> + Send + 'static,
    {
        SendHook::Async(Arc::new(move |req, reply, payload| {
            Box::pin(f(req, reply, payload))
        }))
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Request, Reply, Payload, Next<Option<Payload>>) + Send + Sync + 'static,
    {
        SendHook::Callback(Arc::new(f))
    }

    pub(crate) fn normalize(self) -> SendHookFn {
        match self {
            SendHook::Async(f) => f,
            SendHook::Callback(f) => Arc::new(move |req, reply, payload| {
                let (next, rx) = Next::channel();
                f(req, reply, payload, next);
                Box::pin(resume(rx))
            }),
        }
    }
}

/// Hook for onError. Failing with a new error replaces the error seen by
/// the following hooks and the error handler.
#[derive(Clone)]
pub enum ErrorHook {
    Callback(Arc<dyn Fn(Request, Reply, Arc<Error>, Next<()>) + Send + Sync>),
    Async(ErrorHookFn),
}

impl ErrorHook {
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Reply, Arc<Error>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        ErrorHook::Async(Arc::new(move |req, reply, err| Box::pin(f(req, reply, err))))
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Request, Reply, Arc<Error>, Next<()>) + Send + Sync + 'static,
    {
        ErrorHook::Callback(Arc::new(f))
    }

    pub(crate) fn normalize(self) -> ErrorHookFn {
        match self {
            ErrorHook::Async(f) => f,
            ErrorHook::Callback(f) => Arc::new(move |req, reply, err| {
                let (next, rx) = Next::channel();
                f(req, reply, err, next);
                Box::pin(resume(rx))
            }),
        }
    }
}

/// A hook tagged with its phase, as accepted by `Scope::add_hook`.
#[derive(Clone)]
pub enum Hook {
    OnRequest(RequestHook),
    PreHandler(RequestHook),
    OnSend(SendHook),
    OnFinished(RequestHook),
    OnError(ErrorHook),
}

impl Hook {
    pub fn phase(&self) -> HookPhase {
        match self {
            Hook::OnRequest(_) => HookPhase::OnRequest,
            Hook::PreHandler(_) => HookPhase::PreHandler,
            Hook::OnSend(_) => HookPhase::OnSend,
            Hook::OnFinished(_) => HookPhase::OnFinished,
            Hook::OnError(_) => HookPhase::OnError,
        }
    }

    pub(crate) fn normalize(self) -> NormalizedHook {
        match self {
            Hook::OnRequest(h) => NormalizedHook::OnRequest(h.normalize()),
            Hook::PreHandler(h) => NormalizedHook::PreHandler(h.normalize()),
            Hook::OnSend(h) => NormalizedHook::OnSend(h.normalize()),
            Hook::OnFinished(h) => NormalizedHook::OnFinished(h.normalize()),
            Hook::OnError(h) => NormalizedHook::OnError(h.normalize()),
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hook").field(&self.phase()).finish()
    }
}

#[derive(Clone)]
pub(crate) enum NormalizedHook {
    OnRequest(RequestHookFn),
    PreHandler(RequestHookFn),
    OnSend(SendHookFn),
    OnFinished(RequestHookFn),
    OnError(ErrorHookFn),
}

/// Per-scope hook lists, one per phase. Cloned on fork.
#[derive(Clone, Default)]
pub(crate) struct HookChains {
    pub on_request: Vec<RequestHookFn>,
    pub pre_handler: Vec<RequestHookFn>,
    pub on_send: Vec<SendHookFn>,
    pub on_finished: Vec<RequestHookFn>,
    pub on_error: Vec<ErrorHookFn>,
}

impl HookChains {
    pub fn push(&mut self, hook: NormalizedHook) {
        match hook {
            NormalizedHook::OnRequest(h) => self.on_request.push(h),
            NormalizedHook::PreHandler(h) => self.pre_handler.push(h),
            NormalizedHook::OnSend(h) => self.on_send.push(h),
            NormalizedHook::OnFinished(h) => self.on_finished.push(h),
            NormalizedHook::OnError(h) => self.on_error.push(h),
        }
    }

    pub fn len(&self, phase: HookPhase) -> usize {
        match phase {
            HookPhase::OnRequest => self.on_request.len(),
            HookPhase::PreHandler => self.pre_handler.len(),
            HookPhase::OnSend => self.on_send.len(),
            HookPhase::OnFinished => self.on_finished.len(),
            HookPhase::OnError => self.on_error.len(),
        }
    }

    /// Frozen snapshot; empty phases become `None` and are skipped.
    pub fn freeze(&self) -> FrozenHooks {
        fn frozen<T: Clone>(hooks: &[T]) -> Option<Arc<[T]>> {
            (!hooks.is_empty()).then(|| Arc::from(hooks))
        }
        FrozenHooks {
            on_request: frozen(&self.on_request),
            pre_handler: frozen(&self.pre_handler),
            on_send: frozen(&self.on_send),
            on_finished: frozen(&self.on_finished),
            on_error: frozen(&self.on_error),
        }
    }
}

/// Hook arrays of a finalized route context.
#[derive(Clone, Default)]
pub struct FrozenHooks {
    pub(crate) on_request: Option<Arc<[RequestHookFn]>>,
    pub(crate) pre_handler: Option<Arc<[RequestHookFn]>>,
    pub(crate) on_send: Option<Arc<[SendHookFn]>>,
    pub(crate) on_finished: Option<Arc<[RequestHookFn]>>,
    pub(crate) on_error: Option<Arc<[ErrorHookFn]>>,
}

impl FrozenHooks {
    /// Number of hooks in `phase`.
    pub fn count(&self, phase: HookPhase) -> usize {
        match phase {
            HookPhase::OnRequest => self.on_request.as_ref().map_or(0, |h| h.len()),
            HookPhase::PreHandler => self.pre_handler.as_ref().map_or(0, |h| h.len()),
            HookPhase::OnSend => self.on_send.as_ref().map_or(0, |h| h.len()),
            HookPhase::OnFinished => self.on_finished.as_ref().map_or(0, |h| h.len()),
            HookPhase::OnError => self.on_error.as_ref().map_or(0, |h| h.len()),
        }
    }
}

impl fmt::Debug for FrozenHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("FrozenHooks");
        for phase in HookPhase::ALL {
            s.field(phase.as_str(), &self.count(phase));
        }
        s.finish()
    }
}
