// Route declarations and finalized route contexts

use crate::body::{IntoReplyBody, ReplyBody};
use crate::content_type::ContentTypeParsers;
use crate::decorators::DecoratorTable;
use crate::error::{Error, RegistrationError};
use crate::hooks::{ErrorHookFn, FrozenHooks};
use crate::reply::Reply;
use crate::request::Request;
use futures_util::future::BoxFuture;
use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Response serializer for JSON bodies.
pub type Serializer = Arc<dyn Fn(&Value) -> Result<String, Error> + Send + Sync>;

/// Custom error handler of a scope.
pub(crate) type ErrorHandlerFn = ErrorHookFn;

/// A route handler.
///
/// Implemented for every `Fn(Request, Reply) -> impl Future<Output =
/// Result<impl IntoReplyBody, Error>>`. Returning a body sends it;
/// returning `()` leaves sending to the handler.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Request, reply: Reply)
    -> BoxFuture<'static, Result<Option<ReplyBody>, Error>>;
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: IntoReplyBody,
{
    fn call(
        &self,
        request: Request,
        reply: Reply,
    ) -> BoxFuture<'static, Result<Option<ReplyBody>, Error>> {
        let fut = (self)(request, reply);
        Box::pin(async move { fut.await?.into_reply_body() })
    }
}

/// Type-erased handler stored in route contexts.
pub(crate) type BoxedHandler = Arc<dyn Handler>;

/// Which response status a serializer applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusMatch {
    /// Exact status code, e.g. `"201"`.
    Code(u16),
    /// Status class, e.g. `"2xx"`.
    Class(u16),
}

impl StatusMatch {
    pub fn parse(key: &str) -> Option<Self> {
        let key = key.trim().to_ascii_lowercase();
        if let Some(class) = key.strip_suffix("xx") {
            return match class.parse::<u16>() {
                Ok(c @ 1..=5) if class.len() == 1 => Some(StatusMatch::Class(c)),
                _ => None,
            };
        }
        match key.parse::<u16>() {
            Ok(code @ 100..=599) => Some(StatusMatch::Code(code)),
            _ => None,
        }
    }
}

/// Per-route serializers keyed by status code or class.
#[derive(Clone, Default)]
pub struct SerializerMap {
    by_code: HashMap<u16, Serializer>,
    by_class: HashMap<u16, Serializer>,
}

impl SerializerMap {
    pub fn insert(&mut self, status: StatusMatch, serializer: Serializer) {
        match status {
            StatusMatch::Code(code) => self.by_code.insert(code, serializer),
            StatusMatch::Class(class) => self.by_class.insert(class, serializer),
        };
    }

    /// Exact code first, then the status class.
    pub fn for_status(&self, status: u16) -> Option<&Serializer> {
        self.by_code
            .get(&status)
            .or_else(|| self.by_class.get(&(status / 100)))
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty() && self.by_class.is_empty()
    }
}

/// Route declaration.
///
/// ```ignore
/// app.route(
///     RouteOptions::new(Method::POST, "/users", create_user)
///         .body_limit(16 * 1024)
///         .config(json!({ "audit": true })),
/// )?;
/// ```
pub struct RouteOptions {
    pub(crate) methods: Vec<Method>,
    pub(crate) url: String,
    pub(crate) handler: BoxedHandler,
    pub(crate) body_limit: Option<usize>,
    pub(crate) config: Value,
    pub(crate) serializers: Vec<(String, Serializer)>,
}

impl RouteOptions {
    pub fn new<H: Handler>(method: Method, url: impl Into<String>, handler: H) -> Self {
        Self::with_methods(vec![method], url, handler)
    }

    pub fn with_methods<H: Handler>(
        methods: Vec<Method>,
        url: impl Into<String>,
        handler: H,
    ) -> Self {
        Self {
            methods,
            url: url.into(),
            handler: Arc::new(handler),
            body_limit: None,
            config: Value::Null,
            serializers: Vec::new(),
        }
    }

    /// Maximum accepted request body size for this route.
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = Some(limit);
        self
    }

    /// Arbitrary route config, available as `reply.config()`.
    pub fn config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Serializer for responses whose status matches `status` (`"200"`, `"2xx"`).
    pub fn serializer<F>(mut self, status: &str, serializer: F) -> Self
    where
        F: Fn(&Value) -> Result<String, Error> + Send + Sync + 'static,
    {
        let serializer: Serializer = Arc::new(serializer);
        self.serializers.push((status.to_string(), serializer));
        self
    }

    pub(crate) fn build_serializers(&self) -> Result<SerializerMap, RegistrationError> {
        let mut map = SerializerMap::default();
        for (key, serializer) in &self.serializers {
            let status = StatusMatch::parse(key).ok_or_else(|| RegistrationError::InvalidRoute {
                path: self.url.clone(),
                reason: format!("invalid serializer status '{}'", key),
            })?;
            map.insert(status, serializer.clone());
        }
        Ok(map)
    }
}

/// Route captured at declaration, finalized at the load checkpoint.
pub(crate) struct RouteContextBuilder {
    pub scope: usize,
    pub method: String,
    pub url: String,
    pub handler: BoxedHandler,
    pub body_limit: Option<usize>,
    pub config: Value,
    pub serializers: SerializerMap,
}

/// Everything a route takes from its owning scope at load.
pub(crate) struct ScopeSnapshot {
    pub prefix: String,
    pub hooks: FrozenHooks,
    pub parsers: Arc<ContentTypeParsers>,
    pub request_decorations: Arc<DecoratorTable>,
    pub reply_decorations: Arc<DecoratorTable>,
    pub error_handler: Option<ErrorHandlerFn>,
    pub default_body_limit: usize,
    pub not_found: Option<Arc<RouteContext>>,
}

impl RouteContextBuilder {
    /// Freeze the route against its scope's final state.
    pub fn finalize(self, scope: &ScopeSnapshot) -> RouteContext {
        RouteContext {
            method: self.method,
            url: self.url,
            prefix: scope.prefix.clone(),
            handler: self.handler,
            hooks: scope.hooks.clone(),
            serializers: self.serializers,
            body_limit: self.body_limit,
            default_body_limit: scope.default_body_limit,
            config: self.config,
            parsers: scope.parsers.clone(),
            error_handler: scope.error_handler.clone(),
            not_found: scope.not_found.clone(),
            request_decorations: scope.request_decorations.clone(),
            reply_decorations: scope.reply_decorations.clone(),
            is_not_found: false,
        }
    }
}

/// Finalized, read-only execution plan for one route.
pub struct RouteContext {
    pub(crate) method: String,
    pub(crate) url: String,
    pub(crate) prefix: String,
    pub(crate) handler: BoxedHandler,
    pub(crate) hooks: FrozenHooks,
    pub(crate) serializers: SerializerMap,
    pub(crate) body_limit: Option<usize>,
    pub(crate) default_body_limit: usize,
    pub(crate) config: Value,
    pub(crate) parsers: Arc<ContentTypeParsers>,
    pub(crate) error_handler: Option<ErrorHandlerFn>,
    pub(crate) not_found: Option<Arc<RouteContext>>,
    pub(crate) request_decorations: Arc<DecoratorTable>,
    pub(crate) reply_decorations: Arc<DecoratorTable>,
    pub(crate) is_not_found: bool,
}

impl RouteContext {
    /// Build a not-found context for a scope.
    pub(crate) fn not_found(handler: BoxedHandler, scope: &ScopeSnapshot) -> Self {
        RouteContext {
            method: "*".to_string(),
            url: format!("{}*", scope.prefix),
            prefix: scope.prefix.clone(),
            handler,
            hooks: scope.hooks.clone(),
            serializers: SerializerMap::default(),
            body_limit: None,
            default_body_limit: scope.default_body_limit,
            config: Value::Null,
            parsers: scope.parsers.clone(),
            error_handler: scope.error_handler.clone(),
            not_found: None,
            request_decorations: scope.request_decorations.clone(),
            reply_decorations: scope.reply_decorations.clone(),
            is_not_found: true,
        }
    }

    /// Declared method, `"*"` for not-found contexts.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Declared path including the scope prefix.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn hooks(&self) -> &FrozenHooks {
        &self.hooks
    }

    /// Route-level body limit, if one was declared.
    pub fn body_limit(&self) -> Option<usize> {
        self.body_limit
    }

    pub fn is_not_found_context(&self) -> bool {
        self.is_not_found
    }

    pub fn has_error_handler(&self) -> bool {
        self.error_handler.is_some()
    }

    pub(crate) fn serializer_for(&self, status: u16) -> Option<&Serializer> {
        self.serializers.for_status(status)
    }
}

impl fmt::Debug for RouteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteContext")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("hooks", &self.hooks)
            .field("body_limit", &self.body_limit)
            .field("not_found", &self.is_not_found)
            .finish()
    }
}
