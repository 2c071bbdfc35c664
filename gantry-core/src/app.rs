//! Application builder.
//!
//! An [`App`] collects routes, hooks, decorators and plugins until
//! [`App::ready`] is called. Loading freezes every scope into the route
//! contexts it owns and builds the route table; from then on every
//! registration call fails with [`RegistrationError::AlreadyLoaded`].
//!
//! ```ignore
//! let mut app = App::new();
//! app.on_request(|req, _reply| async move {
//!     tracing::debug!(path = %req.path(), "onRequest");
//!     Ok(())
//! })?;
//! app.get("/health", |_req, _reply| async { Ok::<_, Error>("ok") })?;
//! app.register(PluginOptions::prefixed("/v1"), |v1| {
//!     v1.get("/users/:id", get_user)?;
//!     Ok(())
//! })?;
//!
//! let engine = app.ready()?;
//! engine.listen("0.0.0.0:3000").await?;
//! ```

use crate::body::Payload;
use crate::config::AppOptions;
use crate::content_type::ContentTypeParser;
use crate::decorators::DecoratorTable;
use crate::engine::Engine;
use crate::error::{BoxError, Error, RegistrationError};
use crate::hooks::Hook;
use crate::reply::Reply;
use crate::request::Request;
use crate::route::{BoxedHandler, Handler, RouteContext, RouteOptions, ScopeSnapshot};
use crate::router::Router;
use crate::scope::{PluginOptions, ROOT, Registry, Scope};
use crate::transmit::{TransportErrorFn, log_transport_error};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

enum Stage {
    Open(Box<Registry>),
    Loaded(Arc<Engine>),
}

/// Application under construction.
pub struct App {
    stage: Stage,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.stage {
            Stage::Open(registry) => f
                .debug_struct("App")
                .field("loaded", &false)
                .field("scopes", &registry.scopes.len())
                .field("routes", &registry.routes.len())
                .finish(),
            Stage::Loaded(engine) => f
                .debug_struct("App")
                .field("loaded", &true)
                .field("engine", engine)
                .finish(),
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self::with_options(AppOptions::default())
    }

    pub fn with_options(options: AppOptions) -> Self {
        Self {
            stage: Stage::Open(Box::new(Registry::new(options))),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.stage, Stage::Loaded(_))
    }

    fn registry(&mut self) -> Result<&mut Registry, RegistrationError> {
        match &mut self.stage {
            Stage::Open(registry) => Ok(&mut **registry),
            Stage::Loaded(_) => Err(RegistrationError::AlreadyLoaded),
        }
    }

    /// The root scope, for everything not forwarded below.
    pub fn root(&mut self) -> Result<Scope<'_>, RegistrationError> {
        Ok(Scope::new(self.registry()?, ROOT))
    }

    pub fn route(&mut self, options: RouteOptions) -> Result<&mut Self, RegistrationError> {
        self.root()?.route(options)?;
        Ok(self)
    }

    pub fn get<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, RegistrationError> {
        self.root()?.get(path, handler)?;
        Ok(self)
    }

    pub fn post<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, RegistrationError> {
        self.root()?.post(path, handler)?;
        Ok(self)
    }

    pub fn put<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, RegistrationError> {
        self.root()?.put(path, handler)?;
        Ok(self)
    }

    pub fn patch<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, RegistrationError> {
        self.root()?.patch(path, handler)?;
        Ok(self)
    }

    pub fn delete<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, RegistrationError> {
        self.root()?.delete(path, handler)?;
        Ok(self)
    }

    pub fn head<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, RegistrationError> {
        self.root()?.head(path, handler)?;
        Ok(self)
    }

    pub fn options_route<H: Handler>(
        &mut self,
        path: &str,
        handler: H,
    ) -> Result<&mut Self, RegistrationError> {
        self.root()?.options_route(path, handler)?;
        Ok(self)
    }

    pub fn all<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, RegistrationError> {
        self.root()?.all(path, handler)?;
        Ok(self)
    }

    pub fn add_hook(&mut self, hook: Hook) -> Result<&mut Self, RegistrationError> {
        self.root()?.add_hook(hook);
        Ok(self)
    }

    pub fn on_request<F, Fut>(&mut self, hook: F) -> Result<&mut Self, RegistrationError>
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.root()?.on_request(hook);
        Ok(self)
    }

    pub fn pre_handler<F, Fut>(&mut self, hook: F) -> Result<&mut Self, RegistrationError>
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.root()?.pre_handler(hook);
        Ok(self)
    }

    pub fn on_send<F, Fut>(&mut self, hook: F) -> Result<&mut Self, RegistrationError>
    where
        F: Fn(Request, Reply, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Payload>, Error>> + Send + 'static,
    {
        self.root()?.on_send(hook);
        Ok(self)
    }

    pub fn on_finished<F, Fut>(&mut self, hook: F) -> Result<&mut Self, RegistrationError>
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.root()?.on_finished(hook);
        Ok(self)
    }

    pub fn on_error<F, Fut>(&mut self, hook: F) -> Result<&mut Self, RegistrationError>
    where
        F: Fn(Request, Reply, Arc<Error>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.root()?.on_error(hook);
        Ok(self)
    }

    pub fn decorate<T: Send + Sync + 'static>(
        &mut self,
        name: &str,
        value: T,
    ) -> Result<&mut Self, RegistrationError> {
        self.root()?.decorate(name, value)?;
        Ok(self)
    }

    pub fn decorate_request<T: Send + Sync + 'static>(
        &mut self,
        name: &str,
        value: T,
    ) -> Result<&mut Self, RegistrationError> {
        self.root()?.decorate_request(name, value)?;
        Ok(self)
    }

    pub fn decorate_reply<T: Send + Sync + 'static>(
        &mut self,
        name: &str,
        value: T,
    ) -> Result<&mut Self, RegistrationError> {
        self.root()?.decorate_reply(name, value)?;
        Ok(self)
    }

    pub fn add_content_type_parser(
        &mut self,
        content_type: &str,
        parser: ContentTypeParser,
    ) -> Result<&mut Self, RegistrationError> {
        self.root()?.add_content_type_parser(content_type, parser)?;
        Ok(self)
    }

    pub fn set_error_handler<F, Fut>(&mut self, handler: F) -> Result<&mut Self, RegistrationError>
    where
        F: Fn(Request, Reply, Arc<Error>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.root()?.set_error_handler(handler);
        Ok(self)
    }

    pub fn set_not_found_handler<H: Handler>(
        &mut self,
        handler: H,
    ) -> Result<&mut Self, RegistrationError> {
        self.root()?.set_not_found_handler(handler)?;
        Ok(self)
    }

    pub fn register<F>(
        &mut self,
        options: PluginOptions,
        plugin: F,
    ) -> Result<&mut Self, RegistrationError>
    where
        F: FnOnce(&mut Scope<'_>) -> Result<(), RegistrationError>,
    {
        self.root()?.register(options, plugin)?;
        Ok(self)
    }

    /// Collaborator for failures after response headers went out.
    pub fn on_transport_error<F>(&mut self, handler: F) -> Result<&mut Self, RegistrationError>
    where
        F: Fn(&Request, &BoxError) + Send + Sync + 'static,
    {
        let handler: TransportErrorFn = Arc::new(handler);
        self.registry()?.transport_error = Some(handler);
        Ok(self)
    }

    /// Load the application. Later calls return the same engine.
    ///
    /// Route conflicts are reported at declaration, so loading only fails
    /// on an invalid route table; the app is left empty in that case.
    pub fn ready(&mut self) -> Result<Arc<Engine>, RegistrationError> {
        let registry = match &mut self.stage {
            Stage::Loaded(engine) => return Ok(engine.clone()),
            Stage::Open(registry) => std::mem::replace(
                registry,
                Box::new(Registry::new(AppOptions::default())),
            ),
        };
        let engine = Arc::new(load(*registry)?);
        info!(routes = engine.router.len(), plugins = engine.plugins.len(), "application loaded");
        self.stage = Stage::Loaded(engine.clone());
        Ok(engine)
    }
}

fn default_not_found() -> BoxedHandler {
    Arc::new(|request: Request, _reply: Reply| async move {
        Ok::<_, Error>(format!("Not Found: {} {}", request.method(), request.url()))
    })
}

/// Freeze the scope tree into route contexts and build the route table.
fn load(registry: Registry) -> Result<Engine, RegistrationError> {
    let Registry {
        options,
        scopes,
        routes,
        index: _,
        plugins,
        transport_error,
    } = registry;

    let mut router = Router::default();
    let mut snapshots: Vec<ScopeSnapshot> = Vec::with_capacity(scopes.len());
    let mut instance_tables: Vec<Arc<DecoratorTable>> = Vec::with_capacity(scopes.len());

    // Parents always precede their children in the arena.
    for node in scopes {
        let parent = node.parent.map(|p| &snapshots[p]);
        let request_decorations = Arc::new(DecoratorTable::chained(
            parent.map(|p| p.request_decorations.clone()),
            node.decorators.request,
        ));
        let reply_decorations = Arc::new(DecoratorTable::chained(
            parent.map(|p| p.reply_decorations.clone()),
            node.decorators.reply,
        ));
        let instance = Arc::new(DecoratorTable::chained(
            node.parent.map(|p| instance_tables[p].clone()),
            node.decorators.instance,
        ));

        let mut snapshot = ScopeSnapshot {
            prefix: node.prefix.clone(),
            hooks: node.hooks.freeze(),
            parsers: Arc::new(node.parsers),
            request_decorations,
            reply_decorations,
            error_handler: node
                .error_handler
                .or_else(|| parent.and_then(|p| p.error_handler.clone())),
            default_body_limit: options.body_limit,
            not_found: None,
        };

        let handler = match (node.not_found_handler, node.parent) {
            (Some(handler), _) => Some(handler),
            (None, None) => Some(default_not_found()),
            (None, Some(_)) => None,
        };
        snapshot.not_found = match handler {
            Some(handler) => {
                let context = Arc::new(RouteContext::not_found(handler, &snapshot));
                debug!(prefix = %context.prefix(), "not-found handler installed");
                router.insert_not_found(&node.prefix, context.clone());
                Some(context)
            }
            None => parent.and_then(|p| p.not_found.clone()),
        };

        snapshots.push(snapshot);
        instance_tables.push(instance);
    }

    for route in routes {
        let scope = route.builder.scope;
        let context = Arc::new(route.builder.finalize(&snapshots[scope]));
        for path in &route.paths {
            router.insert(route.method.clone(), path, context.clone())?;
        }
    }

    let root_not_found = snapshots[ROOT]
        .not_found
        .clone()
        .ok_or_else(|| RegistrationError::Plugin {
            plugin: "root".to_string(),
            reason: "missing root not-found handler".to_string(),
        })?;

    Ok(Engine {
        router,
        root_not_found,
        options,
        decorations: instance_tables[ROOT].clone(),
        transport_error: transport_error.unwrap_or_else(log_transport_error),
        plugins,
    })
}
