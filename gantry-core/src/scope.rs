//! Encapsulation scopes.
//!
//! Every plugin registered with [`Scope::register`] runs against a child
//! scope forked from its parent. The child starts with a copy of the parent's
//! hooks and content-type parsers and sees every decorator of its ancestors;
//! nothing it adds is visible to its parent or siblings.
//!
//! Scopes live in an arena owned by the [`App`](crate::app::App) until the
//! load checkpoint, where each one is frozen into the route contexts it owns.

use crate::config::{AppOptions, HookPropagation};
use crate::content_type::{ContentTypeParser, ContentTypeParsers};
use crate::decorators::{DecoratorTarget, DecoratorValue, ScopeDecorators};
use crate::error::{Error, RegistrationError};
use crate::hooks::{
    ErrorHook, Hook, HookChains, HookPhase, NormalizedHook, RequestHook, SendHook,
};
use crate::body::Payload;
use crate::reply::Reply;
use crate::request::Request;
use crate::route::{
    BoxedHandler, ErrorHandlerFn, Handler, RouteContextBuilder, RouteOptions,
};
use crate::router::{RouteIndex, all_methods, trailing_slash_variant};
use crate::transmit::TransportErrorFn;
use http::Method;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

pub(crate) const ROOT: usize = 0;

/// One node of the scope tree.
pub(crate) struct ScopeNode {
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub name: String,
    pub prefix: String,
    /// Registered with a prefix of its own.
    pub own_prefix: bool,
    pub hooks: HookChains,
    pub parsers: ContentTypeParsers,
    pub decorators: ScopeDecorators,
    pub error_handler: Option<ErrorHandlerFn>,
    pub not_found_handler: Option<BoxedHandler>,
}

/// A declared route waiting for the load checkpoint.
pub(crate) struct PendingRoute {
    pub method: Method,
    pub paths: Vec<String>,
    pub builder: RouteContextBuilder,
}

/// Registration state of an app that has not loaded yet.
pub(crate) struct Registry {
    pub options: AppOptions,
    pub scopes: Vec<ScopeNode>,
    pub routes: Vec<PendingRoute>,
    pub index: RouteIndex,
    pub plugins: Vec<String>,
    pub transport_error: Option<TransportErrorFn>,
}

impl Registry {
    pub fn new(options: AppOptions) -> Self {
        let root = ScopeNode {
            parent: None,
            children: Vec::new(),
            name: "root".to_string(),
            prefix: String::new(),
            own_prefix: false,
            hooks: HookChains::default(),
            parsers: ContentTypeParsers::default(),
            decorators: ScopeDecorators::default(),
            error_handler: None,
            not_found_handler: None,
        };
        Self {
            options,
            scopes: vec![root],
            routes: Vec::new(),
            index: RouteIndex::default(),
            plugins: Vec::new(),
            transport_error: None,
        }
    }

    /// Create a child of `parent`.
    fn fork(&mut self, parent: usize, prefix: &str, name: String) -> usize {
        let id = self.scopes.len();
        let parent_node = &self.scopes[parent];
        let child = ScopeNode {
            parent: Some(parent),
            children: Vec::new(),
            name,
            prefix: join_prefix(&parent_node.prefix, prefix),
            own_prefix: !normalize_prefix(prefix).is_empty(),
            hooks: parent_node.hooks.clone(),
            parsers: parent_node.parsers.clone(),
            decorators: ScopeDecorators::default(),
            error_handler: None,
            not_found_handler: None,
        };
        self.scopes.push(child);
        self.scopes[parent].children.push(id);
        id
    }

    /// `id` and its ancestors, nearest first.
    pub fn ancestors(&self, id: usize) -> Vec<usize> {
        let mut out = vec![id];
        let mut current = self.scopes[id].parent;
        while let Some(parent) = current {
            out.push(parent);
            current = self.scopes[parent].parent;
        }
        out
    }

    /// `id` and every scope below it.
    fn descendants(&self, id: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.scopes[next].children.iter().copied());
        }
        out
    }

    fn add_hook(&mut self, id: usize, hook: NormalizedHook) {
        let targets = match self.options.hook_propagation {
            HookPropagation::Broadcast => self.descendants(id),
            HookPropagation::Isolated => vec![id],
        };
        for target in targets {
            self.scopes[target].hooks.push(hook.clone());
        }
    }

    fn decorator_visible(&self, id: usize, target: DecoratorTarget, name: &str) -> bool {
        self.ancestors(id)
            .into_iter()
            .any(|s| self.scopes[s].decorators.for_target(target).contains_key(name))
    }

    fn decorator(&self, id: usize, target: DecoratorTarget, name: &str) -> Option<DecoratorValue> {
        self.ancestors(id)
            .into_iter()
            .find_map(|s| self.scopes[s].decorators.for_target(target).get(name).cloned())
    }
}

/// Strip surrounding slashes: `"/v1/"` becomes `"v1"`.
fn normalize_prefix(prefix: &str) -> &str {
    prefix.trim().trim_matches('/')
}

/// Concatenate prefixes with exactly one `/` at the boundary.
pub(crate) fn join_prefix(parent: &str, child: &str) -> String {
    let child = normalize_prefix(child);
    let parent = parent.trim_end_matches('/');
    if child.is_empty() {
        parent.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Every path a route is registered under.
pub(crate) fn route_paths(prefix: &str, url: &str, ignore_trailing_slash: bool) -> Vec<String> {
    let mut paths = Vec::new();
    if prefix.is_empty() {
        paths.push(if url.is_empty() { "/".to_string() } else { url.to_string() });
    } else if url.is_empty() || url == "/" {
        paths.push(prefix.to_string());
        paths.push(format!("{}/", prefix));
    } else {
        paths.push(format!("{}/{}", prefix, url.trim_start_matches('/')));
    }

    if ignore_trailing_slash {
        let variants: Vec<String> = paths.iter().filter_map(|p| trailing_slash_variant(p)).collect();
        paths.extend(variants);
    }
    let mut seen = Vec::with_capacity(paths.len());
    paths.retain(|p| {
        if seen.contains(p) {
            false
        } else {
            seen.push(p.clone());
            true
        }
    });
    paths
}

/// How a plugin is registered.
#[derive(Debug, Clone, Default)]
pub struct PluginOptions {
    pub(crate) name: Option<String>,
    pub(crate) prefix: String,
    pub(crate) shared: bool,
}

impl PluginOptions {
    /// Encapsulated plugin without a prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encapsulated plugin whose routes live under `prefix`.
    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self::new().prefix(prefix)
    }

    /// Plugin running directly in the registering scope.
    pub fn shared() -> Self {
        Self {
            shared: true,
            ..Self::default()
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A reusable plugin.
///
/// Closures are registered directly with [`Scope::register`]; implement this
/// trait for plugins that carry their own configuration.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn register(&self, scope: &mut Scope<'_>) -> Result<(), RegistrationError>;
}

/// Handle on one scope of an app that is still open for registration.
pub struct Scope<'a> {
    registry: &'a mut Registry,
    id: usize,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(registry: &'a mut Registry, id: usize) -> Self {
        Self { registry, id }
    }

    fn node(&self) -> &ScopeNode {
        &self.registry.scopes[self.id]
    }

    fn node_mut(&mut self) -> &mut ScopeNode {
        &mut self.registry.scopes[self.id]
    }

    /// Full route prefix of this scope.
    pub fn prefix(&self) -> &str {
        &self.node().prefix
    }

    /// Name of the plugin that created this scope.
    pub fn name(&self) -> &str {
        &self.node().name
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT
    }

    pub fn options(&self) -> &AppOptions {
        &self.registry.options
    }

    // ========== Plugins ==========

    /// Register a plugin closure, encapsulated unless the options are shared.
    pub fn register<F>(
        &mut self,
        options: PluginOptions,
        plugin: F,
    ) -> Result<&mut Self, RegistrationError>
    where
        F: FnOnce(&mut Scope<'_>) -> Result<(), RegistrationError>,
    {
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| format!("plugin-{}", self.registry.plugins.len() + 1));
        self.run_plugin(options, name, plugin)?;
        Ok(self)
    }

    /// Register a [`Plugin`] implementation.
    pub fn register_plugin<P: Plugin>(
        &mut self,
        options: PluginOptions,
        plugin: &P,
    ) -> Result<&mut Self, RegistrationError> {
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| plugin.name().to_string());
        self.run_plugin(options, name, |scope| plugin.register(scope))?;
        Ok(self)
    }

    fn run_plugin<F>(
        &mut self,
        options: PluginOptions,
        name: String,
        plugin: F,
    ) -> Result<(), RegistrationError>
    where
        F: FnOnce(&mut Scope<'_>) -> Result<(), RegistrationError>,
    {
        self.registry.plugins.push(name.clone());

        if options.shared {
            if !normalize_prefix(&options.prefix).is_empty() {
                return Err(RegistrationError::PrefixOnSharedPlugin(name));
            }
            debug!(plugin = %name, scope = %self.name(), "registering shared plugin");
            return plugin(self);
        }

        let child = self.registry.fork(self.id, &options.prefix, name.clone());
        let mut scope = Scope::new(self.registry, child);
        debug!(plugin = %name, prefix = %scope.prefix(), "registering plugin");
        plugin(&mut scope)
    }

    // ========== Routes ==========

    /// Declare a route. Hooks added to this scope later still apply to it.
    pub fn route(&mut self, options: RouteOptions) -> Result<&mut Self, RegistrationError> {
        let serializers = options.build_serializers()?;
        let paths = route_paths(
            &self.node().prefix,
            &options.url,
            self.registry.options.ignore_trailing_slash,
        );

        for method in &options.methods {
            for path in &paths {
                self.registry.index.declare(method, path)?;
            }
        }

        for method in options.methods {
            debug!(method = %method, path = %paths[0], "route declared");
            let builder = RouteContextBuilder {
                scope: self.id,
                method: method.to_string(),
                url: paths[0].clone(),
                handler: options.handler.clone(),
                body_limit: options.body_limit,
                config: options.config.clone(),
                serializers: serializers.clone(),
            };
            self.registry.routes.push(PendingRoute {
                method,
                paths: paths.clone(),
                builder,
            });
        }
        Ok(self)
    }

    pub fn get<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, RegistrationError> {
        self.route(RouteOptions::new(Method::GET, path, handler))
    }

    pub fn head<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, RegistrationError> {
        self.route(RouteOptions::new(Method::HEAD, path, handler))
    }

    pub fn post<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, RegistrationError> {
        self.route(RouteOptions::new(Method::POST, path, handler))
    }

    pub fn put<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, RegistrationError> {
        self.route(RouteOptions::new(Method::PUT, path, handler))
    }

    pub fn patch<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, RegistrationError> {
        self.route(RouteOptions::new(Method::PATCH, path, handler))
    }

    pub fn delete<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, RegistrationError> {
        self.route(RouteOptions::new(Method::DELETE, path, handler))
    }

    pub fn options_route<H: Handler>(
        &mut self,
        path: &str,
        handler: H,
    ) -> Result<&mut Self, RegistrationError> {
        self.route(RouteOptions::new(Method::OPTIONS, path, handler))
    }

    /// Same handler for every supported method.
    pub fn all<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, RegistrationError> {
        self.route(RouteOptions::with_methods(all_methods(), path, handler))
    }

    // ========== Hooks ==========

    pub fn add_hook(&mut self, hook: Hook) -> &mut Self {
        let phase = hook.phase();
        self.registry.add_hook(self.id, hook.normalize());
        debug!(phase = %phase, scope = %self.name(), "hook added");
        self
    }

    pub fn on_request<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.add_hook(Hook::OnRequest(RequestHook::from_async(hook)))
    }

    pub fn pre_handler<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.add_hook(Hook::PreHandler(RequestHook::from_async(hook)))
    }

    /// onSend hook; return `Some(payload)` to replace the payload.
    pub fn on_send<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Request, Reply, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Payload>, Error>> + Send + 'static,
    {
        self.add_hook(Hook::OnSend(SendHook::from_async(hook)))
    }

    pub fn on_finished<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.add_hook(Hook::OnFinished(RequestHook::from_async(hook)))
    }

    pub fn on_error<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Request, Reply, Arc<Error>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.add_hook(Hook::OnError(ErrorHook::from_async(hook)))
    }

    /// Number of hooks this scope currently holds for `phase`.
    pub fn hook_count(&self, phase: HookPhase) -> usize {
        self.node().hooks.len(phase)
    }

    // ========== Decorators ==========

    fn add_decorator(
        &mut self,
        target: DecoratorTarget,
        name: &str,
        value: DecoratorValue,
        dependencies: &[&str],
    ) -> Result<&mut Self, RegistrationError> {
        if self.registry.decorator_visible(self.id, target, name) {
            return Err(RegistrationError::DecoratorAlreadyPresent(name.to_string()));
        }
        if let Some(missing) = dependencies
            .iter()
            .find(|dep| !self.registry.decorator_visible(self.id, target, dep))
        {
            return Err(RegistrationError::MissingDependency {
                name: name.to_string(),
                dependency: missing.to_string(),
            });
        }

        debug!(target = %target, name = %name, "decorator added");
        self.node_mut()
            .decorators
            .for_target_mut(target)
            .insert(name.to_string(), value);
        Ok(self)
    }

    /// Decorate the app instance visible from this scope.
    pub fn decorate<T: Send + Sync + 'static>(
        &mut self,
        name: &str,
        value: T,
    ) -> Result<&mut Self, RegistrationError> {
        self.add_decorator(DecoratorTarget::Instance, name, Arc::new(value), &[])
    }

    pub fn decorate_with_dependencies<T: Send + Sync + 'static>(
        &mut self,
        name: &str,
        value: T,
        dependencies: &[&str],
    ) -> Result<&mut Self, RegistrationError> {
        self.add_decorator(DecoratorTarget::Instance, name, Arc::new(value), dependencies)
    }

    /// Value available as `request.decoration(name)` on this scope's routes.
    pub fn decorate_request<T: Send + Sync + 'static>(
        &mut self,
        name: &str,
        value: T,
    ) -> Result<&mut Self, RegistrationError> {
        self.add_decorator(DecoratorTarget::Request, name, Arc::new(value), &[])
    }

    pub fn decorate_request_with_dependencies<T: Send + Sync + 'static>(
        &mut self,
        name: &str,
        value: T,
        dependencies: &[&str],
    ) -> Result<&mut Self, RegistrationError> {
        self.add_decorator(DecoratorTarget::Request, name, Arc::new(value), dependencies)
    }

    /// Value available as `reply.decoration(name)` on this scope's routes.
    pub fn decorate_reply<T: Send + Sync + 'static>(
        &mut self,
        name: &str,
        value: T,
    ) -> Result<&mut Self, RegistrationError> {
        self.add_decorator(DecoratorTarget::Reply, name, Arc::new(value), &[])
    }

    pub fn decorate_reply_with_dependencies<T: Send + Sync + 'static>(
        &mut self,
        name: &str,
        value: T,
        dependencies: &[&str],
    ) -> Result<&mut Self, RegistrationError> {
        self.add_decorator(DecoratorTarget::Reply, name, Arc::new(value), dependencies)
    }

    pub fn has_decorator(&self, name: &str) -> bool {
        self.registry
            .decorator_visible(self.id, DecoratorTarget::Instance, name)
    }

    pub fn has_request_decorator(&self, name: &str) -> bool {
        self.registry
            .decorator_visible(self.id, DecoratorTarget::Request, name)
    }

    pub fn has_reply_decorator(&self, name: &str) -> bool {
        self.registry
            .decorator_visible(self.id, DecoratorTarget::Reply, name)
    }

    /// Instance decorator visible from this scope.
    pub fn decoration<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.registry
            .decorator(self.id, DecoratorTarget::Instance, name)
            .and_then(|v| v.downcast::<T>().ok())
    }

    // ========== Content-type parsers ==========

    pub fn add_content_type_parser(
        &mut self,
        content_type: &str,
        parser: ContentTypeParser,
    ) -> Result<&mut Self, RegistrationError> {
        self.node_mut().parsers.add(content_type, parser)?;
        Ok(self)
    }

    pub fn has_content_type_parser(&self, content_type: &str) -> bool {
        self.node().parsers.has(content_type)
    }

    /// Drop every parser of this scope, built-ins included.
    pub fn remove_all_content_type_parsers(&mut self) -> &mut Self {
        self.node_mut().parsers.clear();
        self
    }

    // ========== Error and not-found handling ==========

    /// Custom error handler for this scope and its descendants.
    pub fn set_error_handler<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Request, Reply, Arc<Error>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let handler: ErrorHandlerFn =
            Arc::new(move |req, reply, err| Box::pin(handler(req, reply, err)));
        if self.node().error_handler.is_some() {
            debug!(scope = %self.name(), "replacing error handler");
        }
        self.node_mut().error_handler = Some(handler);
        self
    }

    /// Handler for unmatched requests under this scope's prefix.
    ///
    /// Only the root and scopes registered with their own prefix may set
    /// one, once.
    pub fn set_not_found_handler<H: Handler>(
        &mut self,
        handler: H,
    ) -> Result<&mut Self, RegistrationError> {
        let node = self.node();
        if self.id != ROOT && !node.own_prefix {
            return Err(RegistrationError::NotFoundHandlerNotAllowed(
                node.prefix.clone(),
            ));
        }
        if node.not_found_handler.is_some() {
            return Err(RegistrationError::NotFoundHandlerAlreadySet(
                display_prefix(&node.prefix),
            ));
        }
        self.node_mut().not_found_handler = Some(Arc::new(handler));
        Ok(self)
    }
}

impl std::fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name())
            .field("prefix", &self.prefix())
            .finish()
    }
}

fn display_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        "/".to_string()
    } else {
        prefix.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> impl Handler {
        |_req: Request, _reply: Reply| async { Ok::<_, Error>("ok") }
    }

    #[test]
    fn test_join_prefix() {
        assert_eq!(join_prefix("", "v1"), "/v1");
        assert_eq!(join_prefix("", "/v1/"), "/v1");
        assert_eq!(join_prefix("/v1", "/users"), "/v1/users");
        assert_eq!(join_prefix("/v1/", "users/"), "/v1/users");
        assert_eq!(join_prefix("/v1", ""), "/v1");
        assert_eq!(join_prefix("/v1", "/"), "/v1");
    }

    #[test]
    fn test_route_paths() {
        assert_eq!(route_paths("", "/a", false), vec!["/a"]);
        assert_eq!(route_paths("/v1", "/a", false), vec!["/v1/a"]);
        assert_eq!(route_paths("/v1", "/", false), vec!["/v1", "/v1/"]);
        assert_eq!(route_paths("", "/a", true), vec!["/a", "/a/"]);
        assert_eq!(route_paths("", "/", true), vec!["/"]);
    }

    #[test]
    fn test_fork_copies_hooks_and_nests_prefix() {
        let mut registry = Registry::new(AppOptions::default());
        {
            let mut root = Scope::new(&mut registry, ROOT);
            root.on_request(|_, _| async { Ok(()) });
            root.register(PluginOptions::prefixed("/v1"), |v1| {
                assert_eq!(v1.prefix(), "/v1");
                assert_eq!(v1.hook_count(HookPhase::OnRequest), 1);
                v1.register(PluginOptions::prefixed("users"), |users| {
                    assert_eq!(users.prefix(), "/v1/users");
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(registry.scopes.len(), 3);
        assert_eq!(registry.plugins.len(), 2);
    }

    #[test]
    fn test_broadcast_reaches_existing_children() {
        let mut registry = Registry::new(AppOptions::default());
        let mut root = Scope::new(&mut registry, ROOT);
        root.register(PluginOptions::new(), |_| Ok(())).unwrap();
        root.pre_handler(|_, _| async { Ok(()) });
        assert_eq!(registry.scopes[1].hooks.len(HookPhase::PreHandler), 1);
    }

    #[test]
    fn test_isolated_keeps_children_untouched() {
        let options = AppOptions {
            hook_propagation: HookPropagation::Isolated,
            ..AppOptions::default()
        };
        let mut registry = Registry::new(options);
        let mut root = Scope::new(&mut registry, ROOT);
        root.register(PluginOptions::new(), |_| Ok(())).unwrap();
        root.pre_handler(|_, _| async { Ok(()) });
        assert_eq!(registry.scopes[0].hooks.len(HookPhase::PreHandler), 1);
        assert_eq!(registry.scopes[1].hooks.len(HookPhase::PreHandler), 0);
    }

    #[test]
    fn test_child_hooks_stay_in_child() {
        let mut registry = Registry::new(AppOptions::default());
        let mut root = Scope::new(&mut registry, ROOT);
        root.register(PluginOptions::new(), |child| {
            child.on_send(|_, _, _| async { Ok(None) });
            Ok(())
        })
        .unwrap();
        assert_eq!(root.hook_count(HookPhase::OnSend), 0);
    }

    #[test]
    fn test_decorators_are_encapsulated() {
        let mut registry = Registry::new(AppOptions::default());
        let mut root = Scope::new(&mut registry, ROOT);
        root.decorate("db", 7u32).unwrap();
        root.register(PluginOptions::new(), |child| {
            assert_eq!(child.decoration::<u32>("db").as_deref(), Some(&7));
            child.decorate_request("user", "anon").unwrap();
            assert!(matches!(
                child.decorate("db", 8u32),
                Err(RegistrationError::DecoratorAlreadyPresent(_))
            ));
            Ok(())
        })
        .unwrap();
        assert!(!root.has_request_decorator("user"));
        assert!(root.has_decorator("db"));
    }

    #[test]
    fn test_decorator_dependencies() {
        let mut registry = Registry::new(AppOptions::default());
        let mut root = Scope::new(&mut registry, ROOT);
        let err = root
            .decorate_with_dependencies("cache", 1u8, &["redis"])
            .unwrap_err();
        assert_eq!(
            err,
            RegistrationError::MissingDependency {
                name: "cache".into(),
                dependency: "redis".into()
            }
        );
        root.decorate("redis", 0u8).unwrap();
        root.decorate_with_dependencies("cache", 1u8, &["redis"])
            .unwrap();
    }

    #[test]
    fn test_shared_plugin_rejects_prefix() {
        let mut registry = Registry::new(AppOptions::default());
        let mut root = Scope::new(&mut registry, ROOT);
        let err = root
            .register(PluginOptions::shared().prefix("/x").name("bad"), |_| Ok(()))
            .unwrap_err();
        assert_eq!(err, RegistrationError::PrefixOnSharedPlugin("bad".into()));

        root.register(PluginOptions::shared(), |scope| {
            scope.decorate("shared", true)?;
            Ok(())
        })
        .unwrap();
        assert!(root.has_decorator("shared"));
    }

    #[test]
    fn test_not_found_handler_rules() {
        let mut registry = Registry::new(AppOptions::default());
        let mut root = Scope::new(&mut registry, ROOT);
        root.register(PluginOptions::new(), |child| {
            assert!(matches!(
                child.set_not_found_handler(handler()),
                Err(RegistrationError::NotFoundHandlerNotAllowed(_))
            ));
            Ok(())
        })
        .unwrap();
        root.register(PluginOptions::prefixed("/v1"), |child| {
            child.set_not_found_handler(handler())?;
            assert_eq!(
                child.set_not_found_handler(handler()).unwrap_err(),
                RegistrationError::NotFoundHandlerAlreadySet("/v1".into())
            );
            Ok(())
        })
        .unwrap();
        root.set_not_found_handler(handler()).unwrap();
    }

    #[test]
    fn test_duplicate_route_is_rejected() {
        let mut registry = Registry::new(AppOptions::default());
        let mut root = Scope::new(&mut registry, ROOT);
        root.get("/a", handler()).unwrap();
        assert!(matches!(
            root.get("/a", handler()),
            Err(RegistrationError::DuplicateRoute { .. })
        ));
        root.register(PluginOptions::prefixed("/v1"), |child| {
            child.get("/a", handler())?;
            Ok(())
        })
        .unwrap();
        assert_eq!(registry.routes.len(), 2);
    }
}
