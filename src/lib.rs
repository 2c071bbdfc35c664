// Gantry - an HTTP framework built around a request-lifecycle hook pipeline
//
// Applications are trees of encapsulated scopes. Plugins register routes,
// hooks, decorators and content-type parsers in their own scope; everything
// is frozen into per-route contexts when the application loads.

// Re-export core functionality
pub use gantry_core::*;

#[cfg(feature = "testing")]
pub use gantry_testing;

/// Commonly used types.
pub mod prelude {
    pub use gantry_core::{
        App, AppOptions, BodyValue, ContentTypeParser, Engine, Error, Hook, HookPhase,
        HookPropagation, Json, LogConfig, Next, Payload, Plugin, PluginOptions,
        RegistrationError, Reply, ReplyBody, Request, RequestHook, RouteOptions, Scope,
    };
}
