// Core library for the Gantry HTTP framework
// Request lifecycle engine: hook pipeline, encapsulated scopes, route contexts

pub mod app;
pub mod body;
pub mod config;
pub mod content_type;
pub mod decorators;
pub mod engine;
pub mod error;
pub mod extensions;
pub mod hooks;
pub mod logging;
pub mod reply;
pub mod request;
pub mod route;
pub mod router;
pub mod scope;
pub mod server;
pub mod transmit;

mod hook_runner;
mod lifecycle;

// Re-export commonly used types
pub use app::App;
pub use body::{BodyStream, BodyValue, IntoReplyBody, Json, Payload, RawBody, ReplyBody, SharedStream};
pub use config::{AppOptions, ConfigError, DEFAULT_BODY_LIMIT, HookPropagation};
pub use content_type::{ContentTypeParser, ContentTypeParsers};
pub use decorators::{DecoratorTable, DecoratorTarget, DecoratorValue};
pub use engine::Engine;
pub use error::{BoxError, Error, RegistrationError, status_text};
pub use extensions::Extensions;
pub use hooks::{
    ErrorHook, FrozenHooks, Hook, HookPhase, LifecycleHook, Next, RequestHook, SendHook,
};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use reply::Reply;
pub use request::Request;
pub use route::{Handler, RouteContext, RouteOptions, Serializer, SerializerMap, StatusMatch};
pub use router::{Router, WILDCARD_PARAM};
pub use scope::{Plugin, PluginOptions, Scope};
pub use server::DRAIN_TIMEOUT;
pub use transmit::{ResponseBody, TransportErrorFn};
