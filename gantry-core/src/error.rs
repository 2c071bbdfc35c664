// Error types for the Gantry request lifecycle

use http::StatusCode;
use thiserror::Error;

/// Boxed error accepted from user code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Request-level error.
///
/// Every failure raised while a request is in flight (body parsing, hooks,
/// handlers, serialization) is funneled through the onError path as one of
/// these. Programming errors (`ReplyAlreadySent`, `InvalidHeader`,
/// `InvalidStatusCode`) are returned at the call site instead.
#[derive(Error, Debug)]
pub enum Error {
    // 4xx Client Errors
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Method Not Allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Unsupported Media Type: {0}")]
    UnsupportedMediaType(String),

    #[error("Unprocessable Entity: {0}")]
    UnprocessableEntity(String),

    #[error("Too Many Requests: {0}")]
    TooManyRequests(String),

    // 5xx Server Errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Service Unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error with an explicit status code.
    ///
    /// The code is only honored when it is a valid 4xx/5xx status.
    #[error("{message}")]
    Http { status: u16, message: String },

    /// Opaque failure raised by a hook or handler.
    #[error("{0}")]
    Handler(#[source] BoxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Programming errors
    #[error("Reply was already sent")]
    ReplyAlreadySent,

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),
}

impl Error {
    /// Error carrying an explicit status code.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Error::Http {
            status,
            message: message.into(),
        }
    }

    /// Wrap any error raised by user code.
    pub fn handler<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Handler(err.into())
    }

    /// The status code this error declares, if it declares a valid 4xx/5xx one.
    pub fn declared_status(&self) -> Option<u16> {
        let code = match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Http { status, .. } => return is_error_status(*status).then_some(*status),
            _ => return None,
        };
        Some(code.as_u16())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        self.declared_status()
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR.as_u16())
    }

    /// Message without the status prefix, as rendered in error bodies.
    pub fn message(&self) -> String {
        match self {
            Error::BadRequest(m)
            | Error::Unauthorized(m)
            | Error::Forbidden(m)
            | Error::NotFound(m)
            | Error::MethodNotAllowed(m)
            | Error::Conflict(m)
            | Error::PayloadTooLarge(m)
            | Error::UnsupportedMediaType(m)
            | Error::UnprocessableEntity(m)
            | Error::TooManyRequests(m)
            | Error::Internal(m)
            | Error::ServiceUnavailable(m)
            | Error::Serialization(m) => m.clone(),
            Error::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Not-found errors dispatch to the not-found context instead of the
    /// error handlers.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Http { status, .. } => *status == 404,
            _ => false,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub(crate) fn is_error_status(code: u16) -> bool {
    (400..600).contains(&code)
}

/// Canonical reason phrase for a status code.
pub fn status_text(code: u16) -> &'static str {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}

/// Error raised while building the scope tree.
///
/// Every registration call returns one of these once the app has passed its
/// load checkpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Registration is closed: the application has already loaded")]
    AlreadyLoaded,

    #[error("Decorator '{0}' has already been added")]
    DecoratorAlreadyPresent(String),

    #[error("Decorator '{name}' depends on missing decorator '{dependency}'")]
    MissingDependency { name: String, dependency: String },

    #[error("Method '{method}' already declared for route '{path}'")]
    DuplicateRoute { method: String, path: String },

    #[error("Route '{path}' conflicts with an existing route: {reason}")]
    RouteConflict { path: String, reason: String },

    #[error("Invalid route '{path}': {reason}")]
    InvalidRoute { path: String, reason: String },

    #[error("Content type parser for '{0}' already present")]
    ContentTypeParserExists(String),

    #[error("Not found handler can only be set on a scope with its own prefix (scope prefix '{0}')")]
    NotFoundHandlerNotAllowed(String),

    #[error("Not found handler already set for prefix '{0}'")]
    NotFoundHandlerAlreadySet(String),

    #[error("Shared plugin '{0}' cannot declare a prefix")]
    PrefixOnSharedPlugin(String),

    #[error("Plugin '{plugin}' failed: {reason}")]
    Plugin { plugin: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::BadRequest("x".into()).status_code(), 400);
        assert_eq!(Error::PayloadTooLarge("x".into()).status_code(), 413);
        assert_eq!(Error::UnsupportedMediaType("x".into()).status_code(), 415);
        assert_eq!(Error::Internal("x".into()).status_code(), 500);
        assert_eq!(Error::ReplyAlreadySent.status_code(), 500);
    }

    #[test]
    fn test_explicit_status_must_be_an_error_code() {
        assert_eq!(Error::with_status(418, "teapot").status_code(), 418);
        assert_eq!(Error::with_status(302, "moved").status_code(), 500);
        assert_eq!(Error::with_status(700, "bogus").status_code(), 500);
        assert_eq!(Error::with_status(302, "moved").declared_status(), None);
    }

    #[test]
    fn test_message_strips_prefix() {
        let err = Error::NotFound("no user".into());
        assert_eq!(err.to_string(), "Not Found: no user");
        assert_eq!(err.message(), "no user");
        assert!(err.is_not_found());
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
    }

    #[test]
    fn test_handler_error_is_500() {
        let err = Error::handler("boom");
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(404), "Not Found");
        assert_eq!(status_text(500), "Internal Server Error");
        assert_eq!(status_text(799), "Unknown");
    }
}
