// Route table: matchit per method plus a prefix table for not-found contexts

use crate::error::RegistrationError;
use crate::route::RouteContext;
use http::Method;
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the catch-all parameter produced by a trailing `*`.
pub const WILDCARD_PARAM: &str = "*";
const MATCHIT_WILDCARD: &str = "wildcard";

/// Methods a route declared with `all` is registered for.
pub fn all_methods() -> Vec<Method> {
    vec![
        Method::DELETE,
        Method::GET,
        Method::HEAD,
        Method::PATCH,
        Method::POST,
        Method::PUT,
        Method::OPTIONS,
    ]
}

/// Convert `/users/:id/*` into matchit syntax (`/users/{id}/{*wildcard}`).
pub(crate) fn to_matchit(path: &str) -> Result<String, RegistrationError> {
    let invalid = |reason: &str| RegistrationError::InvalidRoute {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if !path.starts_with('/') {
        return Err(invalid("path must start with '/'"));
    }

    let segments: Vec<&str> = path[1..].split('/').collect();
    let last = segments.len() - 1;
    let mut out = String::with_capacity(path.len() + 8);

    for (i, segment) in segments.iter().enumerate() {
        out.push('/');
        if let Some(name) = segment.strip_prefix(':') {
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(invalid("invalid parameter name"));
            }
            out.push('{');
            out.push_str(name);
            out.push('}');
        } else if *segment == "*" {
            if i != last {
                return Err(invalid("wildcard must be the last segment"));
            }
            out.push_str("{*");
            out.push_str(MATCHIT_WILDCARD);
            out.push('}');
        } else if segment.contains('*') {
            return Err(invalid("wildcard must be a whole segment"));
        } else {
            out.push_str(&segment.replace('{', "{{").replace('}', "}}"));
        }
    }
    Ok(out)
}

/// The same path with and without a trailing slash.
pub(crate) fn trailing_slash_variant(path: &str) -> Option<String> {
    if path == "/" || path.ends_with('*') {
        None
    } else if let Some(stripped) = path.strip_suffix('/') {
        Some(stripped.to_string())
    } else {
        Some(format!("{}/", path))
    }
}

/// Declaration-time shadow of the route table, used to reject duplicates
/// and conflicts as soon as a route is declared.
#[derive(Default)]
pub(crate) struct RouteIndex {
    routers: HashMap<Method, matchit::Router<()>>,
    declared: HashMap<Method, Vec<String>>,
}

impl RouteIndex {
    pub fn declare(&mut self, method: &Method, path: &str) -> Result<(), RegistrationError> {
        let declared = self.declared.entry(method.clone()).or_default();
        if declared.iter().any(|p| p == path) {
            return Err(RegistrationError::DuplicateRoute {
                method: method.to_string(),
                path: path.to_string(),
            });
        }

        let pattern = to_matchit(path)?;
        self.routers
            .entry(method.clone())
            .or_insert_with(matchit::Router::new)
            .insert(pattern, ())
            .map_err(|e| RegistrationError::RouteConflict {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        declared.push(path.to_string());
        Ok(())
    }
}

/// Finalized route table shared by every request.
#[derive(Default)]
pub struct Router {
    routers: HashMap<Method, matchit::Router<Arc<RouteContext>>>,
    not_found: Vec<(String, Arc<RouteContext>)>,
    count: usize,
}

impl Router {
    pub(crate) fn insert(
        &mut self,
        method: Method,
        path: &str,
        context: Arc<RouteContext>,
    ) -> Result<(), RegistrationError> {
        let pattern = to_matchit(path)?;
        self.routers
            .entry(method)
            .or_insert_with(matchit::Router::new)
            .insert(pattern, context)
            .map_err(|e| RegistrationError::RouteConflict {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        self.count += 1;
        Ok(())
    }

    /// Register the not-found context serving everything under `prefix`.
    pub(crate) fn insert_not_found(&mut self, prefix: &str, context: Arc<RouteContext>) {
        let prefix = prefix.trim_end_matches('/').to_string();
        self.not_found.retain(|(p, _)| *p != prefix);
        self.not_found.push((prefix, context));
        self.not_found.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    /// Match a request to its route.
    pub fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(HashMap<String, String>, Arc<RouteContext>)> {
        let matched = self.routers.get(method)?.at(path).ok()?;
        let params = matched
            .params
            .iter()
            .map(|(key, value)| {
                let key = if key == MATCHIT_WILDCARD {
                    WILDCARD_PARAM
                } else {
                    key
                };
                let value = urlencoding::decode(value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.to_string());
                (key.to_string(), value)
            })
            .collect();
        Some((params, matched.value.clone()))
    }

    /// Not-found context for an unmatched path: the longest registered
    /// prefix ending on a segment boundary.
    pub fn not_found_for(&self, path: &str) -> Option<Arc<RouteContext>> {
        self.not_found
            .iter()
            .find(|(prefix, _)| {
                prefix.is_empty()
                    || path == prefix.as_str()
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .map(|(_, ctx)| ctx.clone())
    }

    /// Number of (method, path) routes.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
