// Loaded application: routes requests and runs their lifecycle

use crate::body::RawBody;
use crate::config::AppOptions;
use crate::decorators::DecoratorTable;
use crate::error::{BoxError, Error};
use crate::reply::Reply;
use crate::request::{Request, RequestParts};
use crate::route::RouteContext;
use crate::router::Router;
use crate::transmit::{FinishNotifier, ResponseBody, TransportErrorFn};
use bytes::Bytes;
use http::{HeaderMap, Method};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, info, info_span};

/// A loaded application.
///
/// Produced by [`App::ready`](crate::app::App::ready). Holds the finalized
/// route table; registration is closed.
pub struct Engine {
    pub(crate) router: Router,
    pub(crate) root_not_found: Arc<RouteContext>,
    pub(crate) options: AppOptions,
    pub(crate) decorations: Arc<DecoratorTable>,
    pub(crate) transport_error: TransportErrorFn,
    pub(crate) plugins: Vec<String>,
}

impl Engine {
    pub fn options(&self) -> &AppOptions {
        &self.options
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Names of registered plugins, in registration order.
    pub fn plugins(&self) -> &[String] {
        &self.plugins
    }

    /// Root instance decorator.
    pub fn decoration<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.decorations.get::<T>(name)
    }

    pub fn has_decoration(&self, name: &str) -> bool {
        self.decorations.contains(name)
    }

    fn request_id(&self, headers: &HeaderMap) -> String {
        self.options
            .request_id_header
            .as_deref()
            .and_then(|name| headers.get(name))
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// Route context for a request: the matched route, or the not-found
    /// context owning the longest matching prefix.
    fn resolve(&self, method: &Method, path: &str) -> (HashMap<String, String>, Arc<RouteContext>) {
        if let Some(found) = self.router.lookup(method, path) {
            return found;
        }
        let context = self
            .router
            .not_found_for(path)
            .unwrap_or_else(|| self.root_not_found.clone());
        (HashMap::new(), context)
    }

    /// Run one request through the lifecycle.
    ///
    /// The returned body fires onFinished hooks once it has been fully
    /// written or dropped.
    pub async fn handle_request<B>(&self, request: http::Request<B>) -> http::Response<ResponseBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let started = Instant::now();
        let (parts, body) = request.into_parts();
        let raw: RawBody = body.map_err(Into::into).boxed_unsync();

        let id = self.request_id(&parts.headers);
        let url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        let span = info_span!("request", req_id = %id, method = %parts.method, url = %url);
        let (params, context) = self.resolve(&parts.method, parts.uri.path());

        let request = Request::new(RequestParts {
            id,
            parts,
            params,
            raw_body: Some(raw),
            decorations: context.request_decorations.clone(),
            span: span.clone(),
        });
        let reply = Reply::new(context.clone());
        let log = !self.options.disable_request_logging;
        let finish = FinishNotifier::new(request.clone(), reply.clone(), started, log);

        async move {
            if log {
                info!("incoming request");
            }
            let prepared = self.run_lifecycle(context, &request, &reply).await;
            prepared.into_response(finish, self.transport_error.clone())
        }
        .instrument(span)
        .await
    }

    /// Run a request in memory and collect the whole response.
    pub async fn inject<B: Into<Bytes>>(
        &self,
        request: http::Request<B>,
    ) -> Result<http::Response<Bytes>, Error> {
        let request = request.map(|body| Full::new(body.into()));
        let (parts, body) = self.handle_request(request).await.into_parts();
        let bytes = body.collect().await.map_err(Error::Handler)?.to_bytes();
        Ok(http::Response::from_parts(parts, bytes))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("routes", &self.router.len())
            .field("plugins", &self.plugins)
            .finish()
    }
}
