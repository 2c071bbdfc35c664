// In-memory HTTP client for loaded applications

use bytes::Bytes;
use gantry_core::{App, Engine, Error, RegistrationError};
use http::{HeaderMap, Method};
use std::sync::Arc;

/// Test client that runs requests through an [`Engine`] without a socket.
#[derive(Clone)]
pub struct TestClient {
    engine: Arc<Engine>,
}

impl TestClient {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Load `app` and build a client for it.
    pub fn from_app(app: &mut App) -> Result<Self, RegistrationError> {
        Ok(Self::new(app.ready()?))
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: impl Into<Bytes>) -> TestResponse {
        self.request(Method::POST, path, Some(body.into())).await
    }

    pub async fn put(&self, path: &str, body: impl Into<Bytes>) -> TestResponse {
        self.request(Method::PUT, path, Some(body.into())).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request(Method::DELETE, path, None).await
    }

    pub async fn patch(&self, path: &str, body: impl Into<Bytes>) -> TestResponse {
        self.request(Method::PATCH, path, Some(body.into())).await
    }

    /// Send `body` as `application/json`.
    pub async fn post_json<T: serde::Serialize>(&self, path: &str, data: &T) -> TestResponse {
        match TestRequestBuilder::new(Method::POST, path).json(data) {
            Ok(builder) => builder.send(self).await,
            Err(err) => TestResponse::Failed(err),
        }
    }

    /// Make a request with custom method
    pub async fn request(&self, method: Method, path: &str, body: Option<Bytes>) -> TestResponse {
        let mut builder = TestRequestBuilder::new(method, path);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        builder.send(self).await
    }

    /// Run a fully built request.
    pub async fn send(&self, request: http::Request<Bytes>) -> TestResponse {
        match self.engine.inject(request).await {
            Ok(response) => TestResponse::Complete(response),
            Err(error) => TestResponse::Failed(error),
        }
    }
}

/// Builder for test requests
pub struct TestRequestBuilder {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    body: Bytes,
    query_params: Vec<(String, String)>,
}

impl TestRequestBuilder {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
            query_params: Vec::new(),
        }
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    /// Set the body and its `Content-Length`.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set JSON body
    pub fn json<T: serde::Serialize>(mut self, data: &T) -> Result<Self, Error> {
        self.body = serde_json::to_vec(data)?.into();
        self.headers
            .push(("content-type".to_string(), "application/json".to_string()));
        Ok(self)
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query_params.push((key.to_string(), value.to_string()));
        self
    }

    /// Build the request
    pub fn build(self) -> Result<http::Request<Bytes>, Error> {
        let uri = if self.query_params.is_empty() {
            self.path
        } else {
            let query = serde_urlencoded::to_string(&self.query_params)
                .map_err(|e| Error::Serialization(e.to_string()))?;
            let separator = if self.path.contains('?') { '&' } else { '?' };
            format!("{}{}{}", self.path, separator, query)
        };

        let mut builder = http::Request::builder().method(self.method).uri(uri);
        for (key, value) in &self.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if !self.body.is_empty() {
            builder = builder.header(http::header::CONTENT_LENGTH, self.body.len());
        }
        builder
            .body(self.body)
            .map_err(|e| Error::BadRequest(format!("Invalid test request: {}", e)))
    }

    pub async fn send(self, client: &TestClient) -> TestResponse {
        match self.build() {
            Ok(request) => client.send(request).await,
            Err(err) => TestResponse::Failed(err),
        }
    }
}

/// Response from a test request
#[derive(Debug)]
pub enum TestResponse {
    /// The response was written in full.
    Complete(http::Response<Bytes>),
    /// The request could not be built or the body failed mid-write.
    Failed(Error),
}

impl TestResponse {
    /// Assert the response was written in full
    pub fn assert_complete(&self) -> &http::Response<Bytes> {
        match self {
            TestResponse::Complete(response) => response,
            TestResponse::Failed(error) => {
                panic!("Expected a complete response, got error: {:?}", error)
            }
        }
    }

    pub fn assert_failed(&self) -> &Error {
        match self {
            TestResponse::Failed(error) => error,
            TestResponse::Complete(response) => {
                panic!("Expected a failed response, got status {}", response.status())
            }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TestResponse::Complete(response) => Some(response.status().as_u16()),
            TestResponse::Failed(_) => None,
        }
    }

    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            TestResponse::Complete(response) => Some(response.headers()),
            TestResponse::Failed(_) => None,
        }
    }

    /// Get a header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers()?.get(key)?.to_str().ok()
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        match self {
            TestResponse::Complete(response) => Some(response.body()),
            TestResponse::Failed(_) => None,
        }
    }

    /// Get the response body as string
    pub fn body_string(&self) -> Option<String> {
        self.body_bytes()
            .and_then(|body| String::from_utf8(body.to_vec()).ok())
    }

    /// Get the response body as JSON
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, String> {
        match self {
            TestResponse::Complete(response) => serde_json::from_slice(response.body())
                .map_err(|e| format!("Serialization error: {}", e)),
            TestResponse::Failed(error) => Err(format!("{:?}", error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = TestRequestBuilder::new(Method::GET, "/test")
            .header("Authorization", "Bearer token")
            .query("foo", "bar baz")
            .build()
            .unwrap();

        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.uri().path(), "/test");
        assert_eq!(req.uri().query(), Some("foo=bar+baz"));
        assert_eq!(req.headers()["authorization"], "Bearer token");
    }

    #[test]
    fn test_json_builder_sets_headers() {
        let req = TestRequestBuilder::new(Method::POST, "/items")
            .json(&serde_json::json!({"a": 1}))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(req.headers()["content-type"], "application/json");
        assert_eq!(req.headers()["content-length"], "7");
        assert_eq!(req.body().as_ref(), br#"{"a":1}"#);
    }

    #[test]
    fn test_failed_response_has_no_status() {
        let response = TestResponse::Failed(Error::Internal("boom".to_string()));
        assert_eq!(response.status(), None);
        assert!(response.body_string().is_none());
        assert!(response.body_json::<serde_json::Value>().is_err());
    }

    #[tokio::test]
    async fn test_client_round_trip() {
        let mut app = App::new();
        app.get("/hello", |req: gantry_core::Request, _reply: gantry_core::Reply| async move {
            Ok::<_, Error>(format!("hello {}", req.query("name").unwrap_or("nobody")))
        })
        .unwrap();
        let client = TestClient::from_app(&mut app).unwrap();

        let response = TestRequestBuilder::new(Method::GET, "/hello")
            .query("name", "gantry")
            .send(&client)
            .await;
        assert_eq!(response.status(), Some(200));
        assert_eq!(response.body_string().as_deref(), Some("hello gantry"));
    }
}
