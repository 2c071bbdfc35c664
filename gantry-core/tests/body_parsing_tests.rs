use bytes::Bytes;
use gantry_core::{
    App, AppOptions, BodyValue, ContentTypeParser, Error, PluginOptions, Reply, Request,
    RouteOptions,
};
use http::{Method, StatusCode};
use serde_json::{Value, json};

fn request(method: Method, uri: &str, content_type: Option<&str>, body: &str) -> http::Request<Bytes> {
    let mut builder = http::Request::builder().method(method).uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    builder.body(Bytes::from(body.to_string())).unwrap()
}

fn json_body(response: &http::Response<Bytes>) -> Value {
    serde_json::from_slice(response.body()).unwrap()
}

fn text(response: &http::Response<Bytes>) -> String {
    String::from_utf8(response.body().to_vec()).unwrap()
}

/// Echo the parsed body back, tagged with its kind.
async fn echo(req: Request, _reply: Reply) -> Result<Value, Error> {
    Ok(match req.body() {
        Some(BodyValue::Json(value)) => json!({ "json": value }),
        Some(BodyValue::Text(text)) => json!({ "text": text }),
        Some(BodyValue::Bytes(bytes)) => json!({ "bytes": bytes.len() }),
        None => json!({ "none": true }),
    })
}

fn echo_app(options: AppOptions) -> App {
    let mut app = App::with_options(options);
    app.post("/", echo).unwrap();
    app.put("/", echo).unwrap();
    app.delete("/", echo).unwrap();
    app.get("/", echo).unwrap();
    app
}

#[tokio::test]
async fn test_text_body() {
    let engine = echo_app(AppOptions::default()).ready().unwrap();
    let response = engine
        .inject(request(Method::POST, "/", Some("text/plain; charset=utf-8"), "hello"))
        .await
        .unwrap();
    assert_eq!(json_body(&response), json!({"text": "hello"}));
}

#[tokio::test]
async fn test_json_with_charset() {
    let engine = echo_app(AppOptions::default()).ready().unwrap();
    let response = engine
        .inject(request(
            Method::PUT,
            "/",
            Some("application/json; charset=utf-8"),
            r#"[1,2,3]"#,
        ))
        .await
        .unwrap();
    assert_eq!(json_body(&response), json!({"json": [1, 2, 3]}));
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let engine = echo_app(AppOptions::default()).ready().unwrap();
    let response = engine
        .inject(request(Method::POST, "/", Some("application/json"), "{not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&response)["statusCode"], 400);
}

#[tokio::test]
async fn test_empty_json_body_is_bad_request() {
    let engine = echo_app(AppOptions::default()).ready().unwrap();
    let response = engine
        .inject(request(Method::POST, "/", Some("application/json"), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_content_type_is_415() {
    let engine = echo_app(AppOptions::default()).ready().unwrap();
    let response = engine
        .inject(request(Method::POST, "/", Some("application/xml"), "<a/>"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(
        json_body(&response)["message"],
        "Unsupported Media Type: application/xml"
    );
}

#[tokio::test]
async fn test_get_body_is_not_parsed() {
    let engine = echo_app(AppOptions::default()).ready().unwrap();
    let response = engine
        .inject(request(Method::GET, "/", Some("application/json"), "{bad"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(&response), json!({"none": true}));
}

#[tokio::test]
async fn test_delete_parsed_only_with_content_type() {
    let engine = echo_app(AppOptions::default()).ready().unwrap();

    let response = engine
        .inject(request(Method::DELETE, "/", None, ""))
        .await
        .unwrap();
    assert_eq!(json_body(&response), json!({"none": true}));

    let mut with_body = request(Method::DELETE, "/", Some("application/json"), r#"{"id":1}"#);
    with_body
        .headers_mut()
        .insert("content-length", http::HeaderValue::from_static("8"));
    let response = engine.inject(with_body).await.unwrap();
    assert_eq!(json_body(&response), json!({"json": {"id": 1}}));
}

#[tokio::test]
async fn test_body_limit_boundary() {
    let options = AppOptions {
        body_limit: 10,
        ..AppOptions::default()
    };
    let engine = echo_app(options).ready().unwrap();

    let response = engine
        .inject(request(Method::POST, "/", Some("text/plain"), "0123456789"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(&response), json!({"text": "0123456789"}));

    let response = engine
        .inject(request(Method::POST, "/", Some("text/plain"), "0123456789A"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(
        json_body(&response)["message"],
        "Request body is too large (limit 10 bytes)"
    );
}

#[tokio::test]
async fn test_declared_length_over_limit_is_rejected() {
    let options = AppOptions {
        body_limit: 4,
        ..AppOptions::default()
    };
    let engine = echo_app(options).ready().unwrap();

    let mut req = request(Method::POST, "/", Some("text/plain"), "abc");
    req.headers_mut()
        .insert("content-length", http::HeaderValue::from_static("100"));
    let response = engine.inject(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_content_length_mismatch_is_bad_request() {
    let engine = echo_app(AppOptions::default()).ready().unwrap();

    let mut req = request(Method::POST, "/", Some("text/plain"), "abc");
    req.headers_mut()
        .insert("content-length", http::HeaderValue::from_static("5"));
    let response = engine.inject(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(&response)["message"],
        "Request body size did not match Content-Length"
    );
}

#[tokio::test]
async fn test_route_body_limit_overrides_default() {
    let mut app = App::new();
    app.route(RouteOptions::new(Method::POST, "/small", echo).body_limit(2))
        .unwrap();
    let engine = app.ready().unwrap();

    let response = engine
        .inject(request(Method::POST, "/small", Some("text/plain"), "abc"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_custom_parser_scoped_to_plugin() {
    let mut app = App::new();
    app.post("/outer", echo).unwrap();
    app.register(PluginOptions::prefixed("/csv"), |scope| {
        scope.add_content_type_parser(
            "text/csv",
            ContentTypeParser::from_fn(|bytes| {
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| Error::BadRequest("csv must be utf-8".to_string()))?;
                let cells: Vec<Value> = text.split(',').map(|c| json!(c.trim())).collect();
                Ok(BodyValue::Json(Value::Array(cells)))
            }),
        )?;
        scope.post("/", echo)?;
        Ok(())
    })
    .unwrap();
    let engine = app.ready().unwrap();

    let response = engine
        .inject(request(Method::POST, "/csv", Some("text/csv"), "a, b,c"))
        .await
        .unwrap();
    assert_eq!(json_body(&response), json!({"json": ["a", "b", "c"]}));

    let response = engine
        .inject(request(Method::POST, "/outer", Some("text/csv"), "a,b"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_catch_all_parser_after_removing_builtins() {
    let mut app = App::new();
    app.register(PluginOptions::new(), |scope| {
        scope.remove_all_content_type_parsers();
        scope.add_content_type_parser(
            "*",
            ContentTypeParser::from_fn(|bytes| Ok(BodyValue::Bytes(bytes.clone()))),
        )?;
        scope.post("/raw", echo)?;
        Ok(())
    })
    .unwrap();
    let engine = app.ready().unwrap();

    let response = engine
        .inject(request(Method::POST, "/raw", Some("application/json"), r#"{"a":1}"#))
        .await
        .unwrap();
    assert_eq!(json_body(&response), json!({"bytes": 7}));
}

#[tokio::test]
async fn test_async_parser_sees_request() {
    let mut app = App::new();
    app.add_content_type_parser(
        "application/x-www-form-urlencoded",
        ContentTypeParser::new(|req: Request, bytes: Bytes| async move {
            let fields: std::collections::HashMap<String, String> =
                serde_urlencoded::from_bytes(&bytes)
                    .map_err(|e| Error::BadRequest(e.to_string()))?;
            Ok(BodyValue::Json(json!({ "fields": fields, "path": req.path() })))
        }),
    )
    .unwrap();
    app.post("/form", echo).unwrap();
    let engine = app.ready().unwrap();

    let response = engine
        .inject(request(
            Method::POST,
            "/form",
            Some("application/x-www-form-urlencoded"),
            "name=gantry&kind=framework",
        ))
        .await
        .unwrap();
    assert_eq!(
        json_body(&response),
        json!({"json": {"fields": {"name": "gantry", "kind": "framework"}, "path": "/form"}})
    );
}

#[tokio::test]
async fn test_typed_json_helper() {
    #[derive(serde::Deserialize)]
    struct Login {
        user: String,
    }

    let mut app = App::new();
    app.post("/login", |req: Request, _reply: Reply| async move {
        let login: Login = req.json()?;
        Ok::<_, Error>(login.user)
    })
    .unwrap();
    let engine = app.ready().unwrap();

    let response = engine
        .inject(request(Method::POST, "/login", Some("application/json"), r#"{"user":"ada"}"#))
        .await
        .unwrap();
    assert_eq!(text(&response), "ada");
}
