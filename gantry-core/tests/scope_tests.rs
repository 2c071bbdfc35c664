use bytes::Bytes;
use gantry_core::{
    App, AppOptions, Error, HookPhase, HookPropagation, Plugin, PluginOptions, RegistrationError,
    Reply, Request, Scope,
};
use http::{Method, StatusCode};
use std::sync::Arc;

fn get(uri: &str) -> http::Request<Bytes> {
    http::Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Bytes::new())
        .unwrap()
}

fn text(response: &http::Response<Bytes>) -> String {
    String::from_utf8(response.body().to_vec()).unwrap()
}

fn header<'a>(response: &'a http::Response<Bytes>, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

async fn tag(reply: Reply, value: &'static str) -> Result<(), Error> {
    let existing = reply.get_header("x-trace").unwrap_or_default();
    reply.header("x-trace", format!("{}{}", existing, value))?;
    Ok(())
}

#[tokio::test]
async fn test_child_decorations_do_not_leak_to_parent() {
    let mut app = App::new();
    app.register(PluginOptions::new(), |scope| {
        scope.decorate_request("user", String::from("alice"))?;
        scope.get("/inside", |req: Request, _reply: Reply| async move {
            Ok::<_, Error>(req.has_decoration("user").to_string())
        })?;
        Ok(())
    })
    .unwrap();
    app.get("/outside", |req: Request, _reply: Reply| async move {
        Ok::<_, Error>(req.has_decoration("user").to_string())
    })
    .unwrap();
    let engine = app.ready().unwrap();

    assert_eq!(text(&engine.inject(get("/inside")).await.unwrap()), "true");
    assert_eq!(text(&engine.inject(get("/outside")).await.unwrap()), "false");
}

#[tokio::test]
async fn test_parent_decorations_visible_in_child() {
    let mut app = App::new();
    app.decorate_request("tenant", String::from("acme")).unwrap();
    app.register(PluginOptions::prefixed("/api"), |scope| {
        scope.get("/tenant", |req: Request, _reply: Reply| async move {
            let tenant = req.decoration::<String>("tenant").map(|t| t.to_string());
            Ok::<_, Error>(tenant.unwrap_or_default())
        })?;
        Ok(())
    })
    .unwrap();
    let engine = app.ready().unwrap();

    let response = engine.inject(get("/api/tenant")).await.unwrap();
    assert_eq!(text(&response), "acme");
}

#[tokio::test]
async fn test_child_hooks_run_after_parent_hooks() {
    let mut app = App::new();
    app.on_request(|_req, reply| tag(reply, "root;")).unwrap();
    app.register(PluginOptions::new(), |scope| {
        scope.on_request(|_req, reply| tag(reply, "child;"));
        scope.get("/nested", |_req: Request, _reply: Reply| async { Ok::<_, Error>("ok") })?;
        Ok(())
    })
    .unwrap();
    app.get("/top", |_req: Request, _reply: Reply| async { Ok::<_, Error>("ok") })
        .unwrap();
    let engine = app.ready().unwrap();

    let response = engine.inject(get("/nested")).await.unwrap();
    assert_eq!(header(&response, "x-trace"), "root;child;");

    let response = engine.inject(get("/top")).await.unwrap();
    assert_eq!(header(&response, "x-trace"), "root;");
}

#[tokio::test]
async fn test_broadcast_reaches_existing_children() {
    let mut app = App::new();
    app.register(PluginOptions::new(), |scope| {
        scope.get("/child", |_req: Request, _reply: Reply| async { Ok::<_, Error>("ok") })?;
        Ok(())
    })
    .unwrap();
    app.on_send(|_req, reply: Reply, _payload| async move {
        reply.header("x-root", "yes")?;
        Ok(None)
    })
    .unwrap();
    let engine = app.ready().unwrap();

    let response = engine.inject(get("/child")).await.unwrap();
    assert_eq!(header(&response, "x-root"), "yes");
}

#[tokio::test]
async fn test_isolated_hooks_stay_out_of_existing_children() {
    let options = AppOptions {
        hook_propagation: HookPropagation::Isolated,
        ..AppOptions::default()
    };
    let mut app = App::with_options(options);
    app.register(PluginOptions::new(), |scope| {
        scope.get("/early", |_req: Request, _reply: Reply| async { Ok::<_, Error>("ok") })?;
        Ok(())
    })
    .unwrap();
    app.on_send(|_req, reply: Reply, _payload| async move {
        reply.header("x-root", "yes")?;
        Ok(None)
    })
    .unwrap();
    app.register(PluginOptions::new(), |scope| {
        scope.get("/late", |_req: Request, _reply: Reply| async { Ok::<_, Error>("ok") })?;
        Ok(())
    })
    .unwrap();
    let engine = app.ready().unwrap();

    let response = engine.inject(get("/early")).await.unwrap();
    assert_eq!(header(&response, "x-root"), "");

    let response = engine.inject(get("/late")).await.unwrap();
    assert_eq!(header(&response, "x-root"), "yes");
}

#[tokio::test]
async fn test_prefixed_routes_and_not_found() {
    let mut app = App::new();
    app.register(PluginOptions::prefixed("/v1"), |scope| {
        scope.get("/users", |_req: Request, _reply: Reply| async { Ok::<_, Error>("users") })?;
        Ok(())
    })
    .unwrap();
    let engine = app.ready().unwrap();

    let response = engine.inject(get("/v1/users")).await.unwrap();
    assert_eq!(text(&response), "users");

    let response = engine.inject(get("/v1/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(text(&response), "Not Found: GET /v1/missing");
}

#[tokio::test]
async fn test_not_found_handler_per_prefix() {
    let mut app = App::new();
    app.register(PluginOptions::prefixed("/api"), |scope| {
        scope.set_not_found_handler(|req: Request, reply: Reply| async move {
            reply.code(404)?;
            Ok::<_, Error>(serde_json::json!({ "missing": req.path() }))
        })?;
        scope.get("/ping", |_req: Request, _reply: Reply| async { Ok::<_, Error>("pong") })?;
        Ok(())
    })
    .unwrap();
    app.set_not_found_handler(|_req: Request, reply: Reply| async move {
        reply.code(404)?;
        Ok::<_, Error>("root fallback")
    })
    .unwrap();
    let engine = app.ready().unwrap();

    let response = engine.inject(get("/api/nothing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(text(&response), r#"{"missing":"/api/nothing"}"#);

    let response = engine.inject(get("/elsewhere")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(text(&response), "root fallback");
}

#[tokio::test]
async fn test_not_found_handler_sees_its_own_scope_decorators() {
    let mut app = App::new();
    app.register(PluginOptions::prefixed("/api"), |api| {
        api.decorate_request("area", String::from("api"))?;
        api.set_not_found_handler(|req: Request, reply: Reply| async move {
            reply.code(404)?;
            Ok::<_, Error>(serde_json::json!({
                "area": req.has_decoration("area"),
                "role": req.has_decoration("role"),
                "badge": reply.has_decoration("badge"),
            }))
        })?;
        api.register(PluginOptions::prefixed("/admin"), |admin| {
            admin.decorate_request("role", String::from("admin"))?;
            admin.decorate_reply("badge", 7u32)?;
            admin.get("/gone", |_req: Request, reply: Reply| async move {
                reply.call_not_found()?;
                Ok::<_, Error>(())
            })?;
            Ok(())
        })?;
        Ok(())
    })
    .unwrap();
    let engine = app.ready().unwrap();

    let response = engine.inject(get("/api/admin/gone")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        text(&response),
        r#"{"area":true,"role":false,"badge":false}"#
    );
}

#[tokio::test]
async fn test_not_found_runs_scope_hooks() {
    let mut app = App::new();
    app.register(PluginOptions::prefixed("/api"), |scope| {
        scope.on_request(|_req, reply| tag(reply, "api;"));
        scope.set_not_found_handler(|_req: Request, reply: Reply| async move {
            reply.code(404)?;
            Ok::<_, Error>("api missing")
        })?;
        Ok(())
    })
    .unwrap();
    let engine = app.ready().unwrap();

    let response = engine.inject(get("/api/x")).await.unwrap();
    assert_eq!(header(&response, "x-trace"), "api;");
    assert_eq!(text(&response), "api missing");
}

#[tokio::test]
async fn test_error_handler_inherited_by_children() {
    let mut app = App::new();
    app.set_error_handler(|_req, reply: Reply, err: Arc<Error>| async move {
        reply.code(err.status_code())?;
        reply.send(format!("root handled: {}", err.message()))
    })
    .unwrap();
    app.register(PluginOptions::prefixed("/child"), |scope| {
        scope.get("/fail", |_req: Request, _reply: Reply| async {
            Err::<(), _>(Error::Conflict("taken".to_string()))
        })?;
        Ok(())
    })
    .unwrap();
    app.register(PluginOptions::prefixed("/own"), |scope| {
        scope.set_error_handler(|_req, reply: Reply, _err| async move {
            reply.code(503)?;
            reply.send("own handler")
        });
        scope.get("/fail", |_req: Request, _reply: Reply| async {
            Err::<(), _>(Error::Conflict("taken".to_string()))
        })?;
        Ok(())
    })
    .unwrap();
    let engine = app.ready().unwrap();

    let response = engine.inject(get("/child/fail")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(text(&response), "root handled: taken");

    let response = engine.inject(get("/own/fail")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(text(&response), "own handler");
}

#[tokio::test]
async fn test_shared_plugin_applies_to_parent() {
    let mut app = App::new();
    app.register(PluginOptions::shared(), |scope| {
        scope.decorate_request("shared", 7u32)?;
        scope.on_send(|_req, reply: Reply, _payload| async move {
            reply.header("x-shared", "1")?;
            Ok(None)
        });
        Ok(())
    })
    .unwrap();
    app.get("/", |req: Request, _reply: Reply| async move {
        let value = req.decoration::<u32>("shared").map(|v| *v).unwrap_or(0);
        Ok::<_, Error>(value.to_string())
    })
    .unwrap();
    let engine = app.ready().unwrap();

    let response = engine.inject(get("/")).await.unwrap();
    assert_eq!(text(&response), "7");
    assert_eq!(header(&response, "x-shared"), "1");
}

#[test]
fn test_shared_plugin_with_prefix_is_rejected() {
    let mut app = App::new();
    let err = app
        .register(PluginOptions::shared().prefix("/x"), |_scope| Ok(()))
        .unwrap_err();
    assert!(matches!(err, RegistrationError::PrefixOnSharedPlugin(_)));
}

#[test]
fn test_duplicate_route_is_rejected() {
    let mut app = App::new();
    app.get("/dup", |_req: Request, _reply: Reply| async { Ok::<_, Error>("a") })
        .unwrap();
    let result = app.get("/dup", |_req: Request, _reply: Reply| async { Ok::<_, Error>("b") });
    assert!(result.is_err());
}

#[test]
fn test_registration_closed_after_ready() {
    let mut app = App::new();
    app.ready().unwrap();
    let err = app
        .get("/", |_req: Request, _reply: Reply| async { Ok::<_, Error>("late") })
        .unwrap_err();
    assert!(matches!(err, RegistrationError::AlreadyLoaded));
}

#[test]
fn test_not_found_handler_needs_own_prefix() {
    let mut app = App::new();
    let err = app
        .register(PluginOptions::new(), |scope| {
            scope.set_not_found_handler(|_req: Request, _reply: Reply| async {
                Ok::<_, Error>("nope")
            })?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, RegistrationError::NotFoundHandlerNotAllowed(_)));

    let mut app = App::new();
    app.set_not_found_handler(|_req: Request, _reply: Reply| async { Ok::<_, Error>("a") })
        .unwrap();
    let err = app
        .set_not_found_handler(|_req: Request, _reply: Reply| async { Ok::<_, Error>("b") })
        .unwrap_err();
    assert!(matches!(err, RegistrationError::NotFoundHandlerAlreadySet(ref p) if p == "/"));
}

#[test]
fn test_decorator_dependencies_and_duplicates() {
    let mut app = App::new();
    let err = app
        .register(PluginOptions::new(), |scope| {
            scope.decorate_with_dependencies("cache", 1u8, &["db"])?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, RegistrationError::MissingDependency { .. }));

    let mut app = App::new();
    app.decorate("db", "postgres").unwrap();
    let err = app.decorate("db", "mysql").unwrap_err();
    assert!(matches!(err, RegistrationError::DecoratorAlreadyPresent(_)));
}

struct Health;

impl Plugin for Health {
    fn name(&self) -> &str {
        "health"
    }

    fn register(&self, scope: &mut Scope<'_>) -> Result<(), RegistrationError> {
        scope.decorate("health_path", format!("{}/health", scope.prefix()))?;
        scope.get("/health", |_req: Request, _reply: Reply| async {
            Ok::<_, Error>(serde_json::json!({"status": "up"}))
        })?;
        Ok(())
    }
}

#[tokio::test]
async fn test_plugin_trait_registration() {
    let mut app = App::new();
    {
        let mut root = app.root().unwrap();
        root.register_plugin(PluginOptions::prefixed("/ops"), &Health)
            .unwrap();
        assert_eq!(root.hook_count(HookPhase::OnRequest), 0);
        assert!(!root.has_decorator("health_path"));
    }
    let engine = app.ready().unwrap();

    assert_eq!(engine.plugins(), ["health".to_string()]);
    let response = engine.inject(get("/ops/health")).await.unwrap();
    assert_eq!(text(&response), r#"{"status":"up"}"#);
}
