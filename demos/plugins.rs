// Encapsulated plugins: a prefixed API with its own decorators, hooks,
// error handler and not-found handler next to a shared auth plugin.
//
// Run with: cargo run --example plugins

use gantry::prelude::*;
use serde_json::json;
use std::sync::Arc;

struct Users;

impl Plugin for Users {
    fn name(&self) -> &str {
        "users"
    }

    fn register(&self, scope: &mut Scope<'_>) -> Result<(), RegistrationError> {
        scope.decorate_request("store", vec!["ada".to_string(), "grace".to_string()])?;

        scope.set_error_handler(|_req, reply: Reply, err: Arc<Error>| async move {
            reply.code(err.status_code())?;
            reply.send(json!({ "users_error": err.message() }))
        });
        scope.set_not_found_handler(|req: Request, reply: Reply| async move {
            reply.code(404)?;
            Ok::<_, Error>(json!({ "no_such_user_route": req.path() }))
        })?;

        scope.get("/", |req: Request, _reply: Reply| async move {
            let users = req.decoration::<Vec<String>>("store").unwrap_or_default();
            Ok::<_, Error>(json!(*users))
        })?;
        scope.get("/:index", |req: Request, _reply: Reply| async move {
            let users = req.decoration::<Vec<String>>("store").unwrap_or_default();
            let index: usize = req
                .param("index")
                .and_then(|i| i.parse().ok())
                .ok_or_else(|| Error::BadRequest("index must be a number".to_string()))?;
            let user = users
                .get(index)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("user {}", index)))?;
            Ok::<_, Error>(user)
        })?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = LogConfig::new().init()?;

    let mut app = App::new();

    app.register(PluginOptions::shared().name("auth"), |scope| {
        scope.on_request(|req: Request, _reply| async move {
            match req.header("x-api-key") {
                Some("secret") => Ok(()),
                _ => Err(Error::Unauthorized("missing or invalid api key".to_string())),
            }
        });
        Ok(())
    })?;
    app.root()?
        .register_plugin(PluginOptions::prefixed("/users"), &Users)?;

    let engine = app.ready()?;
    println!("Plugins: {:?}", engine.plugins());
    println!("Listening on http://localhost:3002 (send x-api-key: secret)");
    engine.listen("127.0.0.1:3002").await?;
    Ok(())
}
