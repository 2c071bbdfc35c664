// Minimal server: JSON routes, a timing hook and graceful shutdown
//
// Run with: cargo run --example hello
// Options come from GANTRY_* environment variables (or a .env file).

use gantry::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Serialize, Deserialize)]
struct Message {
    text: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = AppOptions::from_env("GANTRY")?;
    let _guard = options.log.clone().init()?;

    let mut app = App::with_options(options);

    app.on_request(|_req, reply: Reply| async move {
        reply.set_state(Instant::now());
        Ok(())
    })?;
    app.on_send(|_req, reply: Reply, _payload| async move {
        if let Some(started) = reply.state::<Instant>() {
            let micros = started.elapsed().as_micros().to_string();
            reply.header("x-response-time-us", micros)?;
        }
        Ok(None)
    })?;

    app.get("/hello", |_req: Request, _reply: Reply| async {
        Ok::<_, Error>(Json(Message {
            text: "Hello from Gantry!".to_string(),
        }))
    })?;
    app.post("/echo", |req: Request, _reply: Reply| async move {
        let msg: Message = req.json()?;
        Ok::<_, Error>(Json(msg))
    })?;

    let engine = app.ready()?;
    println!("Listening on http://localhost:3001");
    println!("  GET  /hello");
    println!("  POST /echo");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3001").await?;
    engine
        .serve_with_shutdown(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
