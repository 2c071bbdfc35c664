//! Testing utilities for the Gantry framework.
//!
//! Requests run in memory through a loaded [`Engine`](gantry_core::Engine),
//! going through the full lifecycle: routing, hooks, body parsing, error
//! handling and serialization.
//!
//! ## Quick Start
//!
//! ```
//! use gantry_core::{App, Error, Reply, Request};
//! use gantry_testing::*;
//!
//! # tokio_test::block_on(async {
//! let mut app = App::new();
//! app.get("/hello", |_req: Request, _reply: Reply| async {
//!     Ok::<_, Error>("Hello!")
//! })
//! .unwrap();
//!
//! let client = TestClient::from_app(&mut app).unwrap();
//! let response = client.get("/hello").await;
//! assert_status(&response, 200);
//! assert_eq!(response.body_string(), Some("Hello!".to_string()));
//! # });
//! ```
//!
//! ## Recording Hooks
//!
//! ```
//! use gantry_core::{App, Error, HookPhase, Reply, Request};
//! use gantry_testing::*;
//!
//! # tokio_test::block_on(async {
//! let recorder = HookRecorder::new();
//! let mut app = App::new();
//! recorder.attach(&mut app.root().unwrap(), "root");
//! app.get("/", |_req: Request, _reply: Reply| async { Ok::<_, Error>("ok") })
//!     .unwrap();
//!
//! let client = TestClient::from_app(&mut app).unwrap();
//! client.get("/").await;
//! assert!(recorder.was_called("root", HookPhase::PreHandler));
//! # });
//! ```

mod assertions;
mod recorder;
mod test_client;

pub use assertions::{
    assert_body_contains, assert_client_error, assert_error_body, assert_header, assert_json,
    assert_json_content_type, assert_server_error, assert_status, assert_success,
};
pub use recorder::{HookCall, HookRecorder};
pub use test_client::{TestClient, TestRequestBuilder, TestResponse};
