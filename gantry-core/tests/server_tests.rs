use gantry_core::{App, Error, Reply, Request};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

async fn raw_request(addr: std::net::SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn test_serves_over_tcp_and_shuts_down() {
    let mut app = App::new();
    app.get("/hello", |req: Request, _reply: Reply| async move {
        let remote = req.remote_addr().map(|a| a.ip().to_string());
        Ok::<_, Error>(format!("hello {}", remote.unwrap_or_default()))
    })
    .unwrap();
    let engine = app.ready().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(engine.serve_with_shutdown(listener, async move {
        let _ = stopped.await;
    }));

    let response = raw_request(
        addr,
        "GET /hello HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
    assert!(response.contains("content-type: text/plain; charset=utf-8"));
    assert!(response.ends_with("hello 127.0.0.1"));

    let response = raw_request(
        addr,
        "GET /missing HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found"), "{}", response);
    assert!(response.ends_with("Not Found: GET /missing"));

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}
