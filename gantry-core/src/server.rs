// HTTP/1 server loop on top of hyper

use crate::engine::Engine;
use crate::error::Error;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, info, warn};

/// How long in-flight connections get to finish after a shutdown signal.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

impl Engine {
    /// Bind `addr` and serve until the process ends.
    pub async fn listen(self: Arc<Self>, addr: impl ToSocketAddrs) -> Result<(), Error> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted on `listener`.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), Error> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serve until `signal` resolves, then stop accepting and drain open
    /// connections for up to [`DRAIN_TIMEOUT`].
    pub async fn serve_with_shutdown<F>(
        self: Arc<Self>,
        listener: TcpListener,
        signal: F,
    ) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, "server listening");
        }

        let graceful = GracefulShutdown::new();
        tokio::pin!(signal);

        loop {
            let (stream, remote) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(error = %err, "failed to accept connection");
                        continue;
                    }
                },
                _ = &mut signal => break,
            };

            let engine = self.clone();
            let service = service_fn(move |mut req: http::Request<Incoming>| {
                let engine = engine.clone();
                req.extensions_mut().insert::<SocketAddr>(remote);
                async move { Ok::<_, Infallible>(engine.handle_request(req).await) }
            });

            let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
            let conn = graceful.watch(conn);
            tokio::spawn(async move {
                if let Err(err) = conn.await {
                    debug!(error = %err, remote = %remote, "connection closed with error");
                }
            });
        }

        info!("shutdown signal received, draining connections");
        tokio::select! {
            _ = graceful.shutdown() => info!("all connections closed"),
            _ = tokio::time::sleep(DRAIN_TIMEOUT) => {
                warn!(timeout_secs = DRAIN_TIMEOUT.as_secs(), "drain timeout reached, closing");
            }
        }
        Ok(())
    }
}
