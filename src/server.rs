//! HTTP server and graceful shutdown.
//!
//! Every request is read in full, wrapped in a fresh [`RequestContext`], and
//! run through the [`Pipeline`]. The context is dropped as soon as the
//! response is handed back to hyper.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. Stops accepting new connections.
//! 2. Tells every open connection to finish its current request and close,
//!    which also ends idle keep-alive connections.
//! 3. Returns from [`Server::serve`], so `main` can flush the tracer and exit.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::context::RequestContext;
use crate::error::Error;
use crate::log::Logger;
use crate::response::Response;
use crate::sequence::Pipeline;

enum Bind {
    Addr(String),
    Listener(TcpListener),
}

/// The HTTP server.
///
/// ```rust,no_run
/// # use tollgate::{Router, Sequence, Server};
/// # async fn run() -> Result<(), tollgate::Error> {
/// let pipeline = Sequence::new().resolve_with(Router::new());
/// Server::bind("0.0.0.0:3000").serve(pipeline).await
/// # }
/// ```
pub struct Server {
    bind: Bind,
    logger: Logger,
}

impl Server {
    /// Binds to `addr` (`host:port`) when [`serve`](Server::serve) is called.
    pub fn bind(addr: impl Into<String>) -> Self {
        Self { bind: Bind::Addr(addr.into()), logger: Logger::new("[server]") }
    }

    /// Serves on a listener the caller already bound, e.g. to port 0.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { bind: Bind::Listener(listener), logger: Logger::new("[server]") }
    }

    /// Accepts connections until SIGTERM or Ctrl-C, then drains in-flight
    /// requests and returns.
    pub async fn serve(self, pipeline: Pipeline) -> Result<(), Error> {
        let signal = shutdown_signal(self.logger.clone());
        self.serve_with_shutdown(pipeline, signal).await
    }

    /// Like [`serve`](Server::serve), but stops when `signal` resolves.
    pub async fn serve_with_shutdown<S>(self, pipeline: Pipeline, signal: S) -> Result<(), Error>
    where
        S: Future<Output = ()>,
    {
        let listener = match self.bind {
            Bind::Listener(listener) => listener,
            Bind::Addr(addr) => {
                let parsed: SocketAddr =
                    addr.parse().map_err(|_| Error::InvalidAddress { addr: addr.clone() })?;
                TcpListener::bind(parsed).await?
            }
        };
        let logger = self.logger;

        logger.info(format!("listening on {}", listener.local_addr()?));

        let mut tasks = tokio::task::JoinSet::new();
        let (drain_tx, drain_rx) = watch::channel(());
        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Shutdown wins over queued connections.
                biased;

                () = &mut signal => {
                    logger.info(format!("shutdown requested, draining {} connection(s)", tasks.len()));
                    break;
                }

                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            logger.error(format!("accept failed: {e}"));
                            continue;
                        }
                    };

                    let io = TokioIo::new(stream);
                    let pipeline = pipeline.clone();
                    let conn_logger = logger.clone();

                    let mut drain = drain_rx.clone();

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| {
                            let pipeline = pipeline.clone();
                            async move { dispatch(pipeline, req, remote_addr).await }
                        });

                        let builder = ConnBuilder::new(TokioExecutor::new());
                        let conn = builder.serve_connection(io, svc);
                        tokio::pin!(conn);

                        let result = tokio::select! {
                            result = conn.as_mut() => result,
                            _ = drain.changed() => {
                                // Finish the request in flight, then close.
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };
                        if let Err(e) = result {
                            conn_logger.warn(format!("connection from {remote_addr} failed: {e}"));
                        }
                    });
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // No receivers left just means no open connections.
        let _ = drain_tx.send(());
        while tasks.join_next().await.is_some() {}

        logger.info("stopped");
        Ok(())
    }
}

/// One request in, one response out. Never fails at the hyper level.
async fn dispatch(
    pipeline: Pipeline,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            Logger::new("[server]").warn(format!("unreadable body from {remote_addr}: {e}"));
            return Ok(Response::status(StatusCode::BAD_REQUEST).into_http());
        }
    };

    let mut ctx = RequestContext::new(http::Request::from_parts(parts, body))
        .with_remote_addr(remote_addr);
    Ok(pipeline.handle(&mut ctx).await.into_http())
}

/// Resolves on SIGTERM or Ctrl-C, whichever comes first.
///
/// A signal that cannot be installed is logged and never fires.
async fn shutdown_signal(logger: Logger) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            logger.error(format!("cannot listen for Ctrl-C: {e}"));
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                logger.error(format!("cannot listen for SIGTERM: {e}"));
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}
