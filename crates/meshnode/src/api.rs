//! HTTP trigger endpoint.
//!
//! - `GET|POST /broadcast`: originate one broadcast, reply with its id
//! - `GET /metrics`: node counters in Prometheus text format

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use gossip_mesh::{NodeRuntime, NodeStats, P2pError};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::NodeError;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// A bound, not yet serving, API listener.
#[derive(Debug)]
pub struct ApiServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl ApiServer {
    /// Binds the listener.
    pub async fn bind(addr: SocketAddr) -> Result<Self, NodeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NodeError::ApiBind { addr, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| NodeError::ApiBind { addr, source })?;
        Ok(Self { listener, addr })
    }

    /// The bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serves requests until `shutdown` turns true.
    pub async fn serve(self, runtime: Arc<NodeRuntime>, mut shutdown: watch::Receiver<bool>) {
        info!(addr = %self.addr, "api server listening");

        loop {
            tokio::select! {
                accept = self.listener.accept() => {
                    match accept {
                        Ok((stream, peer_addr)) => {
                            let runtime = Arc::clone(&runtime);
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let svc = service_fn(move |req| {
                                    let runtime = Arc::clone(&runtime);
                                    async move { handle_request(req, &runtime).await }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, svc)
                                    .await
                                {
                                    if !e.is_incomplete_message() {
                                        warn!(peer = %peer_addr, error = %e, "connection error");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "accept failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("api server shutting down");
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    runtime: &NodeRuntime,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET | &Method::POST, "/broadcast") => match runtime.broadcast().await {
            Ok(ack) => text(StatusCode::OK, TEXT_PLAIN, format!("{ack}\n")),
            Err(e @ P2pError::NotRunning { .. }) => {
                text(StatusCode::SERVICE_UNAVAILABLE, TEXT_PLAIN, format!("{e}\n"))
            }
            Err(e) => {
                error!(error = %e, "broadcast trigger failed");
                text(StatusCode::INTERNAL_SERVER_ERROR, TEXT_PLAIN, format!("{e}\n"))
            }
        },
        (&Method::GET, "/metrics") => text(
            StatusCode::OK,
            NodeStats::content_type(),
            runtime.stats().encode_prometheus(),
        ),
        (_, "/broadcast" | "/metrics") => text(
            StatusCode::METHOD_NOT_ALLOWED,
            TEXT_PLAIN,
            "method not allowed\n".to_string(),
        ),
        (_, path) => text(StatusCode::NOT_FOUND, TEXT_PLAIN, format!("no route for {path}\n")),
    };
    Ok(response)
}

fn text(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
