//! ProxyServer and its accept loop.
//!
//! Each accepted connection is served by hyper's HTTP/1 implementation on
//! its own task. Requests are handed to the engine together with a takeover
//! handle for the connection they arrived on. The first failure, or plan
//! completion, is reported on the outcome channel and stops the accept loop.

use super::forwarding::{error_response, takeover_response};
use super::takeover::{takeover_pair, ConnectionTakeover, RawResponseWriter};
use crate::engine::{Engine, Progress};
use crate::error::HarnessError;
use crate::lifecycle::Outcome;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Accepts client connections and hands their requests to the engine.
pub struct ProxyServer {
    engine: Arc<Engine>,
    outcomes: mpsc::UnboundedSender<Outcome>,
    shutdown: CancellationToken,
}

impl ProxyServer {
    /// `outcomes` receives completion or the first failure; `shutdown` is
    /// cancelled at the same time and stops the accept loop.
    pub fn new(
        engine: Arc<Engine>,
        outcomes: mpsc::UnboundedSender<Outcome>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            outcomes,
            shutdown,
        }
    }

    /// Accept connections until the shutdown token fires, then close the
    /// listener.
    pub async fn run(self, listener: TcpListener) {
        let server = Arc::new(self);

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, remote_addr)) => {
                        let server = Arc::clone(&server);
                        tokio::spawn(async move {
                            server.serve_connection(stream, remote_addr).await;
                        });
                    }
                    Err(err) => {
                        error!("Accept error: {}", err);
                    }
                },
                _ = server.shutdown.cancelled() => {
                    info!("Listener closed");
                    break;
                }
            }
        }
    }

    async fn serve_connection(self: Arc<Self>, stream: TcpStream, remote_addr: SocketAddr) {
        debug!("Accepted connection from {}", remote_addr);
        let (io, takeover) = takeover_pair(stream);
        let io = TokioIo::new(io);

        let service = service_fn(move |req| {
            let server = Arc::clone(&self);
            let takeover = takeover.clone();
            async move { Ok::<_, Infallible>(server.handle_request(req, &takeover).await) }
        });

        let mut builder = http1::Builder::new();
        builder.preserve_header_case(true);
        if let Err(err) = builder.serve_connection(io, service).await {
            debug!("Error serving connection from {}: {}", remote_addr, err);
        }
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
        takeover: &ConnectionTakeover<TcpStream>,
    ) -> Response<Full<Bytes>> {
        debug!("Received request: {} {}", req.method(), req.uri());

        let result = match collect_request(req).await {
            Ok(request) => {
                self.engine
                    .handle(request, Some(takeover as &dyn RawResponseWriter))
                    .await
            }
            Err(err) => Err(err),
        };

        let failure = match result {
            Ok(Progress::Advanced { .. }) => None,
            Ok(Progress::Exhausted { .. }) => {
                self.finish(Ok(()));
                None
            }
            Err(err) => {
                match err.assertion_index() {
                    Some(index) => error!(assertion = index, "{}", err),
                    None => error!("{}", err),
                }
                let message = err.to_string();
                self.finish(Err(err));
                Some(message)
            }
        };

        if takeover.is_taken_over() {
            takeover_response()
        } else {
            let message = failure.as_deref().unwrap_or("request was not relayed");
            error_response(StatusCode::BAD_GATEWAY, message)
        }
    }

    /// Report the run outcome and stop accepting connections.
    fn finish(&self, outcome: Outcome) {
        if self.outcomes.send(outcome).is_err() {
            debug!("Outcome receiver already gone");
        }
        self.shutdown.cancel();
    }
}

/// Buffer the request body so it can be checked and forwarded.
async fn collect_request(req: Request<Incoming>) -> Result<Request<Bytes>, HarnessError> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| HarnessError::RequestBody(e.to_string()))?
        .to_bytes();
    Ok(Request::from_parts(parts, body))
}
