//! Request forwarding to the target server.
//!
//! The forwarded request goes out on a fresh connection through hyper's
//! HTTP/1 client. Every byte read from the target is captured on the way in,
//! so once hyper has consumed the full response the capture holds the
//! target's response exactly as it was framed on the wire.

use crate::error::HarnessError;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE, HOST};
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

/// Host validated requests are forwarded to.
pub const TARGET_HOST: &str = "localhost";

/// The target's response: parsed status plus the exact bytes it sent.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub bytes: Bytes,
}

/// Build a JSON error response for requests that fail before takeover.
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Response returned to hyper after the connection was taken over.
///
/// Its bytes are discarded; `Connection: close` makes hyper drop the
/// connection instead of waiting for another request on it.
pub fn takeover_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

/// I/O wrapper recording every byte read from the inner stream.
pub struct CaptureIo<T> {
    inner: T,
    captured: Arc<Mutex<Vec<u8>>>,
}

impl<T> CaptureIo<T> {
    pub fn new(inner: T, captured: Arc<Mutex<Vec<u8>>>) -> Self {
        Self { inner, captured }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for CaptureIo<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.captured
            .lock()
            .extend_from_slice(&buf.filled()[before..]);
        Poll::Ready(Ok(()))
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for CaptureIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Forward `request` to `localhost:target_port` and capture the raw response.
///
/// Method, path, query, headers and body are kept. The request line is
/// rewritten to origin form, dropping any absolute-form artifacts.
pub async fn forward_request(
    target_port: u16,
    request: Request<Bytes>,
) -> Result<RawResponse, HarnessError> {
    let target = format!("{TARGET_HOST}:{target_port}");
    let fail = |reason: String| HarnessError::UpstreamForward {
        target: target.clone(),
        reason,
    };

    let (mut parts, body) = request.into_parts();
    let origin = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let origin = Uri::try_from(origin).map_err(|e| fail(e.to_string()))?;
    parts.uri = origin;
    if !parts.headers.contains_key(HOST) {
        let host = HeaderValue::from_str(&target).map_err(|e| fail(e.to_string()))?;
        parts.headers.insert(HOST, host);
    }
    let outbound = Request::from_parts(parts, Full::new(body));

    debug!("Forwarding {} {} to {}", outbound.method(), outbound.uri(), target);

    let stream = TcpStream::connect((TARGET_HOST, target_port))
        .await
        .map_err(|e| fail(e.to_string()))?;
    let captured = Arc::new(Mutex::new(Vec::new()));
    let io = TokioIo::new(CaptureIo::new(stream, Arc::clone(&captured)));

    let mut builder = hyper::client::conn::http1::Builder::new();
    builder.preserve_header_case(true);
    let (mut sender, connection) = builder
        .handshake::<_, Full<Bytes>>(io)
        .await
        .map_err(|e| fail(e.to_string()))?;
    let driver = tokio::spawn(async move {
        if let Err(err) = connection.await {
            debug!("Upstream connection ended: {}", err);
        }
    });

    let result = async {
        let response = sender
            .send_request(outbound)
            .await
            .map_err(|e| fail(e.to_string()))?;
        let status = response.status();
        response
            .into_body()
            .collect()
            .await
            .map_err(|e| fail(format!("reading response body: {e}")))?;
        Ok(status)
    }
    .await;

    drop(sender);
    driver.abort();
    let status = result?;

    let bytes = Bytes::from(std::mem::take(&mut *captured.lock()));
    debug!("Target answered {} ({} bytes)", status, bytes.len());
    Ok(RawResponse { status, bytes })
}
