use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use hyper::server::conn::http1;
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StreamError};

/// Connections served back to back by one `poll` call once the first has arrived.
pub const MAX_CONNECTIONS_PER_POLL: usize = 16;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_POLL: Duration = Duration::from_millis(100);
/// Longest request line accepted before the request is treated as malformed.
const MAX_REQUEST_LINE: usize = 8 * 1024;

const ALLOW_ORIGIN: &str = "*";
const ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type";
const NO_CACHE: &str = "no-cache";

static VIEWER_HTML: &str = include_str!("viewer.html");

/// The most recent compressed packet and the picture it belongs to.
#[derive(Debug, Clone)]
pub struct LatestFrame {
    pub packet: Bytes,
    pub width: u32,
    pub height: u32,
    /// Strictly increasing across publications; normally the number of frames
    /// submitted to the encoder when this packet was produced.
    pub sequence: i64,
}

/// Single slot shared by the frame producer and the request handlers. Writers
/// replace the whole value; readers clone it out under the lock.
#[derive(Debug, Clone, Default)]
pub struct SharedLatestFrame(Arc<Mutex<Option<LatestFrame>>>);

impl SharedLatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, frame: LatestFrame) {
        *self.lock() = Some(frame);
    }

    /// Replaces the slot with `packet`. The sequence is `frame_count` unless that
    /// would not move past the previous publication, as happens for packets drained
    /// at end of stream. Returns the sequence used.
    pub fn publish(&self, packet: Bytes, width: u32, height: u32, frame_count: i64) -> i64 {
        let mut slot = self.lock();
        let sequence = match slot.as_ref() {
            Some(previous) => frame_count.max(previous.sequence + 1),
            None => frame_count,
        };
        *slot = Some(LatestFrame {
            packet,
            width,
            height,
            sequence,
        });
        sequence
    }

    pub fn snapshot(&self) -> Option<LatestFrame> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<LatestFrame>> {
        // the slot is always a complete value, so a poisoned lock is still usable
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// JSON body of `GET /frame`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameEnvelope {
    /// Standard base64 of the compressed packet.
    pub frame: String,
    pub width: u32,
    pub height: u32,
    pub timestamp: i64,
}

pub fn router(latest: SharedLatestFrame) -> Router {
    Router::new()
        .route("/", get(viewer))
        .route("/viewer", get(viewer))
        .route("/frame", get(frame))
        .fallback(fallback)
        .layer(middleware::from_fn(common_headers))
        .with_state(latest)
}

/// Answers CORS preflight and stamps the headers every response carries.
async fn common_headers(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALLOW_ORIGIN),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

async fn viewer() -> Html<&'static str> {
    Html(VIEWER_HTML)
}

async fn frame(State(latest): State<SharedLatestFrame>) -> Response {
    let Some(latest) = latest.snapshot() else {
        return error_response(StatusCode::NO_CONTENT, "no frame available");
    };

    let envelope = FrameEnvelope {
        frame: STANDARD.encode(&latest.packet),
        width: latest.width,
        height: latest.height,
        timestamp: latest.sequence,
    };
    match serde_json::to_vec(&envelope) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            log::error!("frame serialisation failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed")
        }
    }
}

async fn fallback(method: Method) -> Response {
    if method == Method::GET || method == Method::HEAD {
        (StatusCode::NOT_FOUND, "Not Found").into_response()
    } else {
        (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed").into_response()
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Serves the viewer and the latest frame, one connection at a time.
///
/// Either drive it from the caller's loop with [`poll`](Self::poll) or hand it to a
/// task with [`run`](Self::run).
pub struct HttpFrameServer {
    listener: TcpListener,
    app: Router,
    served: u64,
}

impl HttpFrameServer {
    pub async fn bind(addr: impl ToSocketAddrs, latest: SharedLatestFrame) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StreamError::Setup(e.into()))?;
        log::info!(
            "http server listening on {}",
            listener
                .local_addr()
                .map_err(|e| StreamError::Setup(e.into()))?
        );
        Ok(Self {
            listener,
            app: router(latest),
            served: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn connections_served(&self) -> u64 {
        self.served
    }

    /// Waits at most `timeout` for a connection and serves it to completion, then
    /// keeps serving connections that are already waiting. Returns how many were
    /// served; 0 means the wait elapsed.
    pub async fn poll(&mut self, timeout: Duration) -> Result<usize> {
        let mut served = 0;
        let mut wait = timeout;
        while served < MAX_CONNECTIONS_PER_POLL {
            let (stream, peer) = match tokio::time::timeout(wait, self.listener.accept()).await {
                Ok(accepted) => accepted?,
                Err(_) => break,
            };
            self.serve(stream, peer).await;
            served += 1;
            wait = Duration::ZERO;
        }
        Ok(served)
    }

    /// Serves until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("http server shutting down");
                    break;
                }
                result = self.poll(IDLE_POLL) => {
                    if let Err(e) = result {
                        log::error!("http accept failed: {}", e);
                        tokio::time::sleep(IDLE_POLL).await;
                    }
                }
            }
        }
    }

    async fn serve(&mut self, stream: TcpStream, peer: SocketAddr) {
        let connection = Self::serve_connection(&self.app, stream);
        match tokio::time::timeout(REQUEST_TIMEOUT, connection).await {
            Ok(Ok(())) => log::debug!("served {}", peer),
            Ok(Err(e)) => log::debug!("connection from {} failed: {}", peer, e),
            Err(_) => log::warn!("connection from {} timed out", peer),
        }
        self.served += 1;
    }

    async fn serve_connection(app: &Router, mut stream: TcpStream) -> anyhow::Result<()> {
        match check_request_line(&stream).await? {
            RequestLine::Valid => {}
            RequestLine::Closed => return Ok(()),
            RequestLine::Malformed(pending) => {
                return reject_bad_request(&mut stream, pending).await;
            }
        }
        let service = TowerToHyperService::new(app.clone());
        http1::Builder::new()
            .keep_alive(false)
            .serve_connection(TokioIo::new(stream), service)
            .await?;
        Ok(())
    }
}

enum RequestLine {
    Valid,
    /// Peer went away before sending anything.
    Closed,
    /// Bytes the client has sent so far, to be drained before answering.
    Malformed(usize),
}

/// Peeks at the first line without consuming it so hyper still sees the whole
/// request. A line is valid when it has exactly `METHOD PATH HTTP/x` tokens.
async fn check_request_line(stream: &TcpStream) -> std::io::Result<RequestLine> {
    let mut buf = vec![0u8; MAX_REQUEST_LINE];
    let mut seen = 0;
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(RequestLine::Closed);
        }
        if let Some(end) = buf[..n].iter().position(|&b| b == b'\n') {
            let line = String::from_utf8_lossy(&buf[..end]);
            return Ok(if is_request_line(line.trim_end_matches('\r')) {
                RequestLine::Valid
            } else {
                RequestLine::Malformed(n)
            });
        }
        if n == buf.len() {
            return Ok(RequestLine::Malformed(n));
        }
        if n == seen {
            // peek stays ready while unread bytes are queued; wait for more
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        seen = n;
    }
}

fn is_request_line(line: &str) -> bool {
    let mut parts = line.split_whitespace();
    matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some(_), Some(_), Some(version), None) if version.starts_with("HTTP/")
    )
}

async fn reject_bad_request(stream: &mut TcpStream, pending: usize) -> anyhow::Result<()> {
    // drain what was peeked so closing does not reset the connection
    let mut sink = vec![0u8; pending];
    stream.read_exact(&mut sink).await?;

    let body = "Bad Request";
    let response = format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: {}\r\n\
         Access-Control-Allow-Methods: {}\r\n\
         Access-Control-Allow-Headers: {}\r\n\
         Cache-Control: {}\r\n\
         Connection: close\r\n\r\n{}",
        body.len(),
        ALLOW_ORIGIN,
        ALLOW_METHODS,
        ALLOW_HEADERS,
        NO_CACHE,
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
#[path = "server_test.rs"]
mod server_test;
