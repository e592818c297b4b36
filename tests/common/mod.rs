//! Local servers for integration tests (no external network).
//!
//! Each server runs on its own tokio runtime so the blocking source can be
//! driven from the plain test thread.

#![allow(dead_code)]

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use axum::{
    Router,
    body::Body,
    extract::Request,
    http::{HeaderMap, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use httpsrc::{ErrorMessage, HttpSrc, SourceConfig, SourceEvent, source::SessionProvider};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    runtime::Runtime,
};

pub const FILE_LEN: usize = 1_200;

/// Deterministic content served by `/file`.
pub fn file_bytes() -> Vec<u8> {
    (0..FILE_LEN).map(|i| (i % 251) as u8).collect()
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

fn server_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap()
}

/// axum server with the fixture routes below; records every request.
pub struct TestServer {
    base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    _runtime: Runtime,
}

impl TestServer {
    pub fn start() -> Self {
        let runtime = server_runtime();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();

        let app = routes().layer(axum::middleware::from_fn(
            move |req: Request, next: Next| {
                let log = log.clone();
                async move {
                    log.lock().push(Recorded {
                        method: req.method().clone(),
                        path: req.uri().path().to_string(),
                        headers: req.headers().clone(),
                    });
                    next.run(req).await
                }
            },
        ));

        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        runtime.spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
            _runtime: runtime,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

fn routes() -> Router {
    Router::new()
        .route("/file", get(file))
        .route("/no-ranges", get(no_ranges))
        .route("/ignores-range", get(ignores_range))
        .route("/unsized", get(unsized_body))
        .route("/overlong", get(overlong))
        .route("/timed", get(timed))
        .route("/icy", get(icy))
        .route("/protected", get(protected))
        .route("/set-cookie", get(set_cookie))
        .route("/slow-body", get(slow_body))
        .route("/stall", get(stall))
        .route(
            "/moved",
            get(|| async { (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "/file")]) }),
        )
        .route(
            "/found",
            get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/file")]) }),
        )
}

fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some((start.parse().ok()?, end))
}

fn full(body: Vec<u8>) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

async fn file(headers: HeaderMap) -> Response {
    let body = file_bytes();
    let total = body.len() as u64;
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range);

    let Some((start, end)) = range else {
        let mut response = full(body);
        response
            .headers_mut()
            .insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
        return response;
    };

    if start >= total {
        return (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{total}"))],
        )
            .into_response();
    }
    let end = end.unwrap_or(total - 1).min(total - 1);
    let slice = body[start as usize..=end as usize].to_vec();
    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}"))
        .header(header::CONTENT_LENGTH, slice.len())
        .body(Body::from(slice))
        .unwrap()
}

async fn no_ranges() -> Response {
    let mut response = full(file_bytes());
    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, "none".parse().unwrap());
    response
}

async fn ignores_range() -> Response {
    full(file_bytes())
}

/// Chunked body of 100 bytes whose size is never announced; ranged
/// requests get 416.
async fn unsized_body(headers: HeaderMap) -> Response {
    if headers.contains_key(header::RANGE) {
        return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
    }
    let chunk = Bytes::from(file_bytes()[..100].to_vec());
    let stream = futures::stream::iter([Ok::<_, io::Error>(chunk)]);
    Response::builder()
        .status(StatusCode::OK)
        .body(Body::from_stream(stream))
        .unwrap()
}

/// Claims the first 100 bytes but sends 228.
async fn overlong() -> Response {
    let body = file_bytes()[..228].to_vec();
    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_RANGE, format!("bytes 0-99/{FILE_LEN}"))
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

/// Answers time-seek requests with the second half of the file.
async fn timed() -> Response {
    full(file_bytes()[FILE_LEN / 2..].to_vec())
}

async fn icy() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .header("icy-metaint", "8192")
        .header("icy-name", "Test FM")
        .header("icy-genre", "Jazz")
        .header("icy-url", "http://test.fm")
        .body(Body::from(vec![0u8; 100]))
        .unwrap()
}

/// Accepts `user:pass`.
async fn protected(headers: HeaderMap) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .is_some_and(|v| v == "Basic dXNlcjpwYXNz");
    if authorized {
        return full(b"secret".to_vec());
    }
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"test\"")],
    )
        .into_response()
}

async fn set_cookie() -> Response {
    let mut response = full(b"ok".to_vec());
    response
        .headers_mut()
        .insert(header::SET_COOKIE, "token=abc; Path=/".parse().unwrap());
    response
}

/// Headers, then a body that never produces data.
async fn slow_body() -> Response {
    let stream = futures::stream::pending::<Result<Bytes, io::Error>>();
    Response::builder()
        .status(StatusCode::OK)
        .body(Body::from_stream(stream))
        .unwrap()
}

/// Never answers.
async fn stall() -> Response {
    futures::future::pending::<Response>().await
}

/// What a [`FlakyServer`] does once its failures are used up.
#[derive(Clone, Copy)]
enum Reply {
    Body(&'static [u8]),
    /// Written to the socket as is.
    Raw(&'static str),
    /// Keeps the connection open without answering.
    Stall,
}

/// Raw TCP server that drops the first `failures` connections after reading
/// the request, then replies.
pub struct FlakyServer {
    url: String,
    accepted: Arc<AtomicUsize>,
    request_lines: Arc<Mutex<Vec<String>>>,
    _runtime: Runtime,
}

impl FlakyServer {
    /// Answers with a 200 carrying `body`.
    pub fn start(failures: usize, body: &'static [u8]) -> Self {
        Self::spawn(failures, Reply::Body(body))
    }

    /// Never answers once the failures are used up.
    pub fn stalling(failures: usize) -> Self {
        Self::spawn(failures, Reply::Stall)
    }

    /// Sends `response` verbatim to every request.
    pub fn raw(response: &'static str) -> Self {
        Self::spawn(0, Reply::Raw(response))
    }

    fn spawn(failures: usize, reply: Reply) -> Self {
        let runtime = server_runtime();
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let request_lines = Arc::new(Mutex::new(Vec::new()));
        let counter = accepted.clone();
        let lines = request_lines.clone();

        runtime.spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let lines = lines.clone();
                tokio::spawn(async move {
                    let request = read_request(&mut socket).await;
                    let first = request.split(|&b| b == b'\r').next().unwrap_or_default();
                    lines.lock().push(String::from_utf8_lossy(first).into_owned());
                    if n < failures {
                        return;
                    }
                    match reply {
                        Reply::Body(body) => {
                            let head = format!(
                                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                                body.len()
                            );
                            let _ = socket.write_all(head.as_bytes()).await;
                            let _ = socket.write_all(body).await;
                        }
                        Reply::Raw(response) => {
                            let _ = socket.write_all(response.as_bytes()).await;
                        }
                        Reply::Stall => futures::future::pending::<()>().await,
                    }
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            url: format!("http://{addr}/flaky"),
            accepted,
            request_lines,
            _runtime: runtime,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// First line of every request received, in arrival order.
    pub fn request_lines(&self) -> Vec<String> {
        self.request_lines.lock().clone()
    }
}

async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1_024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    buf
}

/// Polls `condition` for up to five seconds.
pub fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// A port nothing listens on.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/")
}

/// Source config suitable for the local servers: no proxy, no backoff.
pub fn config(location: &str) -> SourceConfig {
    let mut config = SourceConfig::with_location(location);
    config.proxy = None;
    config.retry_backoff_ms = 0;
    config
}

pub fn source(config: SourceConfig) -> (HttpSrc, flume::Receiver<SourceEvent>) {
    let (tx, rx) = flume::unbounded();
    let src = HttpSrc::builder(config)
        .event_sink(Arc::new(tx))
        .build()
        .unwrap();
    (src, rx)
}

pub fn shared_source(
    config: SourceConfig,
    provider: Arc<dyn SessionProvider>,
) -> (HttpSrc, flume::Receiver<SourceEvent>) {
    let (tx, rx) = flume::unbounded();
    let src = HttpSrc::builder(config)
        .event_sink(Arc::new(tx))
        .session_provider(provider)
        .build()
        .unwrap();
    (src, rx)
}

pub fn errors(rx: &flume::Receiver<SourceEvent>) -> Vec<ErrorMessage> {
    rx.try_iter()
        .filter_map(|event| match event {
            SourceEvent::Error(message) => Some(message),
            _ => None,
        })
        .collect()
}
