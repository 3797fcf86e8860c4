//! Local HTTP server with scripted responses.
//!
//! [`TestServer`] binds `127.0.0.1:0` and answers every method on every path
//! from a table of [`MockResponse`]s. A path can hold a sequence of
//! responses: each request consumes one, and the last one repeats, which is
//! how retry behavior is exercised (`500`, `500`, then `200`). Unknown paths
//! answer `404`.
//!
//! The server also counts requests per path and tracks how many requests were
//! being served at the same time.

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One scripted response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    body: Vec<u8>,
    delay: Duration,
    headers: Vec<(String, String)>,
}

impl MockResponse {
    /// `200 OK` with `body`.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            delay: Duration::ZERO,
            headers: Vec::new(),
        }
    }

    /// An empty response with `status`.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::ok(Vec::new())
        }
    }

    /// Wait `delay` before answering.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Add a response header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Default)]
struct ServerState {
    routes: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    hits: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ServerState {
    fn next_response(&self, path: &str) -> Option<MockResponse> {
        let mut routes = self.routes.lock().ok()?;
        let queue = routes.get_mut(path)?;
        if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() }
    }

    fn record_hit(&self, path: &str) {
        if let Ok(mut hits) = self.hits.lock() {
            *hits.entry(path.to_string()).or_default() += 1;
        }
    }
}

/// A running test server. Stops when dropped.
pub struct TestServer {
    base_url: String,
    state: Arc<ServerState>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Bind an ephemeral port and start serving.
    pub async fn start() -> Result<Self> {
        let state = Arc::new(ServerState::default());
        let app = Router::new().fallback(serve).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.context("Failed to bind test server")?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            state,
            handle,
        })
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL of `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Serve `body` with `200 OK` at `path`.
    pub fn serve(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.respond(path, MockResponse::ok(body));
    }

    /// Always answer `path` with `response`.
    pub fn respond(&self, path: &str, response: MockResponse) {
        self.respond_sequence(path, vec![response]);
    }

    /// Answer successive requests to `path` with `responses`, repeating the last.
    pub fn respond_sequence(&self, path: &str, responses: Vec<MockResponse>) {
        if let Ok(mut routes) = self.state.routes.lock() {
            routes.insert(normalize(path), responses.into());
        }
    }

    /// Requests received for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.state.hits.lock().ok().and_then(|hits| hits.get(&normalize(path)).copied()).unwrap_or(0)
    }

    /// Highest number of requests served concurrently so far.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn normalize(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

async fn serve(State(state): State<Arc<ServerState>>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    state.record_hit(&path);

    let _guard = InFlight::enter(&state);
    match state.next_response(&path) {
        Some(mock) => {
            if !mock.delay.is_zero() {
                tokio::time::sleep(mock.delay).await;
            }
            render(mock)
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// also released when the client disconnects mid-delay
struct InFlight<'a>(&'a ServerState);

impl<'a> InFlight<'a> {
    fn enter(state: &'a ServerState) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn render(mock: MockResponse) -> Response {
    let status = StatusCode::from_u16(mock.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, mock.body).into_response();
    for (name, value) in &mock.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}
