//! Test helpers: a scriptable mock SIEM console, a recording clock and port helpers.

use anyhow::Context as _;
use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use siem_passthrough::{
    BackoffPolicy, Clock, CredentialValidator, Gateway, ServiceToken, UpstreamClient,
    UpstreamConfig,
};
use std::collections::{BTreeMap, VecDeque};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Client credential accepted by gateways built with [`build_gateway`].
pub const CLIENT_KEY: &str = "client-key-123";

/// Service token injected by gateways built with [`build_gateway`].
pub const SERVICE_TOKEN: &str = "svc-token-xyz";

/// Pick an unused TCP port on localhost.
///
/// Note: this does not reserve the port; it's still possible for another process to bind it
/// before you do.
///
/// # Errors
///
/// Returns an error if binding an ephemeral localhost port fails or if the bound socket's
/// local address cannot be read.
pub fn pick_unused_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("bind ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

/// A base URL nothing is listening on.
///
/// # Errors
///
/// Returns an error if no ephemeral port can be picked.
pub fn closed_base_url() -> anyhow::Result<String> {
    Ok(format!("http://127.0.0.1:{}/api", pick_unused_port()?))
}

/// Upstream config tuned for tests: fast, jitter-free backoff.
///
/// # Errors
///
/// Returns an error if `base_url` is not a valid console base URL.
pub fn test_config(base_url: &str) -> anyhow::Result<UpstreamConfig> {
    let mut cfg = UpstreamConfig::new(base_url)?;
    cfg.timeout = Duration::from_secs(5);
    cfg.backoff = BackoffPolicy {
        base: Duration::from_millis(10),
        cap: Duration::from_secs(5),
        jitter: 0.0,
    };
    Ok(cfg)
}

/// Gateway accepting [`CLIENT_KEY`] and injecting [`SERVICE_TOKEN`].
///
/// # Errors
///
/// Returns an error if the client cannot be built.
pub fn build_gateway(
    config: UpstreamConfig,
    clock: Option<Arc<dyn Clock>>,
) -> anyhow::Result<Gateway> {
    let validator = CredentialValidator::new(&CLIENT_KEY.to_string().into())?;
    let token = ServiceToken::new(SERVICE_TOKEN.to_string().into())?;
    let client = match clock {
        Some(clock) => UpstreamClient::with_clock(config, clock)?,
        None => UpstreamClient::new(config)?,
    };
    Ok(Gateway::new(validator, token, client))
}

/// Clock that never sleeps: waits are recorded and advance virtual time instantly.
pub struct RecordingClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    /// Every requested sleep, in order.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock() += by;
    }
}

#[async_trait]
impl Clock for RecordingClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// A canned response from [`MockUpstream`].
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl MockResponse {
    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string().into_bytes(),
        }
    }

    #[must_use]
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: body.as_bytes().to_vec(),
        }
    }

    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn into_axum(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, self.body).into_response();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

/// One request as seen by [`MockUpstream`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Lower-cased header names.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

enum Fallback {
    /// Reply 200 with a JSON description of the request.
    Echo,
    Respond(MockResponse),
}

struct MockState {
    script: Mutex<VecDeque<MockResponse>>,
    fallback: Mutex<Fallback>,
    delay: Mutex<Duration>,
    requests: Mutex<Vec<RecordedRequest>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A mock SIEM console on `127.0.0.1:0`, serving everything under `/api`.
///
/// Scripted responses are served first, in order; afterwards the fallback answers (echo by
/// default). The server shuts down when the handle is dropped.
pub struct MockUpstream {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockUpstream {
    /// Start an echoing mock.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start() -> anyhow::Result<Self> {
        Self::with_responses(Vec::new()).await
    }

    /// Start a mock that serves `responses` in order before falling back to echo.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn with_responses(
        responses: impl IntoIterator<Item = MockResponse>,
    ) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            script: Mutex::new(responses.into_iter().collect()),
            fallback: Mutex::new(Fallback::Echo),
            delay: Mutex::new(Duration::ZERO),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });

        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind mock upstream")?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let handle = tokio::spawn(async move {
            let _ = server.await;
        });

        Ok(Self {
            addr,
            state,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Base URL to configure the gateway with (`http://127.0.0.1:<port>/api`).
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Answer every unscripted request with `response`.
    pub fn always(&self, response: MockResponse) {
        *self.state.fallback.lock() = Fallback::Respond(response);
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = delay;
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// Requests currently being handled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of requests observed in flight at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.calls.fetch_add(1, Ordering::SeqCst);
    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(now, Ordering::SeqCst);
    let _guard = InFlight(&state.in_flight);

    let recorded = RecordedRequest {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: headers
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect(),
        body: body.to_vec(),
    };
    state.requests.lock().push(recorded.clone());

    let delay = *state.delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let scripted = state.script.lock().pop_front();
    if let Some(response) = scripted {
        return response.into_axum();
    }
    let canned = match &*state.fallback.lock() {
        Fallback::Respond(response) => Some(response.clone()),
        Fallback::Echo => None,
    };
    match canned {
        Some(response) => response.into_axum(),
        None => axum::Json(echo(&recorded)).into_response(),
    }
}

fn echo(req: &RecordedRequest) -> Value {
    let headers: Map<String, Value> = req
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let body = req
        .json_body()
        .unwrap_or_else(|| Value::String(String::from_utf8_lossy(&req.body).into_owned()));
    json!({
        "method": req.method,
        "path": req.path,
        "query": req.query,
        "headers": headers,
        "body": body,
    })
}
