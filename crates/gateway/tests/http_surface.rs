use serde_json::{Value, json};
use siem_mcp_gateway::http::router;
use siem_test_support::{
    CLIENT_KEY, MockResponse, MockUpstream, SERVICE_TOKEN, build_gateway, test_config,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start(upstream: &MockUpstream) -> Self {
        let gateway = build_gateway(test_config(&upstream.base_url()).expect("cfg"), None)
            .expect("gateway");
        let app = router(Arc::new(gateway));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await;
        });
        Self {
            addr,
            shutdown: Some(tx),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[tokio::test]
async fn health_is_public() {
    let upstream = MockUpstream::start().await.expect("mock");
    let server = TestServer::start(&upstream).await;

    let resp = reqwest::get(server.url("/health")).await.expect("health");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["tools"], 2);
    assert_eq!(body["tlsVerification"], true);
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn tool_listing_requires_the_client_credential() {
    let upstream = MockUpstream::start().await.expect("mock");
    let server = TestServer::start(&upstream).await;
    let http = reqwest::Client::new();

    let denied = http.get(server.url("/tools")).send().await.expect("send");
    assert_eq!(denied.status(), 401);
    let env: Value = denied.json().await.expect("json");
    assert_eq!(env["ok"], false);
    assert_eq!(env["error"]["kind"], "AuthError");

    let listed = http
        .get(server.url("/tools"))
        .bearer_auth(CLIENT_KEY)
        .send()
        .await
        .expect("send");
    assert_eq!(listed.status(), 200);
    let body: Value = listed.json().await.expect("json");
    let names: Vec<&str> = body["tools"]
        .as_array()
        .expect("tools")
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names, ["siem_request", "siem_discover"]);
}

#[tokio::test]
async fn tool_call_returns_the_envelope() {
    let upstream = MockUpstream::with_responses([MockResponse::json(
        200,
        &json!([{"id": 7, "status": "OPEN"}]),
    )])
    .await
    .expect("mock");
    let server = TestServer::start(&upstream).await;

    let resp = reqwest::Client::new()
        .post(server.url("/tools/call"))
        .header("x-api-key", CLIENT_KEY)
        .json(&json!({
            "name": "siem_request",
            "arguments": {"endpoint": "/siem/offenses", "params": {"filter": "status=OPEN"}}
        }))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("x-request-id"));
    let env: Value = resp.json().await.expect("json");
    assert_eq!(env["ok"], true);
    assert_eq!(env["status"], 200);
    assert_eq!(env["body"], json!([{"id": 7, "status": "OPEN"}]));

    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/api/siem/offenses");
    assert_eq!(requests[0].header("sec"), Some(SERVICE_TOKEN));
    assert_eq!(requests[0].header("x-api-key"), None);
}

#[tokio::test]
async fn upstream_failures_are_reported_inside_a_200() {
    let upstream = MockUpstream::with_responses([MockResponse::json(
        404,
        &json!({"message": "No offense with id 9"}),
    )])
    .await
    .expect("mock");
    let server = TestServer::start(&upstream).await;

    let resp = reqwest::Client::new()
        .post(server.url("/tools/call"))
        .bearer_auth(CLIENT_KEY)
        .json(&json!({"name": "siem_request", "arguments": {"endpoint": "/siem/offenses/9"}}))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 200);
    let env: Value = resp.json().await.expect("json");
    assert_eq!(env["ok"], false);
    assert_eq!(env["status"], 404);
    assert_eq!(env["error"]["kind"], "UpstreamError");
}

#[tokio::test]
async fn unauthenticated_and_malformed_calls_never_reach_upstream() {
    let upstream = MockUpstream::start().await.expect("mock");
    let server = TestServer::start(&upstream).await;
    let http = reqwest::Client::new();

    // Garbage body without a credential is still an auth failure.
    let resp = http
        .post(server.url("/tools/call"))
        .body("not json")
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 401);

    let resp = http
        .post(server.url("/tools/call"))
        .bearer_auth(CLIENT_KEY)
        .body("not json")
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 400);
    let env: Value = resp.json().await.expect("json");
    assert_eq!(env["error"]["kind"], "InvalidRequest");

    let resp = http
        .post(server.url("/tools/call"))
        .bearer_auth(CLIENT_KEY)
        .json(&json!({"name": "siem_request", "arguments": {"endpoint": "../../etc/passwd"}}))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 400);

    let resp = http
        .post(server.url("/tools/call"))
        .bearer_auth(CLIENT_KEY)
        .json(&json!({"name": "siem_request", "arguments": {}, "extra": 1}))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 400);

    assert_eq!(upstream.calls(), 0);
}
