use rmcp::ServiceExt as _;
use rmcp::model::CallToolRequestParams;
use secrecy::SecretString;
use serde_json::{Value, json};
use siem_mcp_gateway::http::router;
use siem_mcp_gateway::mcp::SiemMcpServer;
use siem_test_support::{
    CLIENT_KEY, MockResponse, MockUpstream, SERVICE_TOKEN, build_gateway, test_config,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

fn gateway(upstream: &MockUpstream) -> Arc<siem_passthrough::Gateway> {
    let cfg = test_config(&upstream.base_url()).expect("cfg");
    Arc::new(build_gateway(cfg, None).expect("gateway"))
}

#[tokio::test]
async fn stdio_server_lists_and_calls_tools() {
    let upstream = MockUpstream::with_responses([MockResponse::json(
        200,
        &json!([{"id": 7, "status": "OPEN"}]),
    )])
    .await
    .expect("mock");
    let server = SiemMcpServer::trusted(gateway(&upstream), SecretString::from(CLIENT_KEY));

    let (server_io, client_io) = tokio::io::duplex(64 * 1024);
    let serving = tokio::spawn(async move {
        let running = server.serve(server_io).await.expect("server handshake");
        let _ = running.waiting().await;
    });
    let client = ().serve(client_io).await.expect("client handshake");

    let info = client.peer_info().expect("server info");
    assert_eq!(info.server_info.name, "siem-mcp-gateway");
    assert!(info.capabilities.tools.is_some());

    let names: Vec<String> = client
        .list_all_tools()
        .await
        .expect("tools")
        .into_iter()
        .map(|t| t.name.to_string())
        .collect();
    assert_eq!(names, ["siem_request", "siem_discover"]);

    let args = json!({"endpoint": "/siem/offenses", "params": {"filter": "status=OPEN"}});
    let result = client
        .call_tool(CallToolRequestParams {
            meta: None,
            name: "siem_request".into(),
            arguments: args.as_object().cloned(),
            task: None,
        })
        .await
        .expect("call");
    assert_eq!(result.is_error, Some(false));
    let env = result.structured_content.expect("structured");
    assert_eq!(env["ok"], true);
    assert_eq!(env["body"], json!([{"id": 7, "status": "OPEN"}]));

    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/api/siem/offenses");
    assert_eq!(requests[0].header("sec"), Some(SERVICE_TOKEN));

    let _ = client.cancel().await;
    let _ = serving.await;
}

#[tokio::test]
async fn stdio_tool_failures_are_error_results() {
    let upstream = MockUpstream::with_responses([MockResponse::json(
        404,
        &json!({"message": "No offense with id 9"}),
    )])
    .await
    .expect("mock");
    let server = SiemMcpServer::trusted(gateway(&upstream), SecretString::from(CLIENT_KEY));

    let (server_io, client_io) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        if let Ok(running) = server.serve(server_io).await {
            let _ = running.waiting().await;
        }
    });
    let client = ().serve(client_io).await.expect("client handshake");

    let result = client
        .call_tool(CallToolRequestParams {
            meta: None,
            name: "siem_request".into(),
            arguments: json!({"endpoint": "/siem/offenses/9"}).as_object().cloned(),
            task: None,
        })
        .await
        .expect("call");
    assert_eq!(result.is_error, Some(true));
    let env = result.structured_content.expect("structured");
    assert_eq!(env["status"], 404);
    assert_eq!(env["error"]["kind"], "UpstreamError");

    let _ = client.cancel().await;
}

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start(upstream: &MockUpstream) -> Self {
        let app = router(gateway(upstream));
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

    /// POST one JSON-RPC message to `/mcp` and return the JSON-RPC response it streams back.
    async fn rpc(&self, credential: Option<&str>, message: Value) -> Value {
        let mut req = reqwest::Client::new()
            .post(format!("http://{}/mcp", self.addr))
            .header("accept", "application/json, text/event-stream")
            .json(&message);
        if let Some(key) = credential {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.expect("send");
        assert_eq!(resp.status(), 200);
        let text = tokio::time::timeout(Duration::from_secs(10), resp.text())
            .await
            .expect("response in time")
            .expect("body");
        text.lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .filter_map(|data| serde_json::from_str::<Value>(data.trim()).ok())
            .find(|msg| msg.get("id") == message.get("id"))
            .unwrap_or_else(|| panic!("no JSON-RPC response in {text:?}"))
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
async fn http_tool_listing_requires_the_client_credential() {
    let upstream = MockUpstream::start().await.expect("mock");
    let server = TestServer::start(&upstream).await;
    let list = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}});

    let denied = server.rpc(None, list.clone()).await;
    assert!(denied.get("result").is_none(), "{denied}");
    assert!(denied["error"]["message"].is_string());

    let listed = server.rpc(Some(CLIENT_KEY), list).await;
    let names: Vec<&str> = listed["result"]["tools"]
        .as_array()
        .expect("tools")
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names, ["siem_request", "siem_discover"]);
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn http_tool_calls_forward_with_the_service_token() {
    let upstream = MockUpstream::with_responses([MockResponse::json(200, &json!({"count": 3}))])
        .await
        .expect("mock");
    let server = TestServer::start(&upstream).await;
    let call = |id: u64| {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": "siem_request", "arguments": {"endpoint": "/siem/offenses"}}
        })
    };

    let denied = server.rpc(Some("wrong-key"), call(1)).await;
    assert_eq!(denied["result"]["isError"], true);
    assert_eq!(denied["result"]["structuredContent"]["error"]["kind"], "AuthError");
    assert_eq!(upstream.calls(), 0);

    let ok = server.rpc(Some(CLIENT_KEY), call(2)).await;
    assert_eq!(ok["result"]["isError"], false);
    assert_eq!(ok["result"]["structuredContent"]["body"], json!({"count": 3}));

    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("sec"), Some(SERVICE_TOKEN));
    assert_eq!(requests[0].header("authorization"), None);
}
