//! End-to-end exercise of the `/mcp` and health routes through the axum
//! router itself, without binding a real socket.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use ferrite_mcp_server::{Dispatcher, HandlerRegistry, ServerConfig, SessionManager, TaskManager};
use ferrite_mcp_transport_http::HttpTransport;
use futures::StreamExt;
use tower::ServiceExt;

fn transport() -> HttpTransport {
    let registry = Arc::new(HandlerRegistry::new());
    let sessions = Arc::new(SessionManager::new(10, Duration::from_secs(3600)));
    let tasks = Arc::new(TaskManager::new());
    let config = Arc::new(ServerConfig::default());
    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), sessions.clone(), tasks.clone(), config.clone()));
    HttpTransport::new(dispatcher, sessions, tasks, registry, config)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn initialize_returns_session_id_header() {
    let router = transport().router();
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "initialize",
        "params": {"protocolVersion": "2025-11-25", "capabilities": {}},
        "id": 1,
    });

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("mcp-session-id"));
    let mcp_protocol_version = response.headers().get("mcp-protocol-version").cloned();
    assert!(mcp_protocol_version.is_some());

    let value = body_json(response).await;
    assert_eq!(value["result"]["protocolVersion"], "2025-11-25");
}

#[tokio::test]
async fn missing_session_header_rejected_for_non_initialize() {
    let router = transport().router();
    let body = serde_json::json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1});

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wrong_content_type_rejected() {
    let router = transport().router();
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "text/plain")
        .body(Body::from("{}"))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_ok_before_any_tool_registered() {
    let router = transport().router();
    let request = Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_ready_is_503_with_no_registered_tools() {
    let router = transport().router();
    let request = Request::builder().method("GET").uri("/health/ready").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let router = transport().router();
    let request = Request::builder().method("GET").uri("/openapi.json").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert!(value.get("openapi").is_some());
}

#[tokio::test]
async fn sampling_request_round_trips_through_sse() {
    let registry = Arc::new(HandlerRegistry::new());
    registry
        .register_tool(
            "echo_sample",
            &[],
            Arc::new(|ctx: ferrite_mcp_core::Context, _args| {
                Box::pin(async move {
                    let sampled = ctx.sample(serde_json::json!({"messages": []})).await?;
                    Ok(serde_json::json!({"sampled": sampled}))
                })
            }),
            ferrite_mcp_server::ToolOptions::default(),
        )
        .unwrap();
    let sessions = Arc::new(SessionManager::new(10, Duration::from_secs(3600)));
    let tasks = Arc::new(TaskManager::new());
    let config = Arc::new(ServerConfig::default());
    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), sessions.clone(), tasks.clone(), config.clone()));
    let router = HttpTransport::new(dispatcher, sessions, tasks, registry, config).router();

    let init_body = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "initialize",
        "params": {"protocolVersion": "2025-11-25", "capabilities": {"sampling": {}}},
        "id": 1,
    });
    let init_request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&init_body).unwrap()))
        .unwrap();
    let init_response = router.clone().oneshot(init_request).await.unwrap();
    let session_id = init_response
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let initialized_body = serde_json::json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
    let initialized_request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("mcp-session-id", session_id.clone())
        .body(Body::from(serde_json::to_vec(&initialized_body).unwrap()))
        .unwrap();
    router.clone().oneshot(initialized_request).await.unwrap();

    let call_body = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": {"name": "echo_sample", "arguments": {}},
        "id": 2,
    });
    let call_request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("mcp-session-id", session_id.clone())
        .body(Body::from(serde_json::to_vec(&call_body).unwrap()))
        .unwrap();
    let call_response = router.clone().oneshot(call_request).await.unwrap();
    assert_eq!(call_response.status(), StatusCode::OK);

    let mut stream = call_response.into_body().into_data_stream();
    let first_chunk = stream.next().await.unwrap().unwrap();
    let frame_text = String::from_utf8(first_chunk.to_vec()).unwrap();
    assert!(frame_text.contains("event: server_request"));
    let data_line = frame_text.lines().find(|line| line.starts_with("data:")).unwrap();
    let frame: serde_json::Value = serde_json::from_str(data_line.trim_start_matches("data:").trim()).unwrap();
    assert_eq!(frame["method"], "sampling/createMessage");
    let request_id = frame["id"].as_str().unwrap().to_string();

    let respond_body = serde_json::json!({"id": request_id, "result": {"role": "assistant", "content": "hi"}});
    let respond_request = Request::builder()
        .method("POST")
        .uri("/mcp/respond")
        .header("content-type", "application/json")
        .header("mcp-session-id", session_id)
        .body(Body::from(serde_json::to_vec(&respond_body).unwrap()))
        .unwrap();
    let respond_response = router.oneshot(respond_request).await.unwrap();
    assert_eq!(respond_response.status(), StatusCode::ACCEPTED);

    let mut rest = Vec::new();
    while let Some(chunk) = stream.next().await {
        rest.extend_from_slice(&chunk.unwrap());
    }
    let rest_text = String::from_utf8(rest).unwrap();
    assert!(rest_text.contains("event: message"));
    assert!(rest_text.contains("\"sampled\""));
}

#[tokio::test]
async fn long_running_tool_pushes_task_status_to_the_live_stream() {
    let registry = Arc::new(HandlerRegistry::new());
    registry
        .register_tool(
            "slow_echo",
            &[],
            Arc::new(|_ctx: ferrite_mcp_core::Context, _args| Box::pin(async move { Ok(serde_json::json!({"ok": true})) })),
            ferrite_mcp_server::ToolOptions {
                long_running: true,
                ..Default::default()
            },
        )
        .unwrap();
    let sessions = Arc::new(SessionManager::new(10, Duration::from_secs(3600)));
    let tasks = Arc::new(TaskManager::new());
    let config = Arc::new(ServerConfig::default());
    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), sessions.clone(), tasks.clone(), config.clone()));
    let router = HttpTransport::new(dispatcher, sessions.clone(), tasks, registry, config).router();

    let init_body = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "initialize",
        "params": {"protocolVersion": "2025-11-25", "capabilities": {}},
        "id": 1,
    });
    let init_request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&init_body).unwrap()))
        .unwrap();
    let init_response = router.clone().oneshot(init_request).await.unwrap();
    let session_id = init_response
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let stream_request = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header("mcp-session-id", session_id.clone())
        .body(Body::empty())
        .unwrap();
    let stream_response = router.clone().oneshot(stream_request).await.unwrap();
    assert_eq!(stream_response.status(), StatusCode::OK);
    let mut stream = stream_response.into_body().into_data_stream();
    tokio::task::yield_now().await;

    let call_body = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": {"name": "slow_echo", "arguments": {}},
        "id": 2,
    });
    let call_request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("mcp-session-id", session_id)
        .body(Body::from(serde_json::to_vec(&call_body).unwrap()))
        .unwrap();
    let call_response = router.oneshot(call_request).await.unwrap();
    assert_eq!(call_response.status(), StatusCode::OK);
    let mut call_stream = call_response.into_body().into_data_stream();
    let call_chunk = tokio::time::timeout(Duration::from_secs(1), call_stream.next())
        .await
        .expect("tools/call acknowledgement should arrive before the timeout")
        .unwrap()
        .unwrap();
    let call_text = String::from_utf8(call_chunk.to_vec()).unwrap();
    let call_data_line = call_text.lines().find(|line| line.starts_with("data:")).unwrap();
    let call_frame: serde_json::Value =
        serde_json::from_str(call_data_line.trim_start_matches("data:").trim()).unwrap();
    assert_eq!(call_frame["result"]["status"], "working");

    let chunk = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("task status notification should arrive before the timeout")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(text.contains("event: server_notification"));
    assert!(text.contains("notifications/tasks/status"));
    assert!(text.contains("\"completed\""));
}

#[tokio::test]
async fn resource_update_is_pushed_to_a_subscribed_live_stream() {
    let registry = Arc::new(HandlerRegistry::new());
    let sessions = Arc::new(SessionManager::new(10, Duration::from_secs(3600)));
    let tasks = Arc::new(TaskManager::new());
    let config = Arc::new(ServerConfig::default());
    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), sessions.clone(), tasks.clone(), config.clone()));
    let transport = HttpTransport::new(dispatcher, sessions.clone(), tasks, registry, config);
    let router = transport.router();

    let init_body = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "initialize",
        "params": {"protocolVersion": "2025-11-25", "capabilities": {}},
        "id": 1,
    });
    let init_request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&init_body).unwrap()))
        .unwrap();
    let init_response = router.clone().oneshot(init_request).await.unwrap();
    let session_id = init_response
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let sid = ferrite_mcp_core::SessionId::from(session_id.as_str());
    sessions.with_session(&sid, |s| {
        s.subscriptions.insert("file:///readme.txt".to_string());
    });

    let stream_request = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header("mcp-session-id", session_id)
        .body(Body::empty())
        .unwrap();
    let stream_response = router.oneshot(stream_request).await.unwrap();
    assert_eq!(stream_response.status(), StatusCode::OK);
    let mut stream = stream_response.into_body().into_data_stream();

    // Give the GET handler a tick to register itself in the live-stream
    // table before the push fires.
    tokio::task::yield_now().await;
    transport.notify_resource_updated("file:///readme.txt");

    let chunk = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("resource update should arrive before the timeout")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(text.contains("event: server_notification"));
    assert!(text.contains("notifications/resources/updated"));
    assert!(text.contains("file:///readme.txt"));
}

#[tokio::test]
async fn delete_unknown_session_is_still_no_content() {
    let router = transport().router();
    let request = Request::builder()
        .method("DELETE")
        .uri("/mcp")
        .header("mcp-session-id", "sess-does-not-exist")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
