//! End-to-end tests for session lifecycle and the tool protocol
//!
//! Tests session-related functionality including:
//! - Initialization handshake and capability negotiation
//! - Tool listing, pagination and calls
//! - Session close, bulk close and notifications

mod common;

use common::{TestGateway, TEST_OWNER};
use pezzottify_gateway::session::{SessionKind, SessionParams, SessionStatus};
use pezzottify_gateway::GatewaySettings;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::test]
async fn test_initialize_negotiates_capabilities() {
    let gateway = TestGateway::spawn().await;
    let mut client = gateway.connect(TEST_OWNER).await;
    assert_eq!(client.session.status(), SessionStatus::Connecting);

    let response = client.initialize().await;
    let result = response.result.expect("initialize should succeed");

    assert_eq!(result["serverInfo"]["name"], "pezzottify-gateway");
    assert!(result["capabilities"]["tools"].is_object());
    assert_eq!(result["capabilities"]["tasks"]["streaming"], true);
    assert_eq!(client.session.status(), SessionStatus::Connected);
}

#[tokio::test]
async fn test_capabilities_follow_settings() {
    let gateway = TestGateway::spawn_with(GatewaySettings {
        tools_enabled: false,
        ..GatewaySettings::default()
    })
    .await;
    let mut client = gateway.connect(TEST_OWNER).await;

    let result = client.initialize().await.result.unwrap();
    assert!(result["capabilities"].get("tools").is_none());

    let response = client.request("tools/list", None).await;
    assert_eq!(response.error.unwrap().code, -32601);
}

#[tokio::test]
async fn test_tools_require_initialize() {
    let gateway = TestGateway::spawn().await;
    let mut client = gateway.connect(TEST_OWNER).await;

    let response = client.request("tools/list", None).await;
    let error = response.error.expect("uninitialized session should be refused");
    assert_eq!(error.code, -32600);

    // ping works at any time
    let response = client.request("ping", None).await;
    assert_eq!(response.result, Some(json!({})));
}

#[tokio::test]
async fn test_tools_list_walks_all_pages() {
    let gateway = TestGateway::spawn_with(GatewaySettings {
        tools_page_size: 1,
        ..GatewaySettings::default()
    })
    .await;
    let mut client = gateway.connect(TEST_OWNER).await;
    client.initialize().await;

    let mut names = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let params = cursor.as_ref().map(|c| json!({"cursor": c}));
        let result = client.request("tools/list", params).await.result.unwrap();
        for tool in result["tools"].as_array().unwrap() {
            names.push(tool["name"].as_str().unwrap().to_string());
        }
        match result.get("nextCursor").and_then(|c| c.as_str()) {
            Some(next) => cursor = Some(next.to_string()),
            None => break,
        }
    }

    assert_eq!(names, vec!["echo", "gateway_status"]);
}

#[tokio::test]
async fn test_tools_list_rejects_bad_cursor() {
    let gateway = TestGateway::spawn().await;
    let mut client = gateway.connect(TEST_OWNER).await;
    client.initialize().await;

    let response = client
        .request("tools/list", Some(json!({"cursor": "not-a-cursor"})))
        .await;
    assert_eq!(response.error.unwrap().code, -32602);
}

#[tokio::test]
async fn test_call_echo_tool() {
    let gateway = TestGateway::spawn().await;
    let mut client = gateway.connect(TEST_OWNER).await;
    client.initialize().await;

    let response = client.call_tool("echo", json!({"text": "round trip"})).await;
    let result = response.result.unwrap();
    assert_eq!(result["content"][0]["type"], "text");
    assert_eq!(result["content"][0]["text"], "round trip");
}

#[tokio::test]
async fn test_gateway_status_tool_sees_sessions() {
    let gateway = TestGateway::spawn().await;
    let mut client = gateway.connect(TEST_OWNER).await;
    let _other = gateway.connect("someone-else").await;
    client.initialize().await;

    let response = client.call_tool("gateway_status", json!({})).await;
    let text = response.result.unwrap()["content"][0]["text"]
        .as_str()
        .unwrap()
        .to_string();
    let status: serde_json::Value = serde_json::from_str(&text).unwrap();

    assert_eq!(status["active_sessions"], 2);
    assert_eq!(status["registered_tools"], 2);
    assert_eq!(status["caller_session"], client.session_id());
}

#[tokio::test]
async fn test_unknown_tool_is_invalid_params() {
    let gateway = TestGateway::spawn().await;
    let mut client = gateway.connect(TEST_OWNER).await;
    client.initialize().await;

    let response = client.call_tool("does_not_exist", json!({})).await;
    let error = response.error.unwrap();
    assert_eq!(error.code, -32602);
    assert!(error.message.contains("does_not_exist"));
}

#[tokio::test]
async fn test_session_context_carries_headers() {
    let gateway = TestGateway::spawn().await;
    let headers = HashMap::from([("x-request-id".to_string(), "abc".to_string())]);
    let client = gateway.connect_with_headers(TEST_OWNER, headers).await;

    assert_eq!(
        client.session.context().get("x-request-id"),
        Some(&"abc".to_string())
    );
}

#[tokio::test]
async fn test_close_session_ends_outbound_stream() {
    let gateway = TestGateway::spawn().await;
    let mut client = gateway.connect(TEST_OWNER).await;
    client.initialize().await;

    assert!(gateway.gateway.close_session(client.session_id()).await);
    assert!(client.session.is_closed());
    assert!(client.try_recv().await.is_none());
    assert_eq!(gateway.session_count().await, 0);

    // Closing again is a no-op
    assert!(!gateway.gateway.close_session(client.session_id()).await);
}

#[tokio::test]
async fn test_concurrent_creates_then_close_all() {
    let gateway = Arc::new(TestGateway::spawn().await);

    let mut handles = Vec::new();
    for i in 0..50 {
        let gateway = gateway.clone();
        handles.push(tokio::spawn(async move {
            let owner = format!("owner-{}", i);
            let (session, rx) = gateway
                .gateway
                .open_session(&owner, SessionKind::Server, SessionParams::default())
                .await;
            (session, rx)
        }));
    }

    let mut sessions = Vec::new();
    for handle in handles {
        sessions.push(handle.await.unwrap());
    }

    let mut ids: Vec<String> = sessions.iter().map(|(s, _)| s.id().to_string()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 50);
    assert_eq!(gateway.session_count().await, 50);

    assert_eq!(gateway.gateway.shutdown().await, 50);
    assert_eq!(gateway.session_count().await, 0);
    for (session, mut rx) in sessions {
        assert!(session.is_closed());
        assert!(rx.recv().await.is_none());
    }
}

#[tokio::test]
async fn test_notify_reaches_only_connected_sessions() {
    let gateway = TestGateway::spawn().await;
    let mut connected = gateway.connect(TEST_OWNER).await;
    let _pending = gateway.connect("not-initialized").await;
    connected.initialize().await;

    let delivered = gateway
        .gateway
        .sessions()
        .notify_eligible_sessions("notifications/tools/list_changed", None)
        .await;
    assert_eq!(delivered, 1);

    let notification = connected.recv().await;
    assert_eq!(notification.method_name(), "notifications/tools/list_changed");
    assert!(notification.id.is_none());
}

#[tokio::test]
async fn test_list_sessions_reports_owner_and_status() {
    let gateway = TestGateway::spawn().await;
    let mut client = gateway.connect(TEST_OWNER).await;
    client.initialize().await;

    let summaries = gateway.gateway.sessions().list_sessions().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].owner_id, TEST_OWNER);
    assert_eq!(summaries[0].status, SessionStatus::Connected);
    assert_eq!(summaries[0].kind, SessionKind::Server);
}
