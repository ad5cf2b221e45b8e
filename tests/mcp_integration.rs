//! Integration tests for MCP protocol handling.
//!
//! These tests drive the MCP server over in-memory pipes, including a full
//! tool call that travels through the relay to a simulated Rhino client.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{duplex, AsyncWriteExt};

use rhino_mcp_relay::mcp::protocol::{parse_message, IncomingMessage, RequestId};
use rhino_mcp_relay::mcp::{McpServer, RHINO_TOOLS};
use rhino_mcp_relay::relay::{ClientId, CommandMessage, CommandRelay};
use rhino_mcp_relay::transport::framing::LineReader;
use rhino_mcp_relay::transport::ChannelTransport;

const INITIALIZE: &str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"test-client","version":"1.0.0"}}}"#;
const INITIALIZED: &str = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;

// =============================================================================
// Protocol Parsing Tests
// =============================================================================

#[test]
fn test_parse_initialize_request() {
    let IncomingMessage::Request(req) = parse_message(INITIALIZE).unwrap() else {
        panic!("Expected Request");
    };
    assert_eq!(req.method, "initialize");
    assert_eq!(req.id, RequestId::Number(1));
}

#[test]
fn test_parse_tools_call_request() {
    let json = r#"{
        "jsonrpc": "2.0",
        "id": "call-1",
        "method": "tools/call",
        "params": { "name": "create_layer", "arguments": { "name": "Walls" } }
    }"#;

    let IncomingMessage::Request(req) = parse_message(json).unwrap() else {
        panic!("Expected Request");
    };
    assert_eq!(req.id, RequestId::String("call-1".to_string()));
    assert_eq!(req.params.unwrap()["arguments"]["name"], "Walls");
}

#[test]
fn test_parse_notification() {
    assert!(matches!(
        parse_message(INITIALIZED).unwrap(),
        IncomingMessage::Notification(_)
    ));
}

// =============================================================================
// Session Tests
// =============================================================================

async fn run_session(relay: Arc<CommandRelay>, requests: &[&str]) -> Vec<Value> {
    let (mut client_in, server_in) = duplex(64 * 1024);
    let (server_out, client_out) = duplex(64 * 1024);
    let mut server = McpServer::new(server_in, server_out, relay);

    for request in requests {
        client_in.write_all(request.as_bytes()).await.unwrap();
        client_in.write_all(b"\n").await.unwrap();
    }
    drop(client_in);

    server.serve().await.unwrap();
    drop(server);

    let mut reader = LineReader::new(client_out);
    let mut replies = Vec::new();
    while let Some(line) = reader.read_line().await.unwrap() {
        replies.push(serde_json::from_str(&line).unwrap());
    }
    replies
}

#[tokio::test]
async fn test_tools_list_exposes_every_rhino_function() {
    let (transport, _rx) = ChannelTransport::new();
    let relay = Arc::new(CommandRelay::new(
        Arc::new(transport),
        Duration::from_secs(5),
    ));

    let replies = run_session(
        relay,
        &[
            INITIALIZE,
            INITIALIZED,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        ],
    )
    .await;

    let tools = replies[1]["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names.len(), RHINO_TOOLS.len());
    assert!(names.contains(&"get_document_info"));
    assert!(names.contains(&"execute_rhinoscript_python_code"));
}

#[tokio::test]
async fn test_tool_call_round_trip_through_relay() {
    let (transport, mut outbound) = ChannelTransport::new();
    let relay = Arc::new(CommandRelay::new(
        Arc::new(transport),
        Duration::from_secs(5),
    ));
    relay.attach_client(ClientId::from("rhino-1"));

    let rhino = {
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            let out = outbound.recv().await.unwrap();
            let command: CommandMessage = serde_json::from_str(&out.payload).unwrap();
            assert_eq!(command.function(), "executeRhinoscript");
            assert_eq!(command.arguments()["code"], "print('hi')");

            let answer = json!({ "correlationId": command.correlation_id(), "result": "hi" });
            relay.handle_inbound_message(&out.client, &answer.to_string());
        })
    };

    let replies = run_session(
        Arc::clone(&relay),
        &[
            INITIALIZE,
            INITIALIZED,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"execute_rhinoscript_python_code","arguments":{"code":"print('hi')"}}}"#,
        ],
    )
    .await;
    rhino.await.unwrap();

    let result = &replies[1]["result"];
    assert_eq!(result["content"][0]["text"], "hi");
    assert!(result.get("isError").is_none());
    assert!(relay.pending().is_empty());
}

#[tokio::test]
async fn test_tool_call_reports_rhino_error() {
    let (transport, mut outbound) = ChannelTransport::new();
    let relay = Arc::new(CommandRelay::new(
        Arc::new(transport),
        Duration::from_secs(5),
    ));
    relay.attach_client(ClientId::from("rhino-1"));

    {
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            let out = outbound.recv().await.unwrap();
            let command: CommandMessage = serde_json::from_str(&out.payload).unwrap();
            let answer = json!({
                "correlationId": command.correlation_id(),
                "error": "Object not found",
            });
            relay.handle_inbound_message(&out.client, &answer.to_string());
        });
    }

    let replies = run_session(
        relay,
        &[
            INITIALIZE,
            INITIALIZED,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"delete_object","arguments":{"name":"Box"}}}"#,
        ],
    )
    .await;

    let result = &replies[1]["result"];
    assert_eq!(result["isError"], true);
    assert!(result["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("Object not found"));
}
