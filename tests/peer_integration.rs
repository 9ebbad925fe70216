//! Peer Integration Tests
//!
//! A real client and a real server wired back to back over the in-memory
//! transport pair, exercising the full lifecycle: initialization,
//! capability gating, tool calls, batching, and disconnect behavior.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use mcp_peer::protocol::mcp::{
    CallTool, CallToolResult, Initialized, Method, Ping, ResourcesCapability, ServerCapabilities,
    ToolContent, ToolsCapability, ToolsListChanged,
};
use mcp_peer::transport::mock::{MockTransport, SentLog};
use mcp_peer::transport::Transport;
use mcp_peer::{Client, Configuration, Error, Server};

/// Server advertising tools and resources (no prompts), with an `add` tool.
fn demo_server(config: Configuration) -> Server {
    let server = Server::new(
        "S",
        "1",
        ServerCapabilities {
            tools: Some(ToolsCapability::default()),
            resources: Some(ResourcesCapability {
                subscribe: Some(true),
                ..Default::default()
            }),
            prompts: None,
            ..Default::default()
        },
        config,
    );

    server.register_method::<CallTool, _, _>(|params| async move {
        match params.name.as_str() {
            "add" => {
                let args = params.arguments.unwrap_or(Value::Null);
                let a = args["a"].as_i64().unwrap_or(0);
                let b = args["b"].as_i64().unwrap_or(0);
                Ok(CallToolResult {
                    content: vec![ToolContent::text((a + b).to_string())],
                    is_error: None,
                })
            }
            other => Err(Error::invalid_params(format!("unknown tool: {other}"))),
        }
    });

    server
}

/// Wire a client and server together; returns both sent-frame logs
/// (client's, then server's).
async fn connect(client: &Client, server: &Server) -> Result<(SentLog, SentLog)> {
    let (client_end, server_end) = MockTransport::pair();
    let client_log = client_end.sent_log();
    let server_log = server_end.sent_log();
    server.start(Box::new(server_end)).await?;
    client.connect(Box::new(client_end)).await?;
    Ok((client_log, server_log))
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn initialize_round_trip_populates_both_sides() -> Result<()> {
        let client = Client::new("C", "1");
        let server = demo_server(Configuration::default());
        connect(&client, &server).await?;

        let (initialized_tx, mut initialized_rx) = mpsc::unbounded_channel();
        client.on_notification::<Initialized, _, _>(move |()| {
            let tx = initialized_tx.clone();
            async move {
                let _ = tx.send(());
                Ok(())
            }
        });

        let result = client.initialize().await?;
        assert_eq!(result.server_info.name, "S");
        assert_eq!(result.server_info.version, "1");
        assert_eq!(result.protocol_version, "2024-11-05");

        assert!(client.is_initialized());
        assert!(client.server_capabilities().unwrap().has_tools());
        assert_eq!(client.protocol_version().as_deref(), Some("2024-11-05"));
        assert_eq!(client.server_info().unwrap().name, "S");

        assert!(server.is_initialized());
        assert_eq!(server.client_info().unwrap().name, "C");

        // The server announces readiness shortly after responding.
        tokio::time::timeout(Duration::from_millis(500), initialized_rx.recv())
            .await
            .expect("initialized notification should arrive within ~100ms")
            .expect("notification channel open");

        Ok(())
    }

    #[tokio::test]
    async fn ping_works_in_both_directions_of_the_lifecycle() -> Result<()> {
        let client = Client::new("C", "1");
        let server = demo_server(Configuration::strict());
        connect(&client, &server).await?;

        // ping is exempt from the strict pre-init gate.
        client.ping().await?;
        client.initialize().await?;
        client.ping().await?;
        Ok(())
    }

    #[tokio::test]
    async fn strict_server_rejects_requests_before_initialize() -> Result<()> {
        let invoked = Arc::new(AtomicBool::new(false));
        let server = Server::new(
            "S",
            "1",
            ServerCapabilities {
                tools: Some(ToolsCapability::default()),
                ..Default::default()
            },
            Configuration::strict(),
        );
        let flag = Arc::clone(&invoked);
        server.register_method::<CallTool, _, _>(move |_| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(CallToolResult {
                    content: vec![],
                    is_error: None,
                })
            }
        });

        // Lenient client so the request actually crosses the wire.
        let client = Client::new("C", "1");
        connect(&client, &server).await?;

        let err = client.call_tool("add", None).await.unwrap_err();
        assert_eq!(err.code(), -32600);
        assert_eq!(err.detail(), Some("Server is not initialized"));
        assert!(!invoked.load(Ordering::SeqCst), "handler must not run");
        Ok(())
    }

    #[tokio::test]
    async fn strict_server_drops_notifications_before_initialize() -> Result<()> {
        let seen = Arc::new(AtomicBool::new(false));
        let server = demo_server(Configuration::strict());
        let flag = Arc::clone(&seen);
        server.on_notification::<ToolsListChanged, _, _>(move |()| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        });

        let client = Client::new("C", "1");
        connect(&client, &server).await?;

        client.notify::<ToolsListChanged>(()).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!seen.load(Ordering::SeqCst));

        client.initialize().await?;
        client.notify::<ToolsListChanged>(()).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(seen.load(Ordering::SeqCst));
        Ok(())
    }
}

mod tools {
    use super::*;

    #[tokio::test]
    async fn call_tool_returns_typed_content() -> Result<()> {
        let client = Client::new("C", "1");
        let server = demo_server(Configuration::default());
        connect(&client, &server).await?;
        client.initialize().await?;

        let result = client
            .call_tool("add", Some(json!({"a": 1, "b": 2})))
            .await?;
        assert_eq!(result.content, vec![ToolContent::text("3")]);
        assert!(result.is_error.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_tool_surfaces_the_handler_error() -> Result<()> {
        let client = Client::new("C", "1");
        let server = demo_server(Configuration::default());
        connect(&client, &server).await?;
        client.initialize().await?;

        let err = client.call_tool("subtract", None).await.unwrap_err();
        assert_eq!(err.code(), -32602);
        assert!(err.detail().unwrap().contains("subtract"));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_method_gets_method_not_found_and_the_loop_survives() -> Result<()> {
        struct Nonexistent;
        impl Method for Nonexistent {
            const NAME: &'static str = "tools/nonexistent";
            type Params = ();
            type Result = Value;
        }

        let client = Client::new("C", "1");
        let server = demo_server(Configuration::default());
        connect(&client, &server).await?;
        client.initialize().await?;

        let err = client.request::<Nonexistent>(()).await.unwrap_err();
        assert_eq!(err.code(), -32601);

        // The server's receive loop is still alive.
        client.ping().await?;
        Ok(())
    }
}

mod gating {
    use super::*;

    #[tokio::test]
    async fn strict_gate_fails_without_any_traffic() -> Result<()> {
        let client = Client::with_capabilities(
            "C",
            "1",
            Default::default(),
            Configuration::strict(),
        );
        let server = demo_server(Configuration::default());
        let (client_log, _) = connect(&client, &server).await?;
        client.initialize().await?;

        let frames_before = client_log.lock().unwrap().len();
        let err = client.list_prompts(None).await.unwrap_err();
        assert_eq!(err.code(), -32601);
        assert_eq!(
            err.detail(),
            Some("Prompts is not supported by the server")
        );

        let frames_after = client_log.lock().unwrap().len();
        assert_eq!(frames_before, frames_after, "no bytes may cross the transport");
        Ok(())
    }

    #[tokio::test]
    async fn advertised_capabilities_pass_the_gate() -> Result<()> {
        let client = Client::with_capabilities(
            "C",
            "1",
            Default::default(),
            Configuration::strict(),
        );
        let server = demo_server(Configuration::default());
        connect(&client, &server).await?;
        client.initialize().await?;

        // tools/call is advertised and succeeds end to end.
        let result = client.call_tool("add", Some(json!({"a": 2, "b": 3}))).await?;
        assert_eq!(result.content, vec![ToolContent::text("5")]);
        Ok(())
    }
}

mod batching {
    use super::*;

    #[tokio::test]
    async fn batch_with_mixed_outcomes() -> Result<()> {
        let (client_end, mut far_end) = MockTransport::pair();
        let client_log = client_end.sent_log();
        let client = Client::new("C", "1");
        client.connect(Box::new(client_end)).await?;

        // Hand-rolled far side: answer the batch with one success and one
        // error, deliberately out of order.
        let mut far_inbound = far_end.receive().unwrap();
        let far = tokio::spawn(async move {
            let frame = far_inbound.next().await.unwrap().unwrap();
            let requests: Vec<Value> = serde_json::from_slice(&frame).unwrap();
            assert_eq!(requests.len(), 2);
            assert!(requests.iter().all(|r| r["method"] == "ping"));

            let batch_response = json!([
                {
                    "jsonrpc": "2.0",
                    "id": requests[1]["id"],
                    "error": {"code": -32603, "message": "Simulated"}
                },
                {"jsonrpc": "2.0", "id": requests[0]["id"], "result": {}},
            ]);
            far_end
                .send(&serde_json::to_vec(&batch_response).unwrap())
                .await
                .unwrap();
        });

        let (first, second) = client
            .batch(|batch| {
                Ok((
                    batch.add_request::<Ping>(())?,
                    batch.add_request::<Ping>(())?,
                ))
            })
            .await?;

        first.wait().await?;
        let err = second.wait().await.unwrap_err();
        assert_eq!(err.code(), -32603);
        assert_eq!(err.detail(), Some("Simulated"));

        // Exactly one outbound write, and it is the array itself.
        let frames = client_log.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let payload: Value = serde_json::from_slice(&frames[0]).unwrap();
        assert_eq!(payload.as_array().unwrap().len(), 2);

        drop(frames);
        far.await.unwrap();
        Ok(())
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() -> Result<()> {
        let (client_end, _far_end) = MockTransport::pair();
        let client_log = client_end.sent_log();
        let client = Client::new("C", "1");
        client.connect(Box::new(client_end)).await?;

        client.batch(|_| Ok(())).await?;
        assert!(client_log.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn batch_handles_resolve_from_single_response_frames() -> Result<()> {
        // Responses need not come back as a batch; per-ID routing resolves
        // each handle no matter how (or in what order) the replies arrive.
        let (client_end, mut far_end) = MockTransport::pair();
        let client = Client::new("C", "1");
        client.connect(Box::new(client_end)).await?;

        let mut far_inbound = far_end.receive().unwrap();
        let far = tokio::spawn(async move {
            let frame = far_inbound.next().await.unwrap().unwrap();
            let requests: Vec<Value> = serde_json::from_slice(&frame).unwrap();
            for request in requests.iter().rev() {
                let response = json!({"jsonrpc": "2.0", "id": request["id"], "result": {}});
                far_end
                    .send(&serde_json::to_vec(&response).unwrap())
                    .await
                    .unwrap();
            }
        });

        let (a, b) = client
            .batch(|batch| {
                Ok((
                    batch.add_request::<Ping>(())?,
                    batch.add_request::<Ping>(())?,
                ))
            })
            .await?;
        a.wait().await?;
        b.wait().await?;
        far.await.unwrap();
        Ok(())
    }
}

mod wire {
    use super::*;

    #[tokio::test]
    async fn malformed_frame_with_an_id_gets_a_parse_error_reply() -> Result<()> {
        let (server_end, mut far_end) = MockTransport::pair();
        let server = demo_server(Configuration::default());
        server.start(Box::new(server_end)).await?;

        let mut far_inbound = far_end.receive().unwrap();
        far_end
            .send(br#"{"jsonrpc":"1.0","id":99,"method":"ping"}"#)
            .await?;

        let frame = far_inbound.next().await.unwrap().unwrap();
        let response: Value = serde_json::from_slice(&frame)?;
        assert_eq!(response["id"], 99);
        assert_eq!(response["error"]["code"], -32700);
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_frame_without_an_id_is_dropped() -> Result<()> {
        let (server_end, mut far_end) = MockTransport::pair();
        let server = demo_server(Configuration::default());
        server.start(Box::new(server_end)).await?;

        let mut far_inbound = far_end.receive().unwrap();
        far_end.send(b"[1, 2, 3]").await?;
        // The loop keeps running: a valid ping still gets answered.
        far_end
            .send(br#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#)
            .await?;

        let frame = far_inbound.next().await.unwrap().unwrap();
        let response: Value = serde_json::from_slice(&frame)?;
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"], json!({}));
        Ok(())
    }
}

mod disconnect {
    use super::*;

    #[tokio::test]
    async fn disconnect_cancels_pending_requests() -> Result<()> {
        // Far side never answers.
        let (client_end, far_end) = MockTransport::pair();
        let client_log = client_end.sent_log();
        let client = Arc::new(Client::new("C", "1"));
        client.connect(Box::new(client_end)).await?;

        let requester = Arc::clone(&client);
        let in_flight = tokio::spawn(async move { requester.ping().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let frames_at_disconnect = client_log.lock().unwrap().len();
        client.disconnect().await?;

        let err = in_flight.await?.unwrap_err();
        assert_eq!(err.code(), -32603);
        assert_eq!(err.detail(), Some("Client disconnected"));

        // No further frames were sent, and new sends fail.
        assert_eq!(client_log.lock().unwrap().len(), frames_at_disconnect);
        let err = client.ping().await.unwrap_err();
        assert_eq!(err.detail(), Some("Client is not initialized"));

        drop(far_end);
        Ok(())
    }

    #[tokio::test]
    async fn server_side_eof_does_not_kill_the_client_state() -> Result<()> {
        let client = Client::new("C", "1");
        let server = demo_server(Configuration::default());
        connect(&client, &server).await?;
        client.initialize().await?;

        server.stop().await?;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Pending bookkeeping survives until the client disconnects too.
        assert!(client.is_initialized());
        client.disconnect().await?;
        assert!(!client.is_initialized());
        Ok(())
    }
}
