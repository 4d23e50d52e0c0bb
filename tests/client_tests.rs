//! Integration tests for ClaudeSDKClient and query_stream
//!
//! The CLI side is played by a scripted peer over an in-memory transport.

mod common;

use claude_agent_control::types::{Message, PermissionMode};
use claude_agent_control::{query_stream_with_transport, ClaudeAgentOptions, ClaudeError, ClaudeSDKClient};
use common::{assistant, connected_client, mock_transport, result_message};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_send_message_writes_user_frame() {
    common::init_tracing();
    let (client, mut peer) = connected_client(ClaudeAgentOptions::default()).await;

    client.send_message("Hello!").await.unwrap();
    let frame = peer.next_frame().await;
    assert_eq!(
        frame,
        json!({
            "type": "user",
            "message": {"role": "user", "content": "Hello!"},
            "parent_tool_use_id": null,
            "session_id": "default"
        })
    );

    client.send_message_to("Again", "session-2").await.unwrap();
    let frame = peer.next_frame().await;
    assert_eq!(frame["session_id"], "session-2");
}

#[tokio::test]
async fn test_server_info_available_after_connect() {
    let (client, _peer) = connected_client(ClaudeAgentOptions::default()).await;
    let info = client.get_server_info().expect("server info");
    assert_eq!(info["output_style"], "default");
}

#[tokio::test]
async fn test_receive_response_yields_one_turn() -> anyhow::Result<()> {
    let (client, mut peer) = connected_client(ClaudeAgentOptions::default()).await;

    client.send_message("What is 2 + 2?").await?;
    peer.next_frame().await;
    peer.send(assistant("4")).await;
    peer.send(result_message()).await;

    let mut turn = Vec::new();
    let mut stream = Box::pin(client.receive_response());
    while let Some(message) = stream.next().await {
        turn.push(message?);
    }
    assert_eq!(turn.len(), 2);
    assert_eq!(turn[0].kind(), "assistant");
    assert!(turn[1].is_result());
    Ok(())
}

#[tokio::test]
async fn test_commands_while_reading() {
    let (client, mut peer) = connected_client(ClaudeAgentOptions::default()).await;
    let client = Arc::new(client);

    // A consumer parked on next_message must not block control commands
    let reader = {
        let client = client.clone();
        tokio::spawn(async move { client.next_message().await })
    };

    let (result, _) = tokio::join!(client.interrupt(), async {
        let (id, _) = peer.expect_request("interrupt").await;
        peer.reply_success(&id, json!({})).await;
    });
    assert_ok!(result);

    let (result, _) = tokio::join!(client.set_permission_mode(PermissionMode::AcceptEdits), async {
        let (id, request) = peer.expect_request("set_permission_mode").await;
        assert_eq!(request["mode"], "acceptEdits");
        peer.reply_success(&id, json!({})).await;
    });
    result.unwrap();

    let (result, _) = tokio::join!(client.set_model(Some("claude-opus")), async {
        let (id, request) = peer.expect_request("set_model").await;
        assert_eq!(request["model"], "claude-opus");
        peer.reply_success(&id, json!({})).await;
    });
    result.unwrap();

    peer.send(assistant("done")).await;
    let message = timeout(Duration::from_secs(5), reader)
        .await
        .expect("reader stuck")
        .unwrap();
    assert!(matches!(message, Some(Ok(Message::Assistant { .. }))));
}

#[tokio::test]
async fn test_get_mcp_status() {
    let (client, mut peer) = connected_client(ClaudeAgentOptions::default()).await;

    let (status, _) = tokio::join!(client.get_mcp_status(), async {
        let (id, _) = peer.expect_request("mcp_status").await;
        peer.reply_success(&id, json!({"mcpServers": []})).await;
    });
    let status = assert_ok!(status);
    assert_eq!(status, json!({"mcpServers": []}));
}

#[tokio::test]
async fn test_send_stream_keeps_input_open() {
    let (client, mut peer) = connected_client(ClaudeAgentOptions::default()).await;

    let messages = futures::stream::iter(vec![
        json!({"type": "user", "message": {"role": "user", "content": "one"}}),
        json!({"type": "user", "message": {"role": "user", "content": "two"}}),
    ]);
    client.send_stream(messages).await.unwrap();

    assert_eq!(peer.next_frame().await["message"]["content"], "one");
    assert_eq!(peer.next_frame().await["message"]["content"], "two");
    assert!(!peer.input_closed());
}

#[tokio::test]
async fn test_close_stops_transport_and_rejects_writes() {
    let (client, peer) = connected_client(ClaudeAgentOptions::default()).await;

    client.close().await.unwrap();
    assert!(peer.transport_closed());
    assert!(matches!(
        client.send_message("too late").await,
        Err(ClaudeError::Closed(_))
    ));
    assert!(matches!(client.interrupt().await, Err(ClaudeError::Closed(_))));
    assert!(client.next_message().await.is_none());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_connect_fails_when_cli_never_answers() {
    let options = ClaudeAgentOptions::builder()
        .initialize_timeout(Duration::from_millis(100))
        .build();
    let (transport, mut peer) = mock_transport();

    let (client, _) = tokio::join!(
        ClaudeSDKClient::with_transport(options, Box::new(transport)),
        peer.expect_request("initialize")
    );
    let Err(error) = client else {
        panic!("client connected without a handshake");
    };
    assert!(matches!(error, ClaudeError::Connection(_)), "{error:?}");
    assert!(peer.transport_closed());
}

#[tokio::test]
async fn test_invalid_options_are_rejected_before_connecting() {
    let options = ClaudeAgentOptions::builder().max_turns(5000).build();
    let (transport, peer) = mock_transport();

    let result = ClaudeSDKClient::with_transport(options, Box::new(transport)).await;
    assert!(matches!(result, Err(ClaudeError::InvalidConfig(_))));
    assert!(!peer.transport_closed());
}

#[tokio::test]
async fn test_query_stream_runs_one_session() {
    common::init_tracing();
    let (transport, mut peer) = mock_transport();
    let prompts = futures::stream::iter(vec![json!({
        "type": "user",
        "message": {"role": "user", "content": "Say hi"}
    })]);

    let (stream, _) = tokio::join!(
        query_stream_with_transport(prompts, ClaudeAgentOptions::default(), Box::new(transport)),
        peer.answer_initialize()
    );
    let stream = stream.unwrap();

    assert_eq!(peer.next_frame().await["message"]["content"], "Say hi");
    peer.send(assistant("hi")).await;
    peer.send(result_message()).await;
    peer.hang_up();

    let messages: Vec<_> = stream.collect().await;
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.is_ok()));
    assert!(peer.transport_closed());
}
