//! Streaming request lifecycle tests
//!
//! Drive the client against a scripted service and check what ends up in
//! the registry and in the session:
//! - chunked chat replies land in the conversation record by record
//! - cancellation of one, all and unknown requests
//! - duplicate request ids
//! - thinking rejection and connection failures during a chat

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use common::{chat_line, client, MockService, StreamScript};
use llamadeck_core::store::capability::THINKING;
use llamadeck_core::{
    ChatResponse, ClientError, GenerateRequest, MessageRole, RequestId, SendRequest,
};

/// Split `text` into three chunks, each boundary falling inside a line
fn split_mid_line(text: &str) -> Vec<Vec<u8>> {
    let lines: Vec<usize> = text.match_indices('\n').map(|(i, _)| i).collect();
    let first = lines[0] / 2;
    let second = lines[1] - 3;
    let bytes = text.as_bytes();
    vec![
        bytes[..first].to_vec(),
        bytes[first..second].to_vec(),
        bytes[second..].to_vec(),
    ]
}

// =============================================================================
// Chat
// =============================================================================

#[tokio::test]
async fn test_three_chunk_chat_lands_in_conversation() {
    let service = MockService::new();
    let client = client(&service);
    client.switch_model("demo");

    let body = [
        chat_line("Hel", false),
        chat_line("lo", false),
        chat_line("!", true),
    ]
    .concat();
    let expected: Vec<ChatResponse> = body
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    service.script(StreamScript::Chunks(split_mid_line(&body)));

    let mut seen = Vec::new();
    let outcome = client
        .send_message(SendRequest::new("hi"), |record| seen.push(record.clone()))
        .await
        .unwrap();

    assert_eq!(seen, expected);
    assert_eq!(outcome.message.role, MessageRole::Assistant);
    assert_eq!(outcome.message.content, "Hello!");

    let sample = outcome.sample.expect("final record carries timing");
    assert_eq!(sample.response_time, 2000.0);
    assert_eq!(sample.tokens_per_second, 10.0);
    assert_eq!(sample.total_tokens, 10);
    assert_eq!(sample.load_time, Some(500.0));

    let session = client.session();
    let messages = session.current_messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "hi");
    assert_eq!(messages[1].content, "Hello!");
    assert_eq!(messages[1].metrics.as_ref(), Some(&sample));
    assert_eq!(session.metrics().len(), 1);
    assert_eq!(session.current_id(), Some(&outcome.conversation_id));
    drop(session);

    // The request body carried the history without the placeholder
    let bodies = service.stream_bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["model"], "demo");
    assert_eq!(bodies[0]["stream"], true);
    assert_eq!(bodies[0]["messages"].as_array().unwrap().len(), 1);
    assert!(bodies[0].get("think").is_none());

    assert!(client.active_requests().is_empty());
}

#[tokio::test]
async fn test_send_without_model_is_rejected() {
    let service = MockService::new();
    let client = client(&service);

    let err = client
        .send_message(SendRequest::new("hi"), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NoModelSelected));
    assert!(client.session().current_messages().is_empty());
    assert!(service.stream_bodies().is_empty());
}

#[tokio::test]
async fn test_cancel_keeps_partial_reply() {
    let service = MockService::new();
    let client = Arc::new(client(&service));
    client.switch_model("demo");
    service.script(StreamScript::ChunksThenHang(vec![chat_line("Hel", false)
        .into_bytes()]));

    let id = RequestId::from("chat_cancel_me");
    let task = {
        let client = Arc::clone(&client);
        let id = id.clone();
        tokio::spawn(async move {
            client
                .send_message(SendRequest::new("hi").with_request_id(id), |_| {})
                .await
        })
    };

    // Wait for the first record to land
    for _ in 0..200 {
        let landed = client
            .session()
            .current_messages()
            .last()
            .is_some_and(|m| m.content == "Hel");
        if landed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(client.active_requests(), vec![id.clone()]);

    assert!(client.cancel_request(&id));
    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());

    let session = client.session();
    let last = session.current_messages().last().unwrap();
    assert_eq!(last.role, MessageRole::Assistant);
    assert_eq!(last.content, "Hel");
    assert!(last.metrics.is_none());
    assert!(session.metrics().is_empty());
    drop(session);

    assert!(client.active_requests().is_empty());
}

#[tokio::test]
async fn test_thinking_rejection_retries_without_think() {
    let service = MockService::new();
    let client = client(&service);
    client.switch_model("demo");
    client.set_manual_capability("demo", THINKING, true);
    client.update_settings(|s| {
        s.enable_thinking = true;
        s.health_check = false;
    });

    service.script(StreamScript::Status(
        400,
        r#"{"error":"\"demo\" does not support thinking"}"#.to_string(),
    ));
    service.script(StreamScript::Chunks(vec![chat_line("ok", true).into_bytes()]));

    let outcome = client
        .send_message(SendRequest::new("hi"), |_| {})
        .await
        .unwrap();
    assert_eq!(outcome.message.content, "ok");

    let bodies = service.stream_bodies();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["think"], true);
    assert!(bodies[1].get("think").is_none());
    assert!(!client.session().supports("demo", THINKING));
}

#[tokio::test]
async fn test_connection_failure_is_reported() {
    let service = MockService::new();
    let client = client(&service);
    client.update_settings(|s| {
        s.auto_reconnect = false;
        s.health_check = false;
    });
    assert!(client.initialize().await);
    client.switch_model("demo");

    service.script(StreamScript::Unreachable);
    let err = client
        .send_message(SendRequest::new("hi"), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Connection(_)));

    let state = client.connection_state();
    assert!(!state.connected);
    assert!(state.last_error.is_some());

    // The empty reply placeholder is dropped, the user message stays
    let session = client.session();
    let messages = session.current_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, MessageRole::User);
}

#[tokio::test]
async fn test_http_error_leaves_connection_alone() {
    let service = MockService::new();
    let client = client(&service);
    client.update_settings(|s| s.health_check = false);
    assert!(client.initialize().await);
    client.switch_model("missing");

    service.script(StreamScript::Status(404, "model not found".to_string()));
    let err = client
        .send_message(SendRequest::new("hi"), |_| {})
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(client.connection_state().connected);
}

// =============================================================================
// Registry
// =============================================================================

#[tokio::test]
async fn test_cancel_all_stops_every_channel() {
    let service = MockService::new();
    let client = client(&service);
    let request = GenerateRequest::new("demo", "hello");

    let mut first = client
        .generate_stream(&request, Some(RequestId::from("gen_1")))
        .await
        .unwrap();
    let mut second = client
        .generate_stream(&request, Some(RequestId::from("gen_2")))
        .await
        .unwrap();
    assert_eq!(client.active_requests().len(), 2);

    assert_eq!(client.cancel_all(), 2);
    assert!(client.active_requests().is_empty());

    for channel in [&mut first, &mut second] {
        let err = channel.next().await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(channel.next().await.is_none());
    }
    assert!(client.active_requests().is_empty());
}

#[tokio::test]
async fn test_cancel_unknown_id_is_noop() {
    let service = MockService::new();
    let client = client(&service);
    let request = GenerateRequest::new("demo", "hello");

    let channel = client
        .generate_stream(&request, Some(RequestId::from("gen_live")))
        .await
        .unwrap();

    assert!(!client.cancel_request(&RequestId::from("gen_unknown")));
    assert_eq!(client.active_requests(), vec![RequestId::from("gen_live")]);
    assert!(!channel.is_terminated());

    drop(channel);
    assert!(client.active_requests().is_empty());
}

#[tokio::test]
async fn test_duplicate_request_id_is_rejected() {
    let service = MockService::new();
    let client = client(&service);
    let request = GenerateRequest::new("demo", "hello");
    let id = RequestId::from("gen_dup");

    let _live = client
        .generate_stream(&request, Some(id.clone()))
        .await
        .unwrap();
    let err = client
        .generate_stream(&request, Some(id.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::DuplicateRequestId(ref dup) if *dup == id));

    // The first call is untouched and nothing reached the service twice
    assert_eq!(client.active_requests(), vec![id]);
    assert_eq!(service.stream_bodies().len(), 1);
}

#[tokio::test]
async fn test_handle_token_cancel_releases_request_id() {
    let service = MockService::new();
    let client = client(&service);
    let request = GenerateRequest::new("demo", "hello");
    let id = RequestId::from("gen_handle");

    let mut channel = client
        .generate_stream(&request, Some(id.clone()))
        .await
        .unwrap();
    assert_eq!(client.active_requests(), vec![id.clone()]);

    channel.handle().token.cancel();
    let err = channel.next().await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert!(channel.next().await.is_none());
    assert!(client.active_requests().is_empty());

    let _again = client
        .generate_stream(&request, Some(id.clone()))
        .await
        .unwrap();
    assert_eq!(client.active_requests(), vec![id]);
}

#[tokio::test]
async fn test_finished_call_leaves_reused_id_registered() {
    let service = MockService::new();
    let client = client(&service);
    let request = GenerateRequest::new("demo", "hello");
    let id = RequestId::from("gen_reused");

    let stale = client
        .generate_stream(&request, Some(id.clone()))
        .await
        .unwrap();
    assert!(client.cancel_request(&id));

    // The id is free again while the cancelled channel is still alive
    let _fresh = client
        .generate_stream(&request, Some(id.clone()))
        .await
        .unwrap();
    drop(stale);
    assert_eq!(client.active_requests(), vec![id]);
}

#[tokio::test]
async fn test_pull_stream_reports_progress() {
    let service = MockService::new();
    let client = client(&service);

    let body = concat!(
        "{\"status\":\"pulling manifest\"}\n",
        "{\"status\":\"downloading\",\"digest\":\"sha256:abc\",\"total\":100,\"completed\":40}\n",
        "{\"status\":\"success\"}\n",
    );
    service.script(StreamScript::Chunks(vec![body.as_bytes().to_vec()]));

    let mut channel = client.pull_stream("demo", false, None).await.unwrap();
    let mut statuses = Vec::new();
    while let Some(progress) = channel.next().await {
        statuses.push(progress.unwrap().status);
    }
    assert_eq!(statuses, ["pulling manifest", "downloading", "success"]);
    let stats = channel.decoder_stats();
    assert_eq!(stats.records, 3);
    assert_eq!(stats.malformed, 0);
    assert!(channel.id().as_str().starts_with("pull_"));
    assert_eq!(service.stream_bodies()[0]["model"], "demo");
}
