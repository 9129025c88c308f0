//! External tests for the assistants API client against a mock upstream.

use assistant_relay::error::{RelayError, UpstreamStage};
use assistant_relay::providers::*;
use serde_json::json;
use tokio_stream::StreamExt;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn upstream() -> (MockServer, OpenAiAssistants) {
    let server = MockServer::start().await;
    let client = OpenAiAssistants::new("sk-test", server.uri());
    (server, client)
}

#[tokio::test]
async fn test_create_conversation_sends_auth_and_beta_headers() {
    let (server, client) = upstream().await;
    Mock::given(method("POST"))
        .and(path("/threads"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(header(BETA_HEADER, BETA_VALUE))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "thread_1", "object": "thread"})))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(client.create_conversation().await.unwrap(), "thread_1");
}

#[tokio::test]
async fn test_create_conversation_without_id_fails() {
    let (server, client) = upstream().await;
    Mock::given(method("POST"))
        .and(path("/threads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"object": "thread"})))
        .mount(&server)
        .await;

    let err = client.create_conversation().await.unwrap_err();
    assert!(matches!(
        err,
        RelayError::UpstreamUnavailable {
            stage: UpstreamStage::CreateConversation,
            ..
        }
    ));
    assert_eq!(err.client_message(), "Conversation creation failed.");
}

#[tokio::test]
async fn test_create_conversation_http_error() {
    let (server, client) = upstream().await;
    Mock::given(method("POST"))
        .and(path("/threads"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let err = client.create_conversation().await.unwrap_err();
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn test_post_message_body() {
    let (server, client) = upstream().await;
    Mock::given(method("POST"))
        .and(path("/threads/thread_1/messages"))
        .and(body_json(json!({"role": "user", "content": "2+2?"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_1"})))
        .expect(1)
        .mount(&server)
        .await;

    client.post_message("thread_1", "2+2?").await.unwrap();
}

#[tokio::test]
async fn test_post_message_failure_reports_stage() {
    let (server, client) = upstream().await;
    Mock::given(method("POST"))
        .and(path("/threads/thread_1/messages"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = client.post_message("thread_1", "q").await.unwrap_err();
    assert!(matches!(
        err,
        RelayError::UpstreamUnavailable {
            stage: UpstreamStage::PostMessage,
            ..
        }
    ));
}

#[tokio::test]
async fn test_start_run_streams_body() {
    let (server, client) = upstream().await;
    let body = "event: thread.message.delta\ndata: {\"delta\":{\"content\":[{\"text\":{\"value\":\"4\"}}]}}\n\nevent: done\ndata: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/threads/thread_1/runs"))
        .and(body_json(json!({"assistant_id": "asst_1", "stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let mut stream = client.start_run("thread_1", "asst_1").await.unwrap();
    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        collected.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(String::from_utf8(collected).unwrap(), body);
}

#[tokio::test]
async fn test_start_run_rejected() {
    let (server, client) = upstream().await;
    Mock::given(method("POST"))
        .and(path("/threads/thread_1/runs"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such assistant"))
        .mount(&server)
        .await;

    match client.start_run("thread_1", "asst_missing").await {
        Err(RelayError::UpstreamUnavailable { stage, detail }) => {
            assert_eq!(stage, UpstreamStage::StartRun);
            assert!(detail.contains("no such assistant"));
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("run should have been rejected"),
    }
}

#[test]
fn test_base_url_trailing_slash_trimmed() {
    let client = OpenAiAssistants::new("k", "http://localhost:1/v1/");
    assert_eq!(client.base_url(), "http://localhost:1/v1");
}
