//! Upstream assistants API: wire types, the `Upstream` seam, and the
//! reqwest-backed implementation.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::error::{RelayError, UpstreamStage};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const BETA_HEADER: &str = "OpenAI-Beta";
pub const BETA_VALUE: &str = "assistants=v2";

/// Upstream event carrying an incremental text fragment.
pub const EVENT_MESSAGE_DELTA: &str = "thread.message.delta";
/// Upstream event reporting a failed run.
pub const EVENT_RUN_FAILED: &str = "thread.run.failed";

/// Response body of a streaming run, chunked however the network delivers it.
pub type ByteStream = BoxStream<'static, Result<Bytes, RelayError>>;

// -- Request bodies ----------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct CreateMessageRequest {
    pub role: String,
    pub content: String,
}

impl CreateMessageRequest {
    pub fn user(content: impl Into<String>) -> Self {
        CreateMessageRequest {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateRunRequest {
    pub assistant_id: String,
    pub stream: bool,
}

// -- Response bodies ---------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ThreadObject {
    #[serde(default)]
    pub id: Option<String>,
}

/// `thread.message.delta` payload. Only the path down to the text value is
/// modelled; everything else is ignored.
#[derive(Debug, Deserialize)]
pub struct MessageDeltaEvent {
    #[serde(default)]
    pub delta: Option<MessageDelta>,
}

#[derive(Debug, Deserialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub content: Vec<DeltaContent>,
}

#[derive(Debug, Deserialize)]
pub struct DeltaContent {
    #[serde(default)]
    pub text: Option<DeltaText>,
}

#[derive(Debug, Deserialize)]
pub struct DeltaText {
    #[serde(default)]
    pub value: Option<String>,
}

impl MessageDeltaEvent {
    /// `delta.content[0].text.value`, if present and non-empty.
    pub fn text(&self) -> Option<&str> {
        self.delta
            .as_ref()?
            .content
            .first()?
            .text
            .as_ref()?
            .value
            .as_deref()
            .filter(|v| !v.is_empty())
    }
}

/// `thread.run.failed` payload.
#[derive(Debug, Deserialize)]
pub struct RunFailedEvent {
    #[serde(default)]
    pub last_error: Option<LastError>,
}

#[derive(Debug, Deserialize)]
pub struct LastError {
    #[serde(default)]
    pub message: Option<String>,
}

impl RunFailedEvent {
    pub fn message(&self) -> Option<&str> {
        self.last_error
            .as_ref()?
            .message
            .as_deref()
            .filter(|m| !m.is_empty())
    }
}

// -- Upstream seam -----------------------------------------------------------

/// The three calls a relay makes against the generation service.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Open a conversation and return its identifier.
    async fn create_conversation(&self) -> Result<String, RelayError>;

    /// Post the user's question into the conversation.
    async fn post_message(&self, conversation_id: &str, question: &str) -> Result<(), RelayError>;

    /// Start a streaming run and hand back its response body.
    async fn start_run(
        &self,
        conversation_id: &str,
        assistant_id: &str,
    ) -> Result<ByteStream, RelayError>;
}

// -- OpenAI assistants implementation ---------------------------------------

pub struct OpenAiAssistants {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiAssistants {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        OpenAiAssistants {
            client: Client::new(),
            api_key: api_key.into(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header(BETA_HEADER, BETA_VALUE)
    }
}

async fn ensure_success(
    stage: UpstreamStage,
    response: reqwest::Response,
) -> Result<reqwest::Response, RelayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RelayError::upstream(
        stage,
        format!("HTTP {}: {}", status.as_u16(), body.trim()),
    ))
}

#[async_trait]
impl Upstream for OpenAiAssistants {
    async fn create_conversation(&self) -> Result<String, RelayError> {
        let stage = UpstreamStage::CreateConversation;
        let response = self
            .post("/threads")
            .body("{}")
            .send()
            .await
            .map_err(|e| RelayError::upstream(stage, e))?;
        let thread: ThreadObject = ensure_success(stage, response)
            .await?
            .json()
            .await
            .map_err(|e| RelayError::upstream(stage, e))?;
        thread
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RelayError::upstream(stage, "response carried no thread id"))
    }

    async fn post_message(&self, conversation_id: &str, question: &str) -> Result<(), RelayError> {
        let stage = UpstreamStage::PostMessage;
        let response = self
            .post(&format!("/threads/{conversation_id}/messages"))
            .json(&CreateMessageRequest::user(question))
            .send()
            .await
            .map_err(|e| RelayError::upstream(stage, e))?;
        ensure_success(stage, response).await?;
        Ok(())
    }

    async fn start_run(
        &self,
        conversation_id: &str,
        assistant_id: &str,
    ) -> Result<ByteStream, RelayError> {
        let stage = UpstreamStage::StartRun;
        let request = CreateRunRequest {
            assistant_id: assistant_id.to_string(),
            stream: true,
        };
        let response = self
            .post(&format!("/threads/{conversation_id}/runs"))
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::upstream(stage, e))?;
        let response = ensure_success(stage, response).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| RelayError::upstream(UpstreamStage::Streaming, e)));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_delta_text_extracted() {
        let json = r#"{"id":"msg_1","object":"thread.message.delta","delta":{"content":[{"index":0,"type":"text","text":{"value":"Hi"}}]}}"#;
        let event: MessageDeltaEvent = serde_json::from_str(json).expect("deser");
        assert_eq!(event.text(), Some("Hi"));
    }

    #[test]
    fn test_message_delta_empty_value_is_none() {
        let json = r#"{"delta":{"content":[{"text":{"value":""}}]}}"#;
        let event: MessageDeltaEvent = serde_json::from_str(json).expect("deser");
        assert_eq!(event.text(), None);
    }

    #[test]
    fn test_message_delta_without_content() {
        let json = r#"{"delta":{"role":"assistant"}}"#;
        let event: MessageDeltaEvent = serde_json::from_str(json).expect("deser");
        assert_eq!(event.text(), None);
    }

    #[test]
    fn test_message_delta_structural_content() {
        let json = r#"{"delta":{"content":[{"index":0,"type":"image_file","image_file":{"file_id":"f"}}]}}"#;
        let event: MessageDeltaEvent = serde_json::from_str(json).expect("deser");
        assert_eq!(event.text(), None);
    }

    #[test]
    fn test_run_failed_message() {
        let json = r#"{"id":"run_1","status":"failed","last_error":{"code":"rate_limit_exceeded","message":"Rate limit reached"}}"#;
        let event: RunFailedEvent = serde_json::from_str(json).expect("deser");
        assert_eq!(event.message(), Some("Rate limit reached"));
    }

    #[test]
    fn test_run_failed_without_last_error() {
        let json = r#"{"id":"run_1","status":"failed","last_error":null}"#;
        let event: RunFailedEvent = serde_json::from_str(json).expect("deser");
        assert_eq!(event.message(), None);
    }

    #[test]
    fn test_create_run_request_serializes() {
        let req = CreateRunRequest {
            assistant_id: "asst_123".to_string(),
            stream: true,
        };
        let json: serde_json::Value = serde_json::to_value(&req).expect("serialize");
        assert_eq!(json["assistant_id"], "asst_123");
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_create_message_request_is_user_role() {
        let json = serde_json::to_string(&CreateMessageRequest::user("2+2?")).expect("serialize");
        assert!(json.contains("\"role\":\"user\""));
        assert!(json.contains("\"content\":\"2+2?\""));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let api = OpenAiAssistants::new("sk-test", "http://localhost:9000/v1/");
        assert_eq!(api.base_url(), "http://localhost:9000/v1");
    }
}
