//! Crate-level error taxonomy.
//!
//! Every failure an exchange can hit maps onto one `RelayError` variant.
//! The relay turns these into a single `error` event via
//! [`RelayError::client_message`]; the message text is what the widget shows
//! in the assistant bubble.

use std::fmt;
use std::time::Duration;

pub const NO_QUESTION: &str = "No question provided.";
pub const NOT_CONFIGURED: &str = "API key or Assistant ID not configured.";
pub const CONVERSATION_FAILED: &str = "Conversation creation failed.";
pub const RUN_FAILED_FALLBACK: &str = "Run failed";
pub const STREAM_ENDED: &str = "Stream ended unexpectedly.";
pub const CONNECTION_FAILED: &str = "Connection to the assistant failed.";
pub const TIMED_OUT: &str = "The assistant did not respond in time.";
pub const QUESTION_TOO_LONG: &str = "Question too long.";

/// Which upstream call a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamStage {
    CreateConversation,
    PostMessage,
    StartRun,
    Streaming,
}

impl fmt::Display for UpstreamStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamStage::CreateConversation => write!(f, "create conversation"),
            UpstreamStage::PostMessage => write!(f, "post message"),
            UpstreamStage::StartRun => write!(f, "start run"),
            UpstreamStage::Streaming => write!(f, "run stream"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Missing credential, target or question. No upstream call is attempted.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// An upstream call failed at the transport or status-code level.
    #[error("upstream {stage} failed: {detail}")]
    UpstreamUnavailable { stage: UpstreamStage, detail: String },
    /// The generation run reported an explicit failure.
    #[error("run failed: {0}")]
    RunFailed(String),
    /// A delta or failure record whose payload could not be decoded.
    #[error("malformed upstream record ({event}): {detail}")]
    MalformedRecord { event: String, detail: String },
    /// Upstream closed the run stream without a terminal record.
    #[error("upstream stream ended without a terminal record")]
    StreamEnded,
    /// The browser-facing connection dropped.
    #[error("client transport error: {0}")]
    ClientTransport(String),
    /// The wall-clock ceiling elapsed.
    #[error("exchange timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl RelayError {
    pub fn configuration(message: impl Into<String>) -> Self {
        RelayError::Configuration(message.into())
    }

    pub fn upstream(stage: UpstreamStage, detail: impl fmt::Display) -> Self {
        RelayError::UpstreamUnavailable {
            stage,
            detail: detail.to_string(),
        }
    }

    /// Text carried by the outbound `error` event for this failure.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Configuration(message) | RelayError::RunFailed(message) => message.clone(),
            RelayError::UpstreamUnavailable {
                stage: UpstreamStage::CreateConversation,
                ..
            } => CONVERSATION_FAILED.to_string(),
            RelayError::UpstreamUnavailable { stage, detail } => {
                format!("Upstream {stage} failed: {detail}")
            }
            RelayError::MalformedRecord { .. } | RelayError::StreamEnded => {
                STREAM_ENDED.to_string()
            }
            RelayError::ClientTransport(_) | RelayError::Io(_) => CONNECTION_FAILED.to_string(),
            RelayError::Timeout(_) => TIMED_OUT.to_string(),
            RelayError::ConfigParse(_) => NOT_CONFIGURED.to_string(),
        }
    }

    /// True for failures caused by missing configuration or input.
    pub fn is_configuration(&self) -> bool {
        matches!(self, RelayError::Configuration(_) | RelayError::ConfigParse(_))
    }
}
