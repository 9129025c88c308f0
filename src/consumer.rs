//! Client-side stream consumer.
//!
//! One consumer per widget, built once from an explicit [`WidgetConfig`].
//! Each submit opens a new exchange with a higher generation number; events
//! tagged with an older generation are dropped, so two overlapping streams
//! can never interleave into one bubble.
//!
//! ```text
//! AwaitingFirstChunk --text-delta--> StreamingActive
//!        |                                 |
//!        +--completion / error / drop------+--> Done
//! ```
//!
//! Heartbeats keep the busy indicator up; only the first text-delta (or a
//! terminal event) clears it.

use crate::error::{RelayError, CONNECTION_FAILED};
use crate::transcript::Transcript;
use crate::{EventKind, OutboundEvent};

/// Per-widget settings, passed in rather than looked up by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetConfig {
    /// Base URL of the relay server, e.g. `http://127.0.0.1:8888`.
    pub relay_url: String,
    /// Assistant to ask; `None` lets the server use its default.
    pub assistant_id: Option<String>,
}

impl WidgetConfig {
    pub fn new(relay_url: impl Into<String>) -> Self {
        WidgetConfig {
            relay_url: relay_url.into().trim_end_matches('/').to_string(),
            assistant_id: None,
        }
    }

    pub fn with_assistant(mut self, assistant_id: impl Into<String>) -> Self {
        self.assistant_id = Some(assistant_id.into());
        self
    }

    pub fn token_url(&self) -> String {
        format!("{}/token", self.relay_url)
    }

    /// URL for one exchange's stream.
    pub fn stream_url(&self, question: &str, token: &str) -> Result<reqwest::Url, RelayError> {
        let mut params = vec![("question", question), ("nonce", token)];
        if let Some(id) = &self.assistant_id {
            params.push(("assistant_id", id.as_str()));
        }
        reqwest::Url::parse_with_params(&format!("{}/stream", self.relay_url), &params)
            .map_err(|e| RelayError::configuration(format!("invalid relay url: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Nothing submitted yet.
    Idle,
    AwaitingFirstChunk,
    StreamingActive,
    Done,
}

/// UI affordances the consumer drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiState {
    pub busy: bool,
    pub submit_enabled: bool,
}

impl Default for UiState {
    fn default() -> Self {
        UiState {
            busy: false,
            submit_enabled: true,
        }
    }
}

/// Identifies one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExchangeId(u64);

impl ExchangeId {
    pub fn generation(&self) -> u64 {
        self.0
    }
}

/// What the transport should do with the connection after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    KeepOpen,
    Close,
}

/// Result of a submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub exchange: ExchangeId,
    /// Exchange whose connection must be closed because this one replaced it.
    pub superseded: Option<ExchangeId>,
}

pub struct StreamConsumer {
    config: WidgetConfig,
    transcript: Transcript,
    state: ConsumerState,
    ui: UiState,
    generation: u64,
}

impl StreamConsumer {
    pub fn new(config: WidgetConfig) -> Self {
        StreamConsumer {
            config,
            transcript: Transcript::new(),
            state: ConsumerState::Idle,
            ui: UiState::default(),
            generation: 0,
        }
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn ui(&self) -> UiState {
        self.ui
    }

    /// The exchange currently allowed to write to the transcript.
    pub fn current(&self) -> Option<ExchangeId> {
        (self.generation > 0).then_some(ExchangeId(self.generation))
    }

    /// Start an exchange. Blank questions and submits while the control is
    /// disabled are ignored.
    pub fn submit(&mut self, question: &str) -> Option<Submission> {
        let question = question.trim();
        if question.is_empty() || !self.ui.submit_enabled {
            return None;
        }
        let superseded = match self.state {
            ConsumerState::AwaitingFirstChunk | ConsumerState::StreamingActive => self.current(),
            _ => None,
        };
        if let Some(old) = superseded {
            tracing::debug!(generation = old.0, "superseding in-flight exchange");
        }

        self.generation += 1;
        self.transcript.begin_exchange(question);
        self.state = ConsumerState::AwaitingFirstChunk;
        self.ui = UiState {
            busy: true,
            submit_enabled: false,
        };
        Some(Submission {
            exchange: ExchangeId(self.generation),
            superseded,
        })
    }

    fn is_live(&self, exchange: ExchangeId) -> bool {
        exchange.0 == self.generation
            && matches!(
                self.state,
                ConsumerState::AwaitingFirstChunk | ConsumerState::StreamingActive
            )
    }

    /// Feed one event from `exchange`'s connection.
    pub fn on_event(&mut self, exchange: ExchangeId, event: &OutboundEvent) -> Directive {
        if !self.is_live(exchange) {
            tracing::debug!(
                generation = exchange.0,
                kind = %event.kind,
                "dropping event from finished or stale exchange"
            );
            return Directive::Close;
        }
        match event.kind {
            EventKind::Heartbeat => Directive::KeepOpen,
            EventKind::TextDelta => {
                self.transcript.append(&event.payload);
                if self.state == ConsumerState::AwaitingFirstChunk {
                    self.state = ConsumerState::StreamingActive;
                    self.release_ui();
                }
                Directive::KeepOpen
            }
            EventKind::Completion => {
                self.transcript.seal_last();
                self.finish();
                Directive::Close
            }
            EventKind::Error => {
                self.transcript.show_error(&event.payload);
                self.finish();
                Directive::Close
            }
        }
    }

    /// The connection dropped without a terminal event. Never reconnects.
    pub fn on_transport_error(&mut self, exchange: ExchangeId) -> Directive {
        if self.is_live(exchange) {
            self.transcript.show_error(CONNECTION_FAILED);
            self.finish();
        }
        Directive::Close
    }

    fn release_ui(&mut self) {
        self.ui = UiState {
            busy: false,
            submit_enabled: true,
        };
    }

    fn finish(&mut self) {
        self.state = ConsumerState::Done;
        self.release_ui();
    }
}
