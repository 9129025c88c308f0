//! Server-side relay: one question in, one normalized event stream out.
//!
//! ```text
//! Idle -> ConversationCreated -> MessagePosted -> Streaming -> Terminated
//!   \__________________\______________\_______________/
//!                 any failure or the deadline
//! ```
//!
//! Every event is written and flushed before the next upstream chunk is
//! read. Exactly one terminal event is attempted and the sink is closed
//! exactly once, whichever path ends the exchange.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::normalizer::Normalizer;
use crate::parser::RecordParser;
use crate::providers::Upstream;
use crate::{EventKind, OutboundEvent};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound on the terminal write and on the close, each.
pub const TERMINAL_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    ConversationCreated,
    MessagePosted,
    Streaming,
    Terminated,
}

/// Where outbound events go.
#[async_trait]
pub trait EventSink: Send {
    /// Write one event and push it to the peer before returning.
    async fn send(&mut self, event: &OutboundEvent) -> std::io::Result<()>;

    async fn close(&mut self) -> std::io::Result<()>;
}

/// Write-through SSE framing over any async writer.
pub struct SseWriter<W> {
    inner: W,
}

impl<W> SseWriter<W> {
    pub fn new(inner: W) -> Self {
        SseWriter { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> EventSink for SseWriter<W> {
    async fn send(&mut self, event: &OutboundEvent) -> std::io::Result<()> {
        self.inner.write_all(event.frame().as_bytes()).await?;
        self.inner.flush().await
    }

    async fn close(&mut self) -> std::io::Result<()> {
        self.inner.shutdown().await
    }
}

/// Options that shape a single exchange.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Wall-clock ceiling for the whole exchange.
    pub timeout: Duration,
    /// Keep going when the message post fails.
    pub tolerate_message_post_failure: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        RelayOptions {
            timeout: DEFAULT_TIMEOUT,
            tolerate_message_post_failure: false,
        }
    }
}

/// A validated question aimed at one assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    pub question: String,
    pub assistant_id: String,
}

/// Relay for one exchange. Owns the outbound sink.
pub struct Relay<S> {
    sink: S,
    options: RelayOptions,
    state: RelayState,
    deltas: usize,
}

impl<S: EventSink> Relay<S> {
    pub fn new(sink: S, options: RelayOptions) -> Self {
        Relay {
            sink,
            options,
            state: RelayState::Idle,
            deltas: 0,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Text deltas written so far.
    pub fn deltas(&self) -> usize {
        self.deltas
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Run the full lifecycle under the wall-clock ceiling.
    ///
    /// Returns `Ok` when the exchange ended with a completion event.
    pub async fn run<U: Upstream + ?Sized>(
        &mut self,
        upstream: &U,
        request: &ExchangeRequest,
    ) -> Result<(), RelayError> {
        if self.state != RelayState::Idle {
            return Err(RelayError::configuration("relay already used"));
        }
        info!(assistant = %request.assistant_id, "exchange started");
        let ceiling = self.options.timeout;
        let result = match tokio::time::timeout(ceiling, self.pipeline(upstream, request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?ceiling, state = ?self.state, "exchange hit wall-clock ceiling");
                Err(RelayError::Timeout(ceiling))
            }
        };
        self.terminate(result).await
    }

    /// End the exchange without calling upstream.
    pub async fn reject(&mut self, err: RelayError) -> Result<(), RelayError> {
        if self.state == RelayState::Terminated {
            return Err(err);
        }
        self.terminate(Err(err)).await
    }

    async fn pipeline<U: Upstream + ?Sized>(
        &mut self,
        upstream: &U,
        request: &ExchangeRequest,
    ) -> Result<(), RelayError> {
        let conversation = upstream.create_conversation().await?;
        self.transition(RelayState::ConversationCreated);

        if let Err(e) = upstream.post_message(&conversation, &request.question).await {
            if !self.options.tolerate_message_post_failure {
                return Err(e);
            }
            warn!(error = %e, "message post failed, starting run anyway");
        }
        self.transition(RelayState::MessagePosted);

        let mut body = upstream.start_run(&conversation, &request.assistant_id).await?;
        self.transition(RelayState::Streaming);
        self.emit(&OutboundEvent::heartbeat()).await?;

        let mut parser = RecordParser::new();
        let mut normalizer = Normalizer::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for record in parser.push(&chunk) {
                let Some(event) = normalizer.push(&record) else {
                    continue;
                };
                match event.kind {
                    EventKind::Completion => return Ok(()),
                    EventKind::Error => return Err(RelayError::RunFailed(event.payload)),
                    _ => self.emit(&event).await?,
                }
            }
        }

        if parser.finish() {
            debug!("upstream closed mid-record");
        }
        Err(RelayError::StreamEnded)
    }

    fn transition(&mut self, next: RelayState) {
        debug!(from = ?self.state, to = ?next, "relay transition");
        self.state = next;
    }

    async fn emit(&mut self, event: &OutboundEvent) -> Result<(), RelayError> {
        self.sink
            .send(event)
            .await
            .map_err(|e| RelayError::ClientTransport(e.to_string()))?;
        if event.kind == EventKind::TextDelta {
            self.deltas += 1;
        }
        Ok(())
    }

    async fn terminate(&mut self, result: Result<(), RelayError>) -> Result<(), RelayError> {
        let last = if let Err(RelayError::ClientTransport(_)) = &result {
            None
        } else {
            Some(match &result {
                Ok(()) => OutboundEvent::completion(),
                Err(e) => OutboundEvent::error(e.client_message()),
            })
        };
        self.transition(RelayState::Terminated);

        if let Some(event) = last {
            match tokio::time::timeout(TERMINAL_GRACE, self.sink.send(&event)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "client gone before terminal event"),
                Err(_) => warn!("client stalled, terminal event dropped"),
            }
        }
        match tokio::time::timeout(TERMINAL_GRACE, self.sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "closing client connection"),
            Err(_) => warn!("client stalled, abandoning connection"),
        }

        match &result {
            Ok(()) => info!(deltas = self.deltas, "exchange completed"),
            Err(e) => info!(deltas = self.deltas, error = %e, "exchange failed"),
        }
        result
    }
}
