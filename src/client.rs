//! Native relay client: the terminal counterpart of the browser widget.
//!
//! Each `ask` fetches a single-use token, opens `/stream`, and feeds the
//! response body through [`RecordParser`] into a [`StreamConsumer`]. The
//! connection is never retried; a drop or the ceiling timeout ends the
//! exchange with an error bubble.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::consumer::{Directive, ExchangeId, StreamConsumer, WidgetConfig};
use crate::error::{RelayError, CONNECTION_FAILED, NO_QUESTION};
use crate::parser::RecordParser;
use crate::transcript::Transcript;
use crate::OutboundEvent;

/// Client-side ceiling, slightly above the relay's own timeout.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(130);

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

pub struct RelayClient {
    http: reqwest::Client,
    consumer: StreamConsumer,
    timeout: Duration,
}

impl RelayClient {
    pub fn new(config: WidgetConfig) -> Self {
        RelayClient {
            http: reqwest::Client::new(),
            consumer: StreamConsumer::new(config),
            timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn consumer(&self) -> &StreamConsumer {
        &self.consumer
    }

    pub fn transcript(&self) -> &Transcript {
        self.consumer.transcript()
    }

    pub fn save(&self, path: &Path) -> Result<(), RelayError> {
        self.transcript().save(path)?;
        Ok(())
    }

    /// Run one exchange to its end, calling `on_event` for every event the
    /// consumer accepts. Transport failures are reported to `on_event` as an
    /// `error` event and recorded in the transcript; only a refused submit
    /// returns `Err`.
    pub async fn ask<F>(&mut self, question: &str, mut on_event: F) -> Result<(), RelayError>
    where
        F: FnMut(&OutboundEvent),
    {
        let Some(submission) = self.consumer.submit(question) else {
            return Err(RelayError::configuration(NO_QUESTION));
        };
        let exchange = submission.exchange;
        info!(generation = exchange.generation(), "exchange started");

        let ceiling = self.timeout;
        let outcome =
            tokio::time::timeout(ceiling, self.stream_exchange(exchange, question, &mut on_event))
                .await
                .unwrap_or(Err(RelayError::Timeout(ceiling)));

        match outcome {
            Ok(()) => info!(generation = exchange.generation(), "exchange finished"),
            Err(e) => {
                warn!(generation = exchange.generation(), error = %e, "exchange ended without a terminal event");
                self.consumer.on_transport_error(exchange);
                on_event(&OutboundEvent::error(CONNECTION_FAILED));
            }
        }
        Ok(())
    }

    async fn fetch_token(&self) -> Result<String, RelayError> {
        let token: TokenResponse = self
            .http
            .get(self.consumer.config().token_url())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;
        Ok(token.token)
    }

    async fn stream_exchange<F>(
        &mut self,
        exchange: ExchangeId,
        question: &str,
        on_event: &mut F,
    ) -> Result<(), RelayError>
    where
        F: FnMut(&OutboundEvent),
    {
        let token = self.fetch_token().await?;
        let url = self.consumer.config().stream_url(question, &token)?;
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(RelayError::ClientTransport(format!(
                "relay returned {}",
                response.status()
            )));
        }

        let mut body = response.bytes_stream();
        let mut parser = RecordParser::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(transport)?;
            for record in parser.push(&chunk) {
                let Some(event) = OutboundEvent::from_record(&record) else {
                    debug!(event = %record.event, "ignoring unknown event");
                    continue;
                };
                let directive = self.consumer.on_event(exchange, &event);
                on_event(&event);
                if directive == Directive::Close {
                    return Ok(());
                }
            }
        }
        if parser.finish() {
            debug!("discarded partial record at end of stream");
        }
        Err(RelayError::StreamEnded)
    }
}

fn transport(e: reqwest::Error) -> RelayError {
    RelayError::ClientTransport(e.to_string())
}
