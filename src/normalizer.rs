//! Maps upstream records onto the four outbound event kinds.
//!
//! Rules, first match wins:
//! 1. data is `[DONE]` -> completion
//! 2. `thread.message.delta` -> text-delta when `delta.content[0].text.value`
//!    is non-empty, otherwise nothing
//! 3. `thread.run.failed` -> error with `last_error.message` or "Run failed"
//! 4. anything else -> nothing
//!
//! Undecodable JSON in a delta or failure record is logged and skipped.

use tracing::warn;

use crate::error::{RelayError, RUN_FAILED_FALLBACK};
use crate::parser::Record;
use crate::providers::{MessageDeltaEvent, RunFailedEvent, EVENT_MESSAGE_DELTA, EVENT_RUN_FAILED};
use crate::OutboundEvent;

/// Translate one record, reporting malformed payloads as errors.
pub fn try_normalize(record: &Record) -> Result<Option<OutboundEvent>, RelayError> {
    if record.is_done() {
        return Ok(Some(OutboundEvent::completion()));
    }
    match record.event.as_str() {
        EVENT_MESSAGE_DELTA => {
            let event: MessageDeltaEvent = decode(record)?;
            Ok(event.text().map(OutboundEvent::text_delta))
        }
        EVENT_RUN_FAILED => {
            let event: RunFailedEvent = decode(record)?;
            let message = event.message().unwrap_or(RUN_FAILED_FALLBACK);
            Ok(Some(OutboundEvent::error(message)))
        }
        _ => Ok(None),
    }
}

/// Translate one record into zero or one outbound events. Malformed records
/// are swallowed.
pub fn normalize(record: &Record) -> Option<OutboundEvent> {
    match try_normalize(record) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "skipping upstream record");
            None
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(record: &Record) -> Result<T, RelayError> {
    serde_json::from_str(&record.data).map_err(|e| RelayError::MalformedRecord {
        event: record.event.clone(),
        detail: e.to_string(),
    })
}

/// Stateful wrapper that stops producing events once a terminal event has
/// been emitted.
#[derive(Debug, Default)]
pub struct Normalizer {
    terminated: bool,
    skipped: usize,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: &Record) -> Option<OutboundEvent> {
        if self.terminated {
            return None;
        }
        let event = match try_normalize(record) {
            Ok(event) => event,
            Err(e) => {
                self.skipped += 1;
                warn!(error = %e, "skipping upstream record");
                None
            }
        };
        if event.as_ref().is_some_and(OutboundEvent::is_terminal) {
            self.terminated = true;
        }
        event
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Number of malformed records skipped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
