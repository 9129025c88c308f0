//! Relay configuration: an optional TOML file plus environment overrides.
//!
//! ```toml
//! api_key = "sk-..."
//! assistant_id = "asst_..."
//! base_url = "https://api.openai.com/v1"
//! bind = "127.0.0.1"
//! port = 8888
//! timeout_secs = 120
//! tolerate_message_post_failure = false
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{RelayError, NOT_CONFIGURED, NO_QUESTION};
use crate::providers::DEFAULT_BASE_URL;
use crate::relay::{ExchangeRequest, RelayOptions};

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_ASSISTANT_ID: &str = "ASSISTANT_ID";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub api_key: Option<String>,
    pub assistant_id: Option<String>,
    pub base_url: String,
    pub bind: String,
    pub port: u16,
    pub timeout_secs: u64,
    pub tolerate_message_post_failure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_key: None,
            assistant_id: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            bind: "127.0.0.1".to_string(),
            port: 8888,
            timeout_secs: 120,
            tolerate_message_post_failure: false,
        }
    }
}

/// Validated inputs for one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub request: ExchangeRequest,
}

impl Config {
    /// Load from `path` when given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, RelayError> {
        let mut config = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, RelayError> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from the environment. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.trim().is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(id) = lookup(ENV_ASSISTANT_ID).filter(|v| !v.trim().is_empty()) {
            self.assistant_id = Some(id);
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            timeout: self.timeout(),
            tolerate_message_post_failure: self.tolerate_message_post_failure,
        }
    }

    /// Validate one incoming request against the stored credential.
    ///
    /// The question is checked first, then the key and the target. A
    /// request-supplied assistant id wins over the configured default.
    pub fn credentials(
        &self,
        question: &str,
        assistant_override: Option<&str>,
    ) -> Result<Credentials, RelayError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RelayError::configuration(NO_QUESTION));
        }
        let api_key = non_blank(self.api_key.as_deref());
        let assistant_id = non_blank(assistant_override).or(non_blank(self.assistant_id.as_deref()));
        match (api_key, assistant_id) {
            (Some(api_key), Some(assistant_id)) => Ok(Credentials {
                api_key: api_key.to_string(),
                request: ExchangeRequest {
                    question: question.to_string(),
                    assistant_id: assistant_id.to_string(),
                },
            }),
            _ => Err(RelayError::configuration(NOT_CONFIGURED)),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
