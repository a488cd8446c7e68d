//! Store settings loaded from the environment or an embedded JSON document.

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;

/// What a session does when the upstream action source completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionPolicy {
    /// Reduce everything enqueued ahead of the completion, then complete the
    /// session and tear down side effects.
    #[default]
    Complete,
    /// Ignore upstream completion; side effects keep driving the state until
    /// the session is cancelled or fails.
    KeepAlive,
}

impl FromStr for CompletionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "complete" => Ok(CompletionPolicy::Complete),
            "keep-alive" | "keep_alive" | "keepalive" => Ok(CompletionPolicy::KeepAlive),
            _ => Err(ConfigError::InvalidValue {
                key: ENV_ON_UPSTREAM_COMPLETE,
                value: s.to_string(),
                expected: "complete | keep-alive",
            }),
        }
    }
}

impl fmt::Display for CompletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionPolicy::Complete => f.write_str("complete"),
            CompletionPolicy::KeepAlive => f.write_str("keep-alive"),
        }
    }
}

const ENV_NAME: &str = "RXSTORE_NAME";
const ENV_ON_UPSTREAM_COMPLETE: &str = "RXSTORE_ON_UPSTREAM_COMPLETE";

/// Store settings. Every field has a default, so an empty document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Label recorded on every session span.
    pub name: String,
    pub on_upstream_complete: CompletionPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "store".to_string(),
            on_upstream_complete: CompletionPolicy::Complete,
        }
    }
}

impl StoreConfig {
    /// Load from `RXSTORE_*` environment variables, defaulting anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse an embedded JSON document, e.g. a section of a host app's config.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_completion(mut self, policy: CompletionPolicy) -> Self {
        self.on_upstream_complete = policy;
        self
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(name) = lookup(ENV_NAME).filter(|v| !v.trim().is_empty()) {
            config.name = name;
        }
        if let Some(policy) = lookup(ENV_ON_UPSTREAM_COMPLETE) {
            config.on_upstream_complete = policy.parse()?;
        }
        Ok(config)
    }
}
