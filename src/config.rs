use std::str::FromStr;
use std::time::Duration;

use tracing::Level;

use crate::{Error, Result};

pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-mini";
pub const DEFAULT_VOICE: &str = "verse";
pub const DEFAULT_ENDPOINT: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CONSECUTIVE_PARSE_ERRORS: u32 = 8;

/// Per-call settings handed to the model endpoint and the session's logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// System prompt for the model.
    pub instructions: Option<String>,
    pub voice: String,
    pub model: String,
    /// Per-frame debug logging is emitted only at `DEBUG` or more verbose.
    pub log_level: Level,
}

impl SessionConfig {
    #[must_use]
    pub fn logs_frames(&self) -> bool {
        self.log_level >= Level::DEBUG
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instructions: None,
            voice: DEFAULT_VOICE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            log_level: Level::INFO,
        }
    }
}

/// Everything a relay needs to open and supervise sessions.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_key: String,
    pub endpoint: String,
    pub setup_timeout: Duration,
    pub drain_timeout: Duration,
    /// Consecutive undecodable messages tolerated on one leg before it is
    /// treated as broken.
    pub max_consecutive_parse_errors: u32,
    pub session: SessionConfig,
}

impl RelayConfig {
    #[must_use]
    pub fn builder() -> RelayBuilder {
        RelayBuilder::new()
    }

    /// Load configuration from the process environment, reading a `.env`
    /// file first when one is present.
    ///
    /// # Errors
    /// Returns an error if `OPENAI_API_KEY` is missing or a value cannot be parsed.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = RelayBuilder::new();
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            builder = builder.api_key(key);
        }
        if let Some(model) = lookup("OPENAI_REALTIME_MODEL") {
            builder = builder.model(model);
        }
        if let Some(voice) = lookup("OPENAI_VOICE") {
            builder = builder.voice(voice);
        }
        if let Some(prompt) = lookup("VOICE_AGENT_SYSTEM_PROMPT") {
            builder = builder.instructions(prompt);
        }
        if let Some(url) = lookup("OPENAI_REALTIME_URL") {
            builder = builder.endpoint(url);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            let level = Level::from_str(level.trim())
                .map_err(|_| Error::Config(format!("invalid LOG_LEVEL `{level}`")))?;
            builder = builder.log_level(level);
        }
        if let Some(ms) = lookup("RELAY_SETUP_TIMEOUT_MS") {
            builder = builder.setup_timeout(parse_millis("RELAY_SETUP_TIMEOUT_MS", &ms)?);
        }
        if let Some(ms) = lookup("RELAY_DRAIN_TIMEOUT_MS") {
            builder = builder.drain_timeout(parse_millis("RELAY_DRAIN_TIMEOUT_MS", &ms)?);
        }
        builder.build()
    }
}

#[allow(clippy::result_large_err)]
fn parse_millis(name: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| Error::Config(format!("{name} must be a number of milliseconds, got `{value}`")))
}

pub struct RelayBuilder {
    api_key: Option<String>,
    endpoint: String,
    setup_timeout: Duration,
    drain_timeout: Duration,
    max_consecutive_parse_errors: u32,
    session: SessionConfig,
}

impl RelayBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            max_consecutive_parse_errors: DEFAULT_MAX_CONSECUTIVE_PARSE_ERRORS,
            session: SessionConfig::default(),
        }
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = url.into();
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.session.model = model.into();
        self
    }

    #[must_use]
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.session.voice = voice.into();
        self
    }

    #[must_use]
    pub fn instructions(mut self, prompt: impl Into<String>) -> Self {
        self.session.instructions = Some(prompt.into());
        self
    }

    #[must_use]
    pub const fn log_level(mut self, level: Level) -> Self {
        self.session.log_level = level;
        self
    }

    #[must_use]
    pub const fn setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn max_consecutive_parse_errors(mut self, limit: u32) -> Self {
        self.max_consecutive_parse_errors = limit;
        self
    }

    /// # Errors
    /// Returns an error if no API key was supplied or the parse error limit is zero.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<RelayConfig> {
        let api_key = self
            .api_key
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is required".to_string()))?;
        if self.max_consecutive_parse_errors == 0 {
            return Err(Error::Config(
                "max_consecutive_parse_errors must be at least 1".to_string(),
            ));
        }
        Ok(RelayConfig {
            api_key,
            endpoint: self.endpoint,
            setup_timeout: self.setup_timeout,
            drain_timeout: self.drain_timeout,
            max_consecutive_parse_errors: self.max_consecutive_parse_errors,
            session: self.session,
        })
    }
}

impl Default for RelayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
