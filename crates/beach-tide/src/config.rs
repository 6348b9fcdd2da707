use serde::Deserialize;
use url::Url;

use crate::error::ConfigurationError;
use crate::topic::Topic;

/// Environment prefix, e.g. `BEACH_TIDE_BASE_URL`.
pub const ENV_PREFIX: &str = "BEACH_TIDE";

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path joined between the base URL and the topic.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_true")]
    pub reconnect: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            path_prefix: default_path_prefix(),
            auth_token: None,
            reconnect: true,
        }
    }
}

impl ChannelConfig {
    /// Reads `BEACH_TIDE_*` variables, falling back to defaults when they
    /// cannot be parsed.
    pub fn from_env() -> Self {
        Self::load().unwrap_or_else(|_| ChannelConfig::default().normalize())
    }

    pub fn load() -> Result<Self, ConfigurationError> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize::<ChannelConfig>()?;
        Ok(config.normalize())
    }

    fn normalize(mut self) -> Self {
        self.auth_token = Self::normalize_opt(self.auth_token.take());
        let base_url = self.base_url.trim();
        self.base_url = if base_url.is_empty() {
            default_base_url()
        } else {
            base_url.to_string()
        };
        self.path_prefix = self.path_prefix.trim().to_string();
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    /// Endpoint for a channel: `<base_url>/<path_prefix>/<topic>`.
    pub fn endpoint_for(&self, topic: &Topic) -> Result<Url, ConfigurationError> {
        let mut url = Url::parse(&self.base_url).map_err(|err| {
            ConfigurationError::InvalidEndpoint(format!("{}: {err}", self.base_url))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                ConfigurationError::InvalidEndpoint(format!(
                    "{} cannot carry a path",
                    self.base_url
                ))
            })?;
            segments.pop_if_empty();
            segments.extend(self.path_prefix.split('/').filter(|s| !s.is_empty()));
            segments.push(topic.as_str());
        }
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_path_prefix() -> String {
    "/sse".to_string()
}

fn default_true() -> bool {
    true
}
