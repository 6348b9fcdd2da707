use thiserror::Error;

use crate::topic::Topic;

/// How much of an undecodable frame is kept for diagnostics.
const EXCERPT_LIMIT: usize = 120;

/// Problems detected while building a subscription; nothing is allocated when
/// one of these is returned.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("topic must not be empty")]
    EmptyTopic,
    #[error("invalid topic {topic:?}: {reason}")]
    InvalidTopic { topic: String, reason: String },
    #[error("subscription has no handler")]
    MissingHandler,
    #[error("no tokio runtime available to drive the subscription")]
    NoRuntime,
    #[error("invalid channel endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("failed to load channel config: {0}")]
    Load(#[from] config::ConfigError),
}

/// A non-heartbeat frame whose data was not the JSON the handler expects.
#[derive(Debug, Error)]
#[error("failed to decode frame on {topic}: {source} (data: {excerpt:?})")]
pub struct DecodeError {
    pub topic: Topic,
    pub excerpt: String,
    #[source]
    pub source: serde_json::Error,
}

impl DecodeError {
    pub(crate) fn new(topic: &Topic, data: &str, source: serde_json::Error) -> Self {
        Self {
            topic: topic.clone(),
            excerpt: excerpt(data),
            source,
        }
    }
}

fn excerpt(data: &str) -> String {
    match data.char_indices().nth(EXCERPT_LIMIT) {
        Some((cut, _)) => format!("{}…", &data[..cut]),
        None => data.to_string(),
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to open connection: {0}")]
    Connect(String),
    #[error("stream failure: {0}")]
    Stream(String),
    #[error("transport closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SubscriptionError {
    pub fn is_decode(&self) -> bool {
        matches!(self, SubscriptionError::Decode(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, SubscriptionError::Transport(_))
    }
}

pub type TideResult<T> = Result<T, SubscriptionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_keeps_short_excerpt() {
        let topic = Topic::new("SystemNotification").unwrap();
        let data = "x".repeat(500);
        let source = serde_json::from_str::<serde_json::Value>(&data).unwrap_err();
        let err = DecodeError::new(&topic, &data, source);
        assert_eq!(err.excerpt.chars().count(), EXCERPT_LIMIT + 1);
        assert!(err.to_string().contains("SystemNotification"));
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let data = "é".repeat(EXCERPT_LIMIT + 5);
        assert!(excerpt(&data).ends_with('…'));
        assert_eq!(excerpt("not-json"), "not-json");
    }
}
