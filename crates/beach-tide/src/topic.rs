use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::error::ConfigurationError;

/// Longest channel name the server routes accept.
pub const MAX_TOPIC_LEN: usize = 128;

/// Name of a logical event channel, e.g. `SystemNotification`.
///
/// Validated once at construction and immutable afterwards; clones share the
/// same allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(Arc<str>);

impl Topic {
    pub fn new(name: impl AsRef<str>) -> Result<Self, ConfigurationError> {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(ConfigurationError::EmptyTopic);
        }
        if name.len() > MAX_TOPIC_LEN {
            return Err(ConfigurationError::InvalidTopic {
                topic: name.to_string(),
                reason: format!("longer than {MAX_TOPIC_LEN} bytes"),
            });
        }
        if let Some(ch) = name.chars().find(|ch| !is_channel_char(*ch)) {
            return Err(ConfigurationError::InvalidTopic {
                topic: name.to_string(),
                reason: format!("unexpected character {ch:?}"),
            });
        }
        Ok(Self(Arc::from(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_channel_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.')
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Topic {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for Topic {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl TryFrom<&str> for Topic {
    type Error = ConfigurationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Topic::new(value)
    }
}

impl TryFrom<String> for Topic {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Topic::new(value)
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
