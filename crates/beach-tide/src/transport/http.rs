use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{Event, EventSource};
use tracing::debug;
use url::Url;

use super::{Connection, Transport, TransportEvent};
use crate::config::ChannelConfig;
use crate::error::TransportError;
use crate::frame::Frame;

/// Event name the text/event-stream protocol assigns to frames sent without
/// an `event:` line.
const GENERIC_EVENT_NAME: &str = "message";

/// text/event-stream transport backed by `reqwest-eventsource`.
///
/// Reconnection follows the event source's own retry policy, resending the
/// last event id; with `reconnect(false)` the first failure ends the stream.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    bearer_token: Option<String>,
    reconnect: bool,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            http: reqwest::Client::new(),
            bearer_token: None,
            reconnect: true,
        }
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            bearer_token: config.auth_token.clone(),
            reconnect: config.reconnect,
        }
    }

    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.reconnect = enabled;
        self
    }
}

impl Transport for HttpTransport {
    fn connect(&self, endpoint: &Url) -> Result<Box<dyn Connection>, TransportError> {
        let mut request = self.http.get(endpoint.clone());
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let mut source =
            EventSource::new(request).map_err(|err| TransportError::Connect(err.to_string()))?;
        if !self.reconnect {
            source.set_retry_policy(Box::new(Never));
        }
        debug!(
            target = "tide.http",
            endpoint = %endpoint,
            reconnect = self.reconnect,
            "opening event stream"
        );
        Ok(Box::new(HttpConnection { source }))
    }
}

struct HttpConnection {
    source: EventSource,
}

#[async_trait]
impl Connection for HttpConnection {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        let event = match self.source.next().await? {
            Ok(Event::Open) => TransportEvent::Open,
            Ok(Event::Message(message)) => TransportEvent::Frame(frame_from_parts(
                &message.event,
                message.data,
                &message.id,
            )),
            Err(err) => TransportEvent::Error(TransportError::Stream(err.to_string())),
        };
        Some(event)
    }

    fn close(&mut self) {
        self.source.close();
    }
}

fn frame_from_parts(event: &str, data: String, id: &str) -> Frame {
    let event = match event {
        "" | GENERIC_EVENT_NAME => None,
        name => Some(name.to_string()),
    };
    let id = (!id.is_empty()).then(|| id.to_string());
    Frame { event, data, id }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_event_name_maps_to_message() {
        let frame = frame_from_parts("message", "heartbeat".into(), "");
        assert_eq!(frame, Frame::heartbeat());
        let frame = frame_from_parts("", "{}".into(), "");
        assert!(frame.is_generic());
    }

    #[test]
    fn named_event_keeps_name_and_id() {
        let frame = frame_from_parts("SystemNotification", "{}".into(), "42");
        assert_eq!(frame.event.as_deref(), Some("SystemNotification"));
        assert_eq!(frame.id.as_deref(), Some("42"));
    }

    #[test]
    fn config_carries_token_and_retry_choice() {
        let config = ChannelConfig {
            auth_token: Some("secret".into()),
            reconnect: false,
            ..ChannelConfig::default()
        };
        let transport = HttpTransport::from_config(&config);
        assert_eq!(transport.bearer_token.as_deref(), Some("secret"));
        assert!(!transport.reconnect);
    }
}
