use serde::de::DeserializeOwned;
use tracing::info;

use crate::config::ChannelConfig;
use crate::error::{ConfigurationError, SubscriptionError, TideResult};
use crate::handler::{Dispatch, ErrorListener, Handler, JsonDispatch, TypedDispatch, TypedHandler};
use crate::subscription::{Shared, Subscription};
use crate::topic::Topic;
use crate::transport::{HttpTransport, Transport};

/// Opens channel subscriptions over a transport.
///
/// Every `open` allocates its own connection; two subscriptions on the same
/// topic never share one.
#[derive(Debug, Clone)]
pub struct ChannelClient<T: Transport> {
    config: ChannelConfig,
    transport: T,
}

impl ChannelClient<HttpTransport> {
    /// Client over text/event-stream, configured from `config`.
    pub fn http(config: ChannelConfig) -> Self {
        let transport = HttpTransport::from_config(&config);
        Self::new(config, transport)
    }
}

impl<T: Transport> ChannelClient<T> {
    pub fn new(config: ChannelConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Subscribes `handler` to `topic`, decoding payloads as JSON values.
    pub fn open<H>(&self, topic: impl AsRef<str>, handler: H) -> TideResult<Subscription>
    where
        H: Handler + 'static,
    {
        self.subscribe(topic).handler(handler).open()
    }

    /// Subscribes `handler` to `topic`, decoding payloads into `P`.
    pub fn open_typed<P, H>(&self, topic: impl AsRef<str>, handler: H) -> TideResult<Subscription>
    where
        P: DeserializeOwned + 'static,
        H: TypedHandler<P> + 'static,
    {
        self.subscribe(topic).typed_handler(handler).open()
    }

    /// Starts a subscription builder for `topic`.
    pub fn subscribe(&self, topic: impl AsRef<str>) -> SubscriptionBuilder<'_, T> {
        SubscriptionBuilder {
            client: self,
            topic: topic.as_ref().to_string(),
            dispatch: None,
            errors: None,
        }
    }
}

#[must_use]
pub struct SubscriptionBuilder<'a, T: Transport> {
    client: &'a ChannelClient<T>,
    topic: String,
    dispatch: Option<Box<dyn Dispatch>>,
    errors: Option<Box<dyn ErrorListener>>,
}

impl<T: Transport> SubscriptionBuilder<'_, T> {
    pub fn handler<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.dispatch = Some(Box::new(JsonDispatch::new(handler)));
        self
    }

    pub fn typed_handler<P, H>(mut self, handler: H) -> Self
    where
        P: DeserializeOwned + 'static,
        H: TypedHandler<P> + 'static,
    {
        self.dispatch = Some(Box::new(TypedDispatch::new(handler)));
        self
    }

    /// Receives decode and transport failures.
    pub fn on_error<L: ErrorListener + 'static>(mut self, listener: L) -> Self {
        self.errors = Some(Box::new(listener));
        self
    }

    /// Validates everything up front, then connects and starts delivery.
    pub fn open(self) -> TideResult<Subscription> {
        let topic = Topic::new(&self.topic)?;
        let dispatch = self.dispatch.ok_or(ConfigurationError::MissingHandler)?;
        let endpoint = self.client.config.endpoint_for(&topic)?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ConfigurationError::NoRuntime)?;

        let connection = self
            .client
            .transport
            .connect(&endpoint)
            .map_err(SubscriptionError::Transport)?;
        let shared = Shared::new(topic, dispatch, self.errors);
        let subscription = Subscription::start(shared, connection, &runtime);
        info!(
            target = "tide.client",
            subscription = %subscription.id(),
            topic = %subscription.topic(),
            endpoint = %endpoint,
            "subscription opened"
        );
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use serde_json::Value;

    fn client() -> ChannelClient<LocalTransport> {
        ChannelClient::new(ChannelConfig::default(), LocalTransport::new())
    }

    fn noop(_payload: Value, _topic: &Topic) {}

    #[tokio::test]
    async fn empty_topic_fails_fast() {
        let client = client();
        let err = client.open("", noop).unwrap_err();
        assert!(matches!(
            err,
            SubscriptionError::Configuration(ConfigurationError::EmptyTopic)
        ));
        assert_eq!(client.transport().opened_connections(), 0);
    }

    #[tokio::test]
    async fn missing_handler_fails_fast() {
        let client = client();
        let err = client.subscribe("SystemNotification").open().unwrap_err();
        assert!(matches!(
            err,
            SubscriptionError::Configuration(ConfigurationError::MissingHandler)
        ));
        assert_eq!(client.transport().opened_connections(), 0);
    }

    #[test]
    fn open_outside_runtime_is_rejected() {
        let client = client();
        let err = client.open("SystemNotification", noop).unwrap_err();
        assert!(matches!(
            err,
            SubscriptionError::Configuration(ConfigurationError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn each_open_gets_its_own_connection() {
        let client = client();
        let first = client.open("SystemNotification", noop).unwrap();
        let second = client.open("SystemNotification", noop).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(client.transport().opened_connections(), 2);
        assert_eq!(client.transport().live_connections(), 2);
    }
}
