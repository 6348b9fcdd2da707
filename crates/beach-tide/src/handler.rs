use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{DecodeError, SubscriptionError};
use crate::topic::Topic;

/// Sink for decoded payloads, usually a renderer.
pub trait Handler: Send + Sync {
    fn handle(&self, payload: Value, topic: &Topic);
}

impl<F> Handler for F
where
    F: Fn(Value, &Topic) + Send + Sync,
{
    fn handle(&self, payload: Value, topic: &Topic) {
        (self)(payload, topic)
    }
}

/// Like [`Handler`] but for payloads decoded into a concrete type.
pub trait TypedHandler<P>: Send + Sync {
    fn handle(&self, payload: P, topic: &Topic);
}

impl<P, F> TypedHandler<P> for F
where
    F: Fn(P, &Topic) + Send + Sync,
{
    fn handle(&self, payload: P, topic: &Topic) {
        (self)(payload, topic)
    }
}

/// Diagnostic callback for decode and transport failures.
pub trait ErrorListener: Send + Sync {
    fn on_error(&self, error: &SubscriptionError, topic: &Topic);
}

impl<F> ErrorListener for F
where
    F: Fn(&SubscriptionError, &Topic) + Send + Sync,
{
    fn on_error(&self, error: &SubscriptionError, topic: &Topic) {
        (self)(error, topic)
    }
}

/// Decodes frame data and hands it to the caller's handler.
pub(crate) trait Dispatch: Send + Sync {
    fn dispatch(&self, data: &str, topic: &Topic) -> Result<(), DecodeError>;
}

pub(crate) struct JsonDispatch<H> {
    handler: H,
}

impl<H: Handler> JsonDispatch<H> {
    pub(crate) fn new(handler: H) -> Self {
        Self { handler }
    }
}

impl<H: Handler> Dispatch for JsonDispatch<H> {
    fn dispatch(&self, data: &str, topic: &Topic) -> Result<(), DecodeError> {
        let payload: Value =
            serde_json::from_str(data).map_err(|err| DecodeError::new(topic, data, err))?;
        self.handler.handle(payload, topic);
        Ok(())
    }
}

pub(crate) struct TypedDispatch<P, H> {
    handler: H,
    _payload: PhantomData<fn() -> P>,
}

impl<P, H> TypedDispatch<P, H>
where
    P: DeserializeOwned,
    H: TypedHandler<P>,
{
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _payload: PhantomData,
        }
    }
}

impl<P, H> Dispatch for TypedDispatch<P, H>
where
    P: DeserializeOwned,
    H: TypedHandler<P>,
{
    fn dispatch(&self, data: &str, topic: &Topic) -> Result<(), DecodeError> {
        let payload: P =
            serde_json::from_str(data).map_err(|err| DecodeError::new(topic, data, err))?;
        self.handler.handle(payload, topic);
        Ok(())
    }
}
