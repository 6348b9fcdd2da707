//! Push transports a subscription can sit on.
//!
//! A transport turns an endpoint URL into a [`Connection`]: a stream of
//! [`TransportEvent`]s plus a way to release it. Reconnection, when the wire
//! protocol has one, happens inside the connection; the stream only ends once
//! the transport has given up.

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;
use crate::frame::Frame;

pub mod http;
pub mod local;

pub use http::HttpTransport;
pub use local::LocalTransport;

#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection (re)established.
    Open,
    Frame(Frame),
    /// Connection failed; the transport may still reconnect.
    Error(TransportError),
}

#[async_trait]
pub trait Connection: Send {
    /// Next event, or `None` once the connection is gone for good.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Releases the underlying connection. Must be idempotent.
    fn close(&mut self);
}

pub trait Transport: Send + Sync {
    fn connect(&self, endpoint: &Url) -> Result<Box<dyn Connection>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn connect(&self, endpoint: &Url) -> Result<Box<dyn Connection>, TransportError> {
        (**self).connect(endpoint)
    }
}
