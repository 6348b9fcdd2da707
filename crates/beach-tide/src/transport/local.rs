use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use url::Url;

use super::{Connection, Transport, TransportEvent};
use crate::error::TransportError;
use crate::frame::Frame;

const CHANNEL_CAPACITY: usize = 64;

/// In-memory push transport for tests and in-process producers.
///
/// Channels are keyed by the final path segment of the endpoint, which is the
/// topic under the default endpoint layout. Every `connect` gets its own
/// receiver, and every connection starts with [`TransportEvent::Open`].
#[derive(Debug, Clone, Default)]
pub struct LocalTransport {
    inner: Arc<LocalInner>,
}

#[derive(Debug, Default)]
struct LocalInner {
    channels: parking_lot::RwLock<HashMap<String, broadcast::Sender<TransportEvent>>>,
    live: Arc<AtomicUsize>,
    opened: AtomicUsize,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<TransportEvent> {
        let mut guard = self.inner.channels.write();
        guard
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Pushes an event to every connection on `channel`; returns how many
    /// connections received it.
    pub fn send(&self, channel: &str, event: TransportEvent) -> Result<usize, TransportError> {
        self.sender_for(channel)
            .send(event)
            .map_err(|_| TransportError::Closed)
    }

    pub fn send_frame(&self, channel: &str, frame: Frame) -> Result<usize, TransportError> {
        self.send(channel, TransportEvent::Frame(frame))
    }

    pub fn fail(&self, channel: &str, error: TransportError) -> Result<usize, TransportError> {
        self.send(channel, TransportEvent::Error(error))
    }

    /// Ends every connection on `channel`, as a transport that stopped
    /// reconnecting would.
    pub fn disconnect(&self, channel: &str) {
        self.inner.channels.write().remove(channel);
    }

    /// Connections currently held open.
    pub fn live_connections(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Connections opened over the transport's lifetime.
    pub fn opened_connections(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }
}

fn channel_key(endpoint: &Url) -> Option<String> {
    endpoint
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

impl Transport for LocalTransport {
    fn connect(&self, endpoint: &Url) -> Result<Box<dyn Connection>, TransportError> {
        let channel = channel_key(endpoint).ok_or_else(|| {
            TransportError::Connect(format!("endpoint {endpoint} has no channel segment"))
        })?;
        let rx = self.sender_for(&channel).subscribe();
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LocalConnection {
            rx,
            live: Arc::clone(&self.inner.live),
            announced: false,
            released: AtomicBool::new(false),
        }))
    }
}

struct LocalConnection {
    rx: broadcast::Receiver<TransportEvent>,
    live: Arc<AtomicUsize>,
    announced: bool,
    released: AtomicBool,
}

impl LocalConnection {
    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Connection for LocalConnection {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.released.load(Ordering::SeqCst) {
            return None;
        }
        if !self.announced {
            self.announced = true;
            return Some(TransportEvent::Open);
        }
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Some(TransportEvent::Error(
                TransportError::Stream(format!("receiver lagged by {skipped} events")),
            )),
            Err(broadcast::error::RecvError::Closed) => {
                self.release();
                None
            }
        }
    }

    fn close(&mut self) {
        self.release();
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(topic: &str) -> Url {
        Url::parse(&format!("http://localhost/sse/{topic}")).unwrap()
    }

    #[tokio::test]
    async fn delivers_open_then_frames() {
        let transport = LocalTransport::new();
        let mut conn = transport.connect(&endpoint("SystemNotification")).unwrap();
        transport
            .send_frame("SystemNotification", Frame::message("{}"))
            .expect("one listener");

        assert!(matches!(conn.next_event().await, Some(TransportEvent::Open)));
        match conn.next_event().await {
            Some(TransportEvent::Frame(frame)) => assert_eq!(frame.data, "{}"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn tracks_live_connections() {
        let transport = LocalTransport::new();
        let mut first = transport.connect(&endpoint("a")).unwrap();
        let second = transport.connect(&endpoint("a")).unwrap();
        assert_eq!(transport.live_connections(), 2);

        first.close();
        first.close();
        assert_eq!(transport.live_connections(), 1);
        drop(second);
        assert_eq!(transport.live_connections(), 0);
        assert_eq!(transport.opened_connections(), 2);
    }

    #[tokio::test]
    async fn disconnect_ends_stream() {
        let transport = LocalTransport::new();
        let mut conn = transport.connect(&endpoint("a")).unwrap();
        assert!(matches!(conn.next_event().await, Some(TransportEvent::Open)));
        transport.disconnect("a");
        assert!(conn.next_event().await.is_none());
        assert_eq!(transport.live_connections(), 0);
    }

    #[test]
    fn rejects_endpoint_without_channel() {
        let transport = LocalTransport::new();
        let url = Url::parse("http://localhost/").unwrap();
        assert!(transport.connect(&url).is_err());
    }
}
