//! Raw frames received from a push transport and the rule that decides what
//! a subscription does with each one.

use crate::topic::Topic;

/// Keep-alive payload servers send on the generic message channel. Sent bare,
/// never JSON-quoted.
pub const HEARTBEAT_SENTINEL: &str = "heartbeat";

/// One unit of data received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Named event, `None` for generic messages.
    pub event: Option<String>,
    pub data: String,
    /// Last-event id, when the wire protocol carries one.
    pub id: Option<String>,
}

impl Frame {
    /// A generic message: no event name.
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
            id: None,
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
            id: None,
        }
    }

    pub fn heartbeat() -> Self {
        Self::message(HEARTBEAT_SENTINEL)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn is_generic(&self) -> bool {
        self.event.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Named event for the subscribed topic; decoded and dispatched.
    Typed,
    /// Generic keep-alive; dropped without decoding.
    Heartbeat,
    /// Generic message with a payload; decoded and dispatched under the
    /// subscription's topic.
    Message,
    /// Named event for some other channel; not ours.
    Foreign,
}

impl FrameKind {
    pub fn dispatches(self) -> bool {
        matches!(self, FrameKind::Typed | FrameKind::Message)
    }
}

/// Named events are matched first so servers may use either dispatch style
/// for the same channel. The heartbeat check only looks at generic messages.
pub fn classify(frame: &Frame, topic: &Topic) -> FrameKind {
    match frame.event.as_deref() {
        Some(name) if topic == name => FrameKind::Typed,
        Some(_) => FrameKind::Foreign,
        None if frame.data == HEARTBEAT_SENTINEL => FrameKind::Heartbeat,
        None => FrameKind::Message,
    }
}
