//! A live binding of topic, transport connection and handler.
//!
//! Each subscription owns one pump task that reads its connection and
//! processes events one at a time, so the handler never overlaps with itself
//! and sees frames in arrival order. The dispatch gate is held while the
//! handler or error listener runs and while `close` flips the closed flag:
//! once `close` has returned no callback can start.
//!
//! A `close` issued from inside any subscription's callback only flips the
//! flag and never waits on a gate, so handlers may close their own or each
//! other's subscriptions. Every callback re-checks the flag under its gate.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{SubscriptionError, TransportError};
use crate::frame::{classify, Frame, FrameKind};
use crate::handler::{Dispatch, ErrorListener};
use crate::topic::Topic;
use crate::transport::{Connection, TransportEvent};

thread_local! {
    static CALLBACK_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as running a handler or error listener.
struct CallbackScope;

impl CallbackScope {
    fn enter() -> Self {
        CALLBACK_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }

    fn active() -> bool {
        CALLBACK_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        CALLBACK_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Connecting,
    Open,
    /// Transport failed; it may still reconnect on its own.
    Error,
    /// Terminal.
    Closed,
}

/// Point-in-time delivery counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub delivered: u64,
    pub heartbeats: u64,
    pub ignored: u64,
    pub decode_errors: u64,
    pub transport_errors: u64,
    pub last_event_id: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    heartbeats: AtomicU64,
    ignored: AtomicU64,
    decode_errors: AtomicU64,
    transport_errors: AtomicU64,
    last_event_id: Mutex<Option<String>>,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            last_event_id: self.last_event_id.lock().clone(),
        }
    }
}

pub(crate) struct Shared {
    id: SubscriptionId,
    topic: Topic,
    dispatch: Box<dyn Dispatch>,
    errors: Option<Box<dyn ErrorListener>>,
    gate: ReentrantMutex<()>,
    closed: AtomicBool,
    state: watch::Sender<SubscriptionState>,
    cancel: CancellationToken,
    released: CancellationToken,
    counters: Counters,
}

impl Shared {
    pub(crate) fn new(
        topic: Topic,
        dispatch: Box<dyn Dispatch>,
        errors: Option<Box<dyn ErrorListener>>,
    ) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Connecting);
        Self {
            id: SubscriptionId::new(),
            topic,
            dispatch,
            errors,
            gate: ReentrantMutex::new(()),
            closed: AtomicBool::new(false),
            state,
            cancel: CancellationToken::new(),
            released: CancellationToken::new(),
            counters: Counters::default(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: SubscriptionState) {
        self.state.send_if_modified(|current| {
            if *current == next || *current == SubscriptionState::Closed {
                return false;
            }
            *current = next;
            true
        });
    }

    fn opened(&self) {
        let _gate = self.gate.lock();
        if self.is_closed() {
            return;
        }
        self.set_state(SubscriptionState::Open);
        debug!(
            target = "tide.subscription",
            subscription = %self.id,
            topic = %self.topic,
            "channel open"
        );
    }

    pub(crate) fn deliver(&self, frame: Frame) {
        let _gate = self.gate.lock();
        if self.is_closed() {
            return;
        }
        self.set_state(SubscriptionState::Open);
        if let Some(id) = &frame.id {
            *self.counters.last_event_id.lock() = Some(id.clone());
        }

        let kind = classify(&frame, &self.topic);
        match kind {
            FrameKind::Heartbeat => {
                Counters::bump(&self.counters.heartbeats);
                trace!(target = "tide.subscription", topic = %self.topic, "heartbeat");
            }
            FrameKind::Foreign => {
                Counters::bump(&self.counters.ignored);
                debug!(
                    target = "tide.subscription",
                    topic = %self.topic,
                    event = frame.event.as_deref().unwrap_or_default(),
                    "ignoring event for another channel"
                );
            }
            FrameKind::Typed | FrameKind::Message => {
                let _scope = CallbackScope::enter();
                match self.dispatch.dispatch(&frame.data, &self.topic) {
                    Ok(()) => Counters::bump(&self.counters.delivered),
                    Err(err) => {
                        Counters::bump(&self.counters.decode_errors);
                        warn!(
                            target = "tide.subscription",
                            topic = %self.topic,
                            kind = ?kind,
                            error = %err,
                            "dropping undecodable frame"
                        );
                        self.report(SubscriptionError::Decode(err));
                    }
                }
            }
        }
    }

    fn transport_failed(&self, err: TransportError) {
        let _gate = self.gate.lock();
        if self.is_closed() {
            return;
        }
        Counters::bump(&self.counters.transport_errors);
        self.set_state(SubscriptionState::Error);
        warn!(
            target = "tide.subscription",
            topic = %self.topic,
            error = %err,
            "channel transport error"
        );
        self.report(SubscriptionError::Transport(err));
    }

    /// The transport gave up; the caller has to reopen.
    fn ended(&self) {
        let _gate = self.gate.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.set_state(SubscriptionState::Closed);
        info!(
            target = "tide.subscription",
            subscription = %self.id,
            topic = %self.topic,
            "transport ended; subscription closed"
        );
    }

    fn report(&self, error: SubscriptionError) {
        // A handler on another thread may have closed us mid-dispatch.
        if self.is_closed() {
            return;
        }
        if let Some(listener) = &self.errors {
            let _scope = CallbackScope::enter();
            listener.on_error(&error, &self.topic);
        }
    }

    /// Returns true for the call that actually closed the subscription.
    pub(crate) fn close(&self) -> bool {
        // Waiting on a gate from inside a callback can deadlock against a
        // handler that is closing us in turn.
        let _gate = (!CallbackScope::active()).then(|| self.gate.lock());
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        self.set_state(SubscriptionState::Closed);
        debug!(
            target = "tide.subscription",
            subscription = %self.id,
            topic = %self.topic,
            "subscription closed"
        );
        true
    }

    pub(crate) async fn pump(self: Arc<Self>, connection: Box<dyn Connection>) {
        let mut release = Release {
            shared: Arc::clone(&self),
            connection,
        };
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = release.connection.next_event() => event,
            };
            match event {
                Some(TransportEvent::Open) => self.opened(),
                Some(TransportEvent::Frame(frame)) => self.deliver(frame),
                Some(TransportEvent::Error(err)) => self.transport_failed(err),
                None => {
                    self.ended();
                    break;
                }
            }
        }
    }
}

/// Releases the connection however the pump exits, including a panicking
/// handler unwinding through it.
struct Release {
    shared: Arc<Shared>,
    connection: Box<dyn Connection>,
}

impl Drop for Release {
    fn drop(&mut self) {
        let shared = &self.shared;
        if !shared.closed.swap(true, Ordering::SeqCst) {
            shared.cancel.cancel();
            shared.set_state(SubscriptionState::Closed);
            warn!(
                target = "tide.subscription",
                subscription = %shared.id,
                topic = %shared.topic,
                "pump stopped unexpectedly; subscription closed"
            );
        }
        self.connection.close();
        shared.released.cancel();
        trace!(target = "tide.subscription", topic = %shared.topic, "connection released");
    }
}

/// Handle to a live channel subscription.
///
/// Clones share the subscription. It is closed by [`Subscription::close`],
/// by a [`TeardownScope`](crate::lifecycle::TeardownScope) it is registered
/// with, or when the last handle is dropped.
///
/// A handler that keeps a clone of its own subscription holds it alive
/// forever; capture a [`WeakSubscription`] from [`Subscription::downgrade`]
/// instead.
#[derive(Clone)]
#[must_use = "dropping every handle closes the subscription"]
pub struct Subscription {
    inner: Arc<Handle>,
}

struct Handle {
    shared: Arc<Shared>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl Subscription {
    pub(crate) fn start(
        shared: Shared,
        connection: Box<dyn Connection>,
        runtime: &tokio::runtime::Handle,
    ) -> Self {
        let shared = Arc::new(shared);
        runtime.spawn(Arc::clone(&shared).pump(connection));
        Self {
            inner: Arc::new(Handle { shared }),
        }
    }

    fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    pub fn id(&self) -> SubscriptionId {
        self.shared().id
    }

    pub fn topic(&self) -> &Topic {
        &self.shared().topic
    }

    pub fn state(&self) -> SubscriptionState {
        *self.shared().state.borrow()
    }

    /// Receiver that observes every state change, for connection-status UI.
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.shared().state.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared().counters.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.shared().is_closed()
    }

    /// Stops delivery and releases the connection. Idempotent, and safe to
    /// call from inside any handler. Called from outside a handler, it waits
    /// for a call running on another thread to return.
    pub fn close(&self) {
        self.shared().close();
    }

    /// Handle that does not keep the subscription open.
    pub fn downgrade(&self) -> WeakSubscription {
        WeakSubscription {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Resolves once the pump has exited and the connection is released.
    pub async fn released(&self) {
        self.shared().released.cancelled().await
    }
}

/// Non-owning handle obtained from [`Subscription::downgrade`].
#[derive(Clone)]
pub struct WeakSubscription {
    inner: Weak<Handle>,
}

impl WeakSubscription {
    /// `None` once every [`Subscription`] handle has been dropped.
    pub fn upgrade(&self) -> Option<Subscription> {
        self.inner.upgrade().map(|inner| Subscription { inner })
    }

    /// Closes the subscription if any handle is still alive.
    pub fn close(&self) {
        if let Some(subscription) = self.upgrade() {
            subscription.close();
        }
    }
}

impl fmt::Debug for WeakSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSubscription")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id())
            .field("topic", self.topic())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::JsonDispatch;
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;

    type Seen = Arc<StdMutex<Vec<Value>>>;
    type Errors = Arc<StdMutex<Vec<String>>>;

    fn shared_with_recorders() -> (Shared, Seen, Errors) {
        let seen: Seen = Arc::default();
        let errors: Errors = Arc::default();
        let handler = {
            let seen = Arc::clone(&seen);
            move |payload: Value, _topic: &Topic| seen.lock().unwrap().push(payload)
        };
        let listener = {
            let errors = Arc::clone(&errors);
            move |err: &SubscriptionError, _topic: &Topic| {
                errors.lock().unwrap().push(err.to_string())
            }
        };
        let shared = Shared::new(
            Topic::new("SystemNotification").unwrap(),
            Box::new(JsonDispatch::new(handler)),
            Some(Box::new(listener)),
        );
        (shared, seen, errors)
    }

    #[test]
    fn frames_move_state_to_open_and_count() {
        let (shared, seen, errors) = shared_with_recorders();
        assert_eq!(*shared.state.borrow(), SubscriptionState::Connecting);

        shared.deliver(Frame::heartbeat());
        shared.deliver(Frame::named("SystemNotification", r#"{"n":1}"#).with_id("7"));
        shared.deliver(Frame::named("Other", r#"{"n":2}"#));
        shared.deliver(Frame::message("not-json"));

        assert_eq!(*shared.state.borrow(), SubscriptionState::Open);
        assert_eq!(seen.lock().unwrap().as_slice(), [serde_json::json!({"n": 1})]);
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert_eq!(
            shared.counters.snapshot(),
            StatsSnapshot {
                delivered: 1,
                heartbeats: 1,
                ignored: 1,
                decode_errors: 1,
                transport_errors: 0,
                last_event_id: Some("7".into()),
            }
        );
    }

    #[test]
    fn transport_error_then_recovery() {
        let (shared, _seen, errors) = shared_with_recorders();
        shared.opened();
        shared.transport_failed(TransportError::Stream("reset".into()));
        assert_eq!(*shared.state.borrow(), SubscriptionState::Error);
        assert_eq!(errors.lock().unwrap().len(), 1);

        shared.opened();
        assert_eq!(*shared.state.borrow(), SubscriptionState::Open);
    }

    #[test]
    fn closed_is_terminal_and_silent() {
        let (shared, seen, errors) = shared_with_recorders();
        assert!(shared.close());
        assert!(!shared.close());

        shared.opened();
        shared.deliver(Frame::message(r#"{"late":true}"#));
        shared.transport_failed(TransportError::Closed);

        assert_eq!(*shared.state.borrow(), SubscriptionState::Closed);
        assert!(seen.lock().unwrap().is_empty());
        assert!(errors.lock().unwrap().is_empty());
        assert!(shared.cancel.is_cancelled());
    }

    #[test]
    fn ended_closes_without_caller() {
        let (shared, _seen, _errors) = shared_with_recorders();
        shared.ended();
        assert!(shared.is_closed());
        assert_eq!(*shared.state.borrow(), SubscriptionState::Closed);
        assert!(!shared.close());
    }
}
