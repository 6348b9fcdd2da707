//! Ties subscriptions to the lifetime of an enclosing context.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::subscription::{Subscription, SubscriptionId};

/// Finalizer registry: closes every registered subscription exactly once when
/// the enclosing context ends.
///
/// The context end is either an explicit [`teardown`](Self::teardown), a
/// signal passed to [`bind`](Self::bind), or the scope being dropped.
#[derive(Debug, Default)]
pub struct TeardownScope {
    registered: Mutex<HashMap<SubscriptionId, Subscription>>,
    torn_down: AtomicBool,
}

impl TeardownScope {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records `subscription` for teardown. Registering the same subscription
    /// twice keeps a single entry; registering after teardown closes it on
    /// the spot.
    pub fn register_for_teardown(&self, subscription: &Subscription) {
        let mut registered = self.registered.lock();
        if self.torn_down.load(Ordering::SeqCst) {
            drop(registered);
            debug!(
                target = "tide.lifecycle",
                topic = %subscription.topic(),
                "scope already torn down; closing late registration"
            );
            subscription.close();
            return;
        }
        registered
            .entry(subscription.id())
            .or_insert_with(|| subscription.clone());
    }

    /// Closes every registered subscription once and returns how many were
    /// closed. Later calls are no-ops.
    pub fn teardown(&self) -> usize {
        let drained: Vec<Subscription> = {
            let mut registered = self.registered.lock();
            if self.torn_down.swap(true, Ordering::SeqCst) {
                return 0;
            }
            registered.drain().map(|(_, subscription)| subscription).collect()
        };
        for subscription in &drained {
            subscription.close();
        }
        info!(
            target = "tide.lifecycle",
            closed = drained.len(),
            "teardown complete"
        );
        drained.len()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Number of subscriptions waiting for teardown.
    pub fn len(&self) -> usize {
        self.registered.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns one listener that tears the scope down when `signal` resolves,
    /// e.g. `tokio::signal::ctrl_c()` or a cancellation token. The listener
    /// holds the scope weakly, so dropping the scope still tears it down.
    pub fn bind<F>(self: &Arc<Self>, signal: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let scope: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            signal.await;
            if let Some(scope) = scope.upgrade() {
                debug!(target = "tide.lifecycle", "teardown signal received");
                scope.teardown();
            }
        })
    }
}

impl Drop for TeardownScope {
    fn drop(&mut self) {
        self.teardown();
    }
}
