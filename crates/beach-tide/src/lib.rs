//! Beach Tide: client-side subscriptions to server-push event channels.
//!
//! Responsibilities:
//! - opening one push connection per channel subscription
//! - dropping keep-alive heartbeats and decoding JSON payloads
//! - dispatching payloads to a caller-supplied handler in arrival order
//! - releasing connections when the consuming context ends
//!
//! ```no_run
//! use beach_tide::{ChannelClient, ChannelConfig, TeardownScope, Topic};
//!
//! # async fn run() -> Result<(), beach_tide::SubscriptionError> {
//! let client = ChannelClient::http(ChannelConfig::from_env());
//! let scope = TeardownScope::new();
//! let subscription = client.open("SystemNotification", |payload: serde_json::Value, topic: &Topic| {
//!     println!("{topic}: {payload}");
//! })?;
//! scope.register_for_teardown(&subscription);
//! scope.bind(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! });
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod handler;
pub mod lifecycle;
pub mod subscription;
pub mod topic;
pub mod transport;

pub use client::{ChannelClient, SubscriptionBuilder};
pub use config::ChannelConfig;
pub use error::{ConfigurationError, DecodeError, SubscriptionError, TideResult, TransportError};
pub use frame::{Frame, FrameKind, HEARTBEAT_SENTINEL};
pub use handler::{ErrorListener, Handler, TypedHandler};
pub use lifecycle::TeardownScope;
pub use subscription::{
    StatsSnapshot, Subscription, SubscriptionId, SubscriptionState, WeakSubscription,
};
pub use topic::Topic;
