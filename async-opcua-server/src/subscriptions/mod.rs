//! The subscription publish engine: a single subscription's state machine
//! ([`subscription`]) and the per-session collection that times and
//! dispatches it ([`cache`]).

pub mod cache;
pub mod subscription;

pub use cache::{CloseHandler, PublishHandler, SubscriptionCache};
pub use subscription::{
    MonitoredItem, PublishResult, Subscription, SubscriptionParams, SubscriptionState,
    TickOutcome,
};
