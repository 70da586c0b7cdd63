//! Client-side OPC UA session and subscription engine.
//!
//! Mirrors `async-opcua-server`'s split: this crate builds the session
//! lifecycle and the per-subscription reconciler described in OPC UA Part
//! 4, sitting on top of an [`opcua_core::transport::TransportChannel`] the
//! embedding application supplies. No address space, no secure channel,
//! no discovery -- a client embedder drives [`ClientSession`] directly.

pub mod error;
pub mod session;

pub use error::{ClientResult, Error};
pub use session::callbacks::{
    DataChangeCallback, EventCallback, OnSubscriptionNotification, OnSubscriptionNotificationCore,
    SubscriptionCallbacks,
};
pub use session::event_loop::{ClientSession, CreateSubscriptionParams};
pub use session::subscription::{ClientSubscription, MonitoredItem, SubscriptionParams};
