//! Server-side OPC UA subscription and session engine.
//!
//! This workspace implements the publish/subscribe machinery described in
//! OPC UA Part 4 -- subscriptions, monitored items, the session-level
//! Publish dispatcher, and session/endpoint registration -- without an
//! address space, node manager, or secure channel transport. Those are the
//! embedding application's concern: it supplies node/attribute semantics
//! through [`handlers::SubscriptionHandlers`] and drives requests in
//! through whatever transport it likes, handing each one to
//! [`session::manager::SessionManager::dispatch`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod session;
pub mod subscriptions;

pub use config::ServerCapabilities;
pub use error::{Error, ServerResult};
pub use session::manager::SessionManager;
pub use session::Session;
