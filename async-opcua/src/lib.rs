#![warn(missing_docs)]

//! A convenience crate re-exporting the OPC UA subscription/session engine
//! split across `async-opcua-types`, `async-opcua-core`,
//! `async-opcua-server`, and `async-opcua-client`.
//!
//! This workspace implements the publish/subscribe machinery described in
//! OPC UA Part 4 -- subscriptions, monitored items, the Publish
//! dispatcher, session lifecycle on both sides -- without an address
//! space, node manager, or secure channel transport; those are supplied by
//! the embedding application. Enable `server` and/or `client` to pull in
//! the corresponding half.

pub use opcua_core as core;
pub use opcua_types as types;

#[cfg(feature = "client")]
pub use opcua_client as client;
#[cfg(feature = "server")]
pub use opcua_server as server;
