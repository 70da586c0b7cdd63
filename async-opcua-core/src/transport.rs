//! The transport-channel abstraction the client session sits on top of.
//!
//! Secure-channel framing, chunking, and TLS/PKI are an external
//! collaborator's concern. This only defines the narrow contract the
//! session needs above that layer -- connect once, then
//! `request(req) -> Future<response>` with per-request cancellation, plus
//! a status stream reporting connection lifecycle events. A real embedding
//! application backs this with an `opc.tcp://` secure channel; a test or
//! an in-process server backs it with something simpler.

use async_trait::async_trait;
use opcua_types::error::EncodingResult;
use opcua_types::services::{RequestMessage, ResponseMessage};
use opcua_types::status_code::StatusCode;

/// A connection lifecycle event, emitted on a transport channel's status
/// stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// A connection (or reconnection) has been established.
    Connected,
    /// The connection has dropped, carrying the reason.
    Disconnected(StatusCode),
    /// The underlying secure channel was renewed (e.g. token refresh) --
    /// the connection is still logically the same session but the client
    /// subscription reconciler should treat this like a reconnect for the
    /// purpose of re-issuing `CreateSubscription`/commit.
    Renewed,
}

/// Opens a connection to a peer and exposes an async request/response
/// interface plus connection status notifications. One instance serves
/// one logical session.
#[async_trait]
pub trait TransportChannel: Send + Sync {
    /// Open the connection. Idempotent: calling this again while already
    /// connected returns `Ok` without reopening.
    async fn connect(&self, url: &str) -> EncodingResult<()>;

    /// Send `req` and await the matching response. Responses are always
    /// matched to their caller's completion sink exactly once; a response
    /// is never delivered to the wrong caller and never delivered twice.
    ///
    /// If the transport reports failure (disconnect, encode/decode error)
    /// before a response arrives, this returns `Err` with the status the
    /// channel reported; it never panics in the caller's thread.
    async fn request(&self, req: RequestMessage) -> Result<ResponseMessage, StatusCode>;

    /// Tear down the connection. Any requests still awaiting a response
    /// are woken with an error; pending application-level state (e.g.
    /// Publish requests parked at the session) is the caller's concern,
    /// not the transport's.
    async fn disconnect(&self);
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_double {
    //! An in-memory [`TransportChannel`] that dispatches directly to a
    //! caller-supplied handler, with no actual networking. Used by this
    //! workspace's own tests and by embedders who want to exercise the
    //! session/subscription engine without a live `opc.tcp://` peer.

    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// A handler invoked for every request sent over a [`FakeTransport`].
    pub type Handler =
        Box<dyn Fn(RequestMessage) -> Result<ResponseMessage, StatusCode> + Send + Sync>;

    /// An in-process fake transport, routing every `request()` call
    /// synchronously through a handler closure.
    pub struct FakeTransport {
        handler: Mutex<Handler>,
        connected: std::sync::atomic::AtomicBool,
    }

    impl FakeTransport {
        /// Build a fake transport backed by `handler`.
        pub fn new(handler: Handler) -> Arc<Self> {
            Arc::new(Self {
                handler: Mutex::new(handler),
                connected: std::sync::atomic::AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl TransportChannel for FakeTransport {
        async fn connect(&self, _url: &str) -> EncodingResult<()> {
            self.connected
                .store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        async fn request(&self, req: RequestMessage) -> Result<ResponseMessage, StatusCode> {
            if !self.connected.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StatusCode::BadNoSubscription);
            }
            let handler = self.handler.lock().await;
            (handler)(req)
        }

        async fn disconnect(&self) {
            self.connected
                .store(false, std::sync::atomic::Ordering::SeqCst);
        }
    }
}
