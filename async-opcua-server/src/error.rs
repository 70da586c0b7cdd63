use opcua_types::status_code::StatusCode;

/// Internal error type for the server subscription/session engine.
///
/// Every variant converts into a [`StatusCode`] at the point it crosses a
/// service boundary; nothing in this crate panics on malformed input or a
/// caller's misuse of a handle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The authentication token in a request header names no session.
    #[error("no session for the given authentication token")]
    SessionNotFound,
    /// The session exists but has been closed.
    #[error("session is closed")]
    SessionClosed,
    /// The subscription id in a request names no subscription on the
    /// session it was sent to.
    #[error("no such subscription: {0}")]
    SubscriptionNotFound(u32),
    /// The monitored item id in a `DeleteMonitoredItems` request names no
    /// item on the given subscription.
    #[error("no such monitored item: {0}")]
    MonitoredItemNotFound(u32),
    /// A completion sink (the one-shot channel a pending Publish request
    /// waits on) was dropped before a response could be delivered -- the
    /// caller went away, not a protocol error.
    #[error("publish completion sink dropped before a response was produced")]
    CompletionDropped,
    /// `CreateSession` was rejected because the registry is at its
    /// configured session limit.
    #[error("too many sessions")]
    TooManySessions,
    /// `CreateSession` named an endpoint URL this registry doesn't serve.
    #[error("no such endpoint: {0}")]
    UnknownEndpoint(String),
    /// A `ReadValueId` named an attribute id this workspace doesn't model
    /// (only `Value` and `EventNotifier` are supported).
    #[error("unsupported attribute id: {0}")]
    UnsupportedAttribute(u32),
    /// `CreateSubscription` was rejected because the session is already at
    /// its configured per-session subscription limit.
    #[error("too many subscriptions on this session")]
    TooManySubscriptions,
}

/// Result type used throughout this crate.
pub type ServerResult<T> = Result<T, Error>;

impl From<&Error> for StatusCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::SessionNotFound | Error::SessionClosed => StatusCode::BadSessionIdInvalid,
            Error::SubscriptionNotFound(_) => StatusCode::BadSubscriptionIdInvalid,
            Error::MonitoredItemNotFound(_) => StatusCode::BadMonitoredItemIdInvalid,
            Error::CompletionDropped => StatusCode::BadUnexpectedError,
            Error::TooManySessions => StatusCode::BadTooManySessions,
            Error::UnknownEndpoint(_) => StatusCode::BadTcpEndpointUrlInvalid,
            Error::UnsupportedAttribute(_) => StatusCode::BadAttributeIdInvalid,
            Error::TooManySubscriptions => StatusCode::BadTooManySubscriptions,
        }
    }
}

impl From<Error> for StatusCode {
    fn from(e: Error) -> Self {
        StatusCode::from(&e)
    }
}
