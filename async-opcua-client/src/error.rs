use opcua_types::status_code::StatusCode;

/// Internal error type for the client session/subscription reconciler.
///
/// Every variant converts into a [`StatusCode`] at the point it crosses an
/// application-facing boundary; nothing in this crate panics on a transport
/// failure or a caller's misuse of a handle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A request was attempted while the transport has never connected.
    #[error("not connected")]
    NotConnected,
    /// The transport reported a failure in place of a response.
    #[error("request failed: {0}")]
    RequestFailed(StatusCode),
    /// A `client_handle` named no monitored item on this subscription.
    #[error("no such monitored item: {0}")]
    MonitoredItemNotFound(u32),
    /// An operation was attempted on a subscription that has been closed.
    #[error("subscription is closed")]
    Closed,
    /// The transport returned a response of the wrong variant for the
    /// request that was sent.
    #[error("unexpected response type")]
    UnexpectedResponse,
}

/// Result type used throughout this crate.
pub type ClientResult<T> = Result<T, Error>;

impl From<&Error> for StatusCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::NotConnected => StatusCode::BadNotConnected,
            Error::RequestFailed(s) => *s,
            Error::MonitoredItemNotFound(_) => StatusCode::BadMonitoredItemIdInvalid,
            Error::Closed => StatusCode::BadNoSubscription,
            Error::UnexpectedResponse => StatusCode::BadUnexpectedError,
        }
    }
}

impl From<Error> for StatusCode {
    fn from(e: Error) -> Self {
        StatusCode::from(&e)
    }
}
