//! Status codes.
//!
//! A status code is a 32-bit value. The top two bits partition it into one
//! of three severities: `Good` (00), `Uncertain` (01), `Bad` (10/11). This
//! crate does not attempt to model the full OPC UA status code table; it
//! defines the subset that the subscription/session engine actually
//! produces or consumes, plus the generic severity check any caller needs.

/// A 32-bit tagged outcome in the `Good`/`Uncertain`/`Bad` partitions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(pub u32);

macro_rules! status_codes {
    ($($name:ident = $value:expr),* $(,)?) => {
        impl StatusCode {
            $(
                #[allow(missing_docs)]
                pub const $name: StatusCode = StatusCode($value);
            )*
        }
    };
}

status_codes! {
    Good = 0x0000_0000,
    Uncertain = 0x4000_0000,
    BadUnexpectedError = 0x8000_0000,
    BadInvalidArgument = 0x8020_0000,
    BadNotImplemented = 0x8010_0000,
    BadOutOfMemory = 0x8003_0000,
    BadTimeout = 0x800A_0000,
    BadNoSubscription = 0x8026_0000,
    BadSubscriptionIdInvalid = 0x8027_0000,
    BadMonitoredItemIdInvalid = 0x8042_0000,
    BadMonitoredItemFilterInvalid = 0x8043_0000,
    BadSequenceNumberUnknown = 0x8033_0000,
    BadSessionIdInvalid = 0x8006_0000,
    BadSessionNotActivated = 0x8007_0000,
    BadSessionClosed = 0x8008_0000,
    BadIdentityTokenInvalid = 0x8035_0000,
    BadDecodingError = 0x8007_0001,
    BadEncodingError = 0x8007_0002,
    BadEncodingLimitsExceeded = 0x8007_0003,
    BadRequestTimeout = 0x800A_0001,
    BadTooManyPublishRequests = 0x8068_0000,
    BadNothingToDo = 0x800F_0000,
    BadTooManySessions = 0x8019_0000,
    BadTooManySubscriptions = 0x8065_0000,
    BadTooManyMonitoredItems = 0x80DB_0000,
    BadTcpEndpointUrlInvalid = 0x800C_000B,
    BadAttributeIdInvalid = 0x8035_0001,
    BadNodeIdUnknown = 0x8033_0001,
    BadNotConnected = 0x80AD_0000,
}

impl StatusCode {
    /// The severity partition this code belongs to.
    pub fn severity(self) -> Severity {
        match self.0 >> 30 {
            0b00 => Severity::Good,
            0b01 => Severity::Uncertain,
            _ => Severity::Bad,
        }
    }

    /// Shorthand for `severity() == Severity::Good`.
    pub fn is_good(self) -> bool {
        self.severity() == Severity::Good
    }

    /// Shorthand for `severity() == Severity::Bad`.
    pub fn is_bad(self) -> bool {
        self.severity() == Severity::Bad
    }

    /// Shorthand for `severity() == Severity::Uncertain`.
    pub fn is_uncertain(self) -> bool {
        self.severity() == Severity::Uncertain
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        StatusCode::Good
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// The three severity partitions a [`StatusCode`] falls into.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Severity {
    /// High bits `00`.
    Good,
    /// High bits `01`.
    Uncertain,
    /// High bits `1x`.
    Bad,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_partitions() {
        assert!(StatusCode::Good.is_good());
        assert!(StatusCode::Uncertain.is_uncertain());
        assert!(StatusCode::BadTimeout.is_bad());
        assert!(StatusCode::BadNoSubscription.is_bad());
    }
}
