//! Ambient limits the session registry and subscription engine enforce.
//!
//! A plain, `serde`-derived struct the embedder loads however it likes (a
//! YAML file, environment variables, a literal in `main.rs`); this only
//! holds the handful of limits the engine actually consults. File-loading
//! machinery belongs to the embedding application, not here.

use serde::{Deserialize, Serialize};

/// Limits applied to every subscription created on a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionLimits {
    /// Maximum number of subscriptions a single session may hold open at
    /// once.
    pub max_subscriptions_per_session: usize,
    /// Floor a requested publishing interval is clamped to, milliseconds.
    pub min_publishing_interval_ms: f64,
    /// Ceiling a requested publishing interval is clamped to, milliseconds.
    pub max_publishing_interval_ms: f64,
    /// Ceiling on notifications chunked into a single published message,
    /// applied on top of whatever the client requested.
    pub max_notifications_per_publish: u32,
    /// Maximum number of monitored items a single subscription may hold.
    pub max_monitored_items_per_subscription: usize,
}

impl Default for SubscriptionLimits {
    fn default() -> Self {
        Self {
            max_subscriptions_per_session: 100,
            min_publishing_interval_ms: 0.0,
            max_publishing_interval_ms: 60_000.0,
            max_notifications_per_publish: 1000,
            max_monitored_items_per_subscription: 10_000,
        }
    }
}

/// Ambient limits the session registry enforces, plus the subscription
/// limits handed to every session it creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerCapabilities {
    /// Maximum number of concurrently open sessions.
    pub max_sessions: usize,
    /// Ceiling a requested session timeout is clamped to, milliseconds.
    pub max_session_timeout_ms: f64,
    /// Limits applied to subscriptions created on any session this registry
    /// owns.
    pub subscriptions: SubscriptionLimits,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            max_session_timeout_ms: 120_000.0,
            subscriptions: SubscriptionLimits::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let caps = ServerCapabilities::default();
        assert!(caps.max_sessions > 0);
        assert!(
            caps.subscriptions.max_publishing_interval_ms
                > caps.subscriptions.min_publishing_interval_ms
        );
    }
}
