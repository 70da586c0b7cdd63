//! Read-only views handed to notification callbacks.

pub mod subscriptions;
