//! [`MonitoredItemMap`]: the read-only view of a subscription's current
//! item set handed to [`OnSubscriptionNotificationCore`] callbacks so they
//! can look a notification's `client_handle` up against the item it
//! belongs to.
//!
//! [`OnSubscriptionNotificationCore`]: crate::session::callbacks::OnSubscriptionNotificationCore

use std::collections::HashMap;

use crate::session::subscription::MonitoredItem;

/// A borrowed view of a subscription's monitored items, keyed by client
/// handle. Handed to notification callbacks for the duration of one
/// dispatch call; not retained past it.
pub struct MonitoredItemMap<'a> {
    items: &'a HashMap<u32, MonitoredItem>,
}

impl<'a> MonitoredItemMap<'a> {
    pub(crate) fn new(items: &'a HashMap<u32, MonitoredItem>) -> Self {
        Self { items }
    }

    /// Look up the monitored item owning `client_handle`, if any is
    /// currently tracked.
    pub fn get(&self, client_handle: u32) -> Option<&MonitoredItem> {
        self.items.get(&client_handle)
    }
}
