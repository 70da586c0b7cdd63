//! Owns the set of subscriptions belonging to one session: spawns the
//! periodic publishing-tick timer for each, and exposes the ordered
//! publish-loop lookup the session dispatcher needs.
//!
//! One lock per collection, `Arc<RwLock<HashMap<...>>>`, matching the
//! session-map idiom used throughout this crate.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use opcua_core::sync::Mutex;
use opcua_types::ExtensionObject;
use tokio::task::JoinHandle;

use super::subscription::{
    PublishResult, Subscription, SubscriptionParams, TickOutcome, INSTANT_PUBLISH_THRESHOLD_MS,
};
use crate::error::{Error, ServerResult};

/// Invoked when a subscription's tick (or an instant-mode enqueue)
/// produces something publishable. The session dispatcher uses this to
/// re-run its publish loop.
pub type PublishHandler = Arc<dyn Fn(u32) + Send + Sync>;
/// Invoked when a subscription closes itself (lifetime expiry).
pub type CloseHandler = Arc<dyn Fn(u32) + Send + Sync>;

struct Entry {
    subscription: Arc<Mutex<Subscription>>,
    timer: Option<JoinHandle<()>>,
}

impl Drop for Entry {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// The subscription set for one session.
pub struct SubscriptionCache {
    subscriptions: Mutex<BTreeMap<u32, Entry>>,
    on_publish: PublishHandler,
    on_closed: CloseHandler,
}

impl SubscriptionCache {
    /// Construct an empty cache. `on_publish` is called (off the session
    /// lock) with a subscription id whenever that subscription has
    /// something ready to publish; `on_closed` is called when a
    /// subscription closes itself via lifetime expiry.
    pub fn new(on_publish: PublishHandler, on_closed: CloseHandler) -> Self {
        Self {
            subscriptions: Mutex::new(BTreeMap::new()),
            on_publish,
            on_closed,
        }
    }

    /// Create a new subscription, spawning its publishing timer unless it
    /// runs in instant mode (which publishes synchronously from
    /// `enqueue` instead).
    pub fn create_subscription(&self, subscription_id: u32, params: SubscriptionParams) {
        let instant = params.publishing_interval_ms < INSTANT_PUBLISH_THRESHOLD_MS;
        let subscription = Arc::new(Mutex::new(Subscription::new(subscription_id, params.clone())));

        let timer = if instant {
            None
        } else {
            let interval_ms = params.publishing_interval_ms.max(1.0);
            let period = Duration::from_secs_f64(interval_ms / 1000.0);
            let sub = subscription.clone();
            let on_publish = self.on_publish.clone();
            let on_closed = self.on_closed.clone();
            Some(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    let outcome = sub.lock().on_publishing_tick();
                    match outcome {
                        TickOutcome::Idle => {}
                        TickOutcome::ShouldPublish => (on_publish)(subscription_id),
                        TickOutcome::Closed => {
                            (on_closed)(subscription_id);
                            break;
                        }
                    }
                }
            }))
        };

        self.subscriptions
            .lock()
            .insert(subscription_id, Entry { subscription, timer });
    }

    /// Whether a subscription with this id exists.
    pub fn contains(&self, subscription_id: u32) -> bool {
        self.subscriptions.lock().contains_key(&subscription_id)
    }

    /// Queue a notification payload on the given subscription. If the
    /// subscription is in instant mode, invokes the publish handler
    /// immediately (after releasing the subscription lock).
    pub fn enqueue(&self, subscription_id: u32, payload: ExtensionObject) -> ServerResult<()> {
        let subscription = {
            let map = self.subscriptions.lock();
            map.get(&subscription_id)
                .map(|e| e.subscription.clone())
                .ok_or(Error::SubscriptionNotFound(subscription_id))?
        };
        let should_publish_now = subscription.lock().enqueue(payload);
        if should_publish_now {
            (self.on_publish)(subscription_id);
        }
        Ok(())
    }

    /// Run `acknowledge` on the named subscription.
    pub fn acknowledge(&self, subscription_id: u32, sequence_number: u32) -> ServerResult<bool> {
        let subscription = {
            let map = self.subscriptions.lock();
            map.get(&subscription_id)
                .map(|e| e.subscription.clone())
                .ok_or(Error::SubscriptionNotFound(subscription_id))?
        };
        Ok(subscription.lock().acknowledge(sequence_number))
    }

    /// Attempt to publish from one named subscription.
    pub fn try_publish(&self, subscription_id: u32) -> ServerResult<Option<PublishResult>> {
        let subscription = {
            let map = self.subscriptions.lock();
            map.get(&subscription_id)
                .map(|e| e.subscription.clone())
                .ok_or(Error::SubscriptionNotFound(subscription_id))?
        };
        Ok(subscription.lock().publish())
    }

    /// Try each subscription in numeric id order, returning the first
    /// publishable message. This is the dispatcher's publish-loop
    /// primitive: the FIFO head is satisfied by whichever subscription
    /// (ordered lowest id first) has something ready.
    pub fn try_publish_any(&self) -> Option<PublishResult> {
        let handles: Vec<Arc<Mutex<Subscription>>> = self
            .subscriptions
            .lock()
            .values()
            .map(|e| e.subscription.clone())
            .collect();
        for handle in handles {
            if let Some(result) = handle.lock().publish() {
                return Some(result);
            }
        }
        None
    }

    /// Access a subscription for read-modify operations that don't fit
    /// the convenience methods above (monitored item create/delete).
    pub fn with_subscription<T>(
        &self,
        subscription_id: u32,
        f: impl FnOnce(&mut Subscription) -> T,
    ) -> ServerResult<T> {
        let subscription = {
            let map = self.subscriptions.lock();
            map.get(&subscription_id)
                .map(|e| e.subscription.clone())
                .ok_or(Error::SubscriptionNotFound(subscription_id))?
        };
        let mut guard = subscription.lock();
        Ok(f(&mut guard))
    }

    /// Close and remove one subscription. A no-op if the id is unknown.
    pub fn remove(&self, subscription_id: u32) {
        if let Some(entry) = self.subscriptions.lock().remove(&subscription_id) {
            entry.subscription.lock().close();
        }
    }

    /// Close and remove every subscription, returning their ids.
    pub fn close_all(&self) -> Vec<u32> {
        let entries: BTreeMap<u32, Entry> = std::mem::take(&mut *self.subscriptions.lock());
        let ids = entries.keys().copied().collect();
        for (_, entry) in entries {
            entry.subscription.lock().close();
        }
        ids
    }

    /// Number of subscriptions currently held.
    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Whether the cache holds no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn params() -> SubscriptionParams {
        SubscriptionParams {
            publishing_interval_ms: 0.0,
            max_lifetime_count: 10,
            max_keep_alive_count: 10,
            max_notifications_per_publish: 0,
            priority: 0,
            publishing_enabled: true,
        }
    }

    fn payload() -> ExtensionObject {
        ExtensionObject::from_message(opcua_types::DataChangeNotification {
            monitored_items: Some(vec![opcua_types::MonitoredItemNotification {
                client_handle: 1,
                value: opcua_types::DataValue::new_now(opcua_types::Variant::Int32(1)),
            }]),
            diagnostic_infos: None,
        })
    }

    #[tokio::test]
    async fn instant_mode_enqueue_invokes_publish_handler() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let cache = SubscriptionCache::new(
            Arc::new(move |_id| {
                calls2.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(|_id| {}),
        );
        cache.create_subscription(1, params());
        cache.enqueue(1, payload()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn try_publish_any_prefers_lowest_id() {
        let cache = SubscriptionCache::new(Arc::new(|_| {}), Arc::new(|_| {}));
        cache.create_subscription(5, params());
        cache.create_subscription(2, params());
        cache.enqueue(5, payload()).unwrap();
        cache.enqueue(2, payload()).unwrap();
        let result = cache.try_publish_any().unwrap();
        assert_eq!(result.subscription_id, 2);
    }

    #[tokio::test]
    async fn enqueue_unknown_subscription_is_error() {
        let cache = SubscriptionCache::new(Arc::new(|_| {}), Arc::new(|_| {}));
        assert!(cache.enqueue(99, payload()).is_err());
    }

    #[tokio::test]
    async fn remove_closes_and_drops_subscription() {
        let cache = SubscriptionCache::new(Arc::new(|_| {}), Arc::new(|_| {}));
        cache.create_subscription(1, params());
        cache.remove(1);
        assert!(!cache.contains(1));
    }
}
