//! The per-subscription publish engine: queues notifications, enforces
//! keep-alive and lifetime counters, sequences published messages.
//!
//! Follows the classic `SubscriptionState` transition logic (OPC UA Part 4
//! 5.13.1.2) but only exposes two externally-visible states
//! (`Active`/`Closed`); the `Creating`/`Late`/`KeepAlive` transitions stay
//! internal to [`Subscription::on_publishing_tick`]/[`Subscription::publish`].
//! Deliberately synchronous and free of I/O so it is unit-testable without
//! a runtime -- the owning [`super::cache::SubscriptionCache`] supplies the
//! timer.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;

use chrono::Utc;
use opcua_types::notification_message::NotificationMessage;
use opcua_types::services::AttributeKind;
use opcua_types::status_code::StatusCode;
use opcua_types::ExtensionObject;

/// A monitored item attached to a subscription: identity and metadata only.
/// The sink that feeds this item's notifications into the subscription's
/// queue is owned by [`super::cache::SubscriptionCache`], not here --
/// `Subscription` itself never calls into application code.
#[derive(Debug, Clone)]
pub struct MonitoredItem {
    /// Client-chosen opaque handle disambiguating this item in
    /// notifications.
    pub client_handle: u32,
    /// Which attribute this item observes.
    pub attribute_kind: AttributeKind,
    /// The event filter, for `EventNotifier` items. Opaque to this crate.
    pub event_filter: Option<ExtensionObject>,
}

/// The two externally-visible states of a subscription.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Accepting notifications, publishing according to its interval.
    Active,
    /// Rejects all further operations; in-flight timers have been
    /// cancelled.
    Closed,
}

/// What a publishing tick asks the owner to do next.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to do; keep ticking.
    Idle,
    /// The subscription has at least a keep-alive ready; the owner should
    /// invoke the session's publish handler so a pending Publish request
    /// (if any) can be satisfied.
    ShouldPublish,
    /// `max_lifetime_count` was exceeded on this tick; the subscription is
    /// now closed and the owner should notify the session.
    Closed,
}

/// A built notification message plus the publish-response metadata that
/// accompanies it. Handed back to the session dispatcher by
/// [`Subscription::publish`] instead of mutating a response object in
/// place.
#[derive(Debug, Clone)]
pub struct PublishResult {
    /// The subscription that produced this message.
    pub subscription_id: u32,
    /// Sequence numbers retained (unacknowledged) by this subscription at
    /// the moment this message was built.
    pub available_sequence_numbers: Vec<u32>,
    /// The message itself.
    pub notification_message: NotificationMessage,
    /// Whether the notification FIFO still had payloads left over after
    /// this message was chunked out of it.
    pub more_notifications: bool,
}

/// Construction parameters for a new subscription, mirroring
/// `CreateSubscriptionRequest`'s fields (after revision).
#[derive(Debug, Clone)]
pub struct SubscriptionParams {
    /// Publishing interval in milliseconds. Under 10ms puts the
    /// subscription in "instant publish" mode (see module docs).
    pub publishing_interval_ms: f64,
    /// Lifetime count reset value, in publishing intervals.
    pub max_lifetime_count: u32,
    /// Keep-alive count reset value, in publishing intervals.
    pub max_keep_alive_count: u32,
    /// Chunking cap on notifications drained into one published message.
    /// `0` means unlimited.
    pub max_notifications_per_publish: u32,
    /// Relative priority among a session's subscriptions.
    pub priority: u8,
    /// Whether publishing starts enabled.
    pub publishing_enabled: bool,
}

/// A server-side subscription: the publish engine described in full at the
/// module level. Owns its monitored items, its queue of not-yet-published
/// notification payloads, and the retained (unacknowledged) messages map.
#[derive(Debug)]
pub struct Subscription {
    subscription_id: u32,
    params: SubscriptionParams,
    state: SubscriptionState,
    notification_fifo: VecDeque<ExtensionObject>,
    retained_messages: BTreeMap<u32, NotificationMessage>,
    next_sequence_number: u32,
    keep_alive_count: u32,
    lifetime_count: u32,
    monitored_items: HashMap<u32, MonitoredItem>,
    next_monitored_item_id: u32,
}

/// A publishing interval below this many milliseconds puts the
/// subscription in "instant publish" mode: every enqueued notification
/// triggers an immediate publish attempt instead of waiting for a
/// periodic timer.
pub const INSTANT_PUBLISH_THRESHOLD_MS: f64 = 10.0;

impl Subscription {
    /// Create a new, active subscription. Sequence numbers start at 1.
    pub fn new(subscription_id: u32, params: SubscriptionParams) -> Self {
        Self {
            subscription_id,
            params,
            state: SubscriptionState::Active,
            notification_fifo: VecDeque::new(),
            retained_messages: BTreeMap::new(),
            next_sequence_number: 1,
            keep_alive_count: 0,
            lifetime_count: 0,
            monitored_items: HashMap::new(),
            next_monitored_item_id: 1,
        }
    }

    /// This subscription's id.
    pub fn subscription_id(&self) -> u32 {
        self.subscription_id
    }

    /// Current state.
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Whether this subscription publishes on every enqueue rather than on
    /// a periodic timer.
    pub fn is_instant_mode(&self) -> bool {
        self.params.publishing_interval_ms < INSTANT_PUBLISH_THRESHOLD_MS
    }

    /// Whether publishing is currently enabled.
    pub fn publishing_enabled(&self) -> bool {
        self.params.publishing_enabled
    }

    /// Enable or disable publishing.
    pub fn set_publishing_enabled(&mut self, enabled: bool) {
        self.params.publishing_enabled = enabled;
    }

    fn next_sequence_number(&mut self) -> u32 {
        let seq = self.next_sequence_number;
        self.next_sequence_number = if seq == u32::MAX { 1 } else { seq + 1 };
        seq
    }

    /// Drive one publishing-interval tick. Pure and synchronous: the
    /// periodic timer lives in [`super::cache::SubscriptionCache`], this
    /// method only updates counters and reports what the owner should do.
    pub fn on_publishing_tick(&mut self) -> TickOutcome {
        if self.state == SubscriptionState::Closed {
            return TickOutcome::Closed;
        }
        self.lifetime_count += 1;
        if self.lifetime_count > self.params.max_lifetime_count {
            self.close();
            return TickOutcome::Closed;
        }
        if self.params.publishing_enabled && !self.notification_fifo.is_empty() {
            return TickOutcome::ShouldPublish;
        }
        self.keep_alive_count += 1;
        if self.keep_alive_count >= self.params.max_keep_alive_count {
            TickOutcome::ShouldPublish
        } else {
            TickOutcome::Idle
        }
    }

    /// Attempt to build a publishable message. Returns `None` if this
    /// subscription is closed or has nothing to publish right now (no
    /// queued notification and no keep-alive due).
    pub fn publish(&mut self) -> Option<PublishResult> {
        if self.state == SubscriptionState::Closed {
            return None;
        }
        self.lifetime_count = 0;

        let message = if !self.notification_fifo.is_empty() {
            let limit = if self.params.max_notifications_per_publish == 0 {
                usize::MAX
            } else {
                self.params.max_notifications_per_publish as usize
            };
            let mut payloads = Vec::new();
            while payloads.len() < limit {
                match self.notification_fifo.pop_front() {
                    Some(p) => payloads.push(p),
                    None => break,
                }
            }
            let seq = self.next_sequence_number();
            NotificationMessage {
                sequence_number: seq,
                publish_time: Utc::now(),
                notification_data: Some(payloads),
            }
        } else if self.is_instant_mode() || self.keep_alive_count >= self.params.max_keep_alive_count {
            self.keep_alive_count = 0;
            let seq = self.next_sequence_number();
            NotificationMessage::keep_alive(seq, Utc::now())
        } else {
            return None;
        };

        let available_sequence_numbers = self.retained_messages.keys().copied().collect();
        let more_notifications = !self.notification_fifo.is_empty();
        let result = PublishResult {
            subscription_id: self.subscription_id,
            available_sequence_numbers,
            notification_message: message.clone(),
            more_notifications,
        };
        self.retained_messages.insert(message.sequence_number, message);
        Some(result)
    }

    /// Acknowledge a previously-published sequence number: removes it from
    /// the retained map and resets the lifetime counter (receiving any
    /// Publish is client activity). Returns whether a message was actually
    /// removed; `false` means the sequence number was unknown.
    pub fn acknowledge(&mut self, sequence_number: u32) -> bool {
        self.lifetime_count = 0;
        self.retained_messages.remove(&sequence_number).is_some()
    }

    /// Allocate a new monitored item id and store its metadata. Returns
    /// the assigned id.
    pub fn create_monitored_item(
        &mut self,
        client_handle: u32,
        attribute_kind: AttributeKind,
        event_filter: Option<ExtensionObject>,
    ) -> u32 {
        let id = self.next_monitored_item_id;
        self.next_monitored_item_id += 1;
        self.monitored_items.insert(
            id,
            MonitoredItem {
                client_handle,
                attribute_kind,
                event_filter,
            },
        );
        id
    }

    /// Look up a monitored item by id.
    pub fn monitored_item(&self, id: u32) -> Option<&MonitoredItem> {
        self.monitored_items.get(&id)
    }

    /// Number of monitored items currently attached.
    pub fn monitored_item_count(&self) -> usize {
        self.monitored_items.len()
    }

    /// Remove a monitored item by id.
    pub fn delete_monitored_item(&mut self, id: u32) -> StatusCode {
        if self.monitored_items.remove(&id).is_some() {
            StatusCode::Good
        } else {
            StatusCode::BadMonitoredItemIdInvalid
        }
    }

    /// Queue a notification payload (a `DataChangeNotification` or
    /// `EventNotificationList`, already wrapped as an extension object).
    /// Returns `true` if this subscription is in instant mode, signalling
    /// the caller to immediately invoke the session's publish handler.
    pub fn enqueue(&mut self, payload: ExtensionObject) -> bool {
        if self.state == SubscriptionState::Closed {
            return false;
        }
        self.notification_fifo.push_back(payload);
        self.is_instant_mode()
    }

    /// Close the subscription. Idempotent: a second call on an already-closed
    /// subscription is a no-op, which is what lets this be called safely
    /// from inside a publishing-tick callback that might re-enter close
    /// (e.g. via a session shutdown triggered by the same tick).
    pub fn close(&mut self) {
        if self.state == SubscriptionState::Closed {
            return;
        }
        self.state = SubscriptionState::Closed;
        self.notification_fifo.clear();
        self.retained_messages.clear();
        self.monitored_items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SubscriptionParams {
        SubscriptionParams {
            publishing_interval_ms: 100.0,
            max_lifetime_count: 3,
            max_keep_alive_count: 3,
            max_notifications_per_publish: 0,
            priority: 0,
            publishing_enabled: true,
        }
    }

    fn data_change_payload() -> ExtensionObject {
        ExtensionObject::from_message(opcua_types::DataChangeNotification {
            monitored_items: Some(vec![opcua_types::MonitoredItemNotification {
                client_handle: 1,
                value: opcua_types::DataValue::new_now(opcua_types::Variant::Int32(1)),
            }]),
            diagnostic_infos: None,
        })
    }

    #[test]
    fn scenario_a_lifetime_expiry_closes_subscription() {
        let mut sub = Subscription::new(1, params());
        assert_eq!(sub.on_publishing_tick(), TickOutcome::Idle);
        assert_eq!(sub.on_publishing_tick(), TickOutcome::Idle);
        // third tick: keep_alive reaches 3 -> ShouldPublish, not yet closed
        assert_eq!(sub.on_publishing_tick(), TickOutcome::ShouldPublish);
        // fourth tick: lifetime_count now exceeds max_lifetime_count (3)
        assert_eq!(sub.on_publishing_tick(), TickOutcome::Closed);
        assert_eq!(sub.state(), SubscriptionState::Closed);
        assert!(sub.publish().is_none());
    }

    #[test]
    fn scenario_b_keep_alive_emitted_on_third_tick() {
        let mut p = params();
        p.max_keep_alive_count = 3;
        let mut sub = Subscription::new(1, p);
        assert_eq!(sub.on_publishing_tick(), TickOutcome::Idle);
        assert_eq!(sub.on_publishing_tick(), TickOutcome::Idle);
        assert_eq!(sub.on_publishing_tick(), TickOutcome::ShouldPublish);
        let result = sub.publish().expect("keep-alive should be built");
        assert!(result.notification_message.is_keep_alive());
        assert_eq!(result.notification_message.sequence_number, 1);
    }

    #[test]
    fn scenario_c_sequence_wraps_from_max_to_one() {
        let mut sub = Subscription::new(1, params());
        // Force next_sequence_number to u32::MAX via repeated publish of keep-alives.
        sub.next_sequence_number = u32::MAX;
        sub.keep_alive_count = sub.params.max_keep_alive_count;
        let first = sub.publish().unwrap();
        assert_eq!(first.notification_message.sequence_number, u32::MAX);
        sub.keep_alive_count = sub.params.max_keep_alive_count;
        let second = sub.publish().unwrap();
        assert_eq!(second.notification_message.sequence_number, 1);
    }

    #[test]
    fn scenario_d_ack_of_unknown_sequence_returns_false() {
        let mut sub = Subscription::new(42, params());
        assert!(!sub.acknowledge(9999));
    }

    #[test]
    fn acknowledge_removes_retained_message() {
        let mut sub = Subscription::new(1, params());
        sub.enqueue(data_change_payload());
        let result = sub.publish().unwrap();
        let seq = result.notification_message.sequence_number;
        assert!(sub.acknowledge(seq));
        assert!(!sub.acknowledge(seq));
    }

    #[test]
    fn instant_mode_enqueue_signals_immediate_publish() {
        let mut p = params();
        p.publishing_interval_ms = 0.0;
        let mut sub = Subscription::new(1, p);
        assert!(sub.is_instant_mode());
        assert!(sub.enqueue(data_change_payload()));
        let result = sub.publish().unwrap();
        assert!(!result.notification_message.is_keep_alive());
    }

    #[test]
    fn publish_chunks_to_max_notifications_per_publish() {
        let mut p = params();
        p.max_notifications_per_publish = 1;
        let mut sub = Subscription::new(1, p);
        sub.enqueue(data_change_payload());
        sub.enqueue(data_change_payload());
        let result = sub.publish().unwrap();
        assert!(result.more_notifications);
        assert_eq!(result.notification_message.notification_data.unwrap().len(), 1);
    }

    #[test]
    fn delete_unknown_monitored_item_is_bad_invalid() {
        let mut sub = Subscription::new(1, params());
        assert_eq!(
            sub.delete_monitored_item(999),
            StatusCode::BadMonitoredItemIdInvalid
        );
    }

    #[test]
    fn close_is_idempotent() {
        let mut sub = Subscription::new(1, params());
        sub.enqueue(data_change_payload());
        sub.close();
        sub.close();
        assert_eq!(sub.state(), SubscriptionState::Closed);
        assert!(sub.publish().is_none());
    }
}
