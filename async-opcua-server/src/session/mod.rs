//! The per-session publish dispatcher: a FIFO of pending `Publish` requests,
//! satisfied by iterating the session's subscriptions in numeric id order,
//! plus a 1Hz sweep that times out requests that waited too long.
//!
//! One long-lived registry ([`super::manager::SessionManager`]), one
//! `Session` object per active session. A subscription's own lock is never
//! held while invoking application callbacks or completing a client's
//! request.

pub mod manager;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use opcua_core::sync::Mutex;
use opcua_types::node_id::NodeId;
use opcua_types::services::{
    AttributeKind, DataChangeNotification, EventFieldList, EventNotificationList,
    MonitoredItemCreateRequest, MonitoredItemCreateResult, PublishRequest, PublishResponse,
    ResponseHeader,
};
use opcua_types::status_code::StatusCode;
use opcua_types::variant::Variant;
use opcua_types::ExtensionObject;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{Error, ServerResult};
use crate::handlers::{
    SubscriptionHandlers, EVENT_NOTIFIER_ATTRIBUTE_ID, VALUE_ATTRIBUTE_ID,
};
use crate::subscriptions::{SubscriptionCache, SubscriptionParams};

/// How often the timeout sweep runs.
const TIMEOUT_SWEEP_PERIOD: Duration = Duration::from_secs(1);

struct PendingPublish {
    start: Instant,
    timeout_hint_ms: u32,
    /// The response under construction: acknowledgement results are filled
    /// in at enqueue time, everything else once a subscription satisfies
    /// this request.
    response: PublishResponse,
    completion: oneshot::Sender<PublishResponse>,
}

fn bad_monitored_item_result(status_code: StatusCode) -> MonitoredItemCreateResult {
    MonitoredItemCreateResult {
        status_code,
        monitored_item_id: 0,
        revised_sampling_interval: 0.0,
        revised_queue_size: 0,
        filter_result: None,
    }
}

/// One active OPC UA session: its subscriptions and the FIFO of `Publish`
/// requests waiting to be satisfied by them.
///
/// Always held behind an `Arc`, constructed via [`Session::new`] so the
/// subscription cache's publish/close callbacks can hold a weak
/// back-reference without creating a cycle.
pub struct Session {
    session_id: NodeId,
    authentication_token: NodeId,
    subscriptions: SubscriptionCache,
    pending: Mutex<VecDeque<PendingPublish>>,
    closed: AtomicBool,
    timeout_timer: Mutex<Option<JoinHandle<()>>>,
    handlers: Arc<dyn SubscriptionHandlers>,
    max_monitored_items_per_subscription: usize,
}

impl Session {
    /// Construct a new, open session and spawn its 1Hz Publish-timeout
    /// sweep.
    pub fn new(
        session_id: NodeId,
        authentication_token: NodeId,
        handlers: Arc<dyn SubscriptionHandlers>,
        max_monitored_items_per_subscription: usize,
    ) -> Arc<Self> {
        let session = Arc::new_cyclic(|weak: &Weak<Session>| {
            let publish_weak = weak.clone();
            let closed_weak = weak.clone();
            let subscriptions = SubscriptionCache::new(
                Arc::new(move |_subscription_id: u32| {
                    if let Some(session) = publish_weak.upgrade() {
                        session.run_publish_loop();
                    }
                }),
                Arc::new(move |subscription_id: u32| {
                    if let Some(session) = closed_weak.upgrade() {
                        session.subscriptions.remove(subscription_id);
                    }
                }),
            );
            Session {
                session_id,
                authentication_token,
                subscriptions,
                pending: Mutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
                timeout_timer: Mutex::new(None),
                handlers,
                max_monitored_items_per_subscription,
            }
        });
        session.clone().spawn_timeout_sweep();
        session
    }

    /// This session's id.
    pub fn session_id(&self) -> &NodeId {
        &self.session_id
    }

    /// The authentication token naming this session.
    pub fn authentication_token(&self) -> &NodeId {
        &self.authentication_token
    }

    /// Number of subscriptions currently attached.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn spawn_timeout_sweep(self: Arc<Self>) {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TIMEOUT_SWEEP_PERIOD);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if self.closed.load(Ordering::SeqCst) {
                    break;
                }
                self.run_timeout_sweep();
            }
        });
        *self.timeout_timer.lock() = Some(handle);
    }

    /// Enqueue a `Publish` request. Returns the receiver the caller awaits
    /// for the eventual response, or an error if the session is already
    /// closed.
    pub fn publish(&self, request: PublishRequest) -> ServerResult<oneshot::Receiver<PublishResponse>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        let request_handle = request.request_header.request_handle;
        let mut results = Vec::with_capacity(request.subscription_acknowledgements.len());
        for ack in &request.subscription_acknowledgements {
            let result = match self
                .subscriptions
                .acknowledge(ack.subscription_id, ack.sequence_number)
            {
                Ok(true) => StatusCode::Good,
                Ok(false) => StatusCode::BadSequenceNumberUnknown,
                Err(_) => StatusCode::BadSubscriptionIdInvalid,
            };
            results.push(result);
        }
        let (tx, rx) = oneshot::channel();
        let entry = PendingPublish {
            start: Instant::now(),
            timeout_hint_ms: request.request_header.timeout_hint,
            response: PublishResponse {
                response_header: ResponseHeader::new_good(request_handle),
                subscription_id: 0,
                available_sequence_numbers: Vec::new(),
                more_notifications: false,
                notification_message: None,
                results,
            },
            completion: tx,
        };
        self.pending.lock().push_back(entry);
        self.run_publish_loop();
        Ok(rx)
    }

    /// Satisfy as many pending Publish requests as the current subscription
    /// state allows. Iterates subscriptions in numeric id order (via
    /// [`SubscriptionCache::try_publish_any`]) once per FIFO head; stops as
    /// soon as a head goes unsatisfied.
    fn run_publish_loop(&self) {
        let mut completed = Vec::new();
        loop {
            let has_pending = !self.pending.lock().is_empty();
            if !has_pending {
                break;
            }
            match self.subscriptions.try_publish_any() {
                Some(result) => {
                    let mut pending = self.pending.lock();
                    let Some(mut entry) = pending.pop_front() else {
                        break;
                    };
                    drop(pending);
                    entry.response.subscription_id = result.subscription_id;
                    entry.response.available_sequence_numbers = result.available_sequence_numbers;
                    entry.response.more_notifications = result.more_notifications;
                    entry.response.notification_message = Some(result.notification_message);
                    completed.push((entry.completion, entry.response));
                }
                None => break,
            }
        }
        for (sink, response) in completed {
            let _ = sink.send(response);
        }
    }

    /// Scan the pending FIFO tail-to-head, failing any request whose
    /// timeout hint has elapsed. Scanning from the tail means removing an
    /// expired entry never shifts the index of an entry not yet examined.
    fn run_timeout_sweep(&self) {
        let now = Instant::now();
        let mut completed = Vec::new();
        {
            let mut pending = self.pending.lock();
            let mut idx = pending.len();
            while idx > 0 {
                idx -= 1;
                let expired = {
                    let entry = &pending[idx];
                    entry.timeout_hint_ms != 0
                        && now.duration_since(entry.start).as_millis() as u64
                            >= entry.timeout_hint_ms as u64
                };
                if expired {
                    if let Some(mut entry) = pending.remove(idx) {
                        entry.response.response_header.service_result = StatusCode::BadTimeout;
                        completed.push((entry.completion, entry.response));
                    }
                }
            }
        }
        for (sink, response) in completed {
            let _ = sink.send(response);
        }
    }

    /// `CreateSubscription`: assigns a new subscription id and attaches it.
    pub fn create_subscription(&self, subscription_id: u32, params: SubscriptionParams) {
        self.subscriptions.create_subscription(subscription_id, params);
    }

    /// `DeleteSubscriptions`: removes each named subscription (closing it)
    /// before reporting per-id results.
    pub fn delete_subscriptions(&self, subscription_ids: &[u32]) -> Vec<StatusCode> {
        subscription_ids
            .iter()
            .map(|&id| {
                if self.subscriptions.contains(id) {
                    self.subscriptions.remove(id);
                    StatusCode::Good
                } else {
                    StatusCode::BadSubscriptionIdInvalid
                }
            })
            .collect()
    }

    /// `CreateMonitoredItems`: validates each item's attribute, asks the
    /// embedding application to activate monitoring, and -- on success --
    /// registers the item with its subscription and wires its delivery
    /// sink.
    pub fn create_monitored_items(
        self: &Arc<Self>,
        subscription_id: u32,
        items: Vec<MonitoredItemCreateRequest>,
    ) -> ServerResult<Vec<MonitoredItemCreateResult>> {
        if !self.subscriptions.contains(subscription_id) {
            return Err(Error::SubscriptionNotFound(subscription_id));
        }
        let mut item_count = self
            .subscriptions
            .with_subscription(subscription_id, |sub| sub.monitored_item_count())?;
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            if item_count >= self.max_monitored_items_per_subscription {
                results.push(bad_monitored_item_result(StatusCode::BadTooManyMonitoredItems));
                continue;
            }
            let attribute_kind = match item.item_to_monitor.attribute_id {
                VALUE_ATTRIBUTE_ID => AttributeKind::Value,
                EVENT_NOTIFIER_ATTRIBUTE_ID => AttributeKind::EventNotifier,
                other => {
                    let _ = other;
                    results.push(bad_monitored_item_result(StatusCode::BadAttributeIdInvalid));
                    continue;
                }
            };
            let (status, handle) = self.handlers.create_monitored_item(
                &item.item_to_monitor,
                attribute_kind,
                &item.requested_parameters,
            );
            if !status.is_good() {
                results.push(bad_monitored_item_result(status));
                continue;
            }
            let client_handle = item.requested_parameters.client_handle;
            let filter = item.requested_parameters.filter.clone();
            let item_id = self.subscriptions.with_subscription(subscription_id, |sub| {
                sub.create_monitored_item(client_handle, attribute_kind, filter)
            })?;
            item_count += 1;
            if let Some(handle) = handle {
                self.wire_monitored_item_sink(subscription_id, attribute_kind, client_handle, handle);
            }
            results.push(MonitoredItemCreateResult {
                status_code: StatusCode::Good,
                monitored_item_id: item_id,
                revised_sampling_interval: item.requested_parameters.sampling_interval,
                revised_queue_size: item.requested_parameters.queue_size,
                filter_result: None,
            });
        }
        Ok(results)
    }

    /// `DeleteMonitoredItems`.
    pub fn delete_monitored_items(
        &self,
        subscription_id: u32,
        monitored_item_ids: &[u32],
    ) -> ServerResult<Vec<StatusCode>> {
        self.subscriptions.with_subscription(subscription_id, |sub| {
            monitored_item_ids
                .iter()
                .map(|&id| sub.delete_monitored_item(id))
                .collect()
        })
    }

    /// Register the delivery sink that turns one monitored item's live
    /// values or events into a queued notification payload. Holds only a
    /// weak-free strong `Arc<Session>` clone inside the closure: the sink
    /// may legitimately outlive the request that created it, for as long as
    /// the session itself is alive.
    fn wire_monitored_item_sink(
        self: &Arc<Self>,
        subscription_id: u32,
        attribute_kind: AttributeKind,
        client_handle: u32,
        handle: Arc<dyn crate::handlers::MonitoredItemHandle>,
    ) {
        match attribute_kind {
            AttributeKind::Value => {
                let session = Arc::clone(self);
                handle.subscribe_data_change(Box::new(move |value| {
                    let notification = DataChangeNotification {
                        monitored_items: Some(vec![opcua_types::MonitoredItemNotification {
                            client_handle,
                            value,
                        }]),
                        diagnostic_infos: None,
                    };
                    let _ = session
                        .subscriptions
                        .enqueue(subscription_id, ExtensionObject::from_message(notification));
                }));
            }
            AttributeKind::EventNotifier => {
                let session = Arc::clone(self);
                handle.subscribe_events(Box::new(move |fields: Vec<Option<Variant>>| {
                    let event_fields: Vec<Variant> = fields
                        .into_iter()
                        .map(|f| f.unwrap_or(Variant::Empty))
                        .collect();
                    let notification = EventNotificationList {
                        events: Some(vec![EventFieldList {
                            client_handle,
                            event_fields: Some(event_fields),
                        }]),
                    };
                    let _ = session
                        .subscriptions
                        .enqueue(subscription_id, ExtensionObject::from_message(notification));
                }));
            }
        }
    }

    /// Close the session: stops the timeout sweep, fails every pending
    /// Publish request with `BadNoSubscription`, and closes every
    /// subscription. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.timeout_timer.lock().take() {
            handle.abort();
        }
        let entries: Vec<PendingPublish> = self.pending.lock().drain(..).collect();
        for mut entry in entries {
            entry.response.response_header.service_result = StatusCode::BadNoSubscription;
            let _ = entry.completion.send(entry.response);
        }
        self.subscriptions.close_all();
    }
}
