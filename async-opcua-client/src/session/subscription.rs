//! The client-side subscription reconciler.
//!
//! A [`ClientSubscription`] is the client's view of one server-side
//! subscription: it tracks the monitored items the caller wants, reconciles
//! that want-list against the server by issuing `CreateMonitoredItems`/
//! `DeleteMonitoredItems` in the background, and dispatches incoming
//! notifications back to the caller's [`OnSubscriptionNotificationCore`].
//!
//! Every item is keyed purely by the client-chosen `client_handle: u32` --
//! there is no separate "monitored item object" the caller holds onto
//! beyond that handle, mirroring the notification wire format itself (which
//! names items only by `client_handle`). Reconciliation runs through four
//! queues:
//!
//! - `pending_subscribe` -- items the caller wants that haven't been sent
//!   to the server yet.
//! - `subscribing` -- items in flight in a `CreateMonitoredItems` call.
//! - `pending_unsubscribe` -- items the caller no longer wants, not yet
//!   sent to the server.
//! - `unsubscribing` -- items in flight in a `DeleteMonitoredItems` call.
//!
//! A `subscribe`/`unsubscribe` call only ever mutates the `pending_*`
//! queues; a single-flight `commit` swaps a `pending_*` queue into its
//! in-flight counterpart only when that counterpart is empty, so at most
//! one `CreateMonitoredItems` and one `DeleteMonitoredItems` call is ever
//! outstanding per subscription at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use opcua_core::handle::Handle;
use opcua_core::sync::Mutex;
use opcua_core::transport::TransportChannel;
use opcua_types::node_id::NodeId;
use opcua_types::notification_message::NotificationMessage;
use opcua_types::services::{
    AttributeKind, CreateMonitoredItemsRequest, DeleteMonitoredItemsRequest,
    MonitoredItemCreateRequest, MonitoringMode, MonitoringParameters, ReadValueId, RequestHeader,
    RequestMessage, TimestampsToReturn,
};
use opcua_types::status_code::StatusCode;
use opcua_types::{DataValue, MonitoredItemNotification};

use crate::error::{ClientResult, Error};
use crate::session::callbacks::OnSubscriptionNotificationCore;
use crate::session::services::subscriptions::MonitoredItemMap;

const COMMIT_DELAY: Duration = Duration::from_secs(1);

/// The caller's view of one monitored item: what it asked to watch, and
/// what the server assigned it once creation succeeded.
#[derive(Debug, Clone)]
pub struct MonitoredItem {
    /// Client-chosen handle disambiguating this item in notifications.
    pub client_handle: u32,
    /// The node/attribute being observed.
    pub item_to_monitor: ReadValueId,
    /// Which attribute kind this item observes.
    pub attribute_kind: AttributeKind,
    /// Requested monitoring mode.
    pub monitoring_mode: MonitoringMode,
    /// Requested sampling interval, milliseconds.
    pub sampling_interval: f64,
    /// Requested notification queue size.
    pub queue_size: u32,
    /// Server-assigned id, set once `CreateMonitoredItems` succeeds.
    pub monitored_item_id: Option<u32>,
}

impl MonitoredItem {
    fn requested_parameters(&self) -> MonitoringParameters {
        MonitoringParameters {
            client_handle: self.client_handle,
            sampling_interval: self.sampling_interval,
            filter: None,
            queue_size: self.queue_size,
            discard_oldest: true,
        }
    }
}

/// What the caller asks for when subscribing to a new item.
#[derive(Debug, Clone)]
pub struct SubscriptionParams {
    /// The node/attribute to monitor.
    pub item_to_monitor: ReadValueId,
    /// Which attribute kind this item observes.
    pub attribute_kind: AttributeKind,
    /// Requested monitoring mode.
    pub monitoring_mode: MonitoringMode,
    /// Requested sampling interval, milliseconds.
    pub sampling_interval: f64,
    /// Requested notification queue size.
    pub queue_size: u32,
}

impl Default for SubscriptionParams {
    fn default() -> Self {
        Self {
            item_to_monitor: ReadValueId::default(),
            attribute_kind: AttributeKind::Value,
            monitoring_mode: MonitoringMode::Reporting,
            sampling_interval: 0.0,
            queue_size: 1,
        }
    }
}

struct ReconcilerState {
    items: HashMap<u32, MonitoredItem>,
    pending_subscribe: Vec<u32>,
    subscribing: Vec<u32>,
    pending_unsubscribe: Vec<u32>,
    unsubscribing: Vec<u32>,
    /// Handles in `subscribing` whose owner called `unsubscribe` while the
    /// create was already in flight -- resolved once the create response
    /// arrives rather than cancelled outright (the request has already
    /// been sent).
    wanted: HashMap<u32, bool>,
}

impl ReconcilerState {
    fn new() -> Self {
        Self {
            items: HashMap::new(),
            pending_subscribe: Vec::new(),
            subscribing: Vec::new(),
            pending_unsubscribe: Vec::new(),
            unsubscribing: Vec::new(),
            wanted: HashMap::new(),
        }
    }
}

/// The client's handle to one server-side subscription.
pub struct ClientSubscription {
    subscription_id: u32,
    authentication_token: NodeId,
    transport: Arc<dyn TransportChannel>,
    handles: Handle,
    request_handles: Handle,
    state: Mutex<ReconcilerState>,
    commit_scheduled: AtomicBool,
    closed: AtomicBool,
    callbacks: Mutex<Box<dyn OnSubscriptionNotificationCore>>,
}

impl ClientSubscription {
    /// Construct a subscription wrapper around an already-created
    /// server-side subscription id.
    pub fn new(
        subscription_id: u32,
        authentication_token: NodeId,
        transport: Arc<dyn TransportChannel>,
        callbacks: Box<dyn OnSubscriptionNotificationCore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            subscription_id,
            authentication_token,
            transport,
            handles: Handle::new(1),
            request_handles: Handle::new(1),
            state: Mutex::new(ReconcilerState::new()),
            commit_scheduled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            callbacks: Mutex::new(callbacks),
        })
    }

    /// The server-assigned subscription id this reconciler tracks.
    pub fn subscription_id(&self) -> u32 {
        self.subscription_id
    }

    /// Ask to start monitoring an item. Returns the client handle the
    /// caller uses to later `unsubscribe` and to recognize this item in
    /// notifications. Takes effect on the next commit.
    pub fn subscribe(self: &Arc<Self>, params: SubscriptionParams) -> ClientResult<u32> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let client_handle = self.handles.next();
        {
            let mut state = self.state.lock();
            state.items.insert(
                client_handle,
                MonitoredItem {
                    client_handle,
                    item_to_monitor: params.item_to_monitor,
                    attribute_kind: params.attribute_kind,
                    monitoring_mode: params.monitoring_mode,
                    sampling_interval: params.sampling_interval,
                    queue_size: params.queue_size,
                    monitored_item_id: None,
                },
            );
            state.pending_subscribe.push(client_handle);
        }
        self.schedule_commit();
        Ok(client_handle)
    }

    /// Ask to stop monitoring a previously subscribed item. Takes effect on
    /// the next commit. A no-op if `client_handle` names nothing the
    /// reconciler knows about.
    pub fn unsubscribe(self: &Arc<Self>, client_handle: u32) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock();
            if !state.items.contains_key(&client_handle) {
                return;
            }
            if state.subscribing.contains(&client_handle) {
                // Already in flight; flag it so the response handler routes
                // it straight to pending_unsubscribe instead of leaving it
                // live.
                state.wanted.insert(client_handle, false);
                return;
            }
            state.pending_subscribe.retain(|h| *h != client_handle);
            if !state.pending_unsubscribe.contains(&client_handle)
                && !state.unsubscribing.contains(&client_handle)
            {
                state.pending_unsubscribe.push(client_handle);
            }
        }
        self.schedule_commit();
    }

    fn schedule_commit(self: &Arc<Self>) {
        if self
            .commit_scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(COMMIT_DELAY).await;
            if let Some(this) = weak.upgrade() {
                this.commit_scheduled.store(false, Ordering::SeqCst);
                this.commit().await;
            }
        });
    }

    /// Force an immediate reconciliation pass, e.g. after a reconnect.
    pub async fn commit(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let to_create = {
            let mut state = self.state.lock();
            if state.subscribing.is_empty() && !state.pending_subscribe.is_empty() {
                state.subscribing = std::mem::take(&mut state.pending_subscribe);
                state
                    .subscribing
                    .iter()
                    .filter_map(|h| state.items.get(h).cloned())
                    .collect::<Vec<_>>()
            } else {
                Vec::new()
            }
        };
        let to_delete = {
            let mut state = self.state.lock();
            if state.unsubscribing.is_empty() && !state.pending_unsubscribe.is_empty() {
                state.unsubscribing = std::mem::take(&mut state.pending_unsubscribe);
                state
                    .unsubscribing
                    .iter()
                    .filter_map(|h| state.items.get(h).and_then(|i| i.monitored_item_id))
                    .collect::<Vec<_>>()
            } else {
                Vec::new()
            }
        };

        if !to_create.is_empty() {
            self.send_create(to_create).await;
        }
        if !to_delete.is_empty() {
            self.send_delete(to_delete).await;
        }
    }

    async fn send_create(self: &Arc<Self>, items: Vec<MonitoredItem>) {
        let request = RequestMessage::CreateMonitoredItems(CreateMonitoredItemsRequest {
            request_header: RequestHeader {
                authentication_token: self.authentication_token.clone(),
                timestamp: Some(Utc::now()),
                request_handle: self.request_handles.next(),
                timeout_hint: 0,
            },
            subscription_id: self.subscription_id,
            timestamps_to_return: TimestampsToReturn::Both,
            items_to_create: items
                .iter()
                .map(|item| MonitoredItemCreateRequest {
                    item_to_monitor: item.item_to_monitor.clone(),
                    monitoring_mode: item.monitoring_mode,
                    requested_parameters: item.requested_parameters(),
                })
                .collect(),
        });

        let outcome = self.transport.request(request).await;
        let handles: Vec<u32> = items.iter().map(|i| i.client_handle).collect();

        match outcome {
            Ok(opcua_types::services::ResponseMessage::CreateMonitoredItems(resp)) => {
                self.apply_create_response(&handles, resp.results);
            }
            Ok(_) => {
                self.apply_create_failure(&handles, StatusCode::BadUnexpectedError);
            }
            Err(status) => {
                self.apply_create_failure(&handles, status);
            }
        }
        self.reschedule_if_pending();
    }

    fn apply_create_response(
        self: &Arc<Self>,
        handles: &[u32],
        results: Vec<opcua_types::services::MonitoredItemCreateResult>,
    ) {
        let mut to_notify_bad = Vec::new();
        let mut to_move_unsubscribe = Vec::new();
        {
            let mut state = self.state.lock();
            for (handle, result) in handles.iter().zip(results.into_iter()) {
                state.subscribing.retain(|h| h != handle);
                let still_wanted = state.wanted.remove(handle).unwrap_or(true);

                if result.status_code.is_good() {
                    if let Some(item) = state.items.get_mut(handle) {
                        item.monitored_item_id = Some(result.monitored_item_id);
                        item.sampling_interval = result.revised_sampling_interval;
                        item.queue_size = result.revised_queue_size;
                    }
                    if !still_wanted {
                        state.pending_unsubscribe.push(*handle);
                        to_move_unsubscribe.push(*handle);
                    }
                } else {
                    state.items.remove(handle);
                    if still_wanted {
                        to_notify_bad.push((*handle, result.status_code));
                    }
                }
            }
        }
        for (handle, status) in to_notify_bad {
            self.deliver_synthetic_status(handle, status);
        }
        if !to_move_unsubscribe.is_empty() {
            self.schedule_commit();
        }
    }

    fn apply_create_failure(self: &Arc<Self>, handles: &[u32], status: StatusCode) {
        let mut state = self.state.lock();
        for handle in handles {
            state.subscribing.retain(|h| h != handle);
            state.wanted.remove(handle);
            // Transport-level failure, not a per-item rejection: put the
            // items back so the next commit retries them.
            if state.items.contains_key(handle) {
                state.pending_subscribe.push(*handle);
            }
        }
        drop(state);
        tracing::warn!(%status, "CreateMonitoredItems request failed, will retry");
    }

    async fn send_delete(self: &Arc<Self>, monitored_item_ids: Vec<u32>) {
        let handles: Vec<u32> = {
            let state = self.state.lock();
            state.unsubscribing.clone()
        };
        let request = RequestMessage::DeleteMonitoredItems(DeleteMonitoredItemsRequest {
            request_header: RequestHeader {
                authentication_token: self.authentication_token.clone(),
                timestamp: Some(Utc::now()),
                request_handle: self.request_handles.next(),
                timeout_hint: 0,
            },
            subscription_id: self.subscription_id,
            monitored_item_ids,
        });

        let outcome = self.transport.request(request).await;
        match outcome {
            Ok(opcua_types::services::ResponseMessage::DeleteMonitoredItems(resp)) => {
                if let Some(bad) = resp.results.iter().find(|s| !s.is_good()).copied() {
                    // Deleting an id the server just handed us back as Good
                    // is not a recoverable per-item condition; the source
                    // treats it as a protocol violation and fails the whole
                    // subscription rather than retrying indefinitely.
                    tracing::error!(status = %bad, "DeleteMonitoredItems rejected a known item id");
                    self.close();
                    self.deliver_synthetic_subscription_failure(bad);
                    return;
                }
                let mut state = self.state.lock();
                for handle in &handles {
                    state.unsubscribing.retain(|h| h != handle);
                    state.items.remove(handle);
                }
            }
            _ => {
                let mut state = self.state.lock();
                for handle in &handles {
                    state.unsubscribing.retain(|h| h != handle);
                    state.pending_unsubscribe.push(*handle);
                }
                drop(state);
                self.reschedule_if_pending();
            }
        }
    }

    /// Raise the subscription's status-change signal with `status`, for
    /// when a protocol-level inconsistency (not a per-item rejection) means
    /// the whole subscription can no longer be trusted.
    fn deliver_synthetic_subscription_failure(&self, status: StatusCode) {
        let notification = NotificationMessage::status_change(0, Utc::now(), status);
        self.dispatch_notification(notification);
    }

    fn reschedule_if_pending(self: &Arc<Self>) {
        let needs_more = {
            let state = self.state.lock();
            !state.pending_subscribe.is_empty() || !state.pending_unsubscribe.is_empty()
        };
        if needs_more {
            self.schedule_commit();
        }
    }

    /// Build and deliver a single synthetic notification carrying `status`
    /// for one item, for when a per-item rejection (or a dropped-before-
    /// creation unsubscribe) must still reach the caller's callback even
    /// though the server never published anything for it.
    fn deliver_synthetic_status(&self, client_handle: u32, status: StatusCode) {
        let notification = NotificationMessage::data_change(
            0,
            Utc::now(),
            vec![MonitoredItemNotification {
                client_handle,
                value: DataValue::bad(status),
            }],
        );
        self.dispatch_notification(notification);
    }

    /// Route an incoming published notification message to the caller's
    /// callback, resolving each item's `client_handle` against the current
    /// item map. Clones the item map out and releases the reconciler lock
    /// before calling into the callback, so a callback that reenters
    /// `subscribe`/`unsubscribe` on this subscription cannot deadlock
    /// against it.
    pub fn dispatch_notification(&self, notification: NotificationMessage) {
        let items = self.state.lock().items.clone();
        let map = MonitoredItemMap::new(&items);
        self.callbacks
            .lock()
            .on_subscription_notification(notification, map);
    }

    /// Mark this subscription closed: further `subscribe`/`unsubscribe`
    /// calls are rejected and no further commits are attempted.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether this subscription has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

