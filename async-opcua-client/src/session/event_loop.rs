//! The client session: connection setup, subscription creation, and the
//! single-flight `Publish` loop that feeds notifications to each
//! [`ClientSubscription`].
//!
//! Exactly one `Publish` request is ever outstanding at a time. Two
//! queues carry subscription acknowledgements: `pending_acks` collects
//! acks for messages delivered while a `Publish` is already in flight,
//! `sent_acks` holds the ones riding the request currently in flight. When
//! the in-flight request completes, `sent_acks` is cleared and the next
//! iteration splices `pending_acks` into it -- acks are never lost and
//! never sent twice.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use opcua_core::handle::Handle;
use opcua_core::sync::Mutex;
use opcua_core::transport::{TransportChannel, TransportStatus};
use opcua_types::node_id::NodeId;
use opcua_types::services::{
    ActivateSessionRequest, CloseSessionRequest, CreateSessionRequest, CreateSubscriptionRequest,
    DeleteSubscriptionsRequest, PublishRequest, RequestHeader, RequestMessage, ResponseMessage,
    SubscriptionAcknowledgement,
};
use opcua_types::status_code::StatusCode;

use crate::error::{ClientResult, Error};
use crate::session::callbacks::OnSubscriptionNotificationCore;
use crate::session::subscription::{ClientSubscription, SubscriptionParams};

const DEFAULT_REQUEST_TIMEOUT_MS: u32 = 60_000;
const PUBLISH_RETRY_BACKOFF_MS: u64 = 500;

/// Splice `acks` (in their existing order) back onto the head of `queue`,
/// draining `acks` in the process.
fn splice_front(
    queue: &Mutex<VecDeque<SubscriptionAcknowledgement>>,
    acks: &mut Vec<SubscriptionAcknowledgement>,
) {
    let mut queue = queue.lock();
    for ack in acks.drain(..).rev() {
        queue.push_front(ack);
    }
}

/// Revised publishing parameters the client requests when creating a
/// subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionParams {
    /// Requested publishing interval, milliseconds.
    pub publishing_interval_ms: f64,
    /// Requested lifetime count, in publishing intervals.
    pub lifetime_count: u32,
    /// Requested keep-alive count, in publishing intervals.
    pub max_keep_alive_count: u32,
    /// Requested chunking cap on notifications per publish.
    pub max_notifications_per_publish: u32,
    /// Relative priority among this session's subscriptions.
    pub priority: u8,
    /// Whether publishing starts enabled.
    pub publishing_enabled: bool,
}

impl Default for CreateSubscriptionParams {
    fn default() -> Self {
        Self {
            publishing_interval_ms: 1000.0,
            lifetime_count: 600,
            max_keep_alive_count: 10,
            max_notifications_per_publish: 0,
            priority: 0,
            publishing_enabled: true,
        }
    }
}

/// A connected client session: one `CreateSession`/`ActivateSession`
/// lifetime, its subscriptions, and the background `Publish` loop keeping
/// them fed.
pub struct ClientSession {
    transport: Arc<dyn TransportChannel>,
    authentication_token: Mutex<Option<NodeId>>,
    request_handles: Handle,
    subscriptions: Mutex<HashMap<u32, Arc<ClientSubscription>>>,
    pending_acks: Mutex<VecDeque<SubscriptionAcknowledgement>>,
    publish_inflight: AtomicBool,
    closed: AtomicBool,
}

impl ClientSession {
    /// Build a session wrapper around a not-yet-connected transport.
    pub fn new(transport: Arc<dyn TransportChannel>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            authentication_token: Mutex::new(None),
            request_handles: Handle::new(1),
            subscriptions: Mutex::new(HashMap::new()),
            pending_acks: Mutex::new(VecDeque::new()),
            publish_inflight: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    fn next_header(&self) -> ClientResult<RequestHeader> {
        let token = self
            .authentication_token
            .lock()
            .clone()
            .ok_or(Error::NotConnected)?;
        Ok(RequestHeader {
            authentication_token: token,
            timestamp: Some(Utc::now()),
            request_handle: self.request_handles.next(),
            timeout_hint: DEFAULT_REQUEST_TIMEOUT_MS,
        })
    }

    /// Connect the transport, then `CreateSession`/`ActivateSession`
    /// against `endpoint_url`, starting the background `Publish` loop once
    /// activation succeeds.
    pub async fn connect(
        self: &Arc<Self>,
        endpoint_url: &str,
        session_name: &str,
    ) -> ClientResult<()> {
        self.transport
            .connect(endpoint_url)
            .await
            .map_err(|_| Error::RequestFailed(StatusCode::BadUnexpectedError))?;

        let create_request = RequestMessage::CreateSession(CreateSessionRequest {
            request_header: RequestHeader {
                authentication_token: NodeId::null(),
                timestamp: Some(Utc::now()),
                request_handle: self.request_handles.next(),
                timeout_hint: DEFAULT_REQUEST_TIMEOUT_MS,
            },
            endpoint_url: endpoint_url.to_string(),
            client_description: "async-opcua-client".to_string(),
            session_name: session_name.to_string(),
            requested_session_timeout: 600_000.0,
            max_response_message_size: 0,
        });
        let response = self
            .transport
            .request(create_request)
            .await
            .map_err(Error::RequestFailed)?;
        let ResponseMessage::CreateSession(create_response) = response else {
            return Err(Error::UnexpectedResponse);
        };
        if create_response.response_header.service_result.is_bad() {
            return Err(Error::RequestFailed(
                create_response.response_header.service_result,
            ));
        }
        *self.authentication_token.lock() = Some(create_response.authentication_token);

        let activate_request = RequestMessage::ActivateSession(ActivateSessionRequest {
            request_header: self.next_header()?,
            locale_ids: vec!["en".to_string()],
        });
        let response = self
            .transport
            .request(activate_request)
            .await
            .map_err(Error::RequestFailed)?;
        let ResponseMessage::ActivateSession(activate_response) = response else {
            return Err(Error::UnexpectedResponse);
        };
        if activate_response.response_header.service_result.is_bad() {
            return Err(Error::RequestFailed(
                activate_response.response_header.service_result,
            ));
        }

        self.spawn_publish_loop();
        Ok(())
    }

    /// Create a new subscription and return the client's handle to it.
    pub async fn create_subscription(
        self: &Arc<Self>,
        params: CreateSubscriptionParams,
        callbacks: Box<dyn OnSubscriptionNotificationCore>,
    ) -> ClientResult<Arc<ClientSubscription>> {
        let request = RequestMessage::CreateSubscription(CreateSubscriptionRequest {
            request_header: self.next_header()?,
            requested_publishing_interval: params.publishing_interval_ms,
            requested_lifetime_count: params.lifetime_count,
            requested_max_keep_alive_count: params.max_keep_alive_count,
            max_notifications_per_publish: params.max_notifications_per_publish,
            publishing_enabled: params.publishing_enabled,
            priority: params.priority,
        });
        let response = self
            .transport
            .request(request)
            .await
            .map_err(Error::RequestFailed)?;
        let ResponseMessage::CreateSubscription(resp) = response else {
            return Err(Error::UnexpectedResponse);
        };
        if resp.response_header.service_result.is_bad() {
            return Err(Error::RequestFailed(resp.response_header.service_result));
        }

        let token = self
            .authentication_token
            .lock()
            .clone()
            .ok_or(Error::NotConnected)?;
        let subscription = ClientSubscription::new(
            resp.subscription_id,
            token,
            self.transport.clone(),
            callbacks,
        );
        self.subscriptions
            .lock()
            .insert(resp.subscription_id, subscription.clone());
        Ok(subscription)
    }

    /// Subscribe to an item on an already-created subscription. Convenience
    /// wrapper equivalent to calling `subscription.subscribe(..)` directly.
    pub fn subscribe(
        subscription: &Arc<ClientSubscription>,
        params: SubscriptionParams,
    ) -> ClientResult<u32> {
        subscription.subscribe(params)
    }

    /// Delete a subscription on the server and drop the client's tracking
    /// of it.
    pub async fn delete_subscription(self: &Arc<Self>, subscription_id: u32) -> ClientResult<()> {
        let subscription = self.subscriptions.lock().remove(&subscription_id);
        let Some(subscription) = subscription else {
            return Err(Error::MonitoredItemNotFound(subscription_id));
        };
        subscription.close();

        let request = RequestMessage::DeleteSubscriptions(DeleteSubscriptionsRequest {
            request_header: self.next_header()?,
            subscription_ids: vec![subscription_id],
        });
        let response = self
            .transport
            .request(request)
            .await
            .map_err(Error::RequestFailed)?;
        let ResponseMessage::DeleteSubscriptions(_) = response else {
            return Err(Error::UnexpectedResponse);
        };
        Ok(())
    }

    /// React to a transport lifecycle event. A reconnect (`Connected` after
    /// having previously disconnected, or `Renewed`) forces every
    /// subscription to re-run its reconciler, so state that accumulated
    /// while disconnected gets pushed to the server.
    pub fn notify_status(self: &Arc<Self>, status: TransportStatus) {
        match status {
            TransportStatus::Connected | TransportStatus::Renewed => {
                let subscriptions: Vec<_> =
                    self.subscriptions.lock().values().cloned().collect();
                for subscription in subscriptions {
                    let subscription = subscription.clone();
                    tokio::spawn(async move {
                        subscription.commit().await;
                    });
                }
            }
            TransportStatus::Disconnected(status) => {
                tracing::warn!(%status, "transport disconnected");
            }
        }
    }

    fn spawn_publish_loop(self: &Arc<Self>) {
        let session = self.clone();
        tokio::spawn(async move {
            session.run_publish_loop().await;
        });
    }

    async fn run_publish_loop(self: Arc<Self>) {
        let mut sent_acks: Vec<SubscriptionAcknowledgement> = Vec::new();
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            if self
                .publish_inflight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                // Another publish is somehow already in flight (should not
                // happen since this loop is the only caller); back off
                // briefly rather than busy-spin.
                tokio::time::sleep(std::time::Duration::from_millis(
                    PUBLISH_RETRY_BACKOFF_MS,
                ))
                .await;
                continue;
            }

            sent_acks.extend(self.pending_acks.lock().drain(..));

            let header = match self.next_header() {
                Ok(header) => header,
                Err(_) => {
                    self.publish_inflight.store(false, Ordering::SeqCst);
                    return;
                }
            };
            let request = RequestMessage::Publish(PublishRequest {
                request_header: header,
                subscription_acknowledgements: sent_acks.clone(),
            });

            let outcome = self.transport.request(request).await;
            self.publish_inflight.store(false, Ordering::SeqCst);

            match outcome {
                Ok(ResponseMessage::Publish(response)) => {
                    // Any ack the server didn't report Good for goes back to
                    // the head of pending_acks for retry; the rest (Good, or
                    // unreported because the server returned fewer results
                    // than we sent) are discarded -- the server has them.
                    let mut retry = Vec::new();
                    for (ack, result) in sent_acks.drain(..).zip(
                        response
                            .results
                            .iter()
                            .copied()
                            .chain(std::iter::repeat(StatusCode::Good)),
                    ) {
                        if !result.is_good() {
                            retry.push(ack);
                        }
                    }
                    if !retry.is_empty() {
                        let mut pending = self.pending_acks.lock();
                        for ack in retry.into_iter().rev() {
                            pending.push_front(ack);
                        }
                    }
                    if response.response_header.service_result == StatusCode::BadNoSubscription {
                        tracing::debug!("session has no subscriptions, stopping publish loop");
                        return;
                    }
                    if let Some(notification) = response.notification_message {
                        let subscription_id = response.subscription_id;
                        self.pending_acks.lock().push_back(SubscriptionAcknowledgement {
                            subscription_id,
                            sequence_number: notification.sequence_number,
                        });
                        if let Some(subscription) =
                            self.subscriptions.lock().get(&subscription_id).cloned()
                        {
                            subscription.dispatch_notification(notification);
                        } else {
                            tracing::warn!(
                                subscription_id,
                                "notification for unknown subscription"
                            );
                        }
                    }
                }
                Ok(ResponseMessage::ServiceFault(fault)) => {
                    splice_front(&self.pending_acks, &mut sent_acks);
                    if fault.response_header.service_result == StatusCode::BadNoSubscription {
                        return;
                    }
                    tracing::warn!(
                        status = %fault.response_header.service_result,
                        "publish request faulted"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(
                        PUBLISH_RETRY_BACKOFF_MS,
                    ))
                    .await;
                }
                Ok(_) => {
                    sent_acks.clear();
                }
                Err(StatusCode::BadTimeout) => {
                    // Nothing was acknowledged; retry immediately, splicing
                    // the unsent acks back to the head of the queue so they
                    // go out ahead of anything queued while we waited.
                    splice_front(&self.pending_acks, &mut sent_acks);
                }
                Err(status) => {
                    tracing::warn!(%status, "publish request failed");
                    splice_front(&self.pending_acks, &mut sent_acks);
                    tokio::time::sleep(std::time::Duration::from_millis(
                        PUBLISH_RETRY_BACKOFF_MS,
                    ))
                    .await;
                }
            }
        }
    }

    /// Close the session: stop the publish loop, close every subscription,
    /// and send `CloseSession`.
    pub async fn close(self: &Arc<Self>) -> ClientResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        for subscription in self.subscriptions.lock().values() {
            subscription.close();
        }
        let request = RequestMessage::CloseSession(CloseSessionRequest {
            request_header: self.next_header()?,
            delete_subscriptions: true,
        });
        self.transport
            .request(request)
            .await
            .map_err(Error::RequestFailed)?;
        self.transport.disconnect().await;
        Ok(())
    }
}
