//! End-to-end exercise of the publish/subscribe engine: a real
//! [`ClientSession`]/[`ClientSubscription`] pair talking to a real
//! [`SessionManager`] through an in-process transport (no secure channel,
//! per this workspace's scope -- see crate docs). Covers the two
//! concrete scenarios from the subscription protocol's testable
//! properties that need both halves wired together: batched monitored-item
//! reconciliation racing an in-flight create, and session-level Publish
//! ordering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_opcua::client::{ClientSession, CreateSubscriptionParams, SubscriptionCallbacks};
use async_opcua::core::sync::Mutex;
use async_opcua::core::transport::TransportChannel;
use async_opcua::server::handlers::{DataChangeSink, MonitoredItemHandle, SubscriptionHandlers};
use async_opcua::server::{ServerCapabilities, SessionManager};
use async_opcua::types::error::EncodingResult;
use async_opcua::types::node_id::NodeId;
use async_opcua::types::services::{
    ActivateSessionRequest, AttributeKind, CreateMonitoredItemsRequest, CreateSessionRequest,
    CreateSubscriptionRequest, EndpointDescription, MonitoredItemCreateRequest,
    MonitoringMode, MonitoringParameters, PublishRequest, ReadValueId, RequestHeader,
    RequestMessage, ResponseMessage, TimestampsToReturn,
};
use async_opcua::types::status_code::StatusCode;
use async_opcua::types::{DataValue, Variant};
use async_trait::async_trait;

const ENDPOINT_URL: &str = "opc.tcp://localhost:4840/test";

/// Hands the embedding application's monitored-item sinks back to the
/// test so it can push data changes on demand, keyed by node id.
#[derive(Default, Clone)]
struct SinkRegistry {
    sinks: Arc<Mutex<HashMap<NodeId, Vec<DataChangeSink>>>>,
}

impl SinkRegistry {
    fn push(&self, node_id: &NodeId, value: DataValue) {
        let sinks = self.sinks.lock();
        for sink in sinks.get(node_id).into_iter().flatten() {
            sink(value.clone());
        }
    }
}

struct RecordingHandle {
    node_id: NodeId,
    registry: SinkRegistry,
}

impl MonitoredItemHandle for RecordingHandle {
    fn subscribe_data_change(&self, sink: DataChangeSink) {
        self.registry
            .sinks
            .lock()
            .entry(self.node_id.clone())
            .or_default()
            .push(sink);
    }
}

/// Accepts a monitored item on any node id, handing back a handle that
/// registers into the shared [`SinkRegistry`].
struct TestHandlers {
    registry: SinkRegistry,
}

impl SubscriptionHandlers for TestHandlers {
    fn create_monitored_item(
        &self,
        item: &ReadValueId,
        attribute_kind: AttributeKind,
        _params: &MonitoringParameters,
    ) -> (StatusCode, Option<Arc<dyn MonitoredItemHandle>>) {
        if attribute_kind != AttributeKind::Value {
            return (StatusCode::BadAttributeIdInvalid, None);
        }
        (
            StatusCode::Good,
            Some(Arc::new(RecordingHandle {
                node_id: item.node_id.clone(),
                registry: self.registry.clone(),
            })),
        )
    }
}

fn server() -> (Arc<SessionManager>, SinkRegistry) {
    let registry = SinkRegistry::default();
    let manager = Arc::new(SessionManager::new(
        ServerCapabilities::default(),
        vec![EndpointDescription {
            endpoint_url: ENDPOINT_URL.to_string(),
        }],
        Arc::new(TestHandlers {
            registry: registry.clone(),
        }),
    ));
    (manager, registry)
}

/// A transport that dispatches straight into an in-process
/// [`SessionManager`], with an optional gate delaying the next
/// `CreateMonitoredItems` request so a test can race client-side state
/// changes against a response still in flight.
struct InProcessTransport {
    manager: Arc<SessionManager>,
    gate: tokio::sync::Notify,
    gate_armed: AtomicBool,
    sent: Mutex<Vec<&'static str>>,
}

impl InProcessTransport {
    fn new(manager: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            gate: tokio::sync::Notify::new(),
            gate_armed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn arm_gate(&self) {
        self.gate_armed.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        self.gate.notify_one();
    }

    fn sent_requests(&self) -> Vec<&'static str> {
        self.sent.lock().clone()
    }
}

fn request_kind(req: &RequestMessage) -> &'static str {
    match req {
        RequestMessage::CreateSession(_) => "CreateSession",
        RequestMessage::ActivateSession(_) => "ActivateSession",
        RequestMessage::CloseSession(_) => "CloseSession",
        RequestMessage::CreateSubscription(_) => "CreateSubscription",
        RequestMessage::DeleteSubscriptions(_) => "DeleteSubscriptions",
        RequestMessage::CreateMonitoredItems(_) => "CreateMonitoredItems",
        RequestMessage::DeleteMonitoredItems(_) => "DeleteMonitoredItems",
        RequestMessage::Publish(_) => "Publish",
    }
}

#[async_trait]
impl TransportChannel for InProcessTransport {
    async fn connect(&self, _url: &str) -> EncodingResult<()> {
        Ok(())
    }

    async fn request(&self, req: RequestMessage) -> Result<ResponseMessage, StatusCode> {
        let kind = request_kind(&req);
        self.sent.lock().push(kind);
        if kind == "CreateMonitoredItems" && self.gate_armed.swap(false, Ordering::SeqCst) {
            self.gate.notified().await;
        }
        Ok(self.manager.dispatch(req).await)
    }

    async fn disconnect(&self) {}
}

fn item_params(node_id: NodeId, sampling_interval: f64) -> async_opcua::client::SubscriptionParams {
    async_opcua::client::SubscriptionParams {
        item_to_monitor: ReadValueId {
            node_id,
            attribute_id: 13,
            index_range: None,
        },
        attribute_kind: AttributeKind::Value,
        monitoring_mode: MonitoringMode::Reporting,
        sampling_interval,
        queue_size: 1,
    }
}

/// Scenario (e): subscribing three items within the commit window issues
/// exactly one `CreateMonitoredItems` request; unsubscribing one of them
/// while that request is still in flight moves it to `pending_unsubscribe`
/// once the response lands, and the next commit deletes exactly that
/// item's server-assigned id.
#[tokio::test]
async fn scenario_e_client_batches_monitored_item_creates_and_races_unsubscribe() {
    let (manager, _registry) = server();
    let transport = InProcessTransport::new(manager);
    let session = ClientSession::new(transport.clone());
    session
        .connect(ENDPOINT_URL, "scenario-e")
        .await
        .expect("connect");

    let callbacks = SubscriptionCallbacks::new(|_| {}, |_, _| {}, |_, _| {});
    let subscription = session
        .create_subscription(CreateSubscriptionParams::default(), Box::new(callbacks))
        .await
        .expect("create subscription");

    let h1 = subscription
        .subscribe(item_params(NodeId::new(1, 100), 100.0))
        .expect("subscribe 1");
    let h2 = subscription
        .subscribe(item_params(NodeId::new(1, 101), 100.0))
        .expect("subscribe 2");
    let h3 = subscription
        .subscribe(item_params(NodeId::new(1, 102), 100.0))
        .expect("subscribe 3");

    transport.arm_gate();
    let commit_subscription = subscription.clone();
    let commit_task = tokio::spawn(async move {
        commit_subscription.commit().await;
    });

    // Give the commit task a chance to swap pending_subscribe into
    // subscribing and send the request, which then parks at the gate.
    for _ in 0..200 {
        tokio::task::yield_now().await;
        if transport
            .sent_requests()
            .iter()
            .any(|k| *k == "CreateMonitoredItems")
        {
            break;
        }
    }
    assert_eq!(
        transport
            .sent_requests()
            .iter()
            .filter(|k| **k == "CreateMonitoredItems")
            .count(),
        1,
        "subscribing three items within the commit window must send exactly one request"
    );

    // Race: unsubscribe item 2 while its create is still in flight.
    subscription.unsubscribe(h2);

    transport.release();
    commit_task.await.expect("commit task");

    // Item 2 should have moved to pending_unsubscribe and a follow-up
    // commit should already have fired (schedule_commit is invoked from
    // inside apply_create_response). Give it a moment to land.
    for _ in 0..200 {
        tokio::task::yield_now().await;
        if transport
            .sent_requests()
            .iter()
            .any(|k| *k == "DeleteMonitoredItems")
        {
            break;
        }
    }
    let sent = transport.sent_requests();
    assert_eq!(
        sent.iter()
            .filter(|k| **k == "DeleteMonitoredItems")
            .count(),
        1,
        "the race must produce exactly one DeleteMonitoredItems request, for item 2 alone: {sent:?}"
    );

    // h1 and h3 stay live; only h2 ever left subscribing -> pending_unsubscribe.
    let _ = (h1, h3);
}

fn request_header(token: NodeId, timeout_hint_ms: u32) -> RequestHeader {
    RequestHeader {
        authentication_token: token,
        timestamp: None,
        request_handle: 0,
        timeout_hint: timeout_hint_ms,
    }
}

/// Scenario (f): two `Publish` requests are in flight against the same
/// session simultaneously. A subscription that produces two notifications
/// satisfies them strictly in the order they were issued -- the second
/// never completes before the first.
#[tokio::test]
async fn scenario_f_session_publish_requests_complete_in_order() {
    let (manager, registry) = server();

    let ResponseMessage::CreateSession(create) = manager
        .dispatch(RequestMessage::CreateSession(CreateSessionRequest {
            request_header: request_header(NodeId::null(), 0),
            endpoint_url: ENDPOINT_URL.to_string(),
            client_description: "scenario-f".to_string(),
            session_name: "scenario-f".to_string(),
            requested_session_timeout: 60_000.0,
            max_response_message_size: 0,
        }))
        .await
    else {
        panic!("expected CreateSession response");
    };
    let token = create.authentication_token;

    manager
        .dispatch(RequestMessage::ActivateSession(ActivateSessionRequest {
            request_header: request_header(token.clone(), 0),
            locale_ids: vec!["en".to_string()],
        }))
        .await;

    let ResponseMessage::CreateSubscription(sub) = manager
        .dispatch(RequestMessage::CreateSubscription(
            CreateSubscriptionRequest {
                request_header: request_header(token.clone(), 0),
                requested_publishing_interval: 0.0, // instant mode
                requested_lifetime_count: 600,
                requested_max_keep_alive_count: 10,
                max_notifications_per_publish: 1,
                publishing_enabled: true,
                priority: 0,
            },
        ))
        .await
    else {
        panic!("expected CreateSubscription response");
    };
    let subscription_id = sub.subscription_id;

    let node_id = NodeId::new(1, 200);
    manager
        .dispatch(RequestMessage::CreateMonitoredItems(
            CreateMonitoredItemsRequest {
                request_header: request_header(token.clone(), 0),
                subscription_id,
                timestamps_to_return: TimestampsToReturn::Both,
                items_to_create: vec![MonitoredItemCreateRequest {
                    item_to_monitor: ReadValueId {
                        node_id: node_id.clone(),
                        attribute_id: 13,
                        index_range: None,
                    },
                    monitoring_mode: MonitoringMode::Reporting,
                    requested_parameters: MonitoringParameters {
                        client_handle: 1,
                        sampling_interval: 0.0,
                        filter: None,
                        queue_size: 1,
                        discard_oldest: true,
                    },
                }],
            },
        ))
        .await;

    // Two Publish requests in flight at once, neither satisfiable yet
    // (no notifications queued).
    let manager_p1 = manager.clone();
    let token_p1 = token.clone();
    let p1 = tokio::spawn(async move {
        manager_p1
            .dispatch(RequestMessage::Publish(PublishRequest {
                request_header: request_header(token_p1, 10_000),
                subscription_acknowledgements: Vec::new(),
            }))
            .await
    });

    let manager_p2 = manager.clone();
    let token_p2 = token.clone();
    let p2 = tokio::spawn(async move {
        manager_p2
            .dispatch(RequestMessage::Publish(PublishRequest {
                request_header: request_header(token_p2, 10_000),
                subscription_acknowledgements: Vec::new(),
            }))
            .await
    });

    // Let both requests actually park in the session's pending FIFO.
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    assert!(!p1.is_finished());
    assert!(!p2.is_finished());

    registry.push(&node_id, DataValue::new_now(Variant::Int32(1)));
    for _ in 0..50 {
        tokio::task::yield_now().await;
        if p1.is_finished() {
            break;
        }
    }
    assert!(p1.is_finished(), "first queued Publish must be satisfied first");
    assert!(
        !p2.is_finished(),
        "second queued Publish must not complete before the first notification's sibling arrives"
    );

    registry.push(&node_id, DataValue::new_now(Variant::Int32(2)));
    for _ in 0..50 {
        tokio::task::yield_now().await;
        if p2.is_finished() {
            break;
        }
    }

    let r1 = p1.await.expect("p1 task").into_publish(1);
    let r2 = p2.await.expect("p2 task").into_publish(2);

    let seq1 = r1
        .notification_message
        .as_ref()
        .expect("p1 carries a notification")
        .sequence_number;
    let seq2 = r2
        .notification_message
        .as_ref()
        .expect("p2 carries a notification")
        .sequence_number;
    assert!(
        seq1 < seq2,
        "sequence numbers must reflect issue order: {seq1} then {seq2}"
    );
}
