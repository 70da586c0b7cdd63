//! A minimal server walkthrough: stand up a [`SessionManager`] serving one
//! in-memory value node, and drive it through `CreateSession` /
//! `ActivateSession` / `CreateSubscription` / `CreateMonitoredItems` /
//! `Publish` to see a data change notification come back out.
//!
//! A real deployment sits this behind an `opc.tcp://` secure channel
//! (out of this workspace's scope); here the requests are constructed and
//! dispatched in-process to show the session/subscription engine alone.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_opcua::server::handlers::{DataChangeSink, MonitoredItemHandle, SubscriptionHandlers};
use async_opcua::server::{ServerCapabilities, SessionManager};
use async_opcua::types::node_id::NodeId;
use async_opcua::types::services::{
    ActivateSessionRequest, AttributeKind, CreateMonitoredItemsRequest, CreateSessionRequest,
    CreateSubscriptionRequest, EndpointDescription, MonitoredItemCreateRequest,
    MonitoringMode, MonitoringParameters, PublishRequest, ReadValueId, RequestHeader,
    RequestMessage, ResponseMessage, TimestampsToReturn,
};
use async_opcua::types::{DataValue, Variant};

const VALUE_NODE_ID: u32 = 2258;

/// Serves exactly one `Value`-attribute node holding a live counter.
struct CounterNode {
    value: Arc<AtomicI32>,
}

struct CounterHandle {
    value: Arc<AtomicI32>,
}

impl MonitoredItemHandle for CounterHandle {
    fn subscribe_data_change(&self, sink: DataChangeSink) {
        sink(DataValue::new_now(Variant::Int32(
            self.value.load(Ordering::SeqCst),
        )));
    }
}

impl SubscriptionHandlers for CounterNode {
    fn create_monitored_item(
        &self,
        item: &ReadValueId,
        attribute_kind: AttributeKind,
        _params: &MonitoringParameters,
    ) -> (
        async_opcua::types::StatusCode,
        Option<Arc<dyn MonitoredItemHandle>>,
    ) {
        if item.node_id != NodeId::core(VALUE_NODE_ID) || attribute_kind != AttributeKind::Value {
            return (async_opcua::types::StatusCode::BadNodeIdUnknown, None);
        }
        (
            async_opcua::types::StatusCode::Good,
            Some(Arc::new(CounterHandle {
                value: self.value.clone(),
            })),
        )
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let manager = SessionManager::new(
        ServerCapabilities::default(),
        vec![EndpointDescription {
            endpoint_url: "opc.tcp://localhost:4840/sample".to_string(),
        }],
        Arc::new(CounterNode {
            value: Arc::new(AtomicI32::new(42)),
        }),
    );

    let mut handle_counter = 1u32;
    let mut next_handle = || {
        let h = handle_counter;
        handle_counter += 1;
        h
    };

    let ResponseMessage::CreateSession(create_resp) = manager
        .dispatch(RequestMessage::CreateSession(CreateSessionRequest {
            request_header: RequestHeader {
                authentication_token: NodeId::null(),
                timestamp: None,
                request_handle: next_handle(),
                timeout_hint: 0,
            },
            endpoint_url: "opc.tcp://localhost:4840/sample".to_string(),
            client_description: "simple-server self-test".to_string(),
            session_name: "demo".to_string(),
            requested_session_timeout: 60_000.0,
            max_response_message_size: 0,
        }))
        .await
    else {
        panic!("expected CreateSession response");
    };
    let token = create_resp.authentication_token;
    tracing::info!(session_id = %create_resp.session_id, "session created");

    manager
        .dispatch(RequestMessage::ActivateSession(ActivateSessionRequest {
            request_header: RequestHeader {
                authentication_token: token.clone(),
                timestamp: None,
                request_handle: next_handle(),
                timeout_hint: 0,
            },
            locale_ids: vec!["en".to_string()],
        }))
        .await;

    let ResponseMessage::CreateSubscription(sub_resp) = manager
        .dispatch(RequestMessage::CreateSubscription(
            CreateSubscriptionRequest {
                request_header: RequestHeader {
                    authentication_token: token.clone(),
                    timestamp: None,
                    request_handle: next_handle(),
                    timeout_hint: 0,
                },
                requested_publishing_interval: 5.0,
                requested_lifetime_count: 600,
                requested_max_keep_alive_count: 10,
                max_notifications_per_publish: 0,
                publishing_enabled: true,
                priority: 0,
            },
        ))
        .await
    else {
        panic!("expected CreateSubscription response");
    };
    tracing::info!(subscription_id = sub_resp.subscription_id, "subscription created");

    manager
        .dispatch(RequestMessage::CreateMonitoredItems(
            CreateMonitoredItemsRequest {
                request_header: RequestHeader {
                    authentication_token: token.clone(),
                    timestamp: None,
                    request_handle: next_handle(),
                    timeout_hint: 0,
                },
                subscription_id: sub_resp.subscription_id,
                timestamps_to_return: TimestampsToReturn::Both,
                items_to_create: vec![MonitoredItemCreateRequest {
                    item_to_monitor: ReadValueId {
                        node_id: NodeId::core(VALUE_NODE_ID),
                        attribute_id: 13,
                        index_range: None,
                    },
                    monitoring_mode: MonitoringMode::Reporting,
                    requested_parameters: MonitoringParameters {
                        client_handle: 1,
                        sampling_interval: 5.0,
                        filter: None,
                        queue_size: 1,
                        discard_oldest: true,
                    },
                }],
            },
        ))
        .await;

    let response = manager
        .dispatch(RequestMessage::Publish(PublishRequest {
            request_header: RequestHeader {
                authentication_token: token,
                timestamp: None,
                request_handle: next_handle(),
                timeout_hint: 10_000,
            },
            subscription_acknowledgements: Vec::new(),
        }))
        .await
        .into_publish(0);

    tracing::info!(?response.notification_message, "published");
}
