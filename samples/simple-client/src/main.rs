//! A minimal client walkthrough: connect, create a subscription, monitor
//! one item, and print whatever values arrive.
//!
//! Runs against an in-memory [`FakeTransport`] standing in for a live
//! `opc.tcp://` peer -- wiring this crate to a real secure channel is the
//! embedding application's job, this sample only exercises the session and
//! subscription reconciler.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_opcua::client::{ClientSession, CreateSubscriptionParams, SubscriptionCallbacks};
use async_opcua::core::transport::test_double::FakeTransport;
use async_opcua::types::node_id::NodeId;
use async_opcua::types::services::{
    AttributeKind, CreateMonitoredItemsResponse, CreateSessionResponse, CreateSubscriptionResponse,
    MonitoredItemCreateResult, MonitoringMode, PublishResponse, ReadValueId, RequestMessage,
    ResponseHeader, ResponseMessage,
};
use async_opcua::types::{DataValue, MonitoredItemNotification, NotificationMessage, Variant};

fn main() {
    tracing_subscriber::fmt::init();

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    runtime.block_on(run());
}

async fn run() {
    let publish_count = Arc::new(AtomicU32::new(0));
    let publish_count_handler = publish_count.clone();

    let transport = FakeTransport::new(Box::new(move |req: RequestMessage| {
        let handle = req.request_header().request_handle;
        Ok(match req {
            RequestMessage::CreateSession(_) => ResponseMessage::CreateSession(CreateSessionResponse {
                response_header: ResponseHeader::new_good(handle),
                session_id: NodeId::guid(1, uuid::Uuid::new_v4()),
                authentication_token: NodeId::guid(1, uuid::Uuid::new_v4()),
                revised_session_timeout: 600_000.0,
                server_nonce: vec![0u8; 32],
                server_endpoints: Vec::new(),
            }),
            RequestMessage::ActivateSession(_) => {
                ResponseMessage::ActivateSession(async_opcua::types::services::ActivateSessionResponse {
                    response_header: ResponseHeader::new_good(handle),
                    server_nonce: vec![0u8; 32],
                })
            }
            RequestMessage::CreateSubscription(_) => {
                ResponseMessage::CreateSubscription(CreateSubscriptionResponse {
                    response_header: ResponseHeader::new_good(handle),
                    subscription_id: 1,
                    revised_publishing_interval: 1000.0,
                    revised_lifetime_count: 600,
                    revised_max_keep_alive_count: 10,
                })
            }
            RequestMessage::CreateMonitoredItems(r) => {
                ResponseMessage::CreateMonitoredItems(CreateMonitoredItemsResponse {
                    response_header: ResponseHeader::new_good(handle),
                    results: r
                        .items_to_create
                        .iter()
                        .enumerate()
                        .map(|(i, _)| MonitoredItemCreateResult {
                            status_code: async_opcua::types::StatusCode::Good,
                            monitored_item_id: i as u32 + 1,
                            revised_sampling_interval: 1000.0,
                            revised_queue_size: 1,
                            filter_result: None,
                        })
                        .collect(),
                })
            }
            RequestMessage::Publish(_) => {
                let n = publish_count_handler.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    ResponseMessage::Publish(PublishResponse {
                        response_header: ResponseHeader::new_good(handle),
                        subscription_id: 1,
                        available_sequence_numbers: vec![1],
                        more_notifications: false,
                        notification_message: Some(NotificationMessage::data_change(
                            1,
                            chrono::Utc::now(),
                            vec![MonitoredItemNotification {
                                client_handle: 1,
                                value: DataValue::new_now(Variant::Int32(42)),
                            }],
                        )),
                        results: Vec::new(),
                    })
                } else {
                    ResponseMessage::Publish(PublishResponse {
                        response_header: ResponseHeader::new_service_result(
                            handle,
                            async_opcua::types::StatusCode::BadNoSubscription,
                        ),
                        subscription_id: 0,
                        available_sequence_numbers: Vec::new(),
                        more_notifications: false,
                        notification_message: None,
                        results: Vec::new(),
                    })
                }
            }
            _ => ResponseMessage::ServiceFault(async_opcua::types::services::ServiceFault {
                response_header: ResponseHeader::new_service_result(
                    handle,
                    async_opcua::types::StatusCode::BadNotImplemented,
                ),
            }),
        })
    }));

    let session = ClientSession::new(transport);
    session
        .connect("opc.tcp://localhost:4840/fake", "simple-client")
        .await
        .expect("connect");

    let callbacks = SubscriptionCallbacks::new(
        |status| tracing::info!(?status, "subscription status changed"),
        |value, item| tracing::info!(client_handle = item.client_handle, ?value, "data change"),
        |_fields, _item| {},
    );

    let subscription = session
        .create_subscription(CreateSubscriptionParams::default(), Box::new(callbacks))
        .await
        .expect("create subscription");

    subscription
        .subscribe(async_opcua::client::SubscriptionParams {
            item_to_monitor: ReadValueId {
                node_id: NodeId::core(2258),
                attribute_id: 13,
                index_range: None,
            },
            attribute_kind: AttributeKind::Value,
            monitoring_mode: MonitoringMode::Reporting,
            sampling_interval: 1000.0,
            queue_size: 1,
        })
        .expect("subscribe");

    subscription.commit().await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
}
