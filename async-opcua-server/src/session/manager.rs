//! The session registry: mints session ids/authentication tokens on
//! `CreateSession`, looks sessions up by token for every subsequent
//! service call, and dispatches each inbound request to the right
//! session-level (or endpoint-level) handler.
//!
//! A `HashMap` of sessions keyed by authentication token behind one lock,
//! with a monotonic id counter minting session ids. Secure channel /
//! certificate negotiation is out of scope (an external transport
//! concern); `server_nonce` here is a plain random byte string, not a
//! cryptographic handshake value.

use std::collections::HashMap;
use std::sync::Arc;

use opcua_core::handle::Handle;
use opcua_core::sync::Mutex;
use opcua_types::node_id::NodeId;
use opcua_types::services::{
    ActivateSessionResponse, CloseSessionResponse, CreateSessionRequest, CreateSessionResponse,
    CreateSubscriptionResponse, DeleteSubscriptionsResponse, EndpointDescription, RequestMessage,
    ResponseHeader, ResponseMessage, ServiceFault,
};
use opcua_types::status_code::StatusCode;
use uuid::Uuid;

use crate::config::ServerCapabilities;
use crate::error::{Error, ServerResult};
use crate::handlers::SubscriptionHandlers;
use crate::subscriptions::SubscriptionParams;

use super::Session;

/// At least this many random bytes back every server nonce, per the OPC UA
/// session-creation contract (meaningful there as the cryptographic
/// handshake seed; here just a byte string of the mandated minimum length,
/// since this workspace implements no cryptography).
const SERVER_NONCE_MIN_LEN: usize = 32;

fn random_nonce() -> Vec<u8> {
    let mut bytes = Vec::with_capacity(SERVER_NONCE_MIN_LEN);
    while bytes.len() < SERVER_NONCE_MIN_LEN {
        bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    }
    bytes
}

fn fault(request_handle: u32, service_result: StatusCode) -> ResponseMessage {
    ResponseMessage::ServiceFault(ServiceFault {
        response_header: ResponseHeader::new_service_result(request_handle, service_result),
    })
}

/// Owns every active session for one server and the endpoints it serves.
pub struct SessionManager {
    capabilities: ServerCapabilities,
    endpoints: Vec<EndpointDescription>,
    handlers: Arc<dyn SubscriptionHandlers>,
    sessions: Mutex<HashMap<NodeId, Arc<Session>>>,
    session_id_handle: Handle,
}

impl SessionManager {
    /// Build a registry for the given endpoints and capability limits,
    /// delegating `CreateMonitoredItems` decisions to `handlers`.
    pub fn new(
        capabilities: ServerCapabilities,
        endpoints: Vec<EndpointDescription>,
        handlers: Arc<dyn SubscriptionHandlers>,
    ) -> Self {
        Self {
            capabilities,
            endpoints,
            handlers,
            sessions: Mutex::new(HashMap::new()),
            session_id_handle: Handle::new(1),
        }
    }

    /// Number of currently open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Look up a session by its authentication token.
    pub fn find_by_token(&self, token: &NodeId) -> ServerResult<Arc<Session>> {
        self.sessions
            .lock()
            .get(token)
            .cloned()
            .ok_or(Error::SessionNotFound)
    }

    fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> ServerResult<(Arc<Session>, CreateSessionResponse)> {
        let mut sessions = self.sessions.lock();
        if sessions.len() >= self.capabilities.max_sessions {
            return Err(Error::TooManySessions);
        }
        let matching_endpoints: Vec<EndpointDescription> = self
            .endpoints
            .iter()
            .filter(|e| e.endpoint_url == request.endpoint_url)
            .cloned()
            .collect();
        if matching_endpoints.is_empty() {
            return Err(Error::UnknownEndpoint(request.endpoint_url.clone()));
        }
        let numeric_id = self.session_id_handle.next();
        let session_id = NodeId::new(0, numeric_id);
        let authentication_token = NodeId::guid(0, Uuid::new_v4());
        let revised_session_timeout = request
            .requested_session_timeout
            .min(self.capabilities.max_session_timeout_ms);
        let session = Session::new(
            session_id.clone(),
            authentication_token.clone(),
            self.handlers.clone(),
            self.capabilities.subscriptions.max_monitored_items_per_subscription,
        );
        let response = CreateSessionResponse {
            response_header: ResponseHeader::new_good(request.request_header.request_handle),
            session_id,
            authentication_token: authentication_token.clone(),
            revised_session_timeout,
            server_nonce: random_nonce(),
            server_endpoints: matching_endpoints,
        };
        sessions.insert(authentication_token, session.clone());
        Ok((session, response))
    }

    /// Remove and close a session.
    pub fn close_session(&self, token: &NodeId) -> ServerResult<()> {
        let session = self
            .sessions
            .lock()
            .remove(token)
            .ok_or(Error::SessionNotFound)?;
        session.close();
        Ok(())
    }

    /// Dispatch one inbound request to its handling component: `CreateSession`
    /// is endpoint-local, everything else is resolved to a session via its
    /// `authentication_token` and serviced there. An unknown token produces
    /// a [`ServiceFault`] rather than panicking or silently dropping the
    /// request.
    pub async fn dispatch(&self, request: RequestMessage) -> ResponseMessage {
        let request_handle = request.request_header().request_handle;
        match request {
            RequestMessage::CreateSession(req) => match self.create_session(&req) {
                Ok((_, resp)) => ResponseMessage::CreateSession(resp),
                Err(e) => fault(request_handle, (&e).into()),
            },
            RequestMessage::ActivateSession(req) => {
                match self.find_by_token(&req.request_header.authentication_token) {
                    Ok(_session) => ResponseMessage::ActivateSession(ActivateSessionResponse {
                        response_header: ResponseHeader::new_good(request_handle),
                        server_nonce: random_nonce(),
                    }),
                    Err(e) => fault(request_handle, (&e).into()),
                }
            }
            RequestMessage::CloseSession(req) => {
                match self.close_session(&req.request_header.authentication_token) {
                    Ok(()) => ResponseMessage::CloseSession(CloseSessionResponse {
                        response_header: ResponseHeader::new_good(request_handle),
                    }),
                    Err(e) => fault(request_handle, (&e).into()),
                }
            }
            RequestMessage::CreateSubscription(req) => {
                let session = match self.find_by_token(&req.request_header.authentication_token) {
                    Ok(s) => s,
                    Err(e) => return fault(request_handle, (&e).into()),
                };
                if session.subscription_count() >= self.capabilities.subscriptions.max_subscriptions_per_session
                {
                    return fault(request_handle, StatusCode::BadTooManySubscriptions);
                }
                let limits = &self.capabilities.subscriptions;
                let publishing_interval_ms = req
                    .requested_publishing_interval
                    .clamp(limits.min_publishing_interval_ms, limits.max_publishing_interval_ms);
                let max_notifications_per_publish = if req.max_notifications_per_publish == 0 {
                    limits.max_notifications_per_publish
                } else {
                    req.max_notifications_per_publish.min(limits.max_notifications_per_publish)
                };
                let params = SubscriptionParams {
                    publishing_interval_ms,
                    max_lifetime_count: req.requested_lifetime_count,
                    max_keep_alive_count: req.requested_max_keep_alive_count,
                    max_notifications_per_publish,
                    priority: req.priority,
                    publishing_enabled: req.publishing_enabled,
                };
                let subscription_id = self.session_id_handle.next();
                session.create_subscription(subscription_id, params.clone());
                ResponseMessage::CreateSubscription(CreateSubscriptionResponse {
                    response_header: ResponseHeader::new_good(request_handle),
                    subscription_id,
                    revised_publishing_interval: params.publishing_interval_ms,
                    revised_lifetime_count: params.max_lifetime_count,
                    revised_max_keep_alive_count: params.max_keep_alive_count,
                })
            }
            RequestMessage::DeleteSubscriptions(req) => {
                let session = match self.find_by_token(&req.request_header.authentication_token) {
                    Ok(s) => s,
                    Err(e) => return fault(request_handle, (&e).into()),
                };
                let results = session.delete_subscriptions(&req.subscription_ids);
                ResponseMessage::DeleteSubscriptions(DeleteSubscriptionsResponse {
                    response_header: ResponseHeader::new_good(request_handle),
                    results,
                })
            }
            RequestMessage::CreateMonitoredItems(req) => {
                let session = match self.find_by_token(&req.request_header.authentication_token) {
                    Ok(s) => s,
                    Err(e) => return fault(request_handle, (&e).into()),
                };
                match session.create_monitored_items(req.subscription_id, req.items_to_create) {
                    Ok(results) => ResponseMessage::CreateMonitoredItems(
                        opcua_types::services::CreateMonitoredItemsResponse {
                            response_header: ResponseHeader::new_good(request_handle),
                            results,
                        },
                    ),
                    Err(e) => fault(request_handle, (&e).into()),
                }
            }
            RequestMessage::DeleteMonitoredItems(req) => {
                let session = match self.find_by_token(&req.request_header.authentication_token) {
                    Ok(s) => s,
                    Err(e) => return fault(request_handle, (&e).into()),
                };
                match session.delete_monitored_items(req.subscription_id, &req.monitored_item_ids) {
                    Ok(results) => ResponseMessage::DeleteMonitoredItems(
                        opcua_types::services::DeleteMonitoredItemsResponse {
                            response_header: ResponseHeader::new_good(request_handle),
                            results,
                        },
                    ),
                    Err(e) => fault(request_handle, (&e).into()),
                }
            }
            RequestMessage::Publish(req) => {
                let session = match self.find_by_token(&req.request_header.authentication_token) {
                    Ok(s) => s,
                    Err(e) => return fault(request_handle, (&e).into()),
                };
                match session.publish(req) {
                    Ok(rx) => match rx.await {
                        Ok(response) => ResponseMessage::Publish(response),
                        Err(_) => fault(request_handle, StatusCode::BadNoSubscription),
                    },
                    // A Publish against an already-closed session reports
                    // BadNoSubscription, not the session-not-found/closed
                    // fault other services would give.
                    Err(Error::SessionClosed) => fault(request_handle, StatusCode::BadNoSubscription),
                    Err(e) => fault(request_handle, (&e).into()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerCapabilities;
    use crate::handlers::MonitoringParameters;
    use opcua_types::services::{ReadValueId, RequestHeader};

    struct NoopHandlers;

    impl SubscriptionHandlers for NoopHandlers {
        fn create_monitored_item(
            &self,
            _item: &ReadValueId,
            _attribute_kind: opcua_types::services::AttributeKind,
            _params: &MonitoringParameters,
        ) -> (StatusCode, Option<Arc<dyn crate::handlers::MonitoredItemHandle>>) {
            (StatusCode::Good, None)
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(
            ServerCapabilities::default(),
            vec![EndpointDescription {
                endpoint_url: "opc.tcp://localhost:4840".into(),
            }],
            Arc::new(NoopHandlers),
        )
    }

    #[tokio::test]
    async fn create_session_then_create_subscription_round_trip() {
        let manager = manager();
        let create = manager
            .dispatch(RequestMessage::CreateSession(CreateSessionRequest {
                request_header: RequestHeader::default(),
                endpoint_url: "opc.tcp://localhost:4840".into(),
                client_description: String::new(),
                session_name: "test".into(),
                requested_session_timeout: 60_000.0,
                max_response_message_size: 0,
            }))
            .await;
        let token = match create {
            ResponseMessage::CreateSession(resp) => resp.authentication_token,
            other => panic!("unexpected response: {other:?}"),
        };
        let subscribe = manager
            .dispatch(RequestMessage::CreateSubscription(
                opcua_types::services::CreateSubscriptionRequest {
                    request_header: RequestHeader {
                        authentication_token: token,
                        ..Default::default()
                    },
                    requested_publishing_interval: 100.0,
                    requested_lifetime_count: 10,
                    requested_max_keep_alive_count: 3,
                    max_notifications_per_publish: 0,
                    publishing_enabled: true,
                    priority: 0,
                },
            ))
            .await;
        match subscribe {
            ResponseMessage::CreateSubscription(resp) => {
                assert!(resp.response_header.service_result.is_good());
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert_eq!(manager.session_count(), 1);
    }

    #[tokio::test]
    async fn unknown_token_yields_fault() {
        let manager = manager();
        let response = manager
            .dispatch(RequestMessage::CloseSession(
                opcua_types::services::CloseSessionRequest {
                    request_header: RequestHeader {
                        authentication_token: NodeId::new(0, 12345),
                        ..Default::default()
                    },
                    delete_subscriptions: true,
                },
            ))
            .await;
        match response {
            ResponseMessage::ServiceFault(fault) => {
                assert_eq!(fault.response_header.service_result, StatusCode::BadSessionIdInvalid);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_endpoint_is_rejected() {
        let manager = manager();
        let response = manager
            .dispatch(RequestMessage::CreateSession(CreateSessionRequest {
                request_header: RequestHeader::default(),
                endpoint_url: "opc.tcp://wrong-host:4840".into(),
                client_description: String::new(),
                session_name: "test".into(),
                requested_session_timeout: 60_000.0,
                max_response_message_size: 0,
            }))
            .await;
        assert!(matches!(response, ResponseMessage::ServiceFault(_)));
    }
}
