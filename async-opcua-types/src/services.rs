//! Service message shapes exchanged between client and server across the
//! publish/subscribe boundary: `CreateSubscription`, `CreateMonitoredItems`,
//! `DeleteMonitoredItems`, `Publish`, and their common header types.
//!
//! This is the service subset the subscription engine actually uses, hand
//! written rather than generated from an XML type dictionary -- the full
//! service table (Read, Browse, Call, ...) belongs to the embedding
//! application.

use std::io::{Read, Write};

use chrono::{DateTime, Utc};

use crate::context::Context;
use crate::encoding::{read_array, write_array, BinaryDecodable, BinaryEncodable};
use crate::error::EncodingResult;
use crate::node_id::NodeId;
use crate::notification_message::NotificationMessage;
use crate::status_code::StatusCode;

/// Which OPC UA attribute a monitored item observes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    /// The node's `Value` attribute -- produces `DataValue`s.
    Value,
    /// The node's `EventNotifier` attribute -- produces event field tuples.
    EventNotifier,
}

/// Whether a monitored item reports values or is disabled/sampling only.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MonitoringMode {
    /// The item is not sampled at all.
    Disabled,
    /// The item is sampled but notifications are not queued for publishing.
    Sampling,
    /// The item is sampled and notifications are queued and published.
    #[default]
    Reporting,
}

/// Which timestamps a read or monitored item response should carry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum TimestampsToReturn {
    /// Only the source timestamp.
    Source,
    /// Only the server timestamp.
    Server,
    /// Both timestamps.
    #[default]
    Both,
    /// Neither timestamp.
    Neither,
}

/// A request header, carried on every service call. Only the fields the
/// subscription/session engine actually consumes are modeled: the
/// authentication token naming the session, and a client-supplied timeout
/// hint used by the pending-Publish-request timer.
#[derive(Debug, Clone, Default)]
pub struct RequestHeader {
    /// Opaque authentication token naming the session this request belongs
    /// to. Validated only for equality against the session registry.
    pub authentication_token: NodeId,
    /// Timestamp the request was sent, for diagnostics only.
    pub timestamp: Option<DateTime<Utc>>,
    /// Client-assigned request handle, echoed back in the response header.
    pub request_handle: u32,
    /// Client's timeout hint in milliseconds. `0` means no timeout.
    pub timeout_hint: u32,
}

/// A response header, carried on every service response.
#[derive(Debug, Clone)]
pub struct ResponseHeader {
    /// Timestamp the response was generated.
    pub timestamp: DateTime<Utc>,
    /// Echoes the request's `request_handle`.
    pub request_handle: u32,
    /// Overall outcome of the service call.
    pub service_result: StatusCode,
}

impl ResponseHeader {
    /// Build a response header with the given result, stamped `now`.
    pub fn new_good(request_handle: u32) -> Self {
        Self {
            timestamp: Utc::now(),
            request_handle,
            service_result: StatusCode::Good,
        }
    }

    /// Build a response header carrying a `Bad*` service result.
    pub fn new_service_result(request_handle: u32, service_result: StatusCode) -> Self {
        Self {
            timestamp: Utc::now(),
            request_handle,
            service_result,
        }
    }
}

/// Identifies one attribute of one node to read or monitor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadValueId {
    /// The node to read/monitor.
    pub node_id: NodeId,
    /// The attribute id (`Value` = 13, `EventNotifier` = 12 in the real
    /// standard; this workspace only distinguishes the two it supports,
    /// see [`AttributeKind`]).
    pub attribute_id: u32,
    /// Index range for array-valued attributes; not interpreted by this
    /// workspace's engine, forwarded opaquely to the handler.
    pub index_range: Option<String>,
}

/// Per-item monitoring parameters requested by the client.
#[derive(Debug, Clone, Default)]
pub struct MonitoringParameters {
    /// Client handle the client chose to disambiguate this item in
    /// notifications.
    pub client_handle: u32,
    /// Requested sampling interval in milliseconds.
    pub sampling_interval: f64,
    /// An encoded filter (e.g. a data change filter or event filter).
    /// `None` selects the attribute's default filter.
    pub filter: Option<crate::extension_object::ExtensionObject>,
    /// Requested queue size for this item's notification queue.
    pub queue_size: u32,
    /// Whether to discard the oldest queued notification (`true`) or the
    /// newest (`false`) on queue overflow.
    pub discard_oldest: bool,
}

/// One item of a `CreateMonitoredItems` request.
#[derive(Debug, Clone)]
pub struct MonitoredItemCreateRequest {
    /// The attribute to monitor.
    pub item_to_monitor: ReadValueId,
    /// Requested monitoring mode.
    pub monitoring_mode: MonitoringMode,
    /// Requested parameters.
    pub requested_parameters: MonitoringParameters,
}

/// Per-item result of a `CreateMonitoredItems` request.
#[derive(Debug, Clone)]
pub struct MonitoredItemCreateResult {
    /// Outcome of creating this item.
    pub status_code: StatusCode,
    /// Server-assigned monitored item id (valid only if `status_code` is
    /// good).
    pub monitored_item_id: u32,
    /// Revised sampling interval (the server may round up from the
    /// request).
    pub revised_sampling_interval: f64,
    /// Revised queue size.
    pub revised_queue_size: u32,
    /// Revised filter result, if the filter itself carries revisable
    /// parameters. Opaque to this workspace.
    pub filter_result: Option<crate::extension_object::ExtensionObject>,
}

/// `CreateMonitoredItems` request.
#[derive(Debug, Clone)]
pub struct CreateMonitoredItemsRequest {
    /// Header.
    pub request_header: RequestHeader,
    /// The subscription to attach the items to.
    pub subscription_id: u32,
    /// Which timestamps to include in reported values.
    pub timestamps_to_return: TimestampsToReturn,
    /// The items to create.
    pub items_to_create: Vec<MonitoredItemCreateRequest>,
}

/// `CreateMonitoredItems` response.
#[derive(Debug, Clone)]
pub struct CreateMonitoredItemsResponse {
    /// Header.
    pub response_header: ResponseHeader,
    /// Per-item results, positionally aligned with the request's
    /// `items_to_create`.
    pub results: Vec<MonitoredItemCreateResult>,
}

/// `DeleteMonitoredItems` request.
#[derive(Debug, Clone)]
pub struct DeleteMonitoredItemsRequest {
    /// Header.
    pub request_header: RequestHeader,
    /// Owning subscription.
    pub subscription_id: u32,
    /// Server-assigned ids of the items to delete.
    pub monitored_item_ids: Vec<u32>,
}

/// `DeleteMonitoredItems` response.
#[derive(Debug, Clone)]
pub struct DeleteMonitoredItemsResponse {
    /// Header.
    pub response_header: ResponseHeader,
    /// Per-item results, positionally aligned with the request's
    /// `monitored_item_ids`. `BadMonitoredItemIdInvalid` for unknown ids.
    pub results: Vec<StatusCode>,
}

/// `CreateSubscription` request.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionRequest {
    /// Header.
    pub request_header: RequestHeader,
    /// Requested publishing interval, milliseconds.
    pub requested_publishing_interval: f64,
    /// Requested lifetime count, in publishing intervals.
    pub requested_lifetime_count: u32,
    /// Requested keep-alive count, in publishing intervals.
    pub requested_max_keep_alive_count: u32,
    /// Requested chunking cap for notifications per publish.
    pub max_notifications_per_publish: u32,
    /// Whether publishing starts enabled.
    pub publishing_enabled: bool,
    /// Relative priority among this session's subscriptions.
    pub priority: u8,
}

/// `CreateSubscription` response.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionResponse {
    /// Header.
    pub response_header: ResponseHeader,
    /// Server-assigned subscription id.
    pub subscription_id: u32,
    /// Revised publishing interval.
    pub revised_publishing_interval: f64,
    /// Revised lifetime count.
    pub revised_lifetime_count: u32,
    /// Revised keep-alive count.
    pub revised_max_keep_alive_count: u32,
}

/// `DeleteSubscriptions` request.
#[derive(Debug, Clone)]
pub struct DeleteSubscriptionsRequest {
    /// Header.
    pub request_header: RequestHeader,
    /// Subscription ids to delete.
    pub subscription_ids: Vec<u32>,
}

/// `DeleteSubscriptions` response.
#[derive(Debug, Clone)]
pub struct DeleteSubscriptionsResponse {
    /// Header.
    pub response_header: ResponseHeader,
    /// Per-id results.
    pub results: Vec<StatusCode>,
}

/// One subscription's acknowledgement of a previously-published sequence
/// number, carried in a `Publish` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionAcknowledgement {
    /// The subscription being acknowledged.
    pub subscription_id: u32,
    /// The sequence number being acknowledged.
    pub sequence_number: u32,
}

/// `Publish` request: reserves capacity for one server-initiated
/// notification message.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    /// Header. `timeout_hint` governs how long this request may sit
    /// unanswered before the session times it out.
    pub request_header: RequestHeader,
    /// Acknowledgements of previously-delivered notification messages.
    pub subscription_acknowledgements: Vec<SubscriptionAcknowledgement>,
}

/// `Publish` response.
#[derive(Debug, Clone)]
pub struct PublishResponse {
    /// Header. `service_result` is `BadNoSubscription` if the session has
    /// no subscriptions (or has been closed), `BadTimeout` if this request
    /// aged out waiting for a subscription to publish.
    pub response_header: ResponseHeader,
    /// The subscription that produced this message.
    pub subscription_id: u32,
    /// Sequence numbers retained (unacknowledged) by that subscription at
    /// the moment this message was built.
    pub available_sequence_numbers: Vec<u32>,
    /// Whether the subscription had more queued notifications beyond what
    /// fit in this message.
    pub more_notifications: bool,
    /// The notification message itself.
    pub notification_message: Option<NotificationMessage>,
    /// Per-acknowledgement results, positionally aligned with the
    /// request's `subscription_acknowledgements`.
    pub results: Vec<StatusCode>,
}

impl BinaryEncodable for ReadValueId {
    fn encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
        self.node_id.encode(stream, ctx)?;
        self.attribute_id.encode(stream, ctx)?;
        crate::encoding::write_string(stream, self.index_range.as_deref())
    }
}

impl BinaryDecodable for ReadValueId {
    fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
        Ok(Self {
            node_id: NodeId::decode(stream, ctx)?,
            attribute_id: u32::decode(stream, ctx)?,
            index_range: crate::encoding::read_string(stream, 0)?,
        })
    }
}

impl BinaryEncodable for SubscriptionAcknowledgement {
    fn encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
        self.subscription_id.encode(stream, ctx)?;
        self.sequence_number.encode(stream, ctx)
    }
}

impl BinaryDecodable for SubscriptionAcknowledgement {
    fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
        Ok(Self {
            subscription_id: u32::decode(stream, ctx)?,
            sequence_number: u32::decode(stream, ctx)?,
        })
    }
}

impl BinaryEncodable for PublishRequest {
    fn encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
        self.request_header.authentication_token.encode(stream, ctx)?;
        self.request_header.request_handle.encode(stream, ctx)?;
        self.request_header.timeout_hint.encode(stream, ctx)?;
        write_array(stream, ctx, &Some(self.subscription_acknowledgements.clone()))
    }
}

impl BinaryDecodable for PublishRequest {
    fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
        let authentication_token = NodeId::decode(stream, ctx)?;
        let request_handle = u32::decode(stream, ctx)?;
        let timeout_hint = u32::decode(stream, ctx)?;
        let subscription_acknowledgements = read_array(stream, ctx, 0)?.unwrap_or_default();
        Ok(Self {
            request_header: RequestHeader {
                authentication_token,
                timestamp: None,
                request_handle,
                timeout_hint,
            },
            subscription_acknowledgements,
        })
    }
}

/// A generic service failure, carried instead of the expected response
/// type when a request cannot be serviced at all (e.g. the authentication
/// token names no session).
#[derive(Debug, Clone)]
pub struct ServiceFault {
    /// Header; `service_result` carries the failure code.
    pub response_header: ResponseHeader,
}

/// One endpoint a server offers, as returned from `CreateSession`.
/// Security policy/certificate negotiation is out of scope here (secure
/// channel establishment is the external transport's concern), so this
/// carries only what the session registry itself hands back.
#[derive(Debug, Clone, Default)]
pub struct EndpointDescription {
    /// The URL clients should use to reach this endpoint.
    pub endpoint_url: String,
}

/// `CreateSession` request. No secure-channel/certificate fields: those
/// belong to the external transport layer, not the session registry.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionRequest {
    /// Header. Carries no meaningful authentication token yet -- the
    /// session doesn't exist until this call returns one.
    pub request_header: RequestHeader,
    /// The endpoint URL the client is connecting to.
    pub endpoint_url: String,
    /// Free-text client description, for diagnostics only.
    pub client_description: String,
    /// Requested session name.
    pub session_name: String,
    /// Requested timeout, milliseconds. The registry clamps this to its
    /// configured maximum.
    pub requested_session_timeout: f64,
    /// Cap the server should respect on response message size.
    pub max_response_message_size: u32,
}

/// `CreateSession` response.
#[derive(Debug, Clone)]
pub struct CreateSessionResponse {
    /// Header.
    pub response_header: ResponseHeader,
    /// Server-assigned session id (opaque, numeric node id).
    pub session_id: NodeId,
    /// Opaque authentication token the client must present on every
    /// subsequent request against this session.
    pub authentication_token: NodeId,
    /// Timeout actually granted, milliseconds.
    pub revised_session_timeout: f64,
    /// Random bytes (>= 32) identifying this session instance.
    pub server_nonce: Vec<u8>,
    /// Endpoints matching the requested URL.
    pub server_endpoints: Vec<EndpointDescription>,
}

/// `ActivateSession` request. Identity-token/signature validation is a
/// non-goal (no crypto in this workspace); activation here only confirms
/// the authentication token and records locale preferences.
#[derive(Debug, Clone, Default)]
pub struct ActivateSessionRequest {
    /// Header; `authentication_token` names the session to activate.
    pub request_header: RequestHeader,
    /// Client locale preferences, most-preferred first.
    pub locale_ids: Vec<String>,
}

/// `ActivateSession` response.
#[derive(Debug, Clone)]
pub struct ActivateSessionResponse {
    /// Header.
    pub response_header: ResponseHeader,
    /// A fresh server nonce for this activation.
    pub server_nonce: Vec<u8>,
}

/// `CloseSession` request.
#[derive(Debug, Clone, Default)]
pub struct CloseSessionRequest {
    /// Header; `authentication_token` names the session to close.
    pub request_header: RequestHeader,
    /// Whether the session's subscriptions should be deleted along with
    /// it (as opposed to outliving it, per the standard's "publishing
    /// subscription" transfer allowance -- this workspace always deletes,
    /// since subscription transfer between sessions is a non-goal).
    pub delete_subscriptions: bool,
}

/// `CloseSession` response.
#[derive(Debug, Clone)]
pub struct CloseSessionResponse {
    /// Header.
    pub response_header: ResponseHeader,
}

/// The envelope around every request this workspace's transport channel
/// carries, trimmed to the service subset the subscription engine uses --
/// everything else (Read, Browse, Call, ...) is the embedding
/// application's concern and has no variant here.
#[derive(Debug, Clone)]
pub enum RequestMessage {
    /// `CreateSession`.
    CreateSession(CreateSessionRequest),
    /// `ActivateSession`.
    ActivateSession(ActivateSessionRequest),
    /// `CloseSession`.
    CloseSession(CloseSessionRequest),
    /// `CreateSubscription`.
    CreateSubscription(CreateSubscriptionRequest),
    /// `DeleteSubscriptions`.
    DeleteSubscriptions(DeleteSubscriptionsRequest),
    /// `CreateMonitoredItems`.
    CreateMonitoredItems(CreateMonitoredItemsRequest),
    /// `DeleteMonitoredItems`.
    DeleteMonitoredItems(DeleteMonitoredItemsRequest),
    /// `Publish`.
    Publish(PublishRequest),
}

impl RequestMessage {
    /// The common request header, regardless of which service this is.
    pub fn request_header(&self) -> &RequestHeader {
        match self {
            RequestMessage::CreateSession(r) => &r.request_header,
            RequestMessage::ActivateSession(r) => &r.request_header,
            RequestMessage::CloseSession(r) => &r.request_header,
            RequestMessage::CreateSubscription(r) => &r.request_header,
            RequestMessage::DeleteSubscriptions(r) => &r.request_header,
            RequestMessage::CreateMonitoredItems(r) => &r.request_header,
            RequestMessage::DeleteMonitoredItems(r) => &r.request_header,
            RequestMessage::Publish(r) => &r.request_header,
        }
    }
}

/// The envelope around every response this workspace's transport channel
/// carries. See [`RequestMessage`].
#[derive(Debug, Clone)]
pub enum ResponseMessage {
    /// `CreateSession`.
    CreateSession(CreateSessionResponse),
    /// `ActivateSession`.
    ActivateSession(ActivateSessionResponse),
    /// `CloseSession`.
    CloseSession(CloseSessionResponse),
    /// `CreateSubscription`.
    CreateSubscription(CreateSubscriptionResponse),
    /// `DeleteSubscriptions`.
    DeleteSubscriptions(DeleteSubscriptionsResponse),
    /// `CreateMonitoredItems`.
    CreateMonitoredItems(CreateMonitoredItemsResponse),
    /// `DeleteMonitoredItems`.
    DeleteMonitoredItems(DeleteMonitoredItemsResponse),
    /// `Publish`.
    Publish(PublishResponse),
    /// A service fault: the requested service could not be dispatched at
    /// all (e.g. unknown authentication token). Per §4.2, when a caller
    /// expected a different response type but receives this, the fault's
    /// header is substituted into a blank response of the expected type
    /// so upper layers don't need to special-case it.
    ServiceFault(ServiceFault),
}

impl ResponseMessage {
    /// The common response header, regardless of which service this is.
    pub fn response_header(&self) -> &ResponseHeader {
        match self {
            ResponseMessage::CreateSession(r) => &r.response_header,
            ResponseMessage::ActivateSession(r) => &r.response_header,
            ResponseMessage::CloseSession(r) => &r.response_header,
            ResponseMessage::CreateSubscription(r) => &r.response_header,
            ResponseMessage::DeleteSubscriptions(r) => &r.response_header,
            ResponseMessage::CreateMonitoredItems(r) => &r.response_header,
            ResponseMessage::DeleteMonitoredItems(r) => &r.response_header,
            ResponseMessage::Publish(r) => &r.response_header,
            ResponseMessage::ServiceFault(r) => &r.response_header,
        }
    }

    /// Extract a `Publish` response, substituting a blank one carrying the
    /// fault's header if this was actually a `ServiceFault`.
    pub fn into_publish(self, request_handle: u32) -> PublishResponse {
        match self {
            ResponseMessage::Publish(r) => r,
            other => PublishResponse {
                response_header: other.response_header().clone(),
                subscription_id: 0,
                available_sequence_numbers: Vec::new(),
                more_notifications: false,
                notification_message: None,
                results: Vec::new(),
            }
            .with_request_handle(request_handle),
        }
    }
}

impl PublishResponse {
    fn with_request_handle(mut self, request_handle: u32) -> Self {
        self.response_header.request_handle = request_handle;
        self
    }
}
