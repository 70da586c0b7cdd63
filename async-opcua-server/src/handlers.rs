//! The seam between the subscription engine and whatever owns the actual
//! node data: creating a monitored item asks the embedding application
//! whether the node/attribute exists and, if so, how to reach its live
//! value or events.
//!
//! No address space or node manager lives in this workspace (that is the
//! `async-opcua-nodes`/`async-opcua-core-namespace` concern, out of scope
//! here); [`SubscriptionHandlers`] is the minimal trait an embedder
//! implements to plug one in.

use std::sync::Arc;

use opcua_types::data_value::DataValue;
use opcua_types::services::{AttributeKind, MonitoringParameters, ReadValueId};
use opcua_types::status_code::StatusCode;
use opcua_types::variant::Variant;

/// The real OPC UA standard's numeric id for the `Value` attribute.
pub const VALUE_ATTRIBUTE_ID: u32 = 13;
/// The real OPC UA standard's numeric id for the `EventNotifier` attribute.
pub const EVENT_NOTIFIER_ATTRIBUTE_ID: u32 = 12;

/// A sink the subscription engine calls with every new `DataValue` for one
/// `Value`-attribute monitored item.
pub type DataChangeSink = Box<dyn Fn(DataValue) + Send + Sync>;
/// A sink the subscription engine calls with every event firing on one
/// `EventNotifier`-attribute monitored item. `None` fields mean "excluded
/// by the event filter" (a filter is out of scope for evaluation here --
/// the application decides what to send).
pub type EventSink = Box<dyn Fn(Vec<Option<Variant>>) + Send + Sync>;

/// A created monitored item's live end: the application hands back one of
/// these so the engine can register the sink matching the item's attribute
/// kind.
pub trait MonitoredItemHandle: Send + Sync {
    /// Register the delivery sink for a `Value`-attribute item. Called
    /// exactly once, right after creation succeeds. Implementations for
    /// `EventNotifier` items may leave this as a no-op.
    fn subscribe_data_change(&self, _sink: DataChangeSink) {}
    /// Register the delivery sink for an `EventNotifier`-attribute item.
    /// Called exactly once, right after creation succeeds. Implementations
    /// for `Value` items may leave this as a no-op.
    fn subscribe_events(&self, _sink: EventSink) {}
}

/// Application seam invoked while servicing `CreateMonitoredItems`.
pub trait SubscriptionHandlers: Send + Sync {
    /// Validate and activate monitoring for one item. Returns the status to
    /// report for this item and, on success, a handle the engine wires its
    /// delivery sink into.
    fn create_monitored_item(
        &self,
        item: &ReadValueId,
        attribute_kind: AttributeKind,
        params: &MonitoringParameters,
    ) -> (StatusCode, Option<Arc<dyn MonitoredItemHandle>>);
}
