//! Notification payloads carried inside a [`NotificationMessage`].
//!
//! `data_change`/`status_change`/`keep_alive` constructors, plus
//! `into_notifications` extraction via [`crate::match_extension_object_owned`].

use std::io::{Read, Write};

use chrono::{DateTime, Utc};

use crate::context::Context;
use crate::data_value::DataValue;
use crate::encoding::{read_array, write_array, BinaryDecodable, BinaryEncodable};
use crate::error::EncodingResult;
use crate::extension_object::{ExtensionObject, ExtensionObjectBody};
use crate::node_id::NodeId;
use crate::status_code::StatusCode;
use crate::variant::Variant;

/// One item's new value within a [`DataChangeNotification`], tagged by the
/// client handle the client chose when creating the monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemNotification {
    /// The client handle identifying which monitored item this belongs to.
    pub client_handle: u32,
    /// The new value.
    pub value: DataValue,
}

impl BinaryEncodable for MonitoredItemNotification {
    fn encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
        self.client_handle.encode(stream, ctx)?;
        self.value.encode(stream, ctx)
    }
}

impl BinaryDecodable for MonitoredItemNotification {
    fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
        Ok(Self {
            client_handle: u32::decode(stream, ctx)?,
            value: DataValue::decode(stream, ctx)?,
        })
    }
}

/// A batch of data value changes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataChangeNotification {
    /// The changed values.
    pub monitored_items: Option<Vec<MonitoredItemNotification>>,
    /// Diagnostic info parallel to `monitored_items`; always empty in this
    /// workspace (diagnostics are not modeled).
    pub diagnostic_infos: Option<Vec<StatusCode>>,
}

impl BinaryEncodable for DataChangeNotification {
    fn encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
        write_array(stream, ctx, &self.monitored_items)?;
        write_array(stream, ctx, &self.diagnostic_infos.clone().map(|v| v.into_iter().map(|s| s.0).collect::<Vec<_>>()))
    }
}

impl BinaryDecodable for DataChangeNotification {
    fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
        let monitored_items = read_array(stream, ctx, 0)?;
        let diagnostic_infos: Option<Vec<u32>> = read_array(stream, ctx, 0)?;
        Ok(Self {
            monitored_items,
            diagnostic_infos: diagnostic_infos.map(|v| v.into_iter().map(StatusCode).collect()),
        })
    }
}

impl ExtensionObjectBody for DataChangeNotification {
    fn type_id() -> NodeId {
        NodeId::core(811)
    }
}

/// A single event occurrence: one variant per requested select clause.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFieldList {
    /// The client handle identifying which monitored item this belongs to.
    pub client_handle: u32,
    /// The event's field values, in select-clause order.
    pub event_fields: Option<Vec<Variant>>,
}

impl BinaryEncodable for EventFieldList {
    fn encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
        self.client_handle.encode(stream, ctx)?;
        write_array(stream, ctx, &self.event_fields)
    }
}

impl BinaryDecodable for EventFieldList {
    fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
        Ok(Self {
            client_handle: u32::decode(stream, ctx)?,
            event_fields: read_array(stream, ctx, 0)?,
        })
    }
}

/// A batch of event occurrences.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventNotificationList {
    /// The events.
    pub events: Option<Vec<EventFieldList>>,
}

impl BinaryEncodable for EventNotificationList {
    fn encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
        write_array(stream, ctx, &self.events)
    }
}

impl BinaryDecodable for EventNotificationList {
    fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
        Ok(Self {
            events: read_array(stream, ctx, 0)?,
        })
    }
}

impl ExtensionObjectBody for EventNotificationList {
    fn type_id() -> NodeId {
        NodeId::core(915)
    }
}

/// Signals that a subscription's status has changed (e.g. it was closed by
/// the server because its lifetime expired).
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChangeNotification {
    /// The new status.
    pub status: StatusCode,
}

impl BinaryEncodable for StatusChangeNotification {
    fn encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
        self.status.0.encode(stream, ctx)
    }
}

impl BinaryDecodable for StatusChangeNotification {
    fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
        Ok(Self {
            status: StatusCode(u32::decode(stream, ctx)?),
        })
    }
}

impl ExtensionObjectBody for StatusChangeNotification {
    fn type_id() -> NodeId {
        NodeId::core(819)
    }
}

/// Sequence number (wraps from `u32::MAX` to `1`, never `0`), publish time,
/// and an ordered list of notification payloads (`DataChange` or `Event`
/// extension objects). Once produced and handed to the dispatcher, a
/// `NotificationMessage` is retained by its subscription until acknowledged
/// or evicted.
#[derive(Debug, Clone)]
pub struct NotificationMessage {
    /// Monotone sequence number for this subscription.
    pub sequence_number: u32,
    /// When this message was published.
    pub publish_time: DateTime<Utc>,
    /// The payloads, or `None` for a keep-alive message.
    pub notification_data: Option<Vec<ExtensionObject>>,
}

impl NotificationMessage {
    /// Build a notification message carrying data-change payloads. Panics
    /// if `data_change_notifications` is empty -- callers must not publish
    /// an empty data-change message (use [`Self::keep_alive`] instead).
    pub fn data_change(
        sequence_number: u32,
        publish_time: DateTime<Utc>,
        data_change_notifications: Vec<MonitoredItemNotification>,
    ) -> Self {
        assert!(
            !data_change_notifications.is_empty(),
            "data_change() requires at least one notification"
        );
        let notification = DataChangeNotification {
            monitored_items: Some(data_change_notifications),
            diagnostic_infos: None,
        };
        Self {
            sequence_number,
            publish_time,
            notification_data: Some(vec![ExtensionObject::from_message(notification)]),
        }
    }

    /// Build a notification message carrying event payloads.
    pub fn event(
        sequence_number: u32,
        publish_time: DateTime<Utc>,
        event_notifications: Vec<EventFieldList>,
    ) -> Self {
        assert!(
            !event_notifications.is_empty(),
            "event() requires at least one notification"
        );
        let notification = EventNotificationList {
            events: Some(event_notifications),
        };
        Self {
            sequence_number,
            publish_time,
            notification_data: Some(vec![ExtensionObject::from_message(notification)]),
        }
    }

    /// Build a status-change notification message.
    pub fn status_change(sequence_number: u32, publish_time: DateTime<Utc>, status: StatusCode) -> Self {
        let notification = StatusChangeNotification { status };
        Self {
            sequence_number,
            publish_time,
            notification_data: Some(vec![ExtensionObject::from_message(notification)]),
        }
    }

    /// Build an empty keep-alive message.
    pub fn keep_alive(sequence_number: u32, publish_time: DateTime<Utc>) -> Self {
        Self {
            sequence_number,
            publish_time,
            notification_data: None,
        }
    }

    /// Whether this message carries no payload (a keep-alive).
    pub fn is_keep_alive(&self) -> bool {
        self.notification_data.is_none()
    }

    fn process_notification(
        n: ExtensionObject,
        data_changes: &mut Vec<DataChangeNotification>,
        events: &mut Vec<EventNotificationList>,
    ) {
        crate::match_extension_object_owned!(n,
            n: DataChangeNotification => data_changes.push(n),
            n: EventNotificationList => events.push(n),
            _ => {
                if n.inner_is::<StatusChangeNotification>() {
                    tracing::debug!("ignoring a status change notification");
                } else {
                    tracing::debug!("ignoring a notification of type {:?}", n.binary_type_id());
                }
            }
        )
    }

    /// Extract data-change and event notifications from the message.
    /// Unrecognized or unparseable notifications are dropped. Returns
    /// `None` if there were no notifications at all (keep-alive messages,
    /// or messages whose only payload was a status change).
    pub fn into_notifications(self) -> Option<(Vec<DataChangeNotification>, Vec<EventNotificationList>)> {
        let notification_data = self.notification_data?;
        let mut data_changes = Vec::with_capacity(notification_data.len());
        let mut events = Vec::with_capacity(notification_data.len());
        for n in notification_data {
            Self::process_notification(n, &mut data_changes, &mut events);
        }
        if data_changes.is_empty() && events.is_empty() {
            None
        } else {
            Some((data_changes, events))
        }
    }

    /// Returns the carried status change, if this message's sole payload is
    /// a `StatusChangeNotification`.
    pub fn status_change_payload(&self) -> Option<StatusCode> {
        let ctx = Context::none();
        self.notification_data.as_ref()?.iter().find_map(|n| {
            n.inner_is::<StatusChangeNotification>()
                .then(|| n.decode_inner::<StatusChangeNotification>(&ctx).ok())
                .flatten()
                .map(|s| s.status)
        })
    }
}

impl BinaryEncodable for NotificationMessage {
    fn encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
        self.sequence_number.encode(stream, ctx)?;
        crate::variant::encode_timestamp(self.publish_time, stream, ctx)?;
        write_array(stream, ctx, &self.notification_data)
    }
}

impl BinaryDecodable for NotificationMessage {
    fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
        let sequence_number = u32::decode(stream, ctx)?;
        let publish_time = crate::variant::decode_timestamp(stream, ctx)?;
        let notification_data = read_array(stream, ctx, 0)?;
        Ok(Self {
            sequence_number,
            publish_time,
            notification_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_change_round_trips_into_notifications() {
        let msg = NotificationMessage::data_change(
            1,
            Utc::now(),
            vec![MonitoredItemNotification {
                client_handle: 5,
                value: DataValue::new_now(Variant::Int32(1)),
            }],
        );
        let (data_changes, events) = msg.into_notifications().unwrap();
        assert_eq!(data_changes.len(), 1);
        assert!(events.is_empty());
        assert_eq!(
            data_changes[0].monitored_items.as_ref().unwrap()[0].client_handle,
            5
        );
    }

    #[test]
    fn keep_alive_has_no_notifications() {
        let msg = NotificationMessage::keep_alive(1, Utc::now());
        assert!(msg.is_keep_alive());
        assert!(msg.into_notifications().is_none());
    }

    #[test]
    fn status_change_is_ignored_by_into_notifications_but_readable_directly() {
        let msg = NotificationMessage::status_change(1, Utc::now(), StatusCode::BadTimeout);
        assert!(msg.clone().into_notifications().is_none());
        assert_eq!(msg.status_change_payload(), Some(StatusCode::BadTimeout));
    }
}
