// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

#![warn(missing_docs)]

//! Binary encode/decode of the OPC UA values the subscription engine passes
//! across the session/subscription boundary: node identifiers, variants,
//! data values, extension objects, and the handful of service message
//! shapes (`Publish`, `CreateMonitoredItems`, ...) those layers exchange.
//!
//! This crate does not attempt to model the OPC UA information model or
//! the full built-in type table -- only the subset the publish engine, the
//! publish dispatcher, and the client reconciler actually encode, decode,
//! or pass by value.

pub mod basic_types;
pub mod context;
pub mod data_value;
pub mod encoding;
pub mod error;
pub mod extension_object;
mod macros;
pub mod node_id;
pub mod notification_message;
pub mod services;
pub mod status_code;
pub mod variant;

pub use basic_types::{LocalizedText, QualifiedName};
pub use context::Context;
pub use data_value::DataValue;
pub use encoding::{deep_copy, read_array, read_byte_string, read_string, write_array, write_byte_string, write_string, BinaryDecodable, BinaryEncodable};
pub use error::{Error, EncodingResult};
pub use extension_object::{DynEncodable, ExtensionObject, ExtensionObjectBody, ExtensionObjectEncoding};
pub use node_id::{Identifier, NodeId};
pub use notification_message::{
    DataChangeNotification, EventFieldList, EventNotificationList, MonitoredItemNotification,
    NotificationMessage, StatusChangeNotification,
};
pub use services::*;
pub use status_code::{Severity, StatusCode};
pub use variant::Variant;
