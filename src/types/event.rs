//! Event wire types for the multiplexed server event stream.
//!
//! The server announces everything that happens on one shared stream as
//! tagged [`Event`] records. This crate only interprets events of kind
//! [`EventKind::Operation`], whose metadata decodes into an
//! [`OperationSnapshot`]; other kinds are carried opaquely for handlers
//! that subscribe to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::operation::OperationSnapshot;

/// Discriminator for the records carried on the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// An operation changed state; metadata is an operation snapshot.
    Operation,
    /// A resource lifecycle notification (created, deleted, ...).
    Lifecycle,
    /// A server log record forwarded to interested clients.
    Logging,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation => write!(f, "operation"),
            Self::Lifecycle => write!(f, "lifecycle"),
            Self::Logging => write!(f, "logging"),
        }
    }
}

/// One record delivered over the shared event stream.
///
/// # Examples
///
/// ```
/// use opstream::{Event, EventKind};
///
/// let event: Event = serde_json::from_str(
///     r#"{"type":"operation","timestamp":"2026-03-01T10:30:00Z","metadata":{}}"#,
/// )
/// .unwrap();
/// assert_eq!(event.kind, EventKind::Operation);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// What kind of record this is.
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// When the server emitted the event.
    pub timestamp: DateTime<Utc>,

    /// Kind-specific payload.
    #[serde(default)]
    pub metadata: Value,
}

impl Event {
    /// Decodes the metadata as an operation snapshot.
    ///
    /// Returns `None` for non-operation events and for operation events
    /// whose metadata does not decode; a malformed event must never take
    /// down a handler.
    pub fn operation(&self) -> Option<OperationSnapshot> {
        if self.kind != EventKind::Operation {
            return None;
        }

        serde_json::from_value(self.metadata.clone()).ok()
    }

    /// Builds an `operation` event carrying the given snapshot,
    /// timestamped now. Used by event producers and test fixtures.
    pub fn from_operation(snapshot: &OperationSnapshot) -> Self {
        Self {
            kind: EventKind::Operation,
            timestamp: Utc::now(),
            metadata: serde_json::to_value(snapshot).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::operation::OperationStatus;

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(EventKind::Operation).unwrap(),
            "operation"
        );
        assert_eq!(
            serde_json::to_value(EventKind::Lifecycle).unwrap(),
            "lifecycle"
        );
        assert_eq!(serde_json::to_value(EventKind::Logging).unwrap(), "logging");
    }

    #[test]
    fn operation_round_trip_through_event() {
        let snapshot = OperationSnapshot::new("op-1", OperationStatus::Running);
        let event = Event::from_operation(&snapshot);
        assert_eq!(event.kind, EventKind::Operation);

        let decoded = event.operation().expect("metadata should decode");
        assert_eq!(decoded.id, "op-1");
        assert_eq!(decoded.status, OperationStatus::Running);
    }

    #[test]
    fn non_operation_events_decode_to_none() {
        let event = Event {
            kind: EventKind::Logging,
            timestamp: Utc::now(),
            metadata: serde_json::json!({"message": "hello"}),
        };
        assert!(event.operation().is_none());
    }

    #[test]
    fn malformed_operation_metadata_decodes_to_none() {
        let event = Event {
            kind: EventKind::Operation,
            timestamp: Utc::now(),
            metadata: serde_json::json!("not an object"),
        };
        assert!(event.operation().is_none());
    }

    #[test]
    fn event_wire_format() {
        let snapshot = OperationSnapshot::new("op-9", OperationStatus::Success);
        let event = Event::from_operation(&snapshot);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "operation");
        assert_eq!(json["metadata"]["id"], "op-9");
        assert!(json.get("timestamp").is_some());
    }
}
