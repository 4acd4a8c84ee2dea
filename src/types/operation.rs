//! Operation lifecycle status and snapshot wire types.
//!
//! [`OperationStatus`] is the lifecycle state machine; [`OperationSnapshot`]
//! is the point-in-time view of an operation as returned by the server,
//! both from a synchronous lookup and inside `operation` events.
//!
//! # Serialization
//!
//! Snapshots use `#[serde(rename_all = "camelCase")]`; the status enum
//! serializes as lowercase strings matching its `Display` output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::Error;

/// Lifecycle status of a server-side operation.
///
/// Terminal states (`Success`, `Failure`, `Cancelled`) reject all further
/// transitions; once an operation reaches one of them its state never
/// changes again.
///
/// # State Machine
///
/// ```text
/// Pending -> Running, Success, Failure, Cancelled
/// Running -> Success, Failure, Cancelled
/// Success / Failure / Cancelled -> (terminal, no transitions)
/// ```
///
/// # Examples
///
/// ```
/// use opstream::OperationStatus;
///
/// let status = OperationStatus::Pending;
/// assert!(!status.is_terminal());
/// assert!(status.can_transition_to(OperationStatus::Running));
/// assert!(!OperationStatus::Success.can_transition_to(OperationStatus::Running));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// The operation has been accepted but not started.
    Pending,
    /// The operation is executing on the server.
    Running,
    /// The operation finished successfully (terminal).
    Success,
    /// The operation failed (terminal).
    Failure,
    /// The operation was cancelled (terminal).
    Cancelled,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl OperationStatus {
    /// Returns `true` if this status is terminal.
    ///
    /// # Examples
    ///
    /// ```
    /// use opstream::OperationStatus;
    ///
    /// assert!(!OperationStatus::Running.is_terminal());
    /// assert!(OperationStatus::Cancelled.is_terminal());
    /// ```
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }

    /// Returns `true` if this status is a failed terminal state
    /// (`Failure` or `Cancelled`).
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure | Self::Cancelled)
    }

    /// Returns `true` if transitioning from this status to `next` is valid.
    ///
    /// Self-transitions are rejected; terminal states reject everything.
    pub fn can_transition_to(&self, next: Self) -> bool {
        if *self == next {
            return false;
        }

        match self {
            Self::Pending => matches!(
                next,
                Self::Running | Self::Success | Self::Failure | Self::Cancelled
            ),
            Self::Running => matches!(next, Self::Success | Self::Failure | Self::Cancelled),
            Self::Success | Self::Failure | Self::Cancelled => false,
        }
    }
}

/// Point-in-time view of a server-side operation.
///
/// Returned by state-changing requests, by the synchronous point lookup,
/// and carried as the metadata of `operation` events.
///
/// Invariant: `err` is `Some` exactly when `status.is_failure()`.
///
/// # Examples
///
/// ```
/// use opstream::{OperationSnapshot, OperationStatus};
///
/// let snapshot = OperationSnapshot::new("op-1", OperationStatus::Pending);
/// let json = serde_json::to_value(&snapshot).unwrap();
/// assert_eq!(json["id"], "op-1");
/// assert_eq!(json["status"], "pending");
/// assert!(json.get("err").is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSnapshot {
    /// Unique identifier of the operation.
    pub id: String,

    /// Human-readable description of what the operation does.
    #[serde(default)]
    pub description: String,

    /// Current lifecycle status.
    pub status: OperationStatus,

    /// Failure detail; populated only for failed terminal states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,

    /// Job-specific payload, opaque to this crate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Whether the server accepts cancellation requests for this operation.
    #[serde(default)]
    pub may_cancel: bool,

    /// When the operation was created.
    pub created_at: DateTime<Utc>,

    /// When the operation last changed.
    pub updated_at: DateTime<Utc>,
}

impl OperationSnapshot {
    /// Creates a snapshot with the given id and status and empty payload
    /// fields, timestamped now.
    pub fn new(id: impl Into<String>, status: OperationStatus) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            description: String::new(),
            status,
            err: None,
            metadata: None,
            may_cancel: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the failure detail. Intended for test fixtures and event
    /// producers; the tracking core itself only reads `err`.
    pub fn with_err(mut self, err: impl Into<String>) -> Self {
        self.err = Some(err.into());
        self
    }

    /// Returns the wait outcome encoded in this snapshot, or `None` when
    /// the operation has not reached a terminal state yet.
    ///
    /// A failed terminal state with an empty failure detail still yields
    /// an error, with a message synthesized from the status.
    pub fn outcome(&self) -> Option<Result<(), Error>> {
        if !self.status.is_terminal() {
            return None;
        }

        Some(match &self.err {
            Some(message) => Err(Error::OperationFailed {
                id: self.id.clone(),
                message: message.clone(),
            }),
            None if self.status.is_failure() => Err(Error::OperationFailed {
                id: self.id.clone(),
                message: match self.status {
                    OperationStatus::Cancelled => "operation cancelled".to_string(),
                    _ => "operation failed".to_string(),
                },
            }),
            None => Ok(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_matches_serde() {
        for (status, expected) in [
            (OperationStatus::Pending, "pending"),
            (OperationStatus::Running, "running"),
            (OperationStatus::Success, "success"),
            (OperationStatus::Failure, "failure"),
            (OperationStatus::Cancelled, "cancelled"),
        ] {
            assert_eq!(status.to_string(), expected);
            assert_eq!(serde_json::to_value(status).unwrap(), expected);
        }
    }

    #[test]
    fn terminal_states() {
        assert!(!OperationStatus::Pending.is_terminal());
        assert!(!OperationStatus::Running.is_terminal());
        assert!(OperationStatus::Success.is_terminal());
        assert!(OperationStatus::Failure.is_terminal());
        assert!(OperationStatus::Cancelled.is_terminal());
    }

    #[test]
    fn failure_states() {
        assert!(!OperationStatus::Success.is_failure());
        assert!(OperationStatus::Failure.is_failure());
        assert!(OperationStatus::Cancelled.is_failure());
    }

    #[test]
    fn valid_transitions_from_pending() {
        let pending = OperationStatus::Pending;
        assert!(pending.can_transition_to(OperationStatus::Running));
        assert!(pending.can_transition_to(OperationStatus::Success));
        assert!(pending.can_transition_to(OperationStatus::Failure));
        assert!(pending.can_transition_to(OperationStatus::Cancelled));
        assert!(!pending.can_transition_to(OperationStatus::Pending));
    }

    #[test]
    fn terminal_states_reject_all_transitions() {
        for terminal in [
            OperationStatus::Success,
            OperationStatus::Failure,
            OperationStatus::Cancelled,
        ] {
            for target in [
                OperationStatus::Pending,
                OperationStatus::Running,
                OperationStatus::Success,
                OperationStatus::Failure,
                OperationStatus::Cancelled,
            ] {
                assert!(
                    !terminal.can_transition_to(target),
                    "{terminal} should not transition to {target}"
                );
            }
        }
    }

    #[test]
    fn snapshot_serialization() {
        let snapshot = OperationSnapshot::new("op-42", OperationStatus::Running);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["id"], "op-42");
        assert_eq!(json["status"], "running");
        assert_eq!(json["mayCancel"], false);
        assert!(json.get("err").is_none());
        assert!(json.get("metadata").is_none());
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn snapshot_round_trip() {
        let snapshot = OperationSnapshot::new("op-7", OperationStatus::Failure)
            .with_err("ran out of disk space");
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: OperationSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "op-7");
        assert_eq!(back.status, OperationStatus::Failure);
        assert_eq!(back.err.as_deref(), Some("ran out of disk space"));
    }

    #[test]
    fn outcome_for_non_terminal_is_none() {
        let snapshot = OperationSnapshot::new("op-1", OperationStatus::Running);
        assert!(snapshot.outcome().is_none());
    }

    #[test]
    fn outcome_for_success_is_ok() {
        let snapshot = OperationSnapshot::new("op-1", OperationStatus::Success);
        assert!(matches!(snapshot.outcome(), Some(Ok(()))));
    }

    #[test]
    fn outcome_surfaces_failure_detail_verbatim() {
        let snapshot =
            OperationSnapshot::new("op-1", OperationStatus::Failure).with_err("boom");
        match snapshot.outcome() {
            Some(Err(Error::OperationFailed { id, message })) => {
                assert_eq!(id, "op-1");
                assert_eq!(message, "boom");
            },
            other => panic!("expected OperationFailed, got: {other:?}"),
        }
    }

    #[test]
    fn outcome_synthesizes_message_for_bare_failure() {
        let snapshot = OperationSnapshot::new("op-1", OperationStatus::Cancelled);
        match snapshot.outcome() {
            Some(Err(Error::OperationFailed { message, .. })) => {
                assert_eq!(message, "operation cancelled");
            },
            other => panic!("expected OperationFailed, got: {other:?}"),
        }
    }
}
