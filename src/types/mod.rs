//! Wire types shared between the core and its transport collaborators.

pub mod event;
pub mod operation;

pub use event::{Event, EventKind};
pub use operation::{OperationSnapshot, OperationStatus};
