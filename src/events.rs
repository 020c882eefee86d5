//! Event definitions published to observers.
//!
//! This module defines the `Event` enum delivered through the broadcaster. Status
//! changes and console output travel as independent messages, so a slow consumer
//! may see a final status before a trailing output chunk of the same launch.

use serde::Serialize;

use crate::lifecycle::Status;

/// An event emitted by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A launch moved to a new status.
    StatusChanged { id: String, status: Status },
    /// A chunk of console output (stdout, stderr, or a diagnostic line).
    Output { id: String, text: String },
}

impl Event {
    /// The id of the launch this event belongs to.
    pub fn id(&self) -> &str {
        match self {
            Event::StatusChanged { id, .. } | Event::Output { id, .. } => id,
        }
    }

    pub(crate) fn status(id: &str, status: Status) -> Self {
        Event::StatusChanged {
            id: id.to_string(),
            status,
        }
    }

    pub(crate) fn output(id: &str, text: impl Into<String>) -> Self {
        Event::Output {
            id: id.to_string(),
            text: text.into(),
        }
    }
}
