//! Lifecycle states of a supervised launch.
//!
//! This module defines the small status vocabulary reported to observers (`Status`),
//! the inputs that drive a launch through its lifecycle (`Transition`), and the pure
//! transition function that decides where each input leads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The lifecycle status of a launch as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Nothing is running (initial and terminal state).
    Stopped,
    /// The process was spawned and is inside its grace period.
    Starting,
    /// The process survived the grace period.
    Running,
    /// A stop was requested and tree termination is in flight.
    Stopping,
    /// The launch was refused, failed to spawn, or crashed on its own.
    Error,
}

impl Status {
    /// Returns `true` for `starting`, `running` and `stopping`, the states that own an OS process.
    pub fn is_active(self) -> bool {
        matches!(self, Status::Starting | Status::Running | Status::Stopping)
    }

    /// Returns `true` for `starting` and `running`.
    pub fn is_live(self) -> bool {
        matches!(self, Status::Starting | Status::Running)
    }

    /// Returns `true` for `stopped` and `error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Stopped | Status::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Stopped => "stopped",
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Stopping => "stopping",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An input that may move a launch to a new status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// An accepted `launch()` call.
    Launch,
    /// The grace period elapsed with the process still alive.
    GraceElapsed,
    /// An explicit `stop()` call.
    StopRequested,
    /// The OS reported the process exited. `None` means it was killed by a signal.
    Exited { code: Option<i32> },
    /// The OS refused to create the process.
    SpawnFailed,
    /// Tree termination finished.
    TerminateConfirmed,
}

/// Computes the status reached from `current` on `transition`.
///
/// Returns `None` when the transition does not apply to the current status; callers
/// ignore such inputs rather than treating them as errors.
pub fn next(current: Status, transition: Transition) -> Option<Status> {
    use Status::*;
    match (current, transition) {
        (Stopped | Error, Transition::Launch) => Some(Starting),
        (Starting, Transition::GraceElapsed) => Some(Running),
        (Starting | Running, Transition::StopRequested) => Some(Stopping),
        (Starting | Running, Transition::Exited { code }) => match code {
            Some(code) if code != 0 => Some(Error),
            _ => Some(Stopped),
        },
        (Starting | Running, Transition::SpawnFailed) => Some(Error),
        // A stop always resolves to `stopped`, whatever the exit code.
        (Stopping, Transition::Exited { .. } | Transition::TerminateConfirmed) => Some(Stopped),
        _ => None,
    }
}
