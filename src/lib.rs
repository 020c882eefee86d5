//! toolshub: launch, watch, and stop long-running local tools.
//!
//! The core is the `Supervisor`, which spawns shell commands as process trees, drives
//! each launch through its lifecycle, and publishes status and output events to every
//! subscribed observer. The remaining modules are its collaborators: command
//! resolution, tree termination, the observer-side output model, and the tool store.

pub mod broadcast;
pub mod config;
pub mod decode;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod logging;
pub mod output;
pub mod resolver;
pub mod store;
pub mod supervisor;
pub mod tree_kill;

pub use broadcast::{Broadcaster, Subscription};
pub use events::Event;
pub use lifecycle::Status;
pub use supervisor::{Supervisor, SupervisorConfig};
