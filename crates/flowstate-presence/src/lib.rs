//! Flowstate Presence - per-entity presence tracking and per-session flow control

pub mod binding;
pub mod flow;
pub mod registry;

pub use binding::{Binding, FlowBinding};
pub use flow::FlowController;
pub use registry::PresenceRegistry;
pub use flowstate_core::{EntityId, SessionKey};
