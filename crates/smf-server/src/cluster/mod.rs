//! Cluster bus (spec §4.8): peer/subscription registry, the push-channel-
//! and pty-aware verb set, and the pure verb dispatcher.

pub mod bus;
pub mod registry;
pub mod verb;

pub use bus::{ClusterAction, ClusterBus};
pub use registry::{ClusterRegistry, PeerInfo};
pub use verb::{Response, Verb};
