//! Wiring of the domain services into the two processes of a swarm: the
//! tracker and a peer node.
pub mod node;
pub mod tracker;

pub use node::NodeApp;
pub use tracker::TrackerApp;
