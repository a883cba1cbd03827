//! Processing graph: nodes, ports, and connections.
//!
//! The graph is the editable description of the signal flow. It is turned
//! into an executable [`Spec`](crate::Spec) by [`compile`](crate::compile).

mod connection;
mod node;
mod topology;

pub use connection::{Connection, PortRef};
pub use node::{Node, NodeId, NodeKind, PortBindings, PortDesc, PortDirection, PortKind};
pub use topology::{Graph, NodeHandle};
