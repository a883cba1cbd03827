//! Port connections.

use core::fmt;

use super::node::NodeId;

/// A `(node, port)` endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PortRef {
    /// Node owning the port.
    pub node: NodeId,
    /// Port name.
    pub port: String,
}

impl PortRef {
    /// Creates an endpoint.
    pub fn new(node: NodeId, port: impl Into<String>) -> Self {
        Self {
            node,
            port: port.into(),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.port)
    }
}

/// A directed connection from an output port to an input port.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Connection {
    /// Producing output port.
    pub src: PortRef,
    /// Consuming input port.
    pub dest: PortRef,
}

impl Connection {
    /// Creates a connection.
    pub fn new(src: PortRef, dest: PortRef) -> Self {
        Self { src, dest }
    }

    /// Returns true if either endpoint belongs to `node`.
    pub fn touches(&self, node: &NodeId) -> bool {
        &self.src.node == node || &self.dest.node == node
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dest)
    }
}
