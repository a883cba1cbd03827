//! The mutable processing graph.
//!
//! [`Graph`] holds nodes in insertion order together with their port
//! connections. Editing the graph never recompiles anything; the active
//! program only changes when a new [`Spec`](crate::Spec) is compiled and
//! installed.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::connection::{Connection, PortRef};
use super::node::{Node, NodeId, PortDesc, PortDirection};
use crate::error::GraphError;

/// Shared handle to a node owned by a graph.
///
/// The execution thread locks the handle for the duration of a
/// `CONNECT_PORT` or `CALL`.
pub type NodeHandle = Arc<Mutex<Box<dyn Node>>>;

struct GraphNode {
    id: NodeId,
    ports: Vec<PortDesc>,
    handle: NodeHandle,
}

/// Nodes and their port connections.
///
/// Port declarations are read once when a node is added and are assumed
/// not to change while the node is a member.
#[derive(Default)]
pub struct Graph {
    nodes: Vec<GraphNode>,
    connections: Vec<Connection>,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node. Fails if a node with the same id is already a member.
    pub fn add_node(&mut self, node: Box<dyn Node>) -> Result<NodeHandle, GraphError> {
        let id = node.id().clone();
        if self.position(&id).is_some() {
            return Err(GraphError::DuplicateNode(id));
        }
        let ports = node.ports().to_vec();
        let handle: NodeHandle = Arc::new(Mutex::new(node));
        self.nodes.push(GraphNode {
            id: id.clone(),
            ports,
            handle: Arc::clone(&handle),
        });
        tracing::debug!("graph_add: node {id}");
        Ok(handle)
    }

    /// Removes a node and returns its handle.
    ///
    /// Connections referencing the node are left in place; compiling a graph
    /// with such leftovers fails with a dangling-connection error. Use
    /// [`disconnect_node`](Self::disconnect_node) first to drop them.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<NodeHandle, GraphError> {
        let idx = self
            .position(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
        let removed = self.nodes.remove(idx);
        let residual = self.connections.iter().filter(|c| c.touches(id)).count();
        if residual > 0 {
            tracing::warn!("graph_remove: node {id} removed with {residual} connection(s) left");
        } else {
            tracing::debug!("graph_remove: node {id}");
        }
        Ok(removed.handle)
    }

    /// Returns the handle of the node with the given id.
    pub fn find_node(&self, id: &NodeId) -> Result<NodeHandle, GraphError> {
        self.entry(id).map(|n| Arc::clone(&n.handle))
    }

    /// Returns true if a node with the given id is a member.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.position(id).is_some()
    }

    /// Iterates over node handles in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeHandle> {
        self.nodes.iter().map(|n| &n.handle)
    }

    /// Iterates over node ids in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter().map(|n| &n.id)
    }

    /// Returns the port declarations recorded for a node.
    pub fn ports(&self, id: &NodeId) -> Result<&[PortDesc], GraphError> {
        self.entry(id).map(|n| n.ports.as_slice())
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns all connections in the order they were made.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Returns the connections feeding `node:port`, in connection order.
    ///
    /// The yielded connections borrow the graph only, so they may outlive
    /// `node` and `port`.
    pub fn upstream_of<'a, 'b>(
        &'a self,
        node: &'b NodeId,
        port: &'b str,
    ) -> impl Iterator<Item = &'a Connection> + use<'a, 'b> {
        self.connections
            .iter()
            .filter(move |c| &c.dest.node == node && c.dest.port == port)
    }

    /// Connects an output port to an input port.
    ///
    /// Fails if either port does not exist, the directions are wrong, the
    /// port kinds differ, the connection already exists, or it would close
    /// a cycle.
    pub fn connect(
        &mut self,
        src: &NodeId,
        src_port: &str,
        dest: &NodeId,
        dest_port: &str,
    ) -> Result<(), GraphError> {
        let src_desc = self.port(src, src_port, PortDirection::Output)?;
        let dest_desc = self.port(dest, dest_port, PortDirection::Input)?;

        let conn = Connection::new(
            PortRef::new(src.clone(), src_port),
            PortRef::new(dest.clone(), dest_port),
        );

        if src_desc.kind != dest_desc.kind {
            return Err(GraphError::PortKindMismatch {
                src: conn.src.to_string(),
                dest: conn.dest.to_string(),
            });
        }

        if self.connections.contains(&conn) {
            return Err(GraphError::DuplicateConnection(conn.to_string()));
        }

        // Adding src -> dest closes a cycle if dest already reaches src.
        if src == dest || self.can_reach(dest, src) {
            return Err(GraphError::CycleDetected);
        }

        tracing::debug!("graph_connect: {conn}");
        self.connections.push(conn);
        Ok(())
    }

    /// Removes a connection.
    pub fn disconnect(
        &mut self,
        src: &NodeId,
        src_port: &str,
        dest: &NodeId,
        dest_port: &str,
    ) -> Result<(), GraphError> {
        let conn = Connection::new(
            PortRef::new(src.clone(), src_port),
            PortRef::new(dest.clone(), dest_port),
        );
        let idx = self
            .connections
            .iter()
            .position(|c| *c == conn)
            .ok_or_else(|| GraphError::ConnectionNotFound(conn.to_string()))?;
        self.connections.remove(idx);
        tracing::debug!("graph_disconnect: {conn}");
        Ok(())
    }

    /// Removes every connection touching `id`. Returns how many were removed.
    pub fn disconnect_node(&mut self, id: &NodeId) -> usize {
        let before = self.connections.len();
        self.connections.retain(|c| !c.touches(id));
        before - self.connections.len()
    }

    fn position(&self, id: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| &n.id == id)
    }

    fn entry(&self, id: &NodeId) -> Result<&GraphNode, GraphError> {
        self.nodes
            .iter()
            .find(|n| &n.id == id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))
    }

    fn port(
        &self,
        id: &NodeId,
        name: &str,
        direction: PortDirection,
    ) -> Result<&PortDesc, GraphError> {
        let node = self.entry(id)?;
        let mut same_name = node.ports.iter().filter(|p| p.name == name).peekable();
        if same_name.peek().is_none() {
            return Err(GraphError::PortNotFound {
                node: id.clone(),
                port: name.to_string(),
            });
        }
        same_name
            .find(|p| p.direction == direction)
            .ok_or_else(|| {
                let expected = match direction {
                    PortDirection::Input => "an input",
                    PortDirection::Output => "an output",
                };
                GraphError::InvalidConnection(format!("{id}:{name} is not {expected} port"))
            })
    }

    /// DFS over existing connections: can `from` reach `to`?
    fn can_reach(&self, from: &NodeId, to: &NodeId) -> bool {
        let mut visited: HashSet<&NodeId> = HashSet::new();
        let mut stack = vec![from];

        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            for conn in &self.connections {
                if &conn.src.node == current {
                    stack.push(&conn.dest.node);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestNode {
        id: NodeId,
        ports: Vec<PortDesc>,
    }

    impl TestNode {
        fn boxed(id: &str) -> Box<dyn Node> {
            Box::new(Self {
                id: NodeId::new(id),
                ports: vec![
                    PortDesc::audio_in("in"),
                    PortDesc::audio_out("out"),
                    PortDesc::control_in("ctl", 1.0),
                ],
            })
        }
    }

    impl Node for TestNode {
        fn id(&self) -> &NodeId {
            &self.id
        }

        fn ports(&self) -> &[PortDesc] {
            &self.ports
        }
    }

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    fn chain() -> Graph {
        let mut g = Graph::new();
        for name in ["a", "b", "c"] {
            g.add_node(TestNode::boxed(name)).unwrap();
        }
        g.connect(&id("a"), "out", &id("b"), "in").unwrap();
        g.connect(&id("b"), "out", &id("c"), "in").unwrap();
        g
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let mut g = Graph::new();
        g.add_node(TestNode::boxed("a")).unwrap();
        let err = g.add_node(TestNode::boxed("a")).err().unwrap();
        assert_eq!(err, GraphError::DuplicateNode(id("a")));
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn test_remove_foreign_node_rejected() {
        let mut g = Graph::new();
        let err = g.remove_node(&id("ghost")).err().unwrap();
        assert_eq!(err, GraphError::NodeNotFound(id("ghost")));
    }

    #[test]
    fn test_find_node_after_remove() {
        let mut g = Graph::new();
        g.add_node(TestNode::boxed("a")).unwrap();
        assert!(g.find_node(&id("a")).is_ok());
        let handle = g.remove_node(&id("a")).unwrap();
        assert_eq!(handle.lock().id(), &id("a"));
        assert!(matches!(
            g.find_node(&id("a")),
            Err(GraphError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_insertion_order_kept() {
        let g = chain();
        let ids: Vec<_> = g.node_ids().map(NodeId::as_str).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_connect_validates_ports() {
        let mut g = chain();
        assert!(matches!(
            g.connect(&id("a"), "nope", &id("c"), "in"),
            Err(GraphError::PortNotFound { .. })
        ));
        assert!(matches!(
            g.connect(&id("a"), "in", &id("c"), "in"),
            Err(GraphError::InvalidConnection(_))
        ));
        assert!(matches!(
            g.connect(&id("a"), "out", &id("c"), "ctl"),
            Err(GraphError::PortKindMismatch { .. })
        ));
        assert!(matches!(
            g.connect(&id("a"), "out", &id("b"), "in"),
            Err(GraphError::DuplicateConnection(_))
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut g = chain();
        assert_eq!(
            g.connect(&id("c"), "out", &id("a"), "in"),
            Err(GraphError::CycleDetected)
        );
        assert_eq!(
            g.connect(&id("b"), "out", &id("b"), "in"),
            Err(GraphError::CycleDetected)
        );
        // Fan-out is not a cycle.
        g.connect(&id("a"), "out", &id("c"), "in").unwrap();
    }

    #[test]
    fn test_disconnect() {
        let mut g = chain();
        g.disconnect(&id("a"), "out", &id("b"), "in").unwrap();
        assert!(matches!(
            g.disconnect(&id("a"), "out", &id("b"), "in"),
            Err(GraphError::ConnectionNotFound(_))
        ));
        assert_eq!(g.connections().len(), 1);
        assert_eq!(g.disconnect_node(&id("c")), 1);
        assert!(g.connections().is_empty());
    }

    #[test]
    fn test_upstream_of() {
        let mut g = chain();
        g.connect(&id("a"), "out", &id("c"), "in").unwrap();
        let srcs: Vec<_> = g
            .upstream_of(&id("c"), "in")
            .map(|c| c.src.node.as_str())
            .collect();
        assert_eq!(srcs, ["b", "a"]);

        let port = String::from("in");
        let first = g.upstream_of(&id("c"), &port).next();
        drop(port);
        assert_eq!(first.map(|c| c.src.node.as_str()), Some("b"));
    }
}
