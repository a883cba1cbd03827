//! Graph node contract.
//!
//! Every vertex of the processing graph implements [`Node`]. A node declares
//! its named ports and a [`NodeKind`] that tells the compiler how to lower
//! it: most built-in sources and sinks compile to dedicated opcodes, while
//! [`NodeKind::Processor`] nodes are bound with `CONNECT_PORT` at init time
//! and invoked with `CALL` every frame.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::buffer::{BufferId, BufferPool};
use crate::buffer_type::{BufferType, EVENT_BUFFER_SIZE};
use crate::context::FrameContext;
use crate::error::NodeError;

/// Unique identifier of a node within a graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Arc<str>);

impl NodeId {
    /// Creates a node id.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Direction of a port relative to its node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortDirection {
    /// Consumes a signal.
    Input,
    /// Produces a signal.
    Output,
}

/// Signal carried by a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// Block of audio samples, one per frame position.
    Audio,
    /// A single scalar per frame.
    Control,
    /// Event sequence.
    Events,
}

impl PortKind {
    /// Returns the buffer type backing a port of this kind.
    pub fn buffer_type(self, frame_size: usize) -> BufferType {
        match self {
            Self::Audio => BufferType::FloatArray(frame_size),
            Self::Control => BufferType::Float,
            Self::Events => BufferType::Opaque(EVENT_BUFFER_SIZE),
        }
    }
}

/// Declaration of a named port.
#[derive(Clone, Debug, PartialEq)]
pub struct PortDesc {
    /// Port name, unique per node and direction.
    pub name: String,
    /// Input or output.
    pub direction: PortDirection,
    /// Signal kind.
    pub kind: PortKind,
    /// Value written to an unconnected control input.
    pub default: f32,
}

impl PortDesc {
    fn new(name: impl Into<String>, direction: PortDirection, kind: PortKind) -> Self {
        Self {
            name: name.into(),
            direction,
            kind,
            default: 0.0,
        }
    }

    /// Audio input port.
    pub fn audio_in(name: impl Into<String>) -> Self {
        Self::new(name, PortDirection::Input, PortKind::Audio)
    }

    /// Audio output port.
    pub fn audio_out(name: impl Into<String>) -> Self {
        Self::new(name, PortDirection::Output, PortKind::Audio)
    }

    /// Control input port with a default value for when it is unconnected.
    pub fn control_in(name: impl Into<String>, default: f32) -> Self {
        Self {
            default,
            ..Self::new(name, PortDirection::Input, PortKind::Control)
        }
    }

    /// Control output port.
    pub fn control_out(name: impl Into<String>) -> Self {
        Self::new(name, PortDirection::Output, PortKind::Control)
    }

    /// Event input port.
    pub fn events_in(name: impl Into<String>) -> Self {
        Self::new(name, PortDirection::Input, PortKind::Events)
    }

    /// Event output port.
    pub fn events_out(name: impl Into<String>) -> Self {
        Self::new(name, PortDirection::Output, PortKind::Events)
    }

    /// Returns true for input ports.
    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }
}

/// How the compiler lowers a node into opcodes.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// Generic node: `CONNECT_PORT` per port at init, `CALL` every frame.
    Processor,
    /// Sine oscillator writing port `out` (`SINE`).
    Sine {
        /// Frequency in Hz.
        freq: f32,
    },
    /// White noise writing port `out` (`NOISE`).
    Noise,
    /// Constant control value writing port `out` (`SET_FLOAT`).
    Constant {
        /// Value written every frame.
        value: f32,
    },
    /// External entity data written to port `out` (`FETCH_ENTITY`).
    Entity {
        /// Entity id looked up in the frame context.
        entity_id: String,
    },
    /// Copies `in` to `out` and scales it (`COPY_BUFFER` + `MUL`).
    Gain {
        /// Linear gain factor.
        factor: f32,
    },
    /// Pushes every audio input to the backend channel of the same name (`OUTPUT`).
    Sink,
}

/// A processing vertex of the graph.
pub trait Node: Send {
    /// Returns the node's id.
    fn id(&self) -> &NodeId;

    /// Returns the node's port declarations.
    fn ports(&self) -> &[PortDesc];

    /// Returns how the compiler should lower this node.
    fn kind(&self) -> NodeKind {
        NodeKind::Processor
    }

    /// Prepares the node for processing. Called by `PipelineVm::setup_node`.
    fn setup(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Releases resources acquired in [`setup`](Self::setup).
    fn cleanup(&mut self) {}

    /// Binds a port to a buffer. Called once by `CONNECT_PORT` when a spec
    /// becomes active.
    fn connect_port(&mut self, _port: &str, _buffer: BufferId) -> Result<(), NodeError> {
        Ok(())
    }

    /// Processes one frame using the buffers bound to its ports.
    fn run(&mut self, _ctx: &mut FrameContext, _buffers: &mut BufferPool) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Port-to-buffer bindings recorded from `connect_port` calls.
///
/// Convenience for [`Node`] implementations.
#[derive(Clone, Debug, Default)]
pub struct PortBindings {
    bindings: HashMap<String, BufferId>,
}

impl PortBindings {
    /// Creates an empty binding table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `port` to `buffer`, replacing a previous binding.
    pub fn bind(&mut self, port: &str, buffer: BufferId) {
        self.bindings.insert(port.to_string(), buffer);
    }

    /// Binds `port` if it is one of `ports`, otherwise reports an unknown port.
    pub fn bind_checked(
        &mut self,
        ports: &[PortDesc],
        port: &str,
        buffer: BufferId,
    ) -> Result<(), NodeError> {
        if !ports.iter().any(|p| p.name == port) {
            return Err(NodeError::UnknownPort(port.to_string()));
        }
        self.bind(port, buffer);
        Ok(())
    }

    /// Returns the buffer bound to `port`.
    pub fn get(&self, port: &str) -> Result<BufferId, NodeError> {
        self.bindings
            .get(port)
            .copied()
            .ok_or_else(|| NodeError::Unconnected(port.to_string()))
    }

    /// Removes all bindings.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_kind_buffer_types() {
        assert_eq!(PortKind::Audio.buffer_type(64), BufferType::FloatArray(64));
        assert_eq!(PortKind::Control.buffer_type(64), BufferType::Float);
        assert_eq!(
            PortKind::Events.buffer_type(64),
            BufferType::Opaque(EVENT_BUFFER_SIZE)
        );
    }

    #[test]
    fn test_control_in_keeps_default() {
        let port = PortDesc::control_in("gain", 0.5);
        assert!(port.is_input());
        assert_eq!(port.default, 0.5);
        assert_eq!(port.kind, PortKind::Control);
    }

    #[test]
    fn test_bindings() {
        let ports = [PortDesc::audio_in("in")];
        let mut bindings = PortBindings::new();
        bindings.bind_checked(&ports, "in", BufferId::new(3)).unwrap();
        assert_eq!(bindings.get("in").unwrap(), BufferId::new(3));
        assert!(matches!(
            bindings.bind_checked(&ports, "out", BufferId::new(1)),
            Err(NodeError::UnknownPort(_))
        ));
        assert!(matches!(bindings.get("out"), Err(NodeError::Unconnected(_))));
    }

    #[test]
    fn test_node_id_display() {
        let id = NodeId::new("sink");
        assert_eq!(id.to_string(), "sink");
        assert_eq!(id, NodeId::from("sink"));
    }
}
