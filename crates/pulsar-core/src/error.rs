//! Error types for the pulsar core.
//!
//! Errors are split by who observes them:
//!
//! - [`GraphError`] and [`CompileError`] are returned synchronously to the
//!   caller that mutates the graph or requests a recompile.
//! - [`BufferError`] and [`NodeError`] indicate a malformed program or a
//!   misbehaving node. On the VM thread they surface as [`VmError`] and are
//!   fatal.
//! - [`BackendError`] ends the frame loop cleanly.

use thiserror::Error;

use crate::buffer_type::BufferType;
use crate::graph::NodeId;

/// Buffer contract violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Data length does not match the buffer's declared size.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Declared size of the buffer in bytes.
        expected: usize,
        /// Length of the rejected data.
        actual: usize,
    },

    /// Two buffers of different types were combined.
    #[error("buffer type mismatch: {left} vs {right}")]
    TypeMismatch {
        /// Type of the destination buffer.
        left: BufferType,
        /// Type of the source buffer.
        right: BufferType,
    },

    /// The buffer type has no additive combination.
    #[error("buffers of type {0} cannot be mixed")]
    NotMixable(BufferType),

    /// An operation required a different buffer type.
    #[error("expected a {expected} buffer, found {found}")]
    WrongType {
        /// Human-readable name of the required type.
        expected: &'static str,
        /// Actual type of the buffer.
        found: BufferType,
    },

    /// Buffer index outside the installed pool.
    #[error("buffer index {0} out of range")]
    OutOfRange(usize),

    /// A read and a write borrow named the same slot.
    #[error("buffer index {0} cannot be both source and destination")]
    Aliased(usize),
}

/// Graph topology errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A node with this id is already attached to the graph.
    #[error("node {0} has already been added to the graph")]
    DuplicateNode(NodeId),

    /// The node is not attached to this graph.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// The node has no port with the given name.
    #[error("node {node} has no port '{port}'")]
    PortNotFound {
        /// Node that was searched.
        node: NodeId,
        /// Requested port name.
        port: String,
    },

    /// The connection direction or endpoints are invalid.
    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    /// Source and destination ports carry different signal kinds.
    #[error("port kind mismatch: {src} -> {dest}")]
    PortKindMismatch {
        /// `node:port` of the source.
        src: String,
        /// `node:port` of the destination.
        dest: String,
    },

    /// The same connection already exists.
    #[error("connection {0} already exists")]
    DuplicateConnection(String),

    /// No such connection exists.
    #[error("connection {0} not found")]
    ConnectionNotFound(String),

    /// Adding the connection would create a cycle.
    #[error("adding this connection would create a cycle")]
    CycleDetected,
}

/// Errors produced while compiling a graph into a spec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The connection graph contains a cycle.
    #[error("graph contains a cycle through {0} node(s)")]
    Cycle(usize),

    /// A connection references a node or port not present in the graph.
    #[error("dangling connection: {0}")]
    DanglingConnection(String),

    /// An event input has more than one upstream connection.
    #[error("event port {0} has more than one source")]
    MultipleEventSources(String),

    /// The node's kind requires a port it does not declare.
    #[error("node {node} is missing required port '{port}'")]
    MissingPort {
        /// Offending node.
        node: NodeId,
        /// Name of the required port.
        port: String,
    },

    /// Frame size must be at least one sample.
    #[error("invalid frame size {0}")]
    InvalidFrameSize(usize),
}

/// Errors reported by node implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// Setup failed.
    #[error("node setup failed: {0}")]
    Setup(String),

    /// A port was connected that the node does not know.
    #[error("unknown port '{0}'")]
    UnknownPort(String),

    /// A port was used while unconnected.
    #[error("port '{0}' is not connected")]
    Unconnected(String),

    /// Processing failed.
    #[error("node processing failed: {0}")]
    Process(String),

    /// Buffer access failed inside the node.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Setup of the backend failed.
    #[error("backend setup failed: {0}")]
    Setup(String),

    /// Output to the sink failed.
    #[error("backend output failed: {0}")]
    Output(String),

    /// The channel name is not known to the backend.
    #[error("unknown output channel '{0}'")]
    UnknownChannel(String),

    /// An unsupported parameter value was requested.
    #[error("invalid backend parameter: {0}")]
    InvalidParameter(String),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the pipeline VM.
#[derive(Debug, Error)]
pub enum VmError {
    /// Graph mutation failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Compilation failed.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Buffer contract violation.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// A node failed.
    #[error("node {node}: {source}")]
    Node {
        /// Failing node.
        node: NodeId,
        /// Underlying node error.
        #[source]
        source: NodeError,
    },

    /// Backend failure.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// OUTPUT opcode saw a buffer that does not match the frame duration.
    #[error("output buffer holds {buffer} samples, frame duration is {duration}")]
    OutputSizeMismatch {
        /// Sample count of the buffer.
        buffer: usize,
        /// Current frame duration in samples.
        duration: usize,
    },

    /// An entity's data does not match the target buffer.
    #[error("entity '{id}' has {actual} bytes, buffer holds {expected}")]
    EntitySizeMismatch {
        /// Entity id.
        id: String,
        /// Buffer size in bytes.
        expected: usize,
        /// Entity data length.
        actual: usize,
    },

    /// Opcode references a node index outside the spec's node list.
    #[error("spec references unknown node index {0}")]
    UnknownNodeIndex(usize),

    /// No spec is installed.
    #[error("no spec installed")]
    NoSpec,

    /// The VM thread could not be started.
    #[error("failed to start VM thread: {0}")]
    Thread(#[from] std::io::Error),

    /// The execution thread panicked.
    #[error("VM thread panicked: {0}")]
    Panic(String),

    /// The VM is in the wrong lifecycle state for the call.
    #[error("invalid VM state: {0}")]
    InvalidState(&'static str),
}
