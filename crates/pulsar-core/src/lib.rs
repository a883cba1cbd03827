//! Pulsar Core - audio graph compiler and real-time pipeline VM
//!
//! This crate turns an editable node/port audio graph into a linear opcode
//! program and executes it once per audio frame on a dedicated thread.
//!
//! # Core Abstractions
//!
//! ## Graph
//!
//! - [`Graph`] - Nodes and port connections, insertion-ordered
//! - [`Node`] - Trait implemented by every graph vertex
//! - [`NodeKind`] - How the compiler lowers a node (processor, sine, sink, ...)
//!
//! ## Compilation
//!
//! - [`compile`] - Graph + frame size → [`Spec`]
//! - [`Spec`] - Immutable, versioned opcode list with its buffer types
//! - [`Opcode`] - One instruction, tagged [`RunAt::Init`] or [`RunAt::Performance`]
//!
//! ## Execution
//!
//! - [`PipelineVm`] - Owns graph, active [`Program`] and backend; runs the frame loop
//! - [`Backend`] - Frame clock and output sink ([`NullBackend`], [`CaptureBackend`])
//! - [`FrameContext`] - Per-frame sample position, entities and messages
//!
//! ## Buffers
//!
//! - [`BufferType`] - `Float`, `FloatArray(n)` or `Opaque(n)`, with clear/mix rules
//! - [`Buffer`] / [`BufferPool`] - Typed storage of an installed spec
//!
//! # Example
//!
//! ```rust,ignore
//! use pulsar_core::{CaptureBackend, PipelineVm};
//! use pulsar_core::nodes::{NoiseSource, Sink};
//!
//! let vm = PipelineVm::new(44100, 128);
//! vm.add_node(Box::new(NoiseSource::new("noise")))?;
//! vm.add_node(Box::new(Sink::mono("sink")))?;
//! vm.connect_ports(&"noise".into(), "out", &"sink".into(), "mono")?;
//! vm.update_spec()?;
//!
//! let backend = CaptureBackend::new(128, 100);
//! let capture = backend.capture();
//! vm.set_backend(Some(Box::new(backend)))?;
//! vm.setup()?;
//! vm.wait_stopped(std::time::Duration::from_secs(5));
//! assert_eq!(capture.output_count("mono"), 100);
//! ```

pub mod backend;
pub mod buffer;
pub mod buffer_type;
pub mod compiler;
pub mod context;
pub mod error;
pub mod events;
pub mod graph;
pub mod listeners;
pub mod nodes;
pub mod perf;
pub mod program;
pub mod spec;
pub mod vm;

pub use backend::{
    Backend, BackendParameters, Capture, CaptureBackend, DEFAULT_FRAME_SIZE, NullBackend,
};
pub use buffer::{Buffer, BufferId, BufferPool};
pub use buffer_type::{BufferType, EVENT_BUFFER_SIZE, SAMPLE_BYTES, samples_from_bytes};
pub use compiler::compile;
pub use context::{Entity, FrameContext, Label, LabelSet, Message, MessageType};
pub use error::{BackendError, BufferError, CompileError, GraphError, NodeError, VmError};
pub use events::{Event, EventSequence, SequenceWriter};
pub use graph::{
    Connection, Graph, Node, NodeHandle, NodeId, NodeKind, PortBindings, PortDesc, PortDirection,
    PortKind, PortRef,
};
pub use listeners::{ListenerId, Listeners, NodeNotification, VmListeners};
pub use perf::{PerfSpan, PerfStats};
pub use program::{DEFAULT_NOISE_SEED, OpcodeState, Program};
pub use spec::{OpKind, Opcode, RunAt, Spec, SpecBuilder};
pub use vm::{DEFAULT_SAMPLE_RATE, FatalHandler, PipelineVm, VmState};
