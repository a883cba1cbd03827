//! Compiled execution plans.
//!
//! A [`Spec`] is an immutable, versioned list of [`Opcode`]s together with
//! the buffer types they operate on and the node ids they reference. Specs
//! are produced by [`compile`](crate::compile) or assembled by hand with a
//! [`SpecBuilder`], and are installed into a
//! [`PipelineVm`](crate::PipelineVm) with `set_spec`.

use core::fmt;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::buffer::BufferId;
use crate::buffer_type::BufferType;
use crate::context::LabelSet;
use crate::graph::NodeId;

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// When an opcode runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunAt {
    /// Once, right after the spec becomes active.
    Init,
    /// Every frame.
    Performance,
}

impl fmt::Display for RunAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Performance => "perf",
        })
    }
}

/// Opcode kind tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum OpKind {
    CopyBuffer,
    ClearBuffer,
    SetFloat,
    Output,
    FetchEntity,
    FetchMessages,
    Noise,
    Sine,
    Mul,
    Mix,
    ConnectPort,
    Call,
}

impl OpKind {
    /// Upper-case opcode name as shown in dumps.
    pub fn name(self) -> &'static str {
        match self {
            Self::CopyBuffer => "COPY_BUFFER",
            Self::ClearBuffer => "CLEAR_BUFFER",
            Self::SetFloat => "SET_FLOAT",
            Self::Output => "OUTPUT",
            Self::FetchEntity => "FETCH_ENTITY",
            Self::FetchMessages => "FETCH_MESSAGES",
            Self::Noise => "NOISE",
            Self::Sine => "SINE",
            Self::Mul => "MUL",
            Self::Mix => "MIX",
            Self::ConnectPort => "CONNECT_PORT",
            Self::Call => "CALL",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One instruction of a spec.
///
/// Node references are indices into [`Spec::nodes`].
#[derive(Clone, Debug, PartialEq)]
pub enum Opcode {
    /// `dest` ← `src`, same type.
    CopyBuffer {
        /// Source buffer.
        src: BufferId,
        /// Destination buffer.
        dest: BufferId,
    },
    /// Reset to silence.
    ClearBuffer {
        /// Target buffer.
        buf: BufferId,
    },
    /// Write a literal into a `Float` buffer.
    SetFloat {
        /// Target buffer.
        buf: BufferId,
        /// Value.
        value: f32,
    },
    /// Push buffer bytes to a backend channel.
    Output {
        /// Source buffer.
        buf: BufferId,
        /// Backend channel name.
        channel: String,
    },
    /// Copy entity data for this frame, or clear if absent.
    FetchEntity {
        /// Target buffer.
        buf: BufferId,
        /// Entity id.
        entity: String,
    },
    /// Serialize matching atom messages into an event buffer.
    FetchMessages {
        /// Target event buffer.
        buf: BufferId,
        /// Labels every forwarded message must carry.
        labels: LabelSet,
    },
    /// Uniform white noise in `[-1, 1)`.
    Noise {
        /// Target buffer.
        buf: BufferId,
    },
    /// Sine wave with persistent phase.
    Sine {
        /// Target buffer.
        buf: BufferId,
        /// Frequency in Hz.
        freq: f32,
    },
    /// Scale in place.
    Mul {
        /// Target buffer.
        buf: BufferId,
        /// Factor.
        factor: f32,
    },
    /// `dest` += `src`.
    Mix {
        /// Source buffer.
        src: BufferId,
        /// Destination buffer.
        dest: BufferId,
    },
    /// Bind a node port to a buffer.
    ConnectPort {
        /// Node index.
        node: usize,
        /// Port name.
        port: String,
        /// Bound buffer.
        buf: BufferId,
    },
    /// Run a node for one frame.
    Call {
        /// Node index.
        node: usize,
    },
}

impl Opcode {
    /// Returns the opcode's kind tag.
    pub fn kind(&self) -> OpKind {
        match self {
            Self::CopyBuffer { .. } => OpKind::CopyBuffer,
            Self::ClearBuffer { .. } => OpKind::ClearBuffer,
            Self::SetFloat { .. } => OpKind::SetFloat,
            Self::Output { .. } => OpKind::Output,
            Self::FetchEntity { .. } => OpKind::FetchEntity,
            Self::FetchMessages { .. } => OpKind::FetchMessages,
            Self::Noise { .. } => OpKind::Noise,
            Self::Sine { .. } => OpKind::Sine,
            Self::Mul { .. } => OpKind::Mul,
            Self::Mix { .. } => OpKind::Mix,
            Self::ConnectPort { .. } => OpKind::ConnectPort,
            Self::Call { .. } => OpKind::Call,
        }
    }

    /// Returns the phase the opcode runs in.
    pub fn run_at(&self) -> RunAt {
        match self {
            Self::ConnectPort { .. } => RunAt::Init,
            _ => RunAt::Performance,
        }
    }

    fn args(&self) -> String {
        match self {
            Self::CopyBuffer { src, dest } | Self::Mix { src, dest } => {
                format!("src={src} dest={dest}")
            }
            Self::ClearBuffer { buf } | Self::Noise { buf } => format!("buf={buf}"),
            Self::SetFloat { buf, value } => format!("buf={buf} value={value}"),
            Self::Output { buf, channel } => format!("buf={buf} channel={channel}"),
            Self::FetchEntity { buf, entity } => format!("buf={buf} entity={entity}"),
            Self::FetchMessages { buf, labels } => format!("buf={buf} labels={labels}"),
            Self::Sine { buf, freq } => format!("buf={buf} freq={freq}"),
            Self::Mul { buf, factor } => format!("buf={buf} factor={factor}"),
            Self::ConnectPort { node, port, buf } => {
                format!("node={node} port={port} buf={buf}")
            }
            Self::Call { node } => format!("node={node}"),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.args())
    }
}

/// An immutable execution plan.
#[derive(Debug)]
pub struct Spec {
    version: u64,
    frame_size: usize,
    opcodes: Vec<Opcode>,
    buffers: Vec<BufferType>,
    nodes: Vec<NodeId>,
}

impl Spec {
    /// Starts building a spec for the given frame size.
    pub fn builder(frame_size: usize) -> SpecBuilder {
        SpecBuilder {
            frame_size,
            opcodes: Vec::new(),
            buffers: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Process-wide unique, increasing version number.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Frame size the spec was compiled for.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Opcodes in execution order.
    pub fn opcodes(&self) -> &[Opcode] {
        &self.opcodes
    }

    /// Buffer types, indexed by [`BufferId`].
    pub fn buffers(&self) -> &[BufferType] {
        &self.buffers
    }

    /// Node ids referenced by opcodes.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Iterates over the opcodes of one phase, with their spec index.
    pub fn phase(&self, run_at: RunAt) -> impl Iterator<Item = (usize, &Opcode)> {
        self.opcodes
            .iter()
            .enumerate()
            .filter(move |(_, op)| op.run_at() == run_at)
    }

    /// Renders a human-readable listing.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "spec v{} (frame_size={}, {} opcodes, {} buffers)",
            self.version,
            self.frame_size,
            self.opcodes.len(),
            self.buffers.len()
        );
        let _ = writeln!(out, "buffers:");
        for (i, ty) in self.buffers.iter().enumerate() {
            let _ = writeln!(out, "  {}: {ty}", BufferId::new(i));
        }
        let _ = writeln!(out, "nodes:");
        for (i, id) in self.nodes.iter().enumerate() {
            let _ = writeln!(out, "  {i}: {id}");
        }
        let _ = writeln!(out, "opcodes:");
        for (i, op) in self.opcodes.iter().enumerate() {
            let _ = write!(out, "  {i:04} [{}] {op}", op.run_at());
            if let Opcode::ConnectPort { node, .. } | Opcode::Call { node } = op
                && let Some(id) = self.nodes.get(*node)
            {
                let _ = write!(out, " ({id})");
            }
            out.push('\n');
        }
        out
    }
}

/// Incremental [`Spec`] construction.
#[derive(Debug)]
pub struct SpecBuilder {
    frame_size: usize,
    opcodes: Vec<Opcode>,
    buffers: Vec<BufferType>,
    nodes: Vec<NodeId>,
}

impl SpecBuilder {
    /// Declares a buffer slot.
    pub fn buffer(&mut self, ty: BufferType) -> BufferId {
        self.buffers.push(ty);
        BufferId::new(self.buffers.len() - 1)
    }

    /// Returns the index of `id` in the node list, adding it if needed.
    pub fn node(&mut self, id: &NodeId) -> usize {
        if let Some(i) = self.nodes.iter().position(|n| n == id) {
            return i;
        }
        self.nodes.push(id.clone());
        self.nodes.len() - 1
    }

    /// Appends an opcode.
    pub fn push(&mut self, op: Opcode) -> &mut Self {
        self.opcodes.push(op);
        self
    }

    /// Number of opcodes pushed so far.
    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    /// Returns true if no opcode was pushed.
    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    /// Finishes the spec and assigns it a fresh version.
    pub fn build(self) -> Spec {
        Spec {
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
            frame_size: self.frame_size,
            opcodes: self.opcodes,
            buffers: self.buffers,
            nodes: self.nodes,
        }
    }
}
