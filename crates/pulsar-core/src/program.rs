//! Opcode interpreter.
//!
//! A [`Program`] is an installed [`Spec`]: the spec itself, the node handles
//! its opcodes reference, and the runtime state the opcodes mutate (buffer
//! pool, per-opcode state, init flag). The runtime sits behind a mutex so
//! the execution thread can run a pass while the VM only holds its read
//! lock; nothing else contends for it except buffer inspection.

use std::f64::consts::TAU;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::Backend;
use crate::buffer::{BufferId, BufferPool};
use crate::buffer_type::BufferType;
use crate::context::{FrameContext, MessageType};
use crate::error::{BufferError, VmError};
use crate::events::SequenceWriter;
use crate::graph::NodeHandle;
use crate::spec::{Opcode, RunAt, Spec};

/// Seed of the first noise opcode when none is configured.
pub const DEFAULT_NOISE_SEED: u32 = 0x1234_5678;

/// Mutable state of one opcode instance, persisted across frames.
#[derive(Clone, Debug, PartialEq)]
pub struct OpcodeState {
    /// Oscillator phase in `[0, 2π)`.
    pub phase: f64,
    /// Xorshift state of noise opcodes; never zero.
    pub rng: u32,
}

impl OpcodeState {
    fn new(seed: u32) -> Self {
        Self {
            phase: 0.0,
            rng: if seed == 0 { DEFAULT_NOISE_SEED } else { seed },
        }
    }

    /// Next uniform sample in `[-1, 1)`.
    #[inline]
    fn next_noise(&mut self) -> f32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        // 24 high bits give an exact f32 in [0, 1).
        (x >> 8) as f32 * (2.0 / 16_777_216.0) - 1.0
    }
}

struct Runtime {
    buffers: BufferPool,
    states: Vec<OpcodeState>,
    initialized: bool,
}

/// An installed spec and its runtime state.
pub struct Program {
    spec: Arc<Spec>,
    nodes: Vec<NodeHandle>,
    runtime: Mutex<Runtime>,
}

impl Program {
    /// Installs `spec`, allocating fresh buffers and opcode state.
    ///
    /// `nodes` holds one handle per entry of [`Spec::nodes`], in order.
    /// Every noise opcode gets its own generator derived from `seed`.
    pub fn new(spec: Arc<Spec>, nodes: Vec<NodeHandle>, seed: u32) -> Self {
        let buffers = BufferPool::new(spec.buffers());
        let states = (0..spec.opcodes().len())
            .map(|i| OpcodeState::new(seed.wrapping_add((i as u32).wrapping_mul(0x9E37_79B9))))
            .collect();
        Self {
            spec,
            nodes,
            runtime: Mutex::new(Runtime {
                buffers,
                states,
                initialized: false,
            }),
        }
    }

    /// The installed spec.
    pub fn spec(&self) -> &Arc<Spec> {
        &self.spec
    }

    /// Number of allocated buffers.
    pub fn buffer_count(&self) -> usize {
        self.runtime.lock().buffers.count()
    }

    /// Returns true once the init phase has run.
    pub fn initialized(&self) -> bool {
        self.runtime.lock().initialized
    }

    /// Copies out the contents of a buffer.
    pub fn buffer_bytes(&self, id: BufferId) -> Result<Vec<u8>, BufferError> {
        self.runtime.lock().buffers.get(id).map(|b| b.to_bytes())
    }

    /// Overwrites the contents of a buffer. `data` must match its size.
    pub fn set_buffer_bytes(&self, id: BufferId, data: &[u8]) -> Result<(), BufferError> {
        self.runtime.lock().buffers.get_mut(id)?.set_bytes(data)
    }

    /// Returns the state of the opcode at `index`.
    pub fn opcode_state(&self, index: usize) -> Option<OpcodeState> {
        self.runtime.lock().states.get(index).cloned()
    }

    /// Runs one frame: the init phase on first use, then the performance phase.
    pub fn run_frame(
        &self,
        ctx: &mut FrameContext,
        backend: &mut dyn Backend,
        sample_rate: u32,
    ) -> Result<(), VmError> {
        let mut rt = self.runtime.lock();
        if !rt.initialized {
            self.run_phase(&mut rt, RunAt::Init, ctx, backend, sample_rate)?;
            rt.initialized = true;
        }
        self.run_phase(&mut rt, RunAt::Performance, ctx, backend, sample_rate)
    }

    fn run_phase(
        &self,
        rt: &mut Runtime,
        run_at: RunAt,
        ctx: &mut FrameContext,
        backend: &mut dyn Backend,
        sample_rate: u32,
    ) -> Result<(), VmError> {
        let Runtime {
            buffers, states, ..
        } = rt;
        for (i, op) in self.spec.phase(run_at) {
            tracing::trace!("exec op[{i}]: {op}");
            self.exec(op, &mut states[i], buffers, ctx, backend, sample_rate)?;
        }
        Ok(())
    }

    fn node(&self, index: usize) -> Result<&NodeHandle, VmError> {
        self.nodes.get(index).ok_or(VmError::UnknownNodeIndex(index))
    }

    fn exec(
        &self,
        op: &Opcode,
        state: &mut OpcodeState,
        buffers: &mut BufferPool,
        ctx: &mut FrameContext,
        backend: &mut dyn Backend,
        sample_rate: u32,
    ) -> Result<(), VmError> {
        match op {
            Opcode::CopyBuffer { src, dest } => {
                if src != dest {
                    let (s, d) = buffers.get_ref_and_mut(*src, *dest)?;
                    d.copy_from(s)?;
                }
            }
            Opcode::ClearBuffer { buf } => buffers.get_mut(*buf)?.clear(),
            Opcode::SetFloat { buf, value } => {
                let b = buffers.get_mut(*buf)?;
                if b.buffer_type() != BufferType::Float {
                    return Err(BufferError::TypeMismatch {
                        left: b.buffer_type(),
                        right: BufferType::Float,
                    }
                    .into());
                }
                b.samples_mut()?[0] = *value;
            }
            Opcode::Output { buf, channel } => {
                let b = buffers.get(*buf)?;
                let expected = BufferType::FloatArray(ctx.duration);
                if b.buffer_type() != expected {
                    return Err(VmError::OutputSizeMismatch {
                        buffer: b.buffer_type().sample_count().unwrap_or(0),
                        duration: ctx.duration,
                    });
                }
                backend.output(channel, b.as_bytes())?;
            }
            Opcode::FetchEntity { buf, entity } => {
                let b = buffers.get_mut(*buf)?;
                match ctx.entities.get(entity) {
                    Some(e) if e.size() == b.len() => b.set_bytes(&e.data)?,
                    Some(e) => {
                        return Err(VmError::EntitySizeMismatch {
                            id: entity.clone(),
                            expected: b.len(),
                            actual: e.size(),
                        });
                    }
                    None => b.clear(),
                }
            }
            Opcode::FetchMessages { buf, labels } => {
                let b = buffers.get_mut(*buf)?;
                let mut writer = SequenceWriter::new(b.as_bytes_mut());
                for msg in &ctx.messages {
                    if msg.kind == MessageType::Atom && msg.labels.matches(labels) {
                        writer.push(0, &msg.data);
                    }
                }
                if writer.dropped() > 0 {
                    tracing::warn!(
                        "fetch_messages: dropped {} event(s) for {labels}",
                        writer.dropped()
                    );
                }
            }
            Opcode::Noise { buf } => {
                for s in buffers.get_mut(*buf)?.samples_mut()? {
                    *s = state.next_noise();
                }
            }
            Opcode::Sine { buf, freq } => {
                let step = TAU * f64::from(*freq) / f64::from(sample_rate.max(1));
                let mut phase = state.phase;
                for s in buffers.get_mut(*buf)?.samples_mut()? {
                    *s = phase.sin() as f32;
                    phase = (phase + step).rem_euclid(TAU);
                }
                state.phase = phase;
            }
            Opcode::Mul { buf, factor } => {
                for s in buffers.get_mut(*buf)?.samples_mut()? {
                    *s *= *factor;
                }
            }
            Opcode::Mix { src, dest } if src == dest => buffers.get_mut(*dest)?.mix_self()?,
            Opcode::Mix { src, dest } => {
                let (s, d) = buffers.get_ref_and_mut(*src, *dest)?;
                d.mix(s)?;
            }
            Opcode::ConnectPort { node, port, buf } => {
                buffers.get(*buf)?;
                let handle = self.node(*node)?;
                let mut n = handle.lock();
                n.connect_port(port, *buf).map_err(|source| VmError::Node {
                    node: n.id().clone(),
                    source,
                })?;
            }
            Opcode::Call { node } => {
                let handle = self.node(*node)?;
                let mut n = handle.lock();
                n.run(ctx, buffers).map_err(|source| VmError::Node {
                    node: n.id().clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("spec", &self.spec.version())
            .field("nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}
