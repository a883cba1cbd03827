//! The pipeline VM: graph, installed program, backend and frame loop.
//!
//! # Locking
//!
//! All structural state lives in one [`Engine`] behind a
//! `parking_lot::RwLock`. The execution thread takes the read lock only for
//! a single opcode pass; every structural mutation (`set_spec`,
//! `update_spec`, `set_backend`, `set_backend_parameters`, frame-size
//! changes, graph edits) takes the write lock. A pass therefore observes
//! either the old or the new program, never a mix.
//!
//! The backend is shared as `Arc<Mutex<Box<dyn Backend>>>`. The loop clones
//! the `Arc` at frame start and locks the backend only around each backend
//! call, always after (never while waiting for) the engine lock, so
//! `begin_frame` blocking does not hold up control calls.
//!
//! # Failure handling
//!
//! Backend errors and the backend's stop flag end the loop cleanly. Any other
//! error or panic on the execution thread is fatal: it is logged, output is
//! flushed and the process exits with status 1. A custom
//! [`FatalHandler`] can replace the exit.

use std::io::Write as _;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::backend::{Backend, BackendParameters, DEFAULT_FRAME_SIZE};
use crate::buffer::BufferId;
use crate::compiler::compile;
use crate::context::{Entity, FrameContext, Message};
use crate::error::{BackendError, VmError};
use crate::graph::{Graph, Node, NodeHandle, NodeId};
use crate::listeners::{NodeNotification, VmListeners};
use crate::program::{DEFAULT_NOISE_SEED, OpcodeState, Program};
use crate::spec::Spec;

/// Default sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

const IDLE_NO_BACKEND: Duration = Duration::from_millis(100);
const IDLE_NO_SPEC: Duration = Duration::from_millis(50);
const FATAL_FLUSH_DELAY: Duration = Duration::from_millis(200);

/// Called with the error that escaped the frame loop.
pub type FatalHandler = Arc<dyn Fn(&VmError) + Send + Sync>;

type SharedBackend = Arc<Mutex<Box<dyn Backend>>>;

/// Lifecycle state of a [`PipelineVm`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VmState {
    /// Created, thread not started.
    Uninitialized,
    /// Frame loop running.
    Running,
    /// Shutdown requested, waiting for the thread.
    Stopping,
    /// Thread exited.
    Stopped,
}

struct Engine {
    graph: Graph,
    program: Option<Program>,
    backend: Option<SharedBackend>,
    frame_size: usize,
}

#[derive(Default)]
struct Inbox {
    messages: Vec<Message>,
    entities: Vec<(String, Entity)>,
    notifications: Vec<NodeNotification>,
}

struct Shared {
    engine: RwLock<Engine>,
    state: Mutex<VmState>,
    state_changed: Condvar,
    shutdown: AtomicBool,
    inbox: Mutex<Inbox>,
    listeners: Arc<VmListeners>,
    sample_rate: u32,
    seed: u32,
    on_fatal: Option<FatalHandler>,
}

impl Shared {
    fn set_state(&self, state: VmState) {
        *self.state.lock() = state;
        self.state_changed.notify_all();
    }

    fn install(&self, engine: &mut Engine, spec: Option<Spec>) -> Result<(), VmError> {
        let Some(spec) = spec else {
            if engine.program.take().is_some() {
                tracing::info!("spec cleared");
            }
            return Ok(());
        };
        let nodes = spec
            .nodes()
            .iter()
            .map(|id| engine.graph.find_node(id))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::info!(
            "spec v{} installed: {} opcodes, {} buffers",
            spec.version(),
            spec.opcodes().len(),
            spec.buffers().len()
        );
        tracing::debug!("\n{}", spec.dump());
        engine.program = Some(Program::new(Arc::new(spec), nodes, self.seed));
        Ok(())
    }

    fn recompile(&self, engine: &mut Engine) -> Result<Arc<Spec>, VmError> {
        let spec = compile(&engine.graph, engine.frame_size)?;
        self.install(engine, Some(spec))?;
        engine
            .program
            .as_ref()
            .map(|p| Arc::clone(p.spec()))
            .ok_or(VmError::NoSpec)
    }
}

/// The real-time graph executor.
///
/// ```rust,ignore
/// use pulsar_core::{NullBackend, PipelineVm, nodes::{NoiseSource, Sink}};
///
/// let vm = PipelineVm::new(44100, 128);
/// vm.add_node(Box::new(NoiseSource::new("noise")))?;
/// vm.add_node(Box::new(Sink::mono("sink")))?;
/// vm.connect_ports(&"noise".into(), "out", &"sink".into(), "mono")?;
/// vm.update_spec()?;
/// vm.set_backend(Some(Box::new(NullBackend::new(128))))?;
/// vm.setup()?;
/// ```
pub struct PipelineVm {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineVm {
    /// Creates a VM with an empty graph. No thread is started yet.
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine: RwLock::new(Engine {
                    graph: Graph::new(),
                    program: None,
                    backend: None,
                    frame_size,
                }),
                state: Mutex::new(VmState::Uninitialized),
                state_changed: Condvar::new(),
                shutdown: AtomicBool::new(false),
                inbox: Mutex::new(Inbox::default()),
                listeners: Arc::new(VmListeners::new()),
                sample_rate,
                seed: DEFAULT_NOISE_SEED,
                on_fatal: None,
            }),
            thread: Mutex::new(None),
        }
    }

    fn configure(mut self, f: impl FnOnce(&mut Shared)) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => f(shared),
            None => tracing::warn!("VM already started, configuration ignored"),
        }
        self
    }

    /// Uses the given listener registries.
    pub fn with_listeners(self, listeners: Arc<VmListeners>) -> Self {
        self.configure(|s| s.listeners = listeners)
    }

    /// Seeds the noise generators.
    pub fn with_seed(self, seed: u32) -> Self {
        self.configure(|s| s.seed = seed)
    }

    /// Replaces process termination on fatal errors.
    pub fn with_fatal_handler(self, handler: FatalHandler) -> Self {
        self.configure(|s| s.on_fatal = Some(handler))
    }

    /// Starts the execution thread and waits until it is running.
    pub fn setup(&self) -> Result<(), VmError> {
        let mut thread = self.thread.lock();
        if *self.shared.state.lock() != VmState::Uninitialized {
            return Err(VmError::InvalidState("setup() called twice"));
        }

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("pulsar-vm".to_string())
            .spawn(move || vm_main(&shared))?;

        let mut state = self.shared.state.lock();
        while *state == VmState::Uninitialized {
            self.shared.state_changed.wait(&mut state);
        }
        drop(state);

        *thread = Some(handle);
        tracing::info!("VM up (sample_rate={})", self.shared.sample_rate);
        Ok(())
    }

    /// Stops the execution thread and releases the backend and spec.
    ///
    /// Idempotent. Must not be called from the execution thread.
    pub fn cleanup(&self) -> Result<(), VmError> {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                *self.thread.lock() = Some(handle);
                return Err(VmError::InvalidState(
                    "cleanup() called from the VM thread",
                ));
            }
            self.shared.shutdown.store(true, Ordering::Release);
            {
                let mut state = self.shared.state.lock();
                if *state == VmState::Running {
                    *state = VmState::Stopping;
                }
            }
            tracing::info!("stopping VM thread");
            if handle.join().is_err() {
                tracing::error!("VM thread panicked during shutdown");
            }
        }

        let mut engine = self.shared.engine.write();
        if let Some(backend) = engine.backend.take() {
            let mut backend = backend.lock();
            tracing::info!("clean up backend {}", backend.name());
            backend.cleanup();
        }
        engine.program = None;
        drop(engine);

        self.shared.set_state(VmState::Stopped);
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> VmState {
        *self.shared.state.lock()
    }

    /// Blocks until the execution thread has exited or `timeout` elapses.
    /// Returns true if it exited.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while *state != VmState::Stopped {
            if self
                .shared
                .state_changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return *state == VmState::Stopped;
            }
        }
        true
    }

    /// Sample rate the VM was created with.
    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    /// Current frame size in samples.
    pub fn frame_size(&self) -> usize {
        self.shared.engine.read().frame_size
    }

    /// Listener registries.
    pub fn listeners(&self) -> &Arc<VmListeners> {
        &self.shared.listeners
    }

    // --- Graph ---

    /// Adds a node to the graph. Does not recompile.
    pub fn add_node(&self, node: Box<dyn Node>) -> Result<NodeHandle, VmError> {
        Ok(self.shared.engine.write().graph.add_node(node)?)
    }

    /// Removes a node from the graph. Does not recompile.
    pub fn remove_node(&self, id: &NodeId) -> Result<NodeHandle, VmError> {
        Ok(self.shared.engine.write().graph.remove_node(id)?)
    }

    /// Looks up a node.
    pub fn find_node(&self, id: &NodeId) -> Result<NodeHandle, VmError> {
        Ok(self.shared.engine.read().graph.find_node(id)?)
    }

    /// Node handles in insertion order.
    pub fn nodes(&self) -> Vec<NodeHandle> {
        self.shared.engine.read().graph.nodes().cloned().collect()
    }

    /// Node ids in insertion order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.shared.engine.read().graph.node_ids().cloned().collect()
    }

    /// Connects two ports. Does not recompile.
    pub fn connect_ports(
        &self,
        src: &NodeId,
        src_port: &str,
        dest: &NodeId,
        dest_port: &str,
    ) -> Result<(), VmError> {
        Ok(self
            .shared
            .engine
            .write()
            .graph
            .connect(src, src_port, dest, dest_port)?)
    }

    /// Disconnects two ports. Does not recompile.
    pub fn disconnect_ports(
        &self,
        src: &NodeId,
        src_port: &str,
        dest: &NodeId,
        dest_port: &str,
    ) -> Result<(), VmError> {
        Ok(self
            .shared
            .engine
            .write()
            .graph
            .disconnect(src, src_port, dest, dest_port)?)
    }

    /// Runs a member node's `setup` hook.
    pub fn setup_node(&self, id: &NodeId) -> Result<(), VmError> {
        let handle = self.find_node(id)?;
        let mut node = handle.lock();
        node.setup().map_err(|source| VmError::Node {
            node: id.clone(),
            source,
        })
    }

    // --- Spec ---

    /// Compiles the current graph and installs the result.
    pub fn update_spec(&self) -> Result<Arc<Spec>, VmError> {
        let mut engine = self.shared.engine.write();
        self.shared.recompile(&mut engine)
    }

    /// Installs `spec`, or removes the active one with `None`.
    ///
    /// Buffers and opcode state are always fresh afterwards.
    pub fn set_spec(&self, spec: Option<Spec>) -> Result<(), VmError> {
        let mut engine = self.shared.engine.write();
        self.shared.install(&mut engine, spec)
    }

    /// The active spec.
    pub fn spec(&self) -> Option<Arc<Spec>> {
        self.shared
            .engine
            .read()
            .program
            .as_ref()
            .map(|p| Arc::clone(p.spec()))
    }

    /// Copies out a buffer of the active program.
    pub fn get_buffer_bytes(&self, id: BufferId) -> Result<Vec<u8>, VmError> {
        let engine = self.shared.engine.read();
        let program = engine.program.as_ref().ok_or(VmError::NoSpec)?;
        Ok(program.buffer_bytes(id)?)
    }

    /// Overwrites a buffer of the active program.
    pub fn set_buffer_bytes(&self, id: BufferId, data: &[u8]) -> Result<(), VmError> {
        let engine = self.shared.engine.read();
        let program = engine.program.as_ref().ok_or(VmError::NoSpec)?;
        Ok(program.set_buffer_bytes(id, data)?)
    }

    /// State of an opcode of the active program.
    pub fn opcode_state(&self, index: usize) -> Option<OpcodeState> {
        self.shared
            .engine
            .read()
            .program
            .as_ref()
            .and_then(|p| p.opcode_state(index))
    }

    // --- Backend ---

    /// Replaces the backend. The old one is cleaned up, the new one set up.
    pub fn set_backend(&self, backend: Option<Box<dyn Backend>>) -> Result<(), VmError> {
        let mut engine = self.shared.engine.write();
        if let Some(old) = engine.backend.take() {
            let mut old = old.lock();
            tracing::info!("clean up backend {}", old.name());
            old.cleanup();
        }
        if let Some(mut backend) = backend {
            tracing::info!("set up backend {}", backend.name());
            backend.setup(self.shared.sample_rate)?;
            engine.backend = Some(Arc::new(Mutex::new(backend)));
        }
        Ok(())
    }

    /// Forwards parameters to the active backend.
    pub fn set_backend_parameters(&self, params: &BackendParameters) -> Result<(), VmError> {
        let engine = self.shared.engine.write();
        if let Some(backend) = &engine.backend {
            let mut backend = backend.lock();
            tracing::info!("{} backend: set_parameters({params:?})", backend.name());
            backend.set_parameters(params)?;
        }
        Ok(())
    }

    // --- Frame inputs and notifications ---

    /// Queues a notification, delivered to listeners after the next frame.
    pub fn add_notification(&self, node: NodeId, payload: Vec<u8>) {
        self.shared
            .inbox
            .lock()
            .notifications
            .push(NodeNotification { node, payload });
    }

    /// Queues a message for the next frame's context.
    pub fn queue_message(&self, message: Message) {
        self.shared.inbox.lock().messages.push(message);
    }

    /// Queues entity data for the next frame's context.
    pub fn queue_entity(&self, id: impl Into<String>, entity: Entity) {
        self.shared.inbox.lock().entities.push((id.into(), entity));
    }
}

impl Default for PipelineVm {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_FRAME_SIZE)
    }
}

impl Drop for PipelineVm {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            tracing::error!("VM cleanup on drop failed: {e}");
        }
    }
}

// --- Execution thread ---

enum Exit {
    Shutdown,
    BackendStopped,
    BackendFailed,
}

fn vm_main(shared: &Arc<Shared>) {
    tracing::info!("starting VM");
    shared.set_state(VmState::Running);

    let result = catch_unwind(AssertUnwindSafe(|| frame_loop(shared)));
    let error = match result {
        Ok(Ok(exit)) => {
            match exit {
                Exit::Shutdown => tracing::info!("exiting VM mainloop"),
                Exit::BackendStopped => tracing::info!("backend stopped, exiting VM mainloop"),
                Exit::BackendFailed => tracing::warn!("backend failed, exiting VM mainloop"),
            }
            None
        }
        Ok(Err(e)) => Some(e),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Some(VmError::Panic(msg))
        }
    };

    tracing::info!("VM finished");
    if let Some(error) = error {
        fatal(shared, &error);
    }
    shared.set_state(VmState::Stopped);
}

fn fatal(shared: &Shared, error: &VmError) {
    tracing::error!("fatal error in VM thread: {error}");
    if let Some(handler) = &shared.on_fatal {
        handler(error);
        return;
    }
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    std::thread::sleep(FATAL_FLUSH_DELAY);
    std::process::exit(1);
}

fn frame_loop(shared: &Shared) -> Result<Exit, VmError> {
    let mut ctx = FrameContext::new();

    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            return Ok(Exit::Shutdown);
        }

        let backend = shared.engine.read().backend.clone();
        let Some(backend) = backend else {
            std::thread::sleep(IDLE_NO_BACKEND);
            continue;
        };

        shared.listeners.perf.call(&ctx.perf);
        ctx.perf.reset();

        {
            let mut inbox = shared.inbox.lock();
            ctx.messages = std::mem::take(&mut inbox.messages);
            ctx.entities = inbox.entities.drain(..).collect();
        }

        let t = ctx.perf.start();
        let begun = backend.lock().begin_frame(&mut ctx);
        ctx.perf.record("backend_begin_frame", t);
        if let Err(e) = begun {
            tracing::error!("backend begin_frame failed: {e}");
            return Ok(Exit::BackendFailed);
        }
        if backend.lock().stopped() {
            if let Err(e) = finish_frame(shared, &backend, &mut ctx) {
                tracing::warn!("backend end_frame after stop failed: {e}");
            }
            return Ok(Exit::BackendStopped);
        }

        let pass = run_pass(shared, &backend, &mut ctx);
        let ended = finish_frame(shared, &backend, &mut ctx);

        match pass {
            Err(VmError::Backend(e)) => {
                tracing::error!("backend output failed: {e}");
                return Ok(Exit::BackendFailed);
            }
            Err(e) => return Err(e),
            Ok(()) => {}
        }
        if let Err(e) = ended {
            tracing::error!("backend end_frame failed: {e}");
            return Ok(Exit::BackendFailed);
        }

        ctx.sample_pos += ctx.duration as u64;
    }
}

/// Delivers queued notifications and ends the backend frame.
fn finish_frame(
    shared: &Shared,
    backend: &SharedBackend,
    ctx: &mut FrameContext,
) -> Result<(), BackendError> {
    let t = ctx.perf.start();
    let notifications = std::mem::take(&mut shared.inbox.lock().notifications);
    for notification in &notifications {
        shared.listeners.notifications.call(notification);
    }
    ctx.perf.record("send_notifications", t);

    let t = ctx.perf.start();
    let ended = backend.lock().end_frame(ctx);
    ctx.perf.record("backend_end_frame", t);
    ended
}

/// Frame-size check and one opcode pass.
fn run_pass(shared: &Shared, backend: &SharedBackend, ctx: &mut FrameContext) -> Result<(), VmError> {
    let frame_size = shared.engine.read().frame_size;
    if ctx.duration != frame_size {
        let t = ctx.perf.start();
        let mut engine = shared.engine.write();
        tracing::info!("frame_size={}", ctx.duration);
        engine.frame_size = ctx.duration;
        if let Err(e) = shared.recompile(&mut engine) {
            tracing::error!("recompile for frame_size={} failed: {e}", ctx.duration);
            engine.program = None;
        }
        drop(engine);
        ctx.perf.record("frame_size_update", t);
    }

    let engine = shared.engine.read();
    let same_backend = engine
        .backend
        .as_ref()
        .is_some_and(|b| Arc::ptr_eq(b, backend));
    if !same_backend {
        // Backend was swapped after begin_frame; drop this frame.
        return Ok(());
    }

    let Some(program) = engine.program.as_ref() else {
        drop(engine);
        std::thread::sleep(IDLE_NO_SPEC);
        return Ok(());
    };

    let t = ctx.perf.start();
    let mut backend = backend.lock();
    let result = program.run_frame(ctx, &mut **backend, shared.sample_rate);
    drop(backend);
    ctx.perf.record("opcodes", t);
    result
}
