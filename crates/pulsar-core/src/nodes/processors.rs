//! Processor nodes run through `CALL`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{BufferId, BufferPool};
use crate::context::FrameContext;
use crate::error::NodeError;
use crate::events::EventSequence;
use crate::graph::{Node, NodeId, PortBindings, PortDesc};

/// Multiplies its audio input by a control-rate gain.
///
/// Ports: `in` (audio), `gain` (control, default 1.0), `out` (audio).
pub struct Amplifier {
    id: NodeId,
    ports: [PortDesc; 3],
    bindings: PortBindings,
}

impl Amplifier {
    /// Creates an amplifier.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self {
            id: NodeId::new(id),
            ports: [
                PortDesc::audio_in("in"),
                PortDesc::control_in("gain", 1.0),
                PortDesc::audio_out("out"),
            ],
            bindings: PortBindings::new(),
        }
    }
}

impl Node for Amplifier {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn ports(&self) -> &[PortDesc] {
        &self.ports
    }

    fn connect_port(&mut self, port: &str, buffer: BufferId) -> Result<(), NodeError> {
        self.bindings.bind_checked(&self.ports, port, buffer)
    }

    fn run(&mut self, _ctx: &mut FrameContext, buffers: &mut BufferPool) -> Result<(), NodeError> {
        let input = self.bindings.get("in")?;
        let gain = self.bindings.get("gain")?;
        let output = self.bindings.get("out")?;

        let g = buffers.get(gain)?.samples()?[0];
        let (src, dst) = buffers.get_ref_and_mut(input, output)?;
        dst.copy_from(src)?;
        for s in dst.samples_mut()? {
            *s *= g;
        }
        Ok(())
    }
}

/// Records the payloads arriving on its `in` event port.
///
/// Received payloads are appended to a shared log, one entry per event.
pub struct EventLog {
    id: NodeId,
    ports: [PortDesc; 1],
    bindings: PortBindings,
    log: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl EventLog {
    /// Creates an event log node.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self {
            id: NodeId::new(id),
            ports: [PortDesc::events_in("in")],
            bindings: PortBindings::new(),
            log: Arc::default(),
        }
    }

    /// Shared handle to the recorded payloads.
    pub fn log(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.log)
    }
}

impl Node for EventLog {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn ports(&self) -> &[PortDesc] {
        &self.ports
    }

    fn connect_port(&mut self, port: &str, buffer: BufferId) -> Result<(), NodeError> {
        self.bindings.bind_checked(&self.ports, port, buffer)
    }

    fn run(&mut self, _ctx: &mut FrameContext, buffers: &mut BufferPool) -> Result<(), NodeError> {
        let input = self.bindings.get("in")?;
        let bytes = buffers.get(input)?.as_bytes();
        let seq = EventSequence::parse(bytes)
            .ok_or_else(|| NodeError::Process("malformed event sequence".to_string()))?;
        let mut log = self.log.lock();
        for event in seq.iter() {
            log.push(event.data.to_vec());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_type::BufferType;

    #[test]
    fn test_amplifier_scales_by_control() {
        let mut pool = BufferPool::new(&[
            BufferType::FloatArray(2),
            BufferType::Float,
            BufferType::FloatArray(2),
        ]);
        pool.get_mut(BufferId::new(0))
            .unwrap()
            .samples_mut()
            .unwrap()
            .copy_from_slice(&[1.0, -0.5]);
        pool.get_mut(BufferId::new(1)).unwrap().samples_mut().unwrap()[0] = 3.0;

        let mut amp = Amplifier::new("amp");
        for (i, port) in ["in", "gain", "out"].into_iter().enumerate() {
            amp.connect_port(port, BufferId::new(i)).unwrap();
        }
        amp.run(&mut FrameContext::new(), &mut pool).unwrap();
        assert_eq!(
            pool.get(BufferId::new(2)).unwrap().samples().unwrap(),
            &[3.0, -1.5]
        );
    }

    #[test]
    fn test_amplifier_unconnected_port() {
        let mut amp = Amplifier::new("amp");
        let mut pool = BufferPool::default();
        assert!(matches!(
            amp.run(&mut FrameContext::new(), &mut pool),
            Err(NodeError::Unconnected(_))
        ));
        assert!(matches!(
            amp.connect_port("nope", BufferId::new(0)),
            Err(NodeError::UnknownPort(_))
        ));
    }
}
