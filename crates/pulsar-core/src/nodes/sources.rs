//! Opcode-backed source nodes.

use crate::graph::{Node, NodeId, NodeKind, PortDesc};

macro_rules! node_common {
    () => {
        fn id(&self) -> &NodeId {
            &self.id
        }

        fn ports(&self) -> &[PortDesc] {
            &self.ports
        }
    };
}

/// Sine oscillator with a fixed frequency.
pub struct SineSource {
    id: NodeId,
    ports: [PortDesc; 1],
    freq: f32,
}

impl SineSource {
    /// Creates an oscillator at `freq` Hz.
    pub fn new(id: impl AsRef<str>, freq: f32) -> Self {
        Self {
            id: NodeId::new(id),
            ports: [PortDesc::audio_out("out")],
            freq,
        }
    }

    /// Changes the frequency used by the next compile.
    pub fn set_freq(&mut self, freq: f32) {
        self.freq = freq;
    }
}

impl Node for SineSource {
    node_common!();

    fn kind(&self) -> NodeKind {
        NodeKind::Sine { freq: self.freq }
    }
}

/// White noise source.
pub struct NoiseSource {
    id: NodeId,
    ports: [PortDesc; 1],
}

impl NoiseSource {
    /// Creates a noise source.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self {
            id: NodeId::new(id),
            ports: [PortDesc::audio_out("out")],
        }
    }
}

impl Node for NoiseSource {
    node_common!();

    fn kind(&self) -> NodeKind {
        NodeKind::Noise
    }
}

/// Constant control value.
pub struct ConstantSource {
    id: NodeId,
    ports: [PortDesc; 1],
    value: f32,
}

impl ConstantSource {
    /// Creates a source emitting `value` on its control output.
    pub fn new(id: impl AsRef<str>, value: f32) -> Self {
        Self {
            id: NodeId::new(id),
            ports: [PortDesc::control_out("out")],
            value,
        }
    }
}

impl Node for ConstantSource {
    node_common!();

    fn kind(&self) -> NodeKind {
        NodeKind::Constant { value: self.value }
    }
}

/// Audio fetched from a frame entity, e.g. a player's track data.
pub struct EntitySource {
    id: NodeId,
    ports: [PortDesc; 1],
    entity_id: String,
}

impl EntitySource {
    /// Creates a source reading entity `entity_id` each frame.
    pub fn new(id: impl AsRef<str>, entity_id: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(id),
            ports: [PortDesc::audio_out("out")],
            entity_id: entity_id.into(),
        }
    }
}

impl Node for EntitySource {
    node_common!();

    fn kind(&self) -> NodeKind {
        NodeKind::Entity {
            entity_id: self.entity_id.clone(),
        }
    }
}

/// Fixed linear gain on an audio signal.
pub struct Gain {
    id: NodeId,
    ports: [PortDesc; 2],
    factor: f32,
}

impl Gain {
    /// Creates a gain stage.
    pub fn new(id: impl AsRef<str>, factor: f32) -> Self {
        Self {
            id: NodeId::new(id),
            ports: [PortDesc::audio_in("in"), PortDesc::audio_out("out")],
            factor,
        }
    }
}

impl Node for Gain {
    node_common!();

    fn kind(&self) -> NodeKind {
        NodeKind::Gain {
            factor: self.factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_follow_parameters() {
        let mut osc = SineSource::new("osc", 440.0);
        assert_eq!(osc.kind(), NodeKind::Sine { freq: 440.0 });
        osc.set_freq(220.0);
        assert_eq!(osc.kind(), NodeKind::Sine { freq: 220.0 });
        assert_eq!(
            EntitySource::new("track", "track:1").kind(),
            NodeKind::Entity {
                entity_id: "track:1".to_string()
            }
        );
        assert_eq!(Gain::new("g", 0.5).ports().len(), 2);
    }
}
