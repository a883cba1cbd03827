//! Output sink.

use crate::graph::{Node, NodeId, NodeKind, PortDesc};

/// Sends each audio input to the backend channel of the same name.
pub struct Sink {
    id: NodeId,
    ports: Vec<PortDesc>,
}

impl Sink {
    /// Creates a sink with one input per channel name.
    pub fn new<I, S>(id: impl AsRef<str>, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: NodeId::new(id),
            ports: channels.into_iter().map(PortDesc::audio_in).collect(),
        }
    }

    /// Single `mono` channel.
    pub fn mono(id: impl AsRef<str>) -> Self {
        Self::new(id, ["mono"])
    }

    /// `left` and `right` channels.
    pub fn stereo(id: impl AsRef<str>) -> Self {
        Self::new(id, ["left", "right"])
    }
}

impl Node for Sink {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn ports(&self) -> &[PortDesc] {
        &self.ports
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Sink
    }
}
