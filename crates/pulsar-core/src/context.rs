//! Per-frame execution context.
//!
//! A [`FrameContext`] is created when the VM thread starts and reused for
//! every frame. The backend stamps [`duration`](FrameContext::duration) in
//! `begin_frame`; external collaborators put entity data and messages into
//! it for the opcodes to pick up.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::perf::PerfStats;

/// Externally supplied data block for the current frame (e.g. track audio).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Entity {
    /// Raw bytes, laid out like the buffer they are fetched into.
    pub data: Vec<u8>,
}

impl Entity {
    /// Creates an entity from raw bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Creates an entity holding audio samples.
    pub fn from_samples(samples: &[f32]) -> Self {
        Self {
            data: samples.iter().flat_map(|s| s.to_ne_bytes()).collect(),
        }
    }

    /// Returns the data length in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// A `key=value` label attached to a message or used as a filter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    /// Label key.
    pub key: String,
    /// Label value.
    pub value: String,
}

impl Label {
    /// Creates a label.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Ordered set of labels.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelSet {
    labels: Vec<Label>,
}

impl LabelSet {
    /// Creates an empty label set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a label, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push(Label::new(key, value));
        self
    }

    /// Returns the labels.
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Returns true if the set holds no labels.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns true if every label of `filter` has an equal key/value pair here.
    ///
    /// Extra labels in `self` do not prevent a match; an empty filter matches
    /// everything.
    pub fn matches(&self, filter: &LabelSet) -> bool {
        filter.labels.iter().all(|required| {
            self.labels
                .iter()
                .any(|l| l.key == required.key && l.value == required.value)
        })
    }
}

impl FromIterator<Label> for LabelSet {
    fn from_iter<I: IntoIterator<Item = Label>>(iter: I) -> Self {
        Self {
            labels: iter.into_iter().collect(),
        }
    }
}

impl core::fmt::Display for LabelSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("{")?;
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", label.key, label.value)?;
        }
        f.write_str("}")
    }
}

/// Kind of a frame message. Only atoms are forwarded into event buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Serialized event payload destined for event ports.
    Atom,
    /// Any other message.
    Other,
}

/// A tagged, labelled message delivered for a single frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Message kind.
    pub kind: MessageType,
    /// Routing labels.
    pub labels: LabelSet,
    /// Payload bytes.
    pub data: Vec<u8>,
}

impl Message {
    /// Creates an atom message.
    pub fn atom(labels: LabelSet, data: Vec<u8>) -> Self {
        Self {
            kind: MessageType::Atom,
            labels,
            data,
        }
    }
}

/// Mutable state of the frame being processed.
#[derive(Debug, Default)]
pub struct FrameContext {
    /// Monotonic sample counter, advanced by `duration` after every frame.
    pub sample_pos: u64,
    /// Length of the current frame in samples. Zero until the first frame.
    pub duration: usize,
    /// Entity data for the current frame, keyed by entity id.
    pub entities: HashMap<String, Entity>,
    /// Messages for the current frame.
    pub messages: Vec<Message>,
    /// Timing spans recorded during the current frame.
    pub perf: PerfStats,
}

impl FrameContext {
    /// Creates a context with no frame processed yet.
    pub fn new() -> Self {
        Self::default()
    }
}
