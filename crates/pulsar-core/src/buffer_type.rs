//! Buffer type registry.
//!
//! Every buffer slot in a [`Spec`](crate::Spec) is declared with a
//! [`BufferType`]. The type fixes the byte length of the buffer and defines
//! what "silence" and "mixing" mean for its contents:
//!
//! | Type | Size | Clear | Mix |
//! |------|------|-------|-----|
//! | `Float` | 4 bytes | `0.0` | sum |
//! | `FloatArray(n)` | `4 * n` bytes | all `0.0` | sample-wise sum |
//! | `Opaque(n)` | `n` bytes | all zero | not mixable |

use core::fmt;

use crate::error::BufferError;

/// Size in bytes of a single sample.
pub const SAMPLE_BYTES: usize = core::mem::size_of::<f32>();

/// Size in bytes of event sequence buffers.
pub const EVENT_BUFFER_SIZE: usize = 10240;

/// Decodes native-endian `f32` samples from a byte view of any alignment.
///
/// Trailing bytes that do not form a whole sample are ignored.
pub fn samples_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(SAMPLE_BYTES)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Describes the layout and combination rules of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferType {
    /// A single scalar control value.
    Float,
    /// A block of audio samples, one per frame position.
    FloatArray(usize),
    /// Raw bytes with no arithmetic meaning (event sequences).
    Opaque(usize),
}

impl BufferType {
    /// Returns the buffer's length in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Float => SAMPLE_BYTES,
            Self::FloatArray(n) => n * SAMPLE_BYTES,
            Self::Opaque(n) => n,
        }
    }

    /// Returns the number of `f32` values for float types, `None` for opaque.
    pub fn sample_count(self) -> Option<usize> {
        match self {
            Self::Float => Some(1),
            Self::FloatArray(n) => Some(n),
            Self::Opaque(_) => None,
        }
    }

    /// Returns true if buffers of this type can be summed.
    pub fn is_mixable(self) -> bool {
        !matches!(self, Self::Opaque(_))
    }

    /// Resets `bytes` to the type's silence value.
    ///
    /// All supported types use all-zero bytes as silence (`0.0f32` is zero bits).
    pub fn clear(self, bytes: &mut [u8]) {
        debug_assert_eq!(bytes.len(), self.size());
        bytes.fill(0);
    }

    /// Adds `src` into `dst`, both holding data of this type.
    ///
    /// Works on native-endian byte views so it does not depend on alignment.
    pub fn mix(self, dst: &mut [u8], src: &[u8]) -> Result<(), BufferError> {
        if !self.is_mixable() {
            return Err(BufferError::NotMixable(self));
        }
        let size = self.size();
        if dst.len() != size {
            return Err(BufferError::SizeMismatch {
                expected: size,
                actual: dst.len(),
            });
        }
        if src.len() != size {
            return Err(BufferError::SizeMismatch {
                expected: size,
                actual: src.len(),
            });
        }
        for (d, s) in dst
            .chunks_exact_mut(SAMPLE_BYTES)
            .zip(src.chunks_exact(SAMPLE_BYTES))
        {
            let a = f32::from_ne_bytes([d[0], d[1], d[2], d[3]]);
            let b = f32::from_ne_bytes([s[0], s[1], s[2], s[3]]);
            d.copy_from_slice(&(a + b).to_ne_bytes());
        }
        Ok(())
    }
}

impl fmt::Display for BufferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float => write!(f, "float"),
            Self::FloatArray(n) => write!(f, "float[{n}]"),
            Self::Opaque(n) => write!(f, "opaque[{n}]"),
        }
    }
}
