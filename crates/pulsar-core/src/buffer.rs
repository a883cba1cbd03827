//! Typed buffers and the buffer pool.
//!
//! A [`Buffer`] owns a fixed-size memory region described by its
//! [`BufferType`]. Storage is kept as `f32` words so the typed sample view
//! is a plain reinterpretation of the byte view (via `bytemuck`), never an
//! unaligned read.
//!
//! The [`BufferPool`] holds one buffer per slot declared by the installed
//! [`Spec`](crate::Spec). It is rebuilt whenever a spec is installed.

use core::fmt;

use crate::buffer_type::{BufferType, SAMPLE_BYTES};
use crate::error::BufferError;

/// Index of a buffer slot in a spec's buffer list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) usize);

impl BufferId {
    /// Creates a buffer id from a raw slot index.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw slot index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf[{}]", self.0)
    }
}

/// A typed, fixed-size memory region.
pub struct Buffer {
    ty: BufferType,
    words: Vec<f32>,
}

impl Buffer {
    /// Creates a zeroed buffer of the given type.
    pub fn new(ty: BufferType) -> Self {
        Self {
            ty,
            words: vec![0.0; ty.size().div_ceil(SAMPLE_BYTES)],
        }
    }

    /// Returns the buffer's type.
    pub fn buffer_type(&self) -> BufferType {
        self.ty
    }

    /// Returns the buffer's length in bytes.
    pub fn len(&self) -> usize {
        self.ty.size()
    }

    /// Returns true if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.ty.size() == 0
    }

    /// Byte view over the buffer contents.
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.ty.size()]
    }

    /// Mutable byte view over the buffer contents.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let size = self.ty.size();
        &mut bytemuck::cast_slice_mut(&mut self.words)[..size]
    }

    /// Sample view for `Float` and `FloatArray` buffers.
    pub fn samples(&self) -> Result<&[f32], BufferError> {
        match self.ty.sample_count() {
            Some(n) => Ok(&self.words[..n]),
            None => Err(BufferError::WrongType {
                expected: "float",
                found: self.ty,
            }),
        }
    }

    /// Mutable sample view for `Float` and `FloatArray` buffers.
    pub fn samples_mut(&mut self) -> Result<&mut [f32], BufferError> {
        match self.ty.sample_count() {
            Some(n) => Ok(&mut self.words[..n]),
            None => Err(BufferError::WrongType {
                expected: "float",
                found: self.ty,
            }),
        }
    }

    /// Copies the contents into a new byte vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Replaces the contents with `data`, which must match the buffer size.
    pub fn set_bytes(&mut self, data: &[u8]) -> Result<(), BufferError> {
        let expected = self.len();
        if data.len() != expected {
            return Err(BufferError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        self.as_bytes_mut().copy_from_slice(data);
        Ok(())
    }

    /// Resets the buffer to silence.
    pub fn clear(&mut self) {
        let ty = self.ty;
        ty.clear(self.as_bytes_mut());
    }

    /// Copies another buffer of the same type into this one.
    pub fn copy_from(&mut self, other: &Buffer) -> Result<(), BufferError> {
        self.check_same_type(other)?;
        self.words.copy_from_slice(&other.words);
        Ok(())
    }

    /// Adds another buffer of the same type into this one.
    pub fn mix(&mut self, other: &Buffer) -> Result<(), BufferError> {
        self.check_same_type(other)?;
        if !self.ty.is_mixable() {
            return Err(BufferError::NotMixable(self.ty));
        }
        for (dst, src) in self.words.iter_mut().zip(other.words.iter()) {
            *dst += *src;
        }
        Ok(())
    }

    /// Adds the buffer to itself.
    pub fn mix_self(&mut self) -> Result<(), BufferError> {
        if !self.ty.is_mixable() {
            return Err(BufferError::NotMixable(self.ty));
        }
        for w in &mut self.words {
            *w += *w;
        }
        Ok(())
    }

    fn check_same_type(&self, other: &Buffer) -> Result<(), BufferError> {
        if self.ty != other.ty {
            return Err(BufferError::TypeMismatch {
                left: self.ty,
                right: other.ty,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer").field("type", &self.ty).finish_non_exhaustive()
    }
}

/// Buffers of an installed spec, indexed by [`BufferId`].
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Vec<Buffer>,
}

impl BufferPool {
    /// Creates a pool with one zeroed buffer per declared type.
    pub fn new(types: &[BufferType]) -> Self {
        Self {
            buffers: types.iter().map(|&ty| Buffer::new(ty)).collect(),
        }
    }

    /// Returns the number of buffer slots.
    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    /// Returns the buffer at `id`.
    #[inline]
    pub fn get(&self, id: BufferId) -> Result<&Buffer, BufferError> {
        self.buffers.get(id.0).ok_or(BufferError::OutOfRange(id.0))
    }

    /// Returns the buffer at `id` mutably.
    #[inline]
    pub fn get_mut(&mut self, id: BufferId) -> Result<&mut Buffer, BufferError> {
        self.buffers
            .get_mut(id.0)
            .ok_or(BufferError::OutOfRange(id.0))
    }

    /// Borrows `src` immutably and `dst` mutably at the same time.
    ///
    /// Returns [`BufferError::Aliased`] if `src == dst`.
    pub fn get_ref_and_mut(
        &mut self,
        src: BufferId,
        dst: BufferId,
    ) -> Result<(&Buffer, &mut Buffer), BufferError> {
        if src == dst {
            return Err(BufferError::Aliased(src.0));
        }
        let count = self.buffers.len();
        if src.0 >= count {
            return Err(BufferError::OutOfRange(src.0));
        }
        if dst.0 >= count {
            return Err(BufferError::OutOfRange(dst.0));
        }
        if src.0 < dst.0 {
            let (lo, hi) = self.buffers.split_at_mut(dst.0);
            Ok((&lo[src.0], &mut hi[0]))
        } else {
            let (lo, hi) = self.buffers.split_at_mut(src.0);
            Ok((&hi[0], &mut lo[dst.0]))
        }
    }

    /// Iterates over all buffers in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_matches_type_size() {
        for ty in [
            BufferType::Float,
            BufferType::FloatArray(128),
            BufferType::Opaque(10),
        ] {
            let buf = Buffer::new(ty);
            assert_eq!(buf.len(), ty.size());
            assert_eq!(buf.as_bytes().len(), ty.size());
            assert!(buf.as_bytes().iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_set_bytes_rejects_length_mismatch() {
        let mut buf = Buffer::new(BufferType::FloatArray(4));
        let err = buf.set_bytes(&[0u8; 12]).unwrap_err();
        assert_eq!(
            err,
            BufferError::SizeMismatch {
                expected: 16,
                actual: 12
            }
        );
    }

    #[test]
    fn test_set_bytes_updates_sample_view() {
        let mut buf = Buffer::new(BufferType::FloatArray(2));
        let data: Vec<u8> = [0.5f32, -0.25].iter().flat_map(|v| v.to_ne_bytes()).collect();
        buf.set_bytes(&data).unwrap();
        assert_eq!(buf.samples().unwrap(), &[0.5, -0.25]);
        assert_eq!(buf.to_bytes(), data);
    }

    #[test]
    fn test_opaque_has_no_sample_view() {
        let buf = Buffer::new(BufferType::Opaque(7));
        assert!(matches!(
            buf.samples(),
            Err(BufferError::WrongType { .. })
        ));
        assert_eq!(buf.as_bytes().len(), 7);
    }

    #[test]
    fn test_mix_and_copy_type_checked() {
        let mut a = Buffer::new(BufferType::FloatArray(4));
        let b = Buffer::new(BufferType::FloatArray(8));
        assert!(matches!(
            a.mix(&b),
            Err(BufferError::TypeMismatch { .. })
        ));
        assert!(matches!(
            a.copy_from(&b),
            Err(BufferError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_mix_accumulates() {
        let mut a = Buffer::new(BufferType::FloatArray(3));
        let mut b = Buffer::new(BufferType::FloatArray(3));
        a.samples_mut().unwrap().copy_from_slice(&[1.0, 2.0, 3.0]);
        b.samples_mut().unwrap().copy_from_slice(&[1.0, 1.0, 1.0]);
        a.mix(&b).unwrap();
        assert_eq!(a.samples().unwrap(), &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_clear_resets_to_silence() {
        let mut a = Buffer::new(BufferType::FloatArray(3));
        a.samples_mut().unwrap().fill(0.7);
        a.clear();
        assert_eq!(a.samples().unwrap(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_pool_get_ref_and_mut_both_orders() {
        let mut pool = BufferPool::new(&[BufferType::Float, BufferType::Float]);
        pool.get_mut(BufferId(0)).unwrap().samples_mut().unwrap()[0] = 1.0;

        let (src, dst) = pool.get_ref_and_mut(BufferId(0), BufferId(1)).unwrap();
        dst.copy_from(src).unwrap();
        assert_eq!(pool.get(BufferId(1)).unwrap().samples().unwrap(), &[1.0]);

        let (src, dst) = pool.get_ref_and_mut(BufferId(1), BufferId(0)).unwrap();
        dst.mix(src).unwrap();
        assert_eq!(pool.get(BufferId(0)).unwrap().samples().unwrap(), &[2.0]);
    }

    #[test]
    fn test_pool_out_of_range() {
        let mut pool = BufferPool::new(&[BufferType::Float]);
        assert!(matches!(
            pool.get(BufferId(3)),
            Err(BufferError::OutOfRange(3))
        ));
        assert!(matches!(
            pool.get_ref_and_mut(BufferId(0), BufferId(5)),
            Err(BufferError::OutOfRange(5))
        ));
    }

    #[test]
    fn test_pool_aliased_borrow_is_error() {
        let mut pool = BufferPool::new(&[BufferType::Float]);
        assert!(matches!(
            pool.get_ref_and_mut(BufferId(0), BufferId(0)),
            Err(BufferError::Aliased(0))
        ));
    }

    #[test]
    fn test_mix_self_doubles() {
        let mut a = Buffer::new(BufferType::FloatArray(3));
        a.samples_mut().unwrap().copy_from_slice(&[0.5, -1.0, 2.0]);
        a.mix_self().unwrap();
        assert_eq!(a.samples().unwrap(), &[1.0, -2.0, 4.0]);

        let mut opaque = Buffer::new(BufferType::Opaque(4));
        assert!(matches!(
            opaque.mix_self(),
            Err(BufferError::NotMixable(_))
        ));
    }
}
