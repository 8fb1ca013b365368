//! Alignment and buffer layout
//!
//! Pure size arithmetic shared by every code family. Nothing here performs
//! I/O or touches global state, so the host may call these while computing
//! stripe plans.

use bytes::Bytes;

use crate::error::{Error, Result};

/// Alignment and data fan-in of one code family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Number of shards the input is divided across (K)
    pub data_shards: usize,
    /// Intrinsic alignment of the transform in bytes (A)
    pub alignment: usize,
}

impl Layout {
    /// Create a layout for `data_shards` shards aligned to `alignment` bytes.
    pub const fn new(data_shards: usize, alignment: usize) -> Self {
        Self {
            data_shards,
            alignment,
        }
    }

    /// Transform alignment `A`.
    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Smallest unit the host may address within a shard.
    #[inline]
    pub fn minimum_granularity(&self) -> usize {
        self.alignment
    }

    /// `round_up(stripe_width, K·A) / K`.
    ///
    /// Guarantees `K · chunk_size >= stripe_width` and that the chunk size
    /// is itself a multiple of `A`.
    pub fn chunk_size(&self, stripe_width: usize) -> usize {
        round_up(stripe_width, self.data_shards * self.alignment) / self.data_shards
    }

    /// Round `n` up to the next multiple of `A`.
    #[inline]
    pub fn calculate_aligned_size(&self, n: usize) -> usize {
        round_up(n, self.alignment)
    }

    /// True when `len` is a multiple of `A`.
    #[inline]
    pub fn is_aligned(&self, len: usize) -> bool {
        len % self.alignment == 0
    }

    /// Fail with `UnalignedInput` unless `len` is a multiple of `A`.
    pub fn check_aligned(&self, len: usize) -> Result<()> {
        if !self.is_aligned(len) {
            return Err(Error::UnalignedInput {
                len,
                alignment: self.alignment,
            });
        }
        Ok(())
    }
}

/// Round `n` up to a multiple of `multiple`.
#[inline]
pub fn round_up(n: usize, multiple: usize) -> usize {
    debug_assert!(multiple > 0);
    n.div_ceil(multiple) * multiple
}

/// Allocate `len` zeroed bytes, reporting allocator refusal as an error
/// instead of aborting.
pub fn zeroed_buffer(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::AllocationFailure { size: len })?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Join a fragmented buffer list into one contiguous region.
///
/// A single fragment is returned as-is without copying.
pub fn materialize(fragments: &[Bytes]) -> Result<Bytes> {
    match fragments {
        [] => Ok(Bytes::new()),
        [single] => Ok(single.clone()),
        many => {
            let total: usize = many.iter().map(Bytes::len).sum();
            let mut joined = Vec::new();
            joined
                .try_reserve_exact(total)
                .map_err(|_| Error::AllocationFailure { size: total })?;
            for fragment in many {
                joined.extend_from_slice(fragment);
            }
            Ok(Bytes::from(joined))
        }
    }
}

/// Copy `input` into a zero-filled buffer of `padded_len` bytes.
pub fn zero_pad(input: &[u8], padded_len: usize) -> Result<Vec<u8>> {
    debug_assert!(padded_len >= input.len());
    let mut buf = zeroed_buffer(padded_len)?;
    buf[..input.len()].copy_from_slice(input);
    Ok(buf)
}
