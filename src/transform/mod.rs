//! SIZE transform seam
//!
//! The SIZE code is computed by an external library that exposes exactly
//! three C symbols. This module wraps them behind [`SizeTransform`] so the
//! codec core does not care whether the functions came from `dlopen` or
//! from an in-process stand-in.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        SizeCodec                              │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ TransformLease (RAII, ref-counted)
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  TransformRegistry (process-wide)             │
//! │        Mutex { transform: Option<Arc<..>>, ref_count }        │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ loader
//!              ┌─────────────────┴──────────────────┐
//!              ▼                                    ▼
//!   ┌─────────────────────┐              ┌─────────────────────┐
//!   │  LibraryTransform   │              │   MockTransform     │
//!   │  (dlopen + dlsym)   │              │  (mock-transform)   │
//!   └─────────────────────┘              └─────────────────────┘
//! ```
//!
//! # ABI contract
//!
//! - `split` consumes `L` bytes (`L` a positive multiple of 4) and writes nine
//!   buffers of `L / 4` bytes each.
//! - `restore` rebuilds `L` bytes from up to nine `L / 4`-byte inputs; a
//!   missing input is a null slot. Zero means success.
//! - `can_restore` reports whether an availability pattern is restorable.
//!
//! Every implementation validates these lengths before touching memory.

use std::fmt;

use crate::error::{Error, Result};

pub mod ffi;
#[cfg(unix)]
pub mod library;
#[cfg(feature = "mock-transform")]
pub mod mock;
pub mod registry;

#[cfg(unix)]
pub use library::LibraryTransform;
#[cfg(feature = "mock-transform")]
pub use mock::MockTransform;
pub use registry::{TransformLease, TransformRegistry};

/// Number of shards the transform emits.
pub const SIZE_SHARDS: usize = 9;

/// Input fan-in of the transform: every shard is `L / SIZE_FAN_IN` bytes.
pub const SIZE_FAN_IN: usize = 4;

/// Byte alignment the transform requires of `L`.
pub const SIZE_ALIGNMENT: usize = 4;

/// The three operations of the SIZE transform library.
pub trait SizeTransform: Send + Sync + fmt::Debug {
    /// Split `input` into [`SIZE_SHARDS`] outputs of `input.len() / 4` bytes.
    fn split(&self, input: &[u8], outputs: &mut [&mut [u8]]) -> Result<()>;

    /// Rebuild `output.len()` bytes from the available `inputs`.
    fn restore(&self, output: &mut [u8], inputs: &[Option<&[u8]>]) -> Result<()>;

    /// Oracle: whether `inputs` (`None` = missing) can be restored.
    fn can_restore(&self, inputs: &[Option<&[u8]>]) -> bool;

    /// Where this transform came from, for logs.
    fn origin(&self) -> String;
}

/// Validate the buffers handed to `split`.
pub fn check_split_layout(input_len: usize, outputs: &[&mut [u8]]) -> Result<()> {
    let shard_len = check_total_len(input_len)?;
    check_slot_count(outputs.len())?;
    for (index, out) in outputs.iter().enumerate() {
        if out.len() != shard_len {
            return Err(Error::ShardLengthMismatch {
                index,
                len: out.len(),
                expected: shard_len,
            });
        }
    }
    Ok(())
}

/// Validate the buffers handed to `restore`.
pub fn check_restore_layout(output_len: usize, inputs: &[Option<&[u8]>]) -> Result<()> {
    let shard_len = check_total_len(output_len)?;
    check_slot_count(inputs.len())?;
    for (index, input) in inputs.iter().enumerate() {
        if let Some(buf) = input {
            if buf.len() != shard_len {
                return Err(Error::ShardLengthMismatch {
                    index,
                    len: buf.len(),
                    expected: shard_len,
                });
            }
        }
    }
    Ok(())
}

fn check_total_len(len: usize) -> Result<usize> {
    if len == 0 || len % SIZE_ALIGNMENT != 0 {
        return Err(Error::UnalignedInput {
            len,
            alignment: SIZE_ALIGNMENT,
        });
    }
    Ok(len / SIZE_FAN_IN)
}

fn check_slot_count(count: usize) -> Result<()> {
    if count != SIZE_SHARDS {
        return Err(Error::InvalidShard {
            index: count as i64,
            chunk_count: SIZE_SHARDS,
        });
    }
    Ok(())
}
