//! SIZE(4,5) codec
//!
//! All nine shards are transformed derivatives of the input, so every read
//! goes through `restore` even when nothing was lost. Decode therefore needs
//! the full set of nine shards.
//!
//! Buffer sizing always uses the transform's input fan-in of 4: an input of
//! `L` bytes yields nine shards of `L / 4` bytes, regardless of the (k, m)
//! the profile advertises.

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::layout::{zeroed_buffer, Layout};
use crate::shard::{availability_bitmask, ShardId, ShardMap, ShardSet};
use crate::transform::{TransformLease, SIZE_ALIGNMENT, SIZE_FAN_IN, SIZE_SHARDS};

/// Advertised data-role shard count.
pub const SIZE_DATA_SHARDS: usize = 4;

/// Advertised coding-role shard count.
pub const SIZE_CODING_SHARDS: usize = 5;

/// Leading bytes of a restored buffer inspected by the corruption check.
const SANITY_WINDOW: usize = 64;

/// SIZE(4,5) codec bound to a leased transform.
#[derive(Debug, Clone)]
pub struct SizeCodec {
    transform: TransformLease,
    force_all_chunks: bool,
}

impl SizeCodec {
    /// Create a codec over a leased transform.
    pub fn new(transform: TransformLease, force_all_chunks: bool) -> Self {
        Self {
            transform,
            force_all_chunks,
        }
    }

    /// Size arithmetic for this code, keyed on the transform fan-in.
    pub const fn layout(&self) -> Layout {
        Layout::new(SIZE_FAN_IN, SIZE_ALIGNMENT)
    }

    /// Whether every encode must request all nine shards.
    pub fn force_all_chunks(&self) -> bool {
        self.force_all_chunks
    }

    /// The leased transform.
    pub fn transform(&self) -> &TransformLease {
        &self.transform
    }

    /// Encode `input` and return the requested shards.
    ///
    /// # Errors
    ///
    /// - `InvalidShard` for an index outside `0..9`
    /// - `InvalidProfile` when force-all-chunks is on and `want` is not all nine
    /// - `UnalignedInput` when `input.len()` is not a multiple of 4
    #[instrument(skip(self, want, input), fields(len = input.len(), want = want.len()))]
    pub fn encode(&self, want: &ShardSet, input: &[u8]) -> Result<ShardMap> {
        for id in want {
            id.check(SIZE_SHARDS)?;
        }
        if self.force_all_chunks && want.len() != SIZE_SHARDS {
            return Err(Error::InvalidProfile(format!(
                "force_all_chunks requires all {SIZE_SHARDS} shards to be encoded, got {}",
                want.len()
            )));
        }

        if input.is_empty() {
            debug!("empty input, emitting empty shards");
            return Ok(want.iter().map(|&id| (id, Bytes::new())).collect());
        }
        self.layout().check_aligned(input.len())?;

        let shards = self.split_all(input)?;
        debug!(chunk_size = input.len() / SIZE_FAN_IN, "encoded SIZE stripe");

        Ok(want
            .iter()
            .map(|&id| (id, shards[id.index()].clone()))
            .collect())
    }

    /// Restore the original bytes from all nine shards and return the
    /// requested shards.
    ///
    /// Data-role shards (`0..4`) are slices of the restored buffer.
    /// Coding-role shards are returned as stored.
    ///
    /// # Errors
    ///
    /// - `InvalidShard` for an index outside `0..9`
    /// - `InsufficientShards` when any of the nine shards is absent
    /// - `ShardLengthMismatch` when the shards differ in length
    /// - `UnrestorablePattern` when the transform oracle refuses the pattern
    /// - `RestoreFailed` when the transform reports a nonzero status
    #[instrument(
        skip(self, want, chunks),
        fields(available = chunks.len(), bitmask = availability_bitmask(chunks.keys()))
    )]
    pub fn decode(
        &self,
        want: &ShardSet,
        chunks: &ShardMap,
        chunk_size: usize,
    ) -> Result<ShardMap> {
        for id in want.iter().chain(chunks.keys()) {
            id.check(SIZE_SHARDS)?;
        }

        let missing: Vec<usize> = (0..SIZE_SHARDS)
            .filter(|&i| !chunks.contains_key(&ShardId(i)))
            .collect();
        if !missing.is_empty() {
            return Err(Error::InsufficientShards {
                available: chunks.len(),
                required: SIZE_SHARDS,
                missing,
            });
        }

        let shard_len = chunks[&ShardId(0)].len();
        for (id, buf) in chunks {
            if buf.len() != shard_len {
                return Err(Error::ShardLengthMismatch {
                    index: id.index(),
                    len: buf.len(),
                    expected: shard_len,
                });
            }
        }
        if chunk_size != shard_len {
            warn!(
                chunk_size,
                shard_len, "chunk size hint differs from stored shard length, using shard length"
            );
        }

        if shard_len == 0 {
            return Ok(want.iter().map(|&id| (id, Bytes::new())).collect());
        }

        let inputs: Vec<Option<&[u8]>> = (0..SIZE_SHARDS)
            .map(|i| chunks.get(&ShardId(i)).map(|b| &b[..]))
            .collect();

        if !self.transform.can_restore(&inputs) {
            let bitmask = availability_bitmask(chunks.keys());
            warn!(bitmask, "transform oracle rejected availability pattern");
            return Err(Error::UnrestorablePattern { bitmask });
        }

        let total = SIZE_FAN_IN * shard_len;
        let mut restored = zeroed_buffer(total)?;
        self.transform.restore(&mut restored, &inputs)?;

        if restored.iter().take(SANITY_WINDOW).all(|&b| b == 0) {
            warn!(
                len = total,
                "restored buffer starts with {} zero bytes, possible shard corruption",
                SANITY_WINDOW.min(total)
            );
        }

        let restored = Bytes::from(restored);
        let mut resplit: Option<Vec<Bytes>> = None;
        let mut out = ShardMap::new();
        for &id in want {
            let i = id.index();
            let buf = if i < SIZE_FAN_IN {
                restored.slice(i * shard_len..(i + 1) * shard_len)
            } else if let Some(stored) = chunks.get(&id) {
                stored.clone()
            } else {
                if resplit.is_none() {
                    resplit = Some(self.split_all(&restored)?);
                }
                resplit
                    .as_ref()
                    .map(|shards| shards[i].clone())
                    .unwrap_or_default()
            };
            out.insert(id, buf);
        }

        debug!(shard_len, decoded = out.len(), "decoded SIZE stripe");
        Ok(out)
    }

    /// Split a non-empty aligned input into all nine shards.
    fn split_all(&self, input: &[u8]) -> Result<Vec<Bytes>> {
        let shard_len = input.len() / SIZE_FAN_IN;
        let mut shards = (0..SIZE_SHARDS)
            .map(|_| zeroed_buffer(shard_len))
            .collect::<Result<Vec<_>>>()?;
        {
            let mut outputs: Vec<&mut [u8]> = shards.iter_mut().map(Vec::as_mut_slice).collect();
            self.transform.split(input, &mut outputs)?;
        }
        Ok(shards.into_iter().map(Bytes::from).collect())
    }
}
