//! XOR(2,1) codec
//!
//! Two data shards and one parity shard, `P[i] = D0[i] ^ D1[i]`. Any single
//! shard can be rebuilt from the other two.

use bytes::Bytes;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::layout::{zero_pad, Layout};
use crate::shard::{ShardId, ShardMap, ShardSet};

/// Data shard count.
pub const XOR_DATA_SHARDS: usize = 2;

/// Parity shard count.
pub const XOR_CODING_SHARDS: usize = 1;

/// Total shard count.
pub const XOR_SHARDS: usize = XOR_DATA_SHARDS + XOR_CODING_SHARDS;

/// Alignment of XOR shards: one machine word of the parity loop.
pub const XOR_ALIGNMENT: usize = std::mem::size_of::<u32>();

/// Terminator of a legacy erasure list.
pub const ERASURE_LIST_END: i32 = -1;

const PARITY: usize = 2;

/// Stateless XOR(2,1) codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct XorCodec;

impl XorCodec {
    /// Create the codec.
    pub fn new() -> Self {
        Self
    }

    /// Size arithmetic for this code.
    pub const fn layout(&self) -> Layout {
        Layout::new(XOR_DATA_SHARDS, XOR_ALIGNMENT)
    }

    /// Compute the parity of two equal-length data buffers.
    pub fn encode_parity(&self, d0: &[u8], d1: &[u8]) -> Result<Vec<u8>> {
        if d0.len() != d1.len() {
            return Err(Error::ShardLengthMismatch {
                index: 1,
                len: d1.len(),
                expected: d0.len(),
            });
        }
        Ok(xor_bytes(d0, d1))
    }

    /// Rebuild erased shards in place.
    ///
    /// `erasures` lists erased indices and ends at the first `-1` (or the end
    /// of the slice). Duplicate entries count once.
    ///
    /// # Errors
    ///
    /// - `InvalidShard` for an index outside `0..3`
    /// - `TooManyErasures` when more than one shard is erased
    pub fn decode_erasures(
        &self,
        erasures: &[i32],
        shards: &mut [Vec<u8>; XOR_SHARDS],
    ) -> Result<()> {
        let mut erased: Vec<usize> = Vec::with_capacity(XOR_SHARDS);
        for &raw in erasures.iter().take_while(|&&e| e != ERASURE_LIST_END) {
            let id = ShardId::from_legacy(raw, XOR_SHARDS)?;
            if !erased.contains(&id.index()) {
                erased.push(id.index());
            }
        }

        match erased[..] {
            [] => Ok(()),
            [missing] => {
                let (a, b) = match missing {
                    0 => (1, PARITY),
                    1 => (0, PARITY),
                    _ => (0, 1),
                };
                if shards[a].len() != shards[b].len() {
                    return Err(Error::ShardLengthMismatch {
                        index: b,
                        len: shards[b].len(),
                        expected: shards[a].len(),
                    });
                }
                shards[missing] = xor_bytes(&shards[a], &shards[b]);
                debug!(missing, "rebuilt XOR shard");
                Ok(())
            }
            _ => Err(Error::TooManyErasures {
                erasures: erased.len(),
                tolerated: XOR_CODING_SHARDS,
            }),
        }
    }

    /// Encode `input` into the requested shards.
    ///
    /// The input is zero-padded to `2 · chunk_size` and split into two data
    /// shards before the parity is computed.
    #[instrument(skip(self, want, input), fields(len = input.len()))]
    pub fn encode(&self, want: &ShardSet, input: &[u8]) -> Result<ShardMap> {
        for id in want {
            id.check(XOR_SHARDS)?;
        }

        let chunk = self.layout().chunk_size(input.len());
        let padded = zero_pad(input, XOR_DATA_SHARDS * chunk)?;
        let (d0, d1) = padded.split_at(chunk);
        let parity = self.encode_parity(d0, d1)?;

        let padded = Bytes::from(padded);
        let shards = [padded.slice(..chunk), padded.slice(chunk..), Bytes::from(parity)];

        debug!(chunk, "encoded XOR stripe");
        Ok(want.iter().map(|&id| (id, shards[id.index()].clone())).collect())
    }

    /// Rebuild the requested shards from the available ones.
    #[instrument(skip(self, want, chunks), fields(available = chunks.len()))]
    pub fn decode(
        &self,
        want: &ShardSet,
        chunks: &ShardMap,
        chunk_size: usize,
    ) -> Result<ShardMap> {
        for id in want.iter().chain(chunks.keys()) {
            id.check(XOR_SHARDS)?;
        }

        let len = chunks.values().next().map_or(chunk_size, Bytes::len);
        for (id, buf) in chunks {
            if buf.len() != len {
                return Err(Error::ShardLengthMismatch {
                    index: id.index(),
                    len: buf.len(),
                    expected: len,
                });
            }
        }

        if want.iter().all(|id| chunks.contains_key(id)) {
            return Ok(want.iter().map(|&id| (id, chunks[&id].clone())).collect());
        }

        // Rebuilding any wanted shard takes both survivors.
        let mut erasures = Vec::with_capacity(XOR_SHARDS + 1);
        let mut shards: [Vec<u8>; XOR_SHARDS] = Default::default();
        for (index, slot) in shards.iter_mut().enumerate() {
            match chunks.get(&ShardId(index)) {
                Some(buf) => *slot = buf.to_vec(),
                None => {
                    *slot = vec![0u8; len];
                    erasures.push(index as i32);
                }
            }
        }
        erasures.push(ERASURE_LIST_END);

        self.decode_erasures(&erasures, &mut shards)?;

        Ok(want
            .iter()
            .map(|&id| {
                let buf = chunks
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| Bytes::copy_from_slice(&shards[id.index()]));
                (id, buf)
            })
            .collect())
    }

    /// Parity delta for a data update: `old_data ^ new_data`.
    pub fn encode_delta(&self, old_data: &[u8], new_data: &[u8]) -> Result<Vec<u8>> {
        if old_data.len() != new_data.len() {
            return Err(Error::ShardLengthMismatch {
                index: 0,
                len: new_data.len(),
                expected: old_data.len(),
            });
        }
        Ok(xor_bytes(old_data, new_data))
    }

    /// Fold a delta into a parity shard: `old_parity ^ delta`.
    pub fn apply_delta(&self, delta: &[u8], parity: &[u8]) -> Result<Vec<u8>> {
        if delta.len() != parity.len() {
            return Err(Error::ShardLengthMismatch {
                index: PARITY,
                len: parity.len(),
                expected: delta.len(),
            });
        }
        Ok(xor_bytes(parity, delta))
    }
}

fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}
