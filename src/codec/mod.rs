//! Codec core
//!
//! One variant per code family, each with the same capability set: shard
//! counts, alignment, chunk size, encode, decode and minimum-set selection.
//!
//! # Components
//!
//! - **XOR(2,1)** (`xor.rs`): parity is the XOR of the two data shards;
//!   tolerates one loss.
//! - **SIZE(4,5)** (`size.rs`): nine transformed shards produced by the
//!   external transform; every read restores from all nine.

pub mod size;
pub mod xor;

#[cfg(test)]
mod proptest;

pub use size::SizeCodec;
pub use xor::XorCodec;

use crate::config::CodeFamily;
use crate::error::Result;
use crate::layout::Layout;
use crate::recovery;
use crate::shard::{ShardMap, ShardSet};
use crate::transform::{SIZE_ALIGNMENT, SIZE_FAN_IN};

/// A constructed codec of either family.
#[derive(Debug, Clone)]
pub enum Codec {
    Xor(XorCodec),
    Size(SizeCodec),
}

impl Codec {
    /// Code family of this codec.
    pub fn family(&self) -> CodeFamily {
        match self {
            Codec::Xor(_) => CodeFamily::Xor21,
            Codec::Size(_) => CodeFamily::Size45,
        }
    }

    /// Number of shards the codec physically produces.
    pub fn chunk_count(&self) -> usize {
        let (k, m) = self.family().native_km();
        k + m
    }

    /// Size arithmetic of the codec.
    pub fn layout(&self) -> Layout {
        layout_for(self.family())
    }

    pub fn alignment(&self) -> usize {
        self.layout().alignment()
    }

    pub fn chunk_size(&self, stripe_width: usize) -> usize {
        self.layout().chunk_size(stripe_width)
    }

    /// Encode `input` into the shards named in `want`.
    pub fn encode(&self, want: &ShardSet, input: &[u8]) -> Result<ShardMap> {
        match self {
            Codec::Xor(codec) => codec.encode(want, input),
            Codec::Size(codec) => codec.encode(want, input),
        }
    }

    /// Decode the shards named in `want` from `chunks`.
    pub fn decode(
        &self,
        want: &ShardSet,
        chunks: &ShardMap,
        chunk_size: usize,
    ) -> Result<ShardMap> {
        match self {
            Codec::Xor(codec) => codec.decode(want, chunks, chunk_size),
            Codec::Size(codec) => codec.decode(want, chunks, chunk_size),
        }
    }

    /// Minimum set of shards to read for `want`.
    pub fn minimum_to_decode(&self, want: &ShardSet, available: &ShardSet) -> Result<ShardSet> {
        recovery::minimum_to_decode(self.family(), want, available)
    }
}

/// Size arithmetic of `family`, available before any codec is built.
pub fn layout_for(family: CodeFamily) -> Layout {
    match family {
        CodeFamily::Xor21 => XorCodec.layout(),
        CodeFamily::Size45 => Layout::new(SIZE_FAN_IN, SIZE_ALIGNMENT),
    }
}

impl From<XorCodec> for Codec {
    fn from(codec: XorCodec) -> Self {
        Codec::Xor(codec)
    }
}

impl From<SizeCodec> for Codec {
    fn from(codec: SizeCodec) -> Self {
        Codec::Size(codec)
    }
}
