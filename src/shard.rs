//! Shard identity and the typed/legacy collection types
//!
//! The host speaks two dialects: the current one keys everything by a typed
//! [`ShardId`], the legacy one by raw `i32`. Conversions live here so that
//! every legacy entry point in the host adapter is a plain convert-delegate-
//! convert wrapper.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use bytes::Bytes;

use crate::error::{Error, Result};

/// Identifier of one shard within a stripe, `0..N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardId(pub usize);

impl ShardId {
    /// Raw index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }

    /// Convert a legacy integer index, rejecting negatives and `>= chunk_count`.
    pub fn from_legacy(raw: i32, chunk_count: usize) -> Result<Self> {
        if raw < 0 || raw as usize >= chunk_count {
            return Err(Error::InvalidShard {
                index: raw as i64,
                chunk_count,
            });
        }
        Ok(ShardId(raw as usize))
    }

    /// Legacy integer form.
    #[inline]
    pub fn to_legacy(self) -> i32 {
        self.0 as i32
    }

    /// Fail with `InvalidShard` unless `self < chunk_count`.
    pub fn check(self, chunk_count: usize) -> Result<Self> {
        if self.0 >= chunk_count {
            return Err(Error::InvalidShard {
                index: self.0 as i64,
                chunk_count,
            });
        }
        Ok(self)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for ShardId {
    fn from(index: usize) -> Self {
        ShardId(index)
    }
}

/// Ordered set of shard ids.
pub type ShardSet = BTreeSet<ShardId>;

/// Shard id to buffer. Defaults to immutable `Bytes` buffers.
pub type ShardMap<B = Bytes> = BTreeMap<ShardId, B>;

/// Sub-chunk ranges per shard, `(offset, count)` pairs.
pub type SubChunkMap = BTreeMap<ShardId, Vec<(u32, u32)>>;

/// `0..n` as a shard set.
pub fn all_shards(n: usize) -> ShardSet {
    (0..n).map(ShardId).collect()
}

/// Bitmask of the shards present in `set` (bit `i` for shard `i`).
pub fn availability_bitmask<'a>(set: impl IntoIterator<Item = &'a ShardId>) -> u32 {
    set.into_iter()
        .filter(|id| id.0 < 32)
        .fold(0u32, |mask, id| mask | (1 << id.0))
}

// =============================================================================
// Legacy Conversions
// =============================================================================

/// Convert a legacy integer set into a typed one.
pub fn set_from_legacy(raw: &BTreeSet<i32>, chunk_count: usize) -> Result<ShardSet> {
    raw.iter()
        .map(|&i| ShardId::from_legacy(i, chunk_count))
        .collect()
}

/// Convert a typed set into the legacy integer form.
pub fn set_to_legacy(set: &ShardSet) -> BTreeSet<i32> {
    set.iter().map(|id| id.to_legacy()).collect()
}

/// Convert a legacy integer-keyed map into a typed one.
pub fn map_from_legacy<B: Clone>(
    raw: &BTreeMap<i32, B>,
    chunk_count: usize,
) -> Result<ShardMap<B>> {
    raw.iter()
        .map(|(&i, buf)| Ok((ShardId::from_legacy(i, chunk_count)?, buf.clone())))
        .collect()
}

/// Convert a typed map into the legacy integer-keyed form.
pub fn map_to_legacy<B>(map: ShardMap<B>) -> BTreeMap<i32, B> {
    map.into_iter()
        .map(|(id, buf)| (id.to_legacy(), buf))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_from_legacy_bounds() {
        assert_eq!(ShardId::from_legacy(0, 9).unwrap(), ShardId(0));
        assert_eq!(ShardId::from_legacy(8, 9).unwrap(), ShardId(8));
        assert_matches!(
            ShardId::from_legacy(9, 9),
            Err(Error::InvalidShard { index: 9, chunk_count: 9 })
        );
        assert_matches!(
            ShardId::from_legacy(-1, 9),
            Err(Error::InvalidShard { index: -1, .. })
        );
    }

    #[test]
    fn test_bitmask() {
        assert_eq!(availability_bitmask(&all_shards(9)), 0x1ff);
        let partial: ShardSet = [0, 2, 8].into_iter().map(ShardId).collect();
        assert_eq!(availability_bitmask(&partial), 0b1_0000_0101);
    }

    #[test]
    fn test_legacy_roundtrip() {
        let raw: BTreeSet<i32> = [3, 1, 2].into_iter().collect();
        assert!(set_from_legacy(&raw, 3).is_err());
        let typed = set_from_legacy(&raw, 4).unwrap();
        assert_eq!(set_to_legacy(&typed), raw);

        let mut legacy_map = BTreeMap::new();
        legacy_map.insert(2, Bytes::from_static(b"ab"));
        assert!(map_from_legacy(&legacy_map, 2).is_err());
        let typed = map_from_legacy(&legacy_map, 3).unwrap();
        assert_eq!(typed[&ShardId(2)], Bytes::from_static(b"ab"));
        assert_eq!(map_to_legacy(typed), legacy_map);
    }
}
