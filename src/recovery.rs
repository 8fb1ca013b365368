//! Recovery policy: which shards to fetch before a decode
//!
//! XOR needs any two survivors. SIZE needs all nine, always: its shards are
//! transformed derivatives, so there is no cheaper read even when nothing is
//! lost.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::CodeFamily;
use crate::error::{Error, Result};
use crate::shard::{ShardId, ShardSet, SubChunkMap};

/// Minimum set of shards to read so that `want` can be decoded.
///
/// # Errors
///
/// - `InvalidShard` for an index outside the family's shard range
/// - XOR: `TooManyErasures` when fewer than two shards survive
/// - SIZE: `InsufficientShards` when any of the nine shards is unavailable
pub fn minimum_to_decode(
    family: CodeFamily,
    want: &ShardSet,
    available: &ShardSet,
) -> Result<ShardSet> {
    let (k, m) = family.native_km();
    let n = k + m;
    for id in want.iter().chain(available) {
        id.check(n)?;
    }

    let minimum = match family {
        CodeFamily::Xor21 => {
            if want.is_subset(available) {
                want.clone()
            } else if available.len() < k {
                return Err(Error::TooManyErasures {
                    erasures: n - available.len(),
                    tolerated: m,
                });
            } else {
                available.iter().take(k).copied().collect()
            }
        }
        CodeFamily::Size45 => {
            let missing: Vec<usize> = (0..n)
                .filter(|&i| !available.contains(&ShardId(i)))
                .collect();
            if !missing.is_empty() {
                return Err(Error::InsufficientShards {
                    available: available.len(),
                    required: n,
                    missing,
                });
            }
            available.clone()
        }
    };

    debug!(%family, want = want.len(), minimum = minimum.len(), "minimum to decode");
    Ok(minimum)
}

/// Cost-aware variant. Costs are ignored; only availability matters.
pub fn minimum_to_decode_with_cost(
    family: CodeFamily,
    want: &ShardSet,
    available: &BTreeMap<ShardId, u32>,
) -> Result<ShardSet> {
    let available: ShardSet = available.keys().copied().collect();
    minimum_to_decode(family, want, &available)
}

/// Sub-chunk ranges for a minimum set: the whole single sub-chunk of each.
pub fn full_sub_chunks(minimum: &ShardSet) -> SubChunkMap {
    minimum.iter().map(|&id| (id, vec![(0, 1)])).collect()
}
