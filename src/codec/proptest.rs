//! Property-Based Tests for the codecs
//!
//! Uses proptest against the host adapter, with the in-process transform
//! standing in for the shared library.
//!
//! # Test Properties
//!
//! 1. **Chunk sizing**: `K · chunk_size(w) >= w` and is a multiple of `A`
//! 2. **XOR roundtrip**: any single loss is recovered
//! 3. **SIZE roundtrip**: all nine shards restore the input
//! 4. **Determinism**: same input, same shards
//! 5. **Insufficient sets**: any proper subset of the nine is rejected
//! 6. **Legacy equivalence**: the integer interface matches the typed one
//! 7. **Alignment**: every length handed to the transform is aligned

#![cfg(feature = "mock-transform")]

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use proptest::prelude::*;

use crate::config::{CodeFamily, Profile};
use crate::error::Error;
use crate::plugin::ErasureCode;
use crate::shard::{all_shards, map_to_legacy, set_to_legacy, ShardId, ShardMap, ShardSet};
use crate::transform::MockTransform;

// =============================================================================
// Helpers and Strategies
// =============================================================================

fn size_code_with(mock: Arc<MockTransform>) -> ErasureCode {
    let mut code = ErasureCode::new(CodeFamily::Size45);
    code.init_with_transform(&Profile::new(), &mut String::new(), mock)
        .unwrap();
    code
}

fn size_code() -> ErasureCode {
    size_code_with(Arc::new(MockTransform::new()))
}

fn xor_code() -> ErasureCode {
    let mut code = ErasureCode::new(CodeFamily::Xor21);
    code.init(&Profile::new(), &mut String::new()).unwrap();
    code
}

fn data_set() -> ShardSet {
    (0..4).map(ShardId).collect()
}

/// Aligned SIZE inputs: 4 · c bytes with c in 1..512.
fn aligned_data_strategy() -> impl Strategy<Value = Vec<u8>> {
    (1usize..512).prop_flat_map(|c| prop::collection::vec(any::<u8>(), 4 * c))
}

/// Equal-length pairs of XOR data shards.
fn xor_pair_strategy() -> impl Strategy<Value = (Vec<u8>, Vec<u8>)> {
    (0usize..256).prop_flat_map(|len| {
        (
            prop::collection::vec(any::<u8>(), len),
            prop::collection::vec(any::<u8>(), len),
        )
    })
}

// =============================================================================
// Layout Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: chunk size covers the stripe and is aligned, for both families.
    #[test]
    fn prop_chunk_size_covers_stripe(stripe_width in 0usize..1_000_000) {
        for code in [size_code(), xor_code()] {
            let k = match code.family() {
                CodeFamily::Size45 => 4,
                CodeFamily::Xor21 => 2,
            };
            let chunk = code.get_chunk_size(stripe_width);
            prop_assert!(k * chunk >= stripe_width);
            prop_assert_eq!((k * chunk) % code.get_alignment(), 0);
            prop_assert_eq!(chunk % code.get_alignment(), 0);
        }
    }

    /// Property: advertised counts add up.
    #[test]
    fn prop_chunk_count_is_sum(force in any::<bool>()) {
        let mut profile = Profile::new();
        if force {
            profile.insert("force_all_chunks", "true");
            profile.insert("k", "9");
            profile.insert("m", "0");
        }
        let mut code = ErasureCode::new(CodeFamily::Size45);
        code.init_with_transform(&profile, &mut String::new(), Arc::new(MockTransform::new()))?;
        prop_assert_eq!(
            code.get_chunk_count(),
            code.get_data_chunk_count() + code.get_coding_chunk_count()
        );
    }
}

// =============================================================================
// Roundtrip Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: XOR recovers any single erased shard.
    #[test]
    fn prop_xor_single_loss((d0, d1) in xor_pair_strategy(), erased in 0usize..3) {
        let code = xor_code();
        let parity: Vec<u8> = d0.iter().zip(&d1).map(|(a, b)| a ^ b).collect();
        let mut chunks: ShardMap = [
            (ShardId(0), Bytes::from(d0.clone())),
            (ShardId(1), Bytes::from(d1.clone())),
            (ShardId(2), Bytes::from(parity)),
        ]
        .into_iter()
        .collect();
        chunks.remove(&ShardId(erased));

        let want: ShardSet = [ShardId(0), ShardId(1)].into_iter().collect();
        let decoded = code.decode(&want, &chunks, d0.len())?;
        prop_assert_eq!(decoded[&ShardId(0)].as_ref(), d0.as_slice());
        prop_assert_eq!(decoded[&ShardId(1)].as_ref(), d1.as_slice());
    }

    /// Property: SIZE decode with all nine shards returns the input.
    #[test]
    fn prop_size_roundtrip(data in aligned_data_strategy()) {
        let code = size_code();
        let shards = code.encode(&all_shards(9), &[Bytes::from(data.clone())])?;
        prop_assert_eq!(shards.len(), 9);

        let chunk = data.len() / 4;
        prop_assert!(shards.values().all(|s| s.len() == chunk));

        let decoded = code.decode(&data_set(), &shards, chunk)?;
        let joined: Vec<u8> = decoded.values().flat_map(|b| b.iter().copied()).collect();
        prop_assert_eq!(joined, data);
    }

    /// Property: encoding is deterministic.
    #[test]
    fn prop_size_deterministic(data in aligned_data_strategy()) {
        let code = size_code();
        let input = [Bytes::from(data)];
        let first = code.encode(&all_shards(9), &input)?;
        let second = code.encode(&all_shards(9), &input)?;
        prop_assert_eq!(first, second);
    }

    /// Property: every proper subset of the nine shards is rejected.
    #[test]
    fn prop_size_proper_subset_rejected(
        data in aligned_data_strategy(),
        mask in 0u32..0x1ff,
    ) {
        let code = size_code();
        let shards = code.encode(&all_shards(9), &[Bytes::from(data)])?;
        let subset: ShardMap = shards
            .into_iter()
            .filter(|(id, _)| mask & (1 << id.index()) != 0)
            .collect();
        let chunk = subset.values().next().map_or(0, Bytes::len);

        let result = code.decode(&data_set(), &subset, chunk);
        let is_insufficient = matches!(result, Err(Error::InsufficientShards { .. }));
        prop_assert!(is_insufficient);
    }
}

// =============================================================================
// Interface Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: legacy entry points return the typed results, translated.
    #[test]
    fn prop_legacy_matches_typed(
        data in aligned_data_strategy(),
        want_mask in 1u32..0x200,
    ) {
        let code = size_code();
        let input = [Bytes::from(data)];
        let want: ShardSet = (0..9).filter(|i| want_mask & (1 << i) != 0).map(ShardId).collect();
        let want_legacy: BTreeSet<i32> = set_to_legacy(&want);

        let typed = code.encode(&want, &input)?;
        let legacy = code.encode_legacy(&want_legacy, &input)?;
        prop_assert_eq!(map_to_legacy(typed), legacy);

        let all = code.encode(&all_shards(9), &input)?;
        let chunk = all[&ShardId(0)].len();
        let typed = code.decode(&want, &all, chunk)?;
        let legacy = code.decode_legacy(&want_legacy, &map_to_legacy(all.clone()), chunk)?;
        prop_assert_eq!(map_to_legacy(typed), legacy);

        let available = all_shards(9);
        let (typed, _) = code.minimum_to_decode(&want, &available)?;
        let legacy = code.minimum_to_decode_legacy(&want_legacy, &set_to_legacy(&available))?;
        prop_assert_eq!(set_to_legacy(&typed), legacy);
    }

    /// Property: the transform only ever sees lengths that are multiples of
    /// the advertised alignment.
    #[test]
    fn prop_transform_lengths_aligned(
        stripe_width in 1usize..4096,
        seed in any::<u8>(),
    ) {
        let mock = Arc::new(MockTransform::new());
        let code = size_code_with(Arc::clone(&mock));

        let len = code.get_chunk_size(stripe_width) * 4;
        let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_add(seed)).collect();
        let shards = code.encode(&all_shards(9), &[Bytes::from(data)])?;
        code.decode(&data_set(), &shards, len / 4)?;

        let alignment = code.get_alignment();
        let observed = mock.observed_lengths();
        prop_assert!(!observed.is_empty());
        prop_assert!(observed.iter().all(|l| l % alignment == 0));
    }
}
