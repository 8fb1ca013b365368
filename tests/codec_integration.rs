//! Codec Integration Tests
//!
//! End-to-end tests through the host adapter, with the in-process transform
//! standing in for `sizeceph.so`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use bytes::Bytes;

use sizeec::codec::XorCodec;
use sizeec::shard::{all_shards, map_to_legacy};
use sizeec::transform::mock::OracleMode;
use sizeec::transform::MockTransform;
use sizeec::{
    CodeFamily, Error, ErasureCode, LoaderConfig, Profile, ShardId, ShardMap, ShardSet,
    SizeTransform, TransformRegistry,
};

// =============================================================================
// Helpers
// =============================================================================

fn size_code_with(mock: Arc<MockTransform>) -> ErasureCode {
    let mut code = ErasureCode::new(CodeFamily::Size45);
    code.init_with_transform(&Profile::new(), &mut String::new(), mock)
        .expect("Failed to init SIZE code");
    code
}

fn size_code() -> ErasureCode {
    size_code_with(Arc::new(MockTransform::new()))
}

fn xor_code() -> ErasureCode {
    let mut code = ErasureCode::new(CodeFamily::Xor21);
    code.init(&Profile::new().with("plugin", "simple_xor"), &mut String::new())
        .expect("Failed to init XOR code");
    code
}

fn pattern(len: usize) -> Bytes {
    (0..len).map(|i| (i % 251) as u8 ^ 0x5a).collect::<Vec<u8>>().into()
}

fn data_set() -> ShardSet {
    (0..4).map(ShardId).collect()
}

/// Registry over a fresh mock per load, counting loads.
fn counting_registry() -> (Arc<TransformRegistry>, Arc<AtomicUsize>) {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let registry = TransformRegistry::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockTransform::new()) as Arc<dyn SizeTransform>)
    });
    (Arc::new(registry), loads)
}

// =============================================================================
// XOR Scenarios
// =============================================================================

#[test]
fn test_xor_trivial() {
    let xor = XorCodec::new();
    let d0 = vec![0x01u8, 0x02];
    let d1 = vec![0x03u8, 0x04];
    let p = xor.encode_parity(&d0, &d1).expect("Failed to encode");
    assert_eq!(p, vec![0x02, 0x06]);

    let mut shards = [vec![0u8; 2], d1, p];
    xor.decode_erasures(&[0, -1], &mut shards)
        .expect("Failed to decode");
    assert_eq!(shards[0], vec![0x01, 0x02]);
}

#[test]
fn test_xor_too_many_erasures() {
    let code = xor_code();
    let shards = code
        .encode(&all_shards(3), &[pattern(16)])
        .expect("Failed to encode");

    let chunks: ShardMap = shards
        .into_iter()
        .filter(|(id, _)| id.index() == 2)
        .collect();
    let want: ShardSet = [ShardId(0), ShardId(1)].into_iter().collect();
    let result = code.decode(&want, &chunks, 8);
    assert_matches!(result, Err(Error::TooManyErasures { erasures: 2, .. }));
    assert_eq!(result.unwrap_err().errno(), -libc::EIO);
}

#[test]
fn test_xor_roundtrip_through_adapter() {
    let code = xor_code();
    let input = pattern(37);
    let shards = code
        .encode_legacy(&[0, 1, 2].into_iter().collect(), &[input.clone()])
        .expect("Failed to encode");

    let mut degraded = shards.clone();
    degraded.remove(&1);
    let minimum = code
        .minimum_to_decode_legacy(
            &[0, 1].into_iter().collect(),
            &degraded.keys().copied().collect(),
        )
        .expect("Failed to plan decode");
    assert_eq!(minimum, [0, 2].into_iter().collect::<BTreeSet<i32>>());

    let restored = code.decode_concat_all(&degraded).expect("Failed to decode");
    assert_eq!(&restored[..input.len()], &input[..]);
    assert!(restored[input.len()..].iter().all(|&b| b == 0));
}

// =============================================================================
// SIZE Scenarios
// =============================================================================

#[test]
fn test_size_roundtrip_512() {
    let code = size_code();
    let input = pattern(512);
    let shards = code
        .encode(&all_shards(9), &[input.clone()])
        .expect("Failed to encode");
    assert_eq!(shards.len(), 9);
    assert!(shards.values().all(|s| s.len() == 128));

    let decoded = code
        .decode(&data_set(), &shards, 128)
        .expect("Failed to decode");
    let joined: Vec<u8> = decoded.values().flat_map(|b| b.iter().copied()).collect();
    assert_eq!(joined, input);

    let concat = code
        .decode_concat_all(&map_to_legacy(shards))
        .expect("Failed to decode");
    assert_eq!(concat, input);
}

#[test]
fn test_size_unaligned() {
    let code = size_code();
    let result = code.encode(&all_shards(9), &[pattern(513)]);
    assert_matches!(result, Err(Error::UnalignedInput { len: 513, alignment: 4 }));
    assert_eq!(result.unwrap_err().errno(), -libc::EINVAL);
}

#[test]
fn test_size_missing_shard() {
    let code = size_code();
    let mut shards = code
        .encode(&all_shards(9), &[pattern(1024)])
        .expect("Failed to encode");
    shards.remove(&ShardId(4));

    assert_matches!(
        code.decode(&data_set(), &shards, 256),
        Err(Error::InsufficientShards { available: 8, required: 9, .. })
    );
    assert_matches!(
        code.minimum_to_decode(&data_set(), &shards.keys().copied().collect()),
        Err(Error::InsufficientShards { .. })
    );
}

#[test]
fn test_size_determinism() {
    let code = size_code();
    let input = pattern(2048);
    let first = code
        .encode(&all_shards(9), &[input.clone()])
        .expect("Failed to encode");
    let second = code
        .encode(&all_shards(9), &[input])
        .expect("Failed to encode");
    for i in 0..9 {
        assert_eq!(first[&ShardId(i)], second[&ShardId(i)], "shard {i} differs");
    }
}

#[test]
fn test_size_shard_index_nine() {
    let code = size_code();
    assert_matches!(
        code.encode_legacy(&[0, 9].into_iter().collect(), &[pattern(16)]),
        Err(Error::InvalidShard { index: 9, .. })
    );
}

#[test]
fn test_size_decode_concat_request_order() {
    let code = size_code();
    let input = pattern(64);
    let shards = map_to_legacy(
        code.encode(&all_shards(9), &[input.clone()])
            .expect("Failed to encode"),
    );

    let out = code
        .decode_concat(&[3, 0], &shards)
        .expect("Failed to decode");
    assert_eq!(&out[..16], &input[48..64]);
    assert_eq!(&out[16..], &input[..16]);
}

// =============================================================================
// Oracle Pass-through
// =============================================================================

#[test]
fn test_oracle_consulted_before_every_restore() {
    let mock = Arc::new(MockTransform::new());
    let code = size_code_with(Arc::clone(&mock));
    let shards = code
        .encode(&all_shards(9), &[pattern(256)])
        .expect("Failed to encode");

    for _ in 0..3 {
        code.decode(&data_set(), &shards, 64)
            .expect("Failed to decode");
    }
    assert_eq!(mock.can_restore_calls(), 3);
    assert_eq!(mock.restore_calls(), 3);

    // Subsets are refused before the oracle or the transform is reached
    let mut partial = shards.clone();
    partial.remove(&ShardId(0));
    assert!(code.decode(&data_set(), &partial, 64).is_err());
    assert_eq!(mock.can_restore_calls(), 3);
    assert_eq!(mock.restore_calls(), 3);
}

#[test]
fn test_oracle_refusal_never_restores() {
    let mock = Arc::new(MockTransform::with_oracle(OracleMode::Fixed(false)));
    let code = size_code_with(Arc::clone(&mock));
    let shards = code
        .encode(&all_shards(9), &[pattern(256)])
        .expect("Failed to encode");

    let result = code.decode(&data_set(), &shards, 64);
    assert_matches!(result, Err(Error::UnrestorablePattern { bitmask: 0x1ff }));
    assert_eq!(result.unwrap_err().errno(), -libc::ENOTSUP);
    assert_eq!(mock.can_restore_calls(), 1);
    assert_eq!(mock.restore_calls(), 0);
}

// =============================================================================
// Transform Lifetime
// =============================================================================

#[test]
fn test_registry_tracks_codec_instances() {
    let (registry, loads) = counting_registry();
    let profile = Profile::new().with("plugin", "sizeceph");

    let codes: Vec<ErasureCode> = (0..3)
        .map(|_| {
            ErasureCode::from_profile_with_registry(&profile, &mut String::new(), &registry)
                .expect("Failed to init")
        })
        .collect();
    assert_eq!(registry.ref_count(), 3);
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    drop(codes);
    assert_eq!(registry.ref_count(), 0);
    assert!(!registry.is_loaded());

    let _again = ErasureCode::from_profile_with_registry(&profile, &mut String::new(), &registry)
        .expect("Failed to init");
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[test]
fn test_reinit_keeps_one_lease() {
    let (registry, loads) = counting_registry();
    let mut code = ErasureCode::new(CodeFamily::Size45);
    code.init_with_registry(&Profile::new(), &mut String::new(), &registry)
        .expect("Failed to init");
    code.init_with_registry(&Profile::new(), &mut String::new(), &registry)
        .expect("Failed to re-init");
    assert_eq!(registry.ref_count(), 1);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[test]
fn test_missing_library_reported() {
    let config = LoaderConfig {
        override_path: Some(PathBuf::from("/nonexistent/sizeceph.so")),
        search_dirs: vec![],
        file_name: "sizeceph-absent-for-tests.so".to_string(),
    };
    let registry = Arc::new(TransformRegistry::for_library(Some(config)));
    let mut reason = String::new();
    let result = ErasureCode::from_profile_with_registry(
        &Profile::new().with("plugin", "sizeceph"),
        &mut reason,
        &registry,
    );
    let err = result.expect_err("load should fail");
    assert!(err.is_load_failure());
    assert_eq!(err.errno(), -libc::ENOENT);
    assert!(reason.contains("/nonexistent/sizeceph.so"));
    assert_eq!(registry.ref_count(), 0);
}

#[test]
fn test_xor_never_touches_registry() {
    let (registry, loads) = counting_registry();
    let _code = ErasureCode::from_profile_with_registry(
        &Profile::new().with("plugin", "xor"),
        &mut String::new(),
        &registry,
    )
    .expect("Failed to init");
    assert_eq!(loads.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_encode_decode() {
    let code = size_code();
    let inputs: Vec<Bytes> = (0..8).map(|t| pattern(256 + 64 * t)).collect();

    std::thread::scope(|s| {
        for input in &inputs {
            let code = &code;
            s.spawn(move || {
                for _ in 0..20 {
                    let shards = code
                        .encode(&all_shards(9), &[input.clone()])
                        .expect("Failed to encode");
                    let decoded = code
                        .decode(&data_set(), &shards, input.len() / 4)
                        .expect("Failed to decode");
                    let joined: Vec<u8> =
                        decoded.values().flat_map(|b| b.iter().copied()).collect();
                    assert_eq!(&joined[..], &input[..]);
                }
            });
        }
    });
}

#[test]
fn test_concurrent_init_and_drop() {
    let (registry, loads) = counting_registry();
    let profile = Profile::new().with("plugin", "sizeceph");

    std::thread::scope(|s| {
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let profile = profile.clone();
            s.spawn(move || {
                for _ in 0..25 {
                    let code = ErasureCode::from_profile_with_registry(
                        &profile,
                        &mut String::new(),
                        &registry,
                    )
                    .expect("Failed to init");
                    assert!(code.is_initialized());
                }
            });
        }
    });

    assert_eq!(registry.ref_count(), 0);
    assert!(!registry.is_loaded());
    assert!(loads.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_legacy_cost_variant_ignores_cost() {
    let code = size_code();
    let costs: BTreeMap<i32, u32> = (0..9).map(|i| (i, 1000 - i as u32)).collect();
    let minimum = code
        .minimum_to_decode_with_cost_legacy(&[1].into_iter().collect(), &costs)
        .expect("Failed to plan");
    assert_eq!(minimum, (0..9).collect::<BTreeSet<i32>>());
}
