//! Host adapter
//!
//! [`ErasureCode`] is what the object store talks to. It validates the
//! profile, advertises shard counts and sizes, and exposes two calling
//! conventions: the typed one keyed by [`ShardId`], and a legacy one keyed by
//! raw `i32`. The typed methods are the only implementation; every legacy
//! method converts its arguments, delegates, and converts the result back.
//!
//! # Example
//!
//! ```rust,ignore
//! use sizeec::{ErasureCode, Profile};
//!
//! let profile = Profile::new().with("plugin", "sizeceph");
//! let mut reason = String::new();
//! let code = ErasureCode::from_profile(&profile, &mut reason)?;
//!
//! let shards = code.encode(&sizeec::shard::all_shards(9), &[input])?;
//! let data = code.decode_concat_all(&sizeec::shard::map_to_legacy(shards))?;
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use std::ops::BitOr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::codec::{layout_for, Codec, SizeCodec, XorCodec};
use crate::config::{CodeFamily, Profile, ProfileSettings};
use crate::error::{Error, Result};
use crate::layout::{materialize, Layout};
use crate::placement::{self, PlacementRules};
use crate::recovery;
use crate::shard::{
    map_from_legacy, map_to_legacy, set_from_legacy, set_to_legacy, ShardId, ShardMap, ShardSet,
    SubChunkMap,
};
use crate::transform::{SizeTransform, TransformRegistry};

// =============================================================================
// Optimization Flags
// =============================================================================

/// Optimizations a codec tells the host it supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PluginFlags(u32);

impl PluginFlags {
    pub const NONE: Self = Self(0);
    /// The codec participates in the optimized EC path at all
    pub const OPTIMIZED_SUPPORTED: Self = Self(1 << 0);
    /// A read may fetch only part of a shard
    pub const PARTIAL_READ: Self = Self(1 << 1);
    /// A write may update only part of a stripe
    pub const PARTIAL_WRITE: Self = Self(1 << 2);
    /// Zero-length and zero-padded buffers are handled
    pub const ZERO_PADDING: Self = Self(1 << 3);
    /// Parity can be updated from a data delta
    pub const PARITY_DELTA: Self = Self(1 << 4);

    const NAMES: [(Self, &'static str); 5] = [
        (Self::OPTIMIZED_SUPPORTED, "optimized_supported"),
        (Self::PARTIAL_READ, "partial_read"),
        (Self::PARTIAL_WRITE, "partial_write"),
        (Self::ZERO_PADDING, "zero_padding"),
        (Self::PARITY_DELTA, "parity_delta"),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Names of the set flags, lowest bit first.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for PluginFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// =============================================================================
// Erasure Code
// =============================================================================

#[derive(Debug)]
struct Initialized {
    settings: ProfileSettings,
    profile: Profile,
    codec: Codec,
}

/// One codec instance as seen by the host.
///
/// A SIZE instance holds a lease on the transform from the moment `init`
/// succeeds until it is dropped or re-initialized.
#[derive(Debug)]
pub struct ErasureCode {
    family: CodeFamily,
    state: Option<Initialized>,
}

impl ErasureCode {
    /// Uninitialized instance of `family`.
    pub fn new(family: CodeFamily) -> Self {
        Self {
            family,
            state: None,
        }
    }

    /// Build and initialize an instance from a profile whose `plugin` (or
    /// `technique`) names the family. SIZE uses the process-wide registry.
    pub fn from_profile(profile: &Profile, sink: &mut dyn fmt::Write) -> Result<Self> {
        Self::from_profile_with_registry(profile, sink, &TransformRegistry::global())
    }

    /// Like [`from_profile`](Self::from_profile) with an explicit registry.
    pub fn from_profile_with_registry(
        profile: &Profile,
        sink: &mut dyn fmt::Write,
        registry: &Arc<TransformRegistry>,
    ) -> Result<Self> {
        let family = profile.family().ok_or_else(|| {
            let err = Error::InvalidProfile(
                "profile names no known plugin (expected sizeceph or simple_xor)".to_string(),
            );
            let _ = writeln!(sink, "{err}");
            err
        })?;
        let mut code = Self::new(family);
        code.init_with_registry(profile, sink, registry)?;
        Ok(code)
    }

    /// Validate `profile` and bind the codec, loading the SIZE transform
    /// through the process-wide registry on first use.
    pub fn init(&mut self, profile: &Profile, sink: &mut dyn fmt::Write) -> Result<()> {
        self.init_with_registry(profile, sink, &TransformRegistry::global())
    }

    /// Initialize against a specific transform, bypassing library loading.
    pub fn init_with_transform(
        &mut self,
        profile: &Profile,
        sink: &mut dyn fmt::Write,
        transform: Arc<dyn SizeTransform>,
    ) -> Result<()> {
        let registry = Arc::new(TransformRegistry::preloaded(transform));
        self.init_with_registry(profile, sink, &registry)
    }

    /// Initialize, leasing the SIZE transform from `registry`.
    ///
    /// Failure reasons are written to `sink` as well as returned. A failed
    /// init leaves any previous state untouched.
    #[instrument(skip(self, profile, sink, registry), fields(family = %self.family))]
    pub fn init_with_registry(
        &mut self,
        profile: &Profile,
        sink: &mut dyn fmt::Write,
        registry: &Arc<TransformRegistry>,
    ) -> Result<()> {
        let (settings, profile) = ProfileSettings::parse(self.family, profile, sink)?;

        let codec = match self.family {
            CodeFamily::Xor21 => Codec::Xor(XorCodec::new()),
            CodeFamily::Size45 => {
                let lease = registry.acquire().map_err(|err| {
                    let _ = writeln!(sink, "{err}");
                    err
                })?;
                Codec::Size(SizeCodec::new(lease, settings.force_all_chunks))
            }
        };

        info!(
            k = settings.k,
            m = settings.m,
            force_all_chunks = settings.force_all_chunks,
            "erasure code initialized"
        );
        self.state = Some(Initialized {
            settings,
            profile,
            codec,
        });
        Ok(())
    }

    fn state(&self) -> Result<&Initialized> {
        self.state.as_ref().ok_or(Error::NotInitialized)
    }

    fn codec(&self) -> Result<&Codec> {
        Ok(&self.state()?.codec)
    }

    fn layout(&self) -> Layout {
        layout_for(self.family)
    }

    /// Advertised (k, m): from the profile once initialized, the family's
    /// native values before.
    fn advertised_km(&self) -> (usize, usize) {
        self.state
            .as_ref()
            .map_or(self.family.native_km(), |s| (s.settings.k, s.settings.m))
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    pub fn family(&self) -> CodeFamily {
        self.family
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Validated profile, with defaults filled in.
    pub fn get_profile(&self) -> Result<&Profile> {
        Ok(&self.state()?.profile)
    }

    /// Validated settings.
    pub fn settings(&self) -> Result<ProfileSettings> {
        Ok(self.state()?.settings)
    }

    /// `k + m`.
    pub fn get_chunk_count(&self) -> usize {
        let (k, m) = self.advertised_km();
        k + m
    }

    pub fn get_data_chunk_count(&self) -> usize {
        self.advertised_km().0
    }

    pub fn get_coding_chunk_count(&self) -> usize {
        self.advertised_km().1
    }

    /// Always 1: shards are not subdivided.
    pub fn get_sub_chunk_count(&self) -> usize {
        1
    }

    /// Shard length for an input of `stripe_width` bytes.
    pub fn get_chunk_size(&self, stripe_width: usize) -> usize {
        self.layout().chunk_size(stripe_width)
    }

    pub fn get_alignment(&self) -> usize {
        self.layout().alignment()
    }

    pub fn get_minimum_granularity(&self) -> usize {
        self.layout().minimum_granularity()
    }

    /// Round `n` up to the codec alignment.
    pub fn calculate_aligned_size(&self, n: usize) -> usize {
        self.layout().calculate_aligned_size(n)
    }

    /// Identity permutation `0..N`.
    pub fn get_chunk_mapping(&self) -> Vec<usize> {
        (0..self.get_chunk_count()).collect()
    }

    /// SIZE omits partial read, partial write and parity delta: every read
    /// is a full restore.
    pub fn get_supported_optimizations(&self) -> PluginFlags {
        let base = PluginFlags::OPTIMIZED_SUPPORTED | PluginFlags::ZERO_PADDING;
        match self.family {
            CodeFamily::Size45 => base,
            CodeFamily::Xor21 => {
                base
                    | PluginFlags::PARTIAL_READ
                    | PluginFlags::PARTIAL_WRITE
                    | PluginFlags::PARITY_DELTA
            }
        }
    }

    // =========================================================================
    // Typed Operations
    // =========================================================================

    /// Minimum shards to read for `want`, with the sub-chunk ranges to read
    /// from each.
    pub fn minimum_to_decode(
        &self,
        want: &ShardSet,
        available: &ShardSet,
    ) -> Result<(ShardSet, SubChunkMap)> {
        let minimum = self.codec()?.minimum_to_decode(want, available)?;
        let sub_chunks = recovery::full_sub_chunks(&minimum);
        Ok((minimum, sub_chunks))
    }

    /// Cost-aware minimum set. Costs do not change the answer.
    pub fn minimum_to_decode_with_cost(
        &self,
        want: &ShardSet,
        available: &BTreeMap<ShardId, u32>,
    ) -> Result<ShardSet> {
        recovery::minimum_to_decode_with_cost(self.codec()?.family(), want, available)
    }

    /// Encode a possibly fragmented input into the shards in `want`.
    pub fn encode(&self, want: &ShardSet, input: &[Bytes]) -> Result<ShardMap> {
        let codec = self.codec()?;
        let input = materialize(input)?;
        codec.encode(want, &input)
    }

    /// Decode the shards in `want` from `chunks`. `chunk_size` is a hint;
    /// the stored shard lengths win when they disagree.
    pub fn decode(
        &self,
        want: &ShardSet,
        chunks: &ShardMap,
        chunk_size: usize,
    ) -> Result<ShardMap> {
        self.codec()?.decode(want, chunks, chunk_size)
    }

    /// Parity delta between two versions of a data shard. Empty for SIZE,
    /// which re-encodes on every change.
    pub fn encode_delta(&self, old_data: &Bytes, new_data: &Bytes) -> Result<Bytes> {
        match self.codec()? {
            Codec::Xor(xor) => Ok(Bytes::from(xor.encode_delta(old_data, new_data)?)),
            Codec::Size(_) => Ok(Bytes::new()),
        }
    }

    /// Fold data deltas in `deltas` into the parity shards held in `parity`.
    ///
    /// For SIZE this clears `parity` and does nothing else.
    pub fn apply_delta(&self, deltas: &ShardMap, parity: &mut ShardMap) -> Result<()> {
        match self.codec()? {
            Codec::Size(_) => {
                parity.clear();
                Ok(())
            }
            Codec::Xor(xor) => {
                let data_shards = xor.layout().data_shards;
                let mut updated = ShardMap::new();
                for (&pid, current) in parity.iter() {
                    if pid.index() < data_shards {
                        continue;
                    }
                    let mut folded = current.to_vec();
                    for (_, delta) in deltas.range(..ShardId(data_shards)) {
                        folded = xor.apply_delta(delta, &folded)?;
                    }
                    updated.insert(pid, Bytes::from(folded));
                }
                parity.extend(updated);
                Ok(())
            }
        }
    }

    /// Placement rule for this code's pools.
    pub fn create_rule(&self, name: &str, rules: &mut dyn PlacementRules) -> i32 {
        placement::create_rule(name, rules)
    }

    // =========================================================================
    // Legacy Operations
    // =========================================================================

    pub fn minimum_to_decode_legacy(
        &self,
        want: &BTreeSet<i32>,
        available: &BTreeSet<i32>,
    ) -> Result<BTreeSet<i32>> {
        let n = self.physical_chunk_count();
        let (minimum, _) =
            self.minimum_to_decode(&set_from_legacy(want, n)?, &set_from_legacy(available, n)?)?;
        Ok(set_to_legacy(&minimum))
    }

    pub fn minimum_to_decode_with_cost_legacy(
        &self,
        want: &BTreeSet<i32>,
        available: &BTreeMap<i32, u32>,
    ) -> Result<BTreeSet<i32>> {
        let n = self.physical_chunk_count();
        let minimum = self.minimum_to_decode_with_cost(
            &set_from_legacy(want, n)?,
            &map_from_legacy(available, n)?,
        )?;
        Ok(set_to_legacy(&minimum))
    }

    pub fn encode_legacy(
        &self,
        want: &BTreeSet<i32>,
        input: &[Bytes],
    ) -> Result<BTreeMap<i32, Bytes>> {
        let want = set_from_legacy(want, self.physical_chunk_count())?;
        Ok(map_to_legacy(self.encode(&want, input)?))
    }

    pub fn decode_legacy(
        &self,
        want: &BTreeSet<i32>,
        chunks: &BTreeMap<i32, Bytes>,
        chunk_size: usize,
    ) -> Result<BTreeMap<i32, Bytes>> {
        let n = self.physical_chunk_count();
        let decoded = self.decode(
            &set_from_legacy(want, n)?,
            &map_from_legacy(chunks, n)?,
            chunk_size,
        )?;
        Ok(map_to_legacy(decoded))
    }

    /// Decode and concatenate the shards in `order`, in request order.
    ///
    /// A shard the decode did not produce is emitted as `chunk_size` zero
    /// bytes so that later offsets stay put.
    pub fn decode_concat(&self, order: &[i32], chunks: &BTreeMap<i32, Bytes>) -> Result<Bytes> {
        let n = self.physical_chunk_count();
        let order: Vec<ShardId> = order
            .iter()
            .map(|&raw| ShardId::from_legacy(raw, n))
            .collect::<Result<_>>()?;
        let chunks = map_from_legacy(chunks, n)?;
        let chunk_size = chunks.values().next().map_or(0, Bytes::len);

        let want: ShardSet = order.iter().copied().collect();
        let decoded = self.decode(&want, &chunks, chunk_size)?;

        let mut out = BytesMut::with_capacity(order.len() * chunk_size);
        for id in &order {
            match decoded.get(id) {
                Some(buf) => out.extend_from_slice(buf),
                None => out.resize(out.len() + chunk_size, 0),
            }
        }
        debug!(shards = order.len(), len = out.len(), "concatenated decode");
        Ok(out.freeze())
    }

    /// Decode and concatenate every input-bearing shard in index order.
    pub fn decode_concat_all(&self, chunks: &BTreeMap<i32, Bytes>) -> Result<Bytes> {
        let order: Vec<i32> = (0..self.layout().data_shards as i32).collect();
        self.decode_concat(&order, chunks)
    }

    fn physical_chunk_count(&self) -> usize {
        let (k, m) = self.family.native_km();
        k + m
    }
}
