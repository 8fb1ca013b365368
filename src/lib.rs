//! sizeec - Erasure-coding engine for object stores
//!
//! Produces equal-sized shards from an object and rebuilds the object from a
//! subset of them. Two code families are implemented:
//!
//! - **XOR(2,1)**: two data shards and one XOR parity shard, tolerating any
//!   single loss.
//! - **SIZE(4,5)**: nine shards produced by the external SIZE transform
//!   library (`sizeceph.so`). Every shard is a transformed derivative of the
//!   input, so reads always restore from all nine.
//!
//! # Architecture
//!
//! ```text
//! Host Adapter (plugin) → Recovery Policy → Codec Core → Transform Registry
//!                              │                │               │
//!                              └──── Layout ────┘         dlopen / mock
//! ```
//!
//! # Modules
//!
//! - [`plugin`] - Host adapter: parameters, typed and legacy calling conventions
//! - [`codec`] - XOR(2,1) and SIZE(4,5) encode/decode
//! - [`recovery`] - Minimum shard set selection
//! - [`layout`] - Chunk size and alignment arithmetic
//! - [`transform`] - SIZE transform trait, library loader and registry
//! - [`config`] - Profiles and loader configuration
//! - [`shard`] - Shard identifiers and legacy conversions
//! - [`placement`] - Placement rule creation
//! - [`error`] - Error types

pub mod codec;
pub mod config;
pub mod error;
pub mod layout;
pub mod placement;
pub mod plugin;
pub mod recovery;
pub mod shard;
pub mod transform;

// Re-export commonly used types
pub use codec::{Codec, SizeCodec, XorCodec};
pub use config::{CodeFamily, LoaderConfig, Profile, ProfileSettings};
pub use error::{Error, Result};
pub use plugin::{ErasureCode, PluginFlags};
pub use shard::{ShardId, ShardMap, ShardSet};
pub use transform::{SizeTransform, TransformLease, TransformRegistry};
