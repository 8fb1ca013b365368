//! sizeec command-line tool
//!
//! Encodes a file into shard files and decodes them back, using the same
//! host adapter an object store would.
//!
//! ```text
//! sizeec --profile size.yaml encode object.bin --out-dir shards/
//! sizeec --profile size.yaml decode --shard-dir shards/ restored.bin
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sizeec::shard::{all_shards, map_to_legacy};
use sizeec::{ErasureCode, LoaderConfig, Profile, ShardId, TransformRegistry};

// =============================================================================
// CLI Arguments
// =============================================================================

/// sizeec - XOR(2,1) and SIZE(4,5) erasure coding
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Profile file (YAML, or JSON by extension)
    #[arg(long, global = true)]
    profile: Option<PathBuf>,

    /// Explicit path to the SIZE transform library
    #[arg(long, global = true, env = "SIZECEPH_LIBRARY_PATH")]
    library: Option<PathBuf>,

    /// Use the in-process transform instead of loading the library
    #[arg(long, global = true, env = "SIZEEC_MOCK_TRANSFORM")]
    mock_transform: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the advertised codec parameters as JSON
    Info,

    /// Encode a file into shard files
    Encode {
        /// Input file
        input: PathBuf,

        /// Directory receiving shard.<i> files and manifest.json
        #[arg(long)]
        out_dir: PathBuf,
    },

    /// Rebuild the original file from shard files
    Decode {
        /// Directory holding shard.<i> files and manifest.json
        #[arg(long)]
        shard_dir: PathBuf,

        /// Output file
        output: PathBuf,
    },
}

// =============================================================================
// Manifest
// =============================================================================

const MANIFEST_FILE: &str = "manifest.json";

/// Written next to the shards by `encode`.
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    original_len: usize,
    padded_len: usize,
    chunk_size: usize,
    profile: Profile,
}

#[derive(Debug, Serialize)]
struct CodecInfo<'a> {
    family: String,
    chunk_count: usize,
    data_chunk_count: usize,
    coding_chunk_count: usize,
    sub_chunk_count: usize,
    alignment: usize,
    minimum_granularity: usize,
    optimizations: Vec<&'static str>,
    profile: &'a Profile,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let profile = match &args.profile {
        Some(path) => Profile::from_file(path)
            .with_context(|| format!("loading profile {}", path.display()))?,
        None => Profile::new().with("plugin", "sizeceph"),
    };

    let code = build_code(&args, &profile)?;

    match &args.command {
        Command::Info => print_info(&code),
        Command::Encode { input, out_dir } => encode_file(&code, input, out_dir),
        Command::Decode { shard_dir, output } => decode_file(&code, shard_dir, output),
    }
}

fn build_code(args: &Args, profile: &Profile) -> anyhow::Result<ErasureCode> {
    let mut reason = String::new();

    let registry = if args.mock_transform {
        mock_registry()?
    } else {
        Arc::new(TransformRegistry::for_library(Some(LoaderConfig::with_override(
            args.library.clone(),
        ))))
    };

    ErasureCode::from_profile_with_registry(profile, &mut reason, &registry)
        .with_context(|| format!("initializing erasure code: {}", reason.trim()))
}

#[cfg(feature = "mock-transform")]
fn mock_registry() -> anyhow::Result<Arc<TransformRegistry>> {
    warn!("Using the in-process mock transform; shards are not compatible with sizeceph.so");
    Ok(Arc::new(TransformRegistry::preloaded(Arc::new(
        sizeec::transform::MockTransform::new(),
    ))))
}

#[cfg(not(feature = "mock-transform"))]
fn mock_registry() -> anyhow::Result<Arc<TransformRegistry>> {
    bail!("this build does not include the mock transform (enable the mock-transform feature)")
}

// =============================================================================
// Commands
// =============================================================================

fn print_info(code: &ErasureCode) -> anyhow::Result<()> {
    let info = CodecInfo {
        family: code.family().to_string(),
        chunk_count: code.get_chunk_count(),
        data_chunk_count: code.get_data_chunk_count(),
        coding_chunk_count: code.get_coding_chunk_count(),
        sub_chunk_count: code.get_sub_chunk_count(),
        alignment: code.get_alignment(),
        minimum_granularity: code.get_minimum_granularity(),
        optimizations: code.get_supported_optimizations().names(),
        profile: code.get_profile()?,
    };
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn encode_file(code: &ErasureCode, input: &Path, out_dir: &Path) -> anyhow::Result<()> {
    let data = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let original_len = data.len();

    let chunk_size = code.get_chunk_size(original_len);
    let padded_len = chunk_size * data_shard_count(code);

    let mut padded = data;
    padded.resize(padded_len, 0);

    let want = all_shards(physical_chunks(code));
    let shards = code.encode(&want, &[Bytes::from(padded)])?;

    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    for (id, shard) in &shards {
        let path = shard_path(out_dir, *id);
        fs::write(&path, shard).with_context(|| format!("writing {}", path.display()))?;
    }

    let manifest = Manifest {
        original_len,
        padded_len,
        chunk_size,
        profile: code.get_profile()?.clone(),
    };
    let manifest_path = out_dir.join(MANIFEST_FILE);
    fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?)
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    info!(
        "Encoded {} bytes into {} shards of {} bytes in {}",
        original_len,
        shards.len(),
        chunk_size,
        out_dir.display()
    );
    Ok(())
}

fn decode_file(code: &ErasureCode, shard_dir: &Path, output: &Path) -> anyhow::Result<()> {
    let manifest_path = shard_dir.join(MANIFEST_FILE);
    let manifest: Manifest = serde_json::from_slice(
        &fs::read(&manifest_path).with_context(|| format!("reading {}", manifest_path.display()))?,
    )?;

    let mut chunks = BTreeMap::new();
    for index in 0..physical_chunks(code) {
        let path = shard_path(shard_dir, ShardId(index));
        match fs::read(&path) {
            Ok(buf) => {
                chunks.insert(ShardId(index), Bytes::from(buf));
            }
            Err(e) => warn!("Shard {} unavailable ({}): {}", index, path.display(), e),
        }
    }

    if let Some(len) = chunks.values().next().map(Bytes::len) {
        if len != manifest.chunk_size {
            warn!(
                "Shard length {} differs from manifest chunk size {}",
                len, manifest.chunk_size
            );
        }
    }

    let available: BTreeSet<ShardId> = chunks.keys().copied().collect();
    let data_shards: BTreeSet<ShardId> = (0..data_shard_count(code)).map(ShardId).collect();
    let (minimum, _) = code.minimum_to_decode(&data_shards, &available)?;
    info!(
        "Reading {} of {} available shards",
        minimum.len(),
        available.len()
    );

    let chunks: BTreeMap<ShardId, Bytes> = chunks
        .into_iter()
        .filter(|(id, _)| minimum.contains(id))
        .collect();
    let mut restored = code.decode_concat_all(&map_to_legacy(chunks))?.to_vec();
    if restored.len() < manifest.original_len || restored.len() != manifest.padded_len {
        bail!(
            "decoded {} bytes, manifest expects {} ({} before padding)",
            restored.len(),
            manifest.padded_len,
            manifest.original_len
        );
    }
    restored.truncate(manifest.original_len);

    fs::write(output, &restored).with_context(|| format!("writing {}", output.display()))?;
    info!("Decoded {} bytes to {}", restored.len(), output.display());
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn shard_path(dir: &Path, id: ShardId) -> PathBuf {
    dir.join(format!("shard.{}", id))
}

/// Shards the codec physically writes, independent of the advertised split.
fn physical_chunks(code: &ErasureCode) -> usize {
    let (k, m) = code.family().native_km();
    k + m
}

/// Shards that carry input bytes after decode.
fn data_shard_count(code: &ErasureCode) -> usize {
    code.family().native_km().0
}

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
