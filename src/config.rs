//! Profile parsing and loader configuration
//!
//! A [`Profile`] is the host's string→string option map. Parsing it yields
//! [`ProfileSettings`], the validated view the codecs are built from.
//! [`LoaderConfig`] describes where the SIZE transform library is looked up.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Environment override for the transform library path.
pub const LIBRARY_PATH_ENV: &str = "SIZECEPH_LIBRARY_PATH";

/// Base name of the transform library.
pub const LIBRARY_BASE_NAME: &str = "sizeceph";

// =============================================================================
// Code Family
// =============================================================================

/// The code families this engine implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeFamily {
    /// Two data shards, one XOR parity shard
    Xor21,
    /// Four nominal data shards, five coding shards, via the SIZE transform
    Size45,
}

impl CodeFamily {
    /// Native (k, m) of the family.
    pub fn native_km(self) -> (usize, usize) {
        match self {
            CodeFamily::Xor21 => (2, 1),
            CodeFamily::Size45 => (4, 5),
        }
    }

    /// Name written into the profile's `technique` key when absent.
    pub fn technique(self) -> &'static str {
        match self {
            CodeFamily::Xor21 => "simple_xor",
            CodeFamily::Size45 => "sizeceph",
        }
    }

    /// Resolve a `plugin` or `technique` value to a family.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sizeceph" | "size" => Some(CodeFamily::Size45),
            "simple_xor" | "xor" => Some(CodeFamily::Xor21),
            _ => None,
        }
    }
}

impl fmt::Display for CodeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeFamily::Xor21 => write!(f, "XOR(2,1)"),
            CodeFamily::Size45 => write!(f, "SIZE(4,5)"),
        }
    }
}

// =============================================================================
// Profile
// =============================================================================

/// Host-supplied codec options. Unknown keys are carried but ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile(BTreeMap<String, String>);

impl Profile {
    /// Empty profile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace one option.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up one option.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterate over all options in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Family selected by `plugin`, falling back to `technique`.
    pub fn family(&self) -> Option<CodeFamily> {
        self.get("plugin")
            .and_then(CodeFamily::from_name)
            .or_else(|| self.get("technique").and_then(CodeFamily::from_name))
    }

    /// `force_all_chunks` is on only for the literal value `"true"`.
    pub fn force_all_chunks(&self) -> bool {
        self.get("force_all_chunks") == Some("true")
    }

    /// Load a profile from a YAML or JSON file (chosen by extension).
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidProfile(format!("cannot read {}: {}", path.display(), e))
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let profile = if is_json {
            serde_json::from_str(&text).map_err(|e| Error::InvalidProfile(e.to_string()))?
        } else {
            serde_yaml::from_str(&text).map_err(|e| Error::InvalidProfile(e.to_string()))?
        };
        Ok(profile)
    }

    fn parse_count(&self, key: &str) -> Result<Option<usize>> {
        self.get(key)
            .map(|raw| {
                raw.trim().parse::<usize>().map_err(|_| {
                    Error::InvalidProfile(format!("{key}={raw} is not a non-negative integer"))
                })
            })
            .transpose()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Profile {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Profile(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// =============================================================================
// Validated Settings
// =============================================================================

/// Validated, immutable codec parameters derived from a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProfileSettings {
    /// Code family
    pub family: CodeFamily,
    /// Data-role shard count advertised to the host
    pub k: usize,
    /// Coding-role shard count advertised to the host
    pub m: usize,
    /// Route all shards through the transform regardless of advertised (k, m)
    pub force_all_chunks: bool,
}

impl ProfileSettings {
    /// Validate `profile` for `family` and fill in defaults.
    ///
    /// On success the returned profile copy carries explicit `k`, `m` and
    /// `technique` entries. On failure a human-readable reason is written to
    /// `sink` as well as returned.
    pub fn parse(
        family: CodeFamily,
        profile: &Profile,
        sink: &mut dyn fmt::Write,
    ) -> Result<(Self, Profile)> {
        match Self::parse_inner(family, profile) {
            Ok(parsed) => Ok(parsed),
            Err(err) => {
                let _ = writeln!(sink, "{err}");
                Err(err)
            }
        }
    }

    fn parse_inner(family: CodeFamily, profile: &Profile) -> Result<(Self, Profile)> {
        let (native_k, native_m) = family.native_km();
        let force_all_chunks = profile.force_all_chunks();

        if force_all_chunks && family != CodeFamily::Size45 {
            return Err(Error::InvalidProfile(format!(
                "force_all_chunks is only supported by SIZE, not {family}"
            )));
        }

        let k = profile.parse_count("k")?.unwrap_or(native_k);
        let m = profile.parse_count("m")?.unwrap_or(native_m);

        let accepted = match family {
            CodeFamily::Xor21 => (k, m) == (2, 1),
            CodeFamily::Size45 if force_all_chunks => (k, m) == (9, 0) || (k, m) == (4, 5),
            CodeFamily::Size45 => (k, m) == (4, 5),
        };
        if !accepted {
            let expected = match family {
                CodeFamily::Size45 if force_all_chunks => "k=9,m=0 or k=4,m=5".to_string(),
                _ => format!("k={native_k},m={native_m}"),
            };
            return Err(Error::InvalidProfile(format!(
                "{family} requires {expected}, got k={k},m={m}"
            )));
        }

        let mut stored = profile.clone();
        stored.insert("k", k.to_string());
        stored.insert("m", m.to_string());
        if stored.get("technique").is_none() {
            stored.insert("technique", family.technique());
        }

        debug!(%family, k, m, force_all_chunks, "profile accepted");

        Ok((
            Self {
                family,
                k,
                m,
                force_all_chunks,
            },
            stored,
        ))
    }

    /// Total shard count `k + m`.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.k + self.m
    }
}

// =============================================================================
// Loader Configuration
// =============================================================================

/// Where to look for the transform library, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Explicit path tried first (from `SIZECEPH_LIBRARY_PATH`)
    pub override_path: Option<PathBuf>,
    /// Directories searched for the library file
    pub search_dirs: Vec<PathBuf>,
    /// File name tried in each directory and finally bare
    pub file_name: String,
}

impl LoaderConfig {
    /// Build from the process environment.
    pub fn from_env() -> Self {
        let override_path = std::env::var_os(LIBRARY_PATH_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::with_override(override_path)
    }

    /// Default search list with an explicit override.
    pub fn with_override(override_path: Option<PathBuf>) -> Self {
        let mut search_dirs = vec![PathBuf::from("/usr/local/lib"), PathBuf::from("/usr/lib")];
        if let Some(triple) = multiarch_triple() {
            search_dirs.push(PathBuf::from("/usr/lib").join(triple));
        }
        if let Ok(cwd) = std::env::current_dir() {
            search_dirs.push(cwd);
        }

        Self {
            override_path,
            search_dirs,
            file_name: library_file_name(),
        }
    }

    /// Every path to try, in order: override, each search dir, bare name.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut out = Vec::with_capacity(self.search_dirs.len() + 2);
        if let Some(path) = &self.override_path {
            out.push(path.clone());
        }
        out.extend(self.search_dirs.iter().map(|dir| dir.join(&self.file_name)));
        out.push(PathBuf::from(&self.file_name));
        out
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Platform file name, e.g. `sizeceph.so`.
pub fn library_file_name() -> String {
    format!("{}.{}", LIBRARY_BASE_NAME, std::env::consts::DLL_EXTENSION)
}

/// Debian-style multiarch directory name, e.g. `x86_64-linux-gnu`.
fn multiarch_triple() -> Option<String> {
    if cfg!(target_os = "linux") {
        let env = if cfg!(target_env = "musl") { "musl" } else { "gnu" };
        Some(format!("{}-linux-{}", std::env::consts::ARCH, env))
    } else {
        None
    }
}
