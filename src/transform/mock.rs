//! In-process stand-in for the SIZE transform library
//!
//! Honours the same ABI contract as the shared library: `L` bytes in, nine
//! `L / 4`-byte shards out, none of them a verbatim slice of the input.
//!
//! Layout of one stripe of `c = L / 4` bytes per shard:
//!
//! ```text
//! input   b0 b1 b2 b3 | b4 b5 b6 b7 | ...        (4-byte lanes)
//! d0..d3  d_j[i] = rotl(b[4i + j], 3) ^ key(i, j)
//! s4..s7  d0^d1, d1^d2, d2^d3, d3^d0
//! s8      d0 + d1 + d2 + d3  (wrapping)
//! ```
//!
//! `restore` solves for the four data lanes by substitution; the default
//! oracle reports exactly the patterns that substitution can solve.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{check_restore_layout, check_split_layout, SizeTransform, SIZE_FAN_IN, SIZE_SHARDS};
use crate::error::{Error, Result};

/// Pairwise XOR relations `(shard, lane_a, lane_b)`.
const PAIRS: [(usize, usize, usize); 4] = [(4, 0, 1), (5, 1, 2), (6, 2, 3), (7, 3, 0)];

/// Shard carrying the wrapping sum of all four lanes.
const SUM_SHARD: usize = 8;

/// Verdict policy of the mock oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleMode {
    /// Report whether the lane solver can rebuild the pattern
    Solvable,
    /// Always answer with the given verdict
    Fixed(bool),
}

/// Deterministic, non-linear mock of the SIZE transform.
#[derive(Debug)]
pub struct MockTransform {
    oracle: OracleMode,
    restore_code: AtomicI32,
    split_calls: AtomicUsize,
    restore_calls: AtomicUsize,
    can_restore_calls: AtomicUsize,
    observed_lengths: Mutex<Vec<usize>>,
}

impl Default for MockTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransform {
    /// Mock with the solvable-pattern oracle.
    pub fn new() -> Self {
        Self::with_oracle(OracleMode::Solvable)
    }

    /// Mock with a specific oracle policy.
    pub fn with_oracle(oracle: OracleMode) -> Self {
        Self {
            oracle,
            restore_code: AtomicI32::new(0),
            split_calls: AtomicUsize::new(0),
            restore_calls: AtomicUsize::new(0),
            can_restore_calls: AtomicUsize::new(0),
            observed_lengths: Mutex::new(Vec::new()),
        }
    }

    /// Make every subsequent `restore` return `code` (0 restores normally).
    pub fn set_restore_code(&self, code: i32) {
        self.restore_code.store(code, Ordering::SeqCst);
    }

    /// Number of `split` calls so far.
    pub fn split_calls(&self) -> usize {
        self.split_calls.load(Ordering::SeqCst)
    }

    /// Number of `restore` calls so far.
    pub fn restore_calls(&self) -> usize {
        self.restore_calls.load(Ordering::SeqCst)
    }

    /// Number of `can_restore` calls so far.
    pub fn can_restore_calls(&self) -> usize {
        self.can_restore_calls.load(Ordering::SeqCst)
    }

    /// Every `L` passed to `split` or `restore`, in call order.
    pub fn observed_lengths(&self) -> Vec<usize> {
        self.observed_lengths.lock().clone()
    }

    fn record_len(&self, len: usize) {
        self.observed_lengths.lock().push(len);
    }
}

impl SizeTransform for MockTransform {
    fn split(&self, input: &[u8], outputs: &mut [&mut [u8]]) -> Result<()> {
        self.split_calls.fetch_add(1, Ordering::SeqCst);
        self.record_len(input.len());
        check_split_layout(input.len(), outputs)?;

        for (i, lane) in input.chunks_exact(SIZE_FAN_IN).enumerate() {
            let d: [u8; 4] = std::array::from_fn(|j| mix(lane[j], i, j));
            for j in 0..SIZE_FAN_IN {
                outputs[j][i] = d[j];
            }
            for (shard, a, b) in PAIRS {
                outputs[shard][i] = d[a] ^ d[b];
            }
            outputs[SUM_SHARD][i] = d
                .iter()
                .fold(0u8, |acc, &x| acc.wrapping_add(x));
        }
        Ok(())
    }

    fn restore(&self, output: &mut [u8], inputs: &[Option<&[u8]>]) -> Result<()> {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);
        self.record_len(output.len());
        check_restore_layout(output.len(), inputs)?;

        let code = self.restore_code.load(Ordering::SeqCst);
        if code != 0 {
            return Err(Error::RestoreFailed { code });
        }

        let shard_len = output.len() / SIZE_FAN_IN;
        for i in 0..shard_len {
            let column: [Option<u8>; SIZE_SHARDS] =
                std::array::from_fn(|s| inputs[s].map(|buf| buf[i]));
            let d = solve_column(&column).ok_or(Error::RestoreFailed { code: -1 })?;
            for j in 0..SIZE_FAN_IN {
                output[SIZE_FAN_IN * i + j] = unmix(d[j], i, j);
            }
        }
        Ok(())
    }

    fn can_restore(&self, inputs: &[Option<&[u8]>]) -> bool {
        self.can_restore_calls.fetch_add(1, Ordering::SeqCst);
        match self.oracle {
            OracleMode::Fixed(verdict) => verdict,
            OracleMode::Solvable => {
                inputs.len() == SIZE_SHARDS && {
                    let present: [bool; SIZE_SHARDS] = std::array::from_fn(|s| inputs[s].is_some());
                    solvable(&present)
                }
            }
        }
    }

    fn origin(&self) -> String {
        "mock-transform".to_string()
    }
}

// =============================================================================
// Lane arithmetic
// =============================================================================

#[inline]
fn key(i: usize, j: usize) -> u8 {
    (i as u8).wrapping_mul(31) ^ (j as u8).wrapping_mul(0x5b) ^ 0xa7
}

#[inline]
fn mix(byte: u8, i: usize, j: usize) -> u8 {
    byte.rotate_left(3) ^ key(i, j)
}

#[inline]
fn unmix(lane: u8, i: usize, j: usize) -> u8 {
    (lane ^ key(i, j)).rotate_right(3)
}

/// Solve one byte column for the four data lanes by substitution.
fn solve_column(column: &[Option<u8>; SIZE_SHARDS]) -> Option<[u8; SIZE_FAN_IN]> {
    let mut d: [Option<u8>; SIZE_FAN_IN] = std::array::from_fn(|j| column[j]);

    loop {
        let mut progressed = false;

        for (shard, a, b) in PAIRS {
            if let Some(s) = column[shard] {
                match (d[a], d[b]) {
                    (Some(x), None) => {
                        d[b] = Some(s ^ x);
                        progressed = true;
                    }
                    (None, Some(y)) => {
                        d[a] = Some(s ^ y);
                        progressed = true;
                    }
                    _ => {}
                }
            }
        }

        if let Some(sum) = column[SUM_SHARD] {
            let unknown: Vec<usize> = (0..SIZE_FAN_IN).filter(|&j| d[j].is_none()).collect();
            if let [missing] = unknown[..] {
                let known = d
                    .iter()
                    .flatten()
                    .fold(0u8, |acc, &x| acc.wrapping_add(x));
                d[missing] = Some(sum.wrapping_sub(known));
                progressed = true;
            }
        }

        if d.iter().all(Option::is_some) {
            return Some(std::array::from_fn(|j| d[j].unwrap_or_default()));
        }
        if !progressed {
            return None;
        }
    }
}

/// Whether substitution can rebuild every lane given the present shards.
fn solvable(present: &[bool; SIZE_SHARDS]) -> bool {
    let column: [Option<u8>; SIZE_SHARDS] = std::array::from_fn(|s| present[s].then_some(0));
    solve_column(&column).is_some()
}
