//! C ABI of the SIZE transform library
//!
//! These are the function-pointer types resolved at runtime with `dlsym`.
//! The library is never linked at build time.

use std::ffi::{c_int, c_uchar, c_uint};

/// Symbol name of the split function.
pub const SIZE_SPLIT_SYMBOL: &[u8] = b"size_split\0";

/// Symbol name of the restore function.
pub const SIZE_RESTORE_SYMBOL: &[u8] = b"size_restore\0";

/// Symbol name of the restorability oracle. The `_fn` suffix is part of the
/// exported name.
pub const SIZE_CAN_RESTORE_SYMBOL: &[u8] = b"size_can_get_restore_fn\0";

/// Split `len` bytes from `p_src` into nine buffers of `len / 4` bytes.
///
/// # Arguments
/// * `pp_dst` - Array of nine output pointers
/// * `p_src` - Input buffer of `len` bytes
/// * `len` - Input length, a positive multiple of 4
pub type SizeSplitFn =
    unsafe extern "C" fn(pp_dst: *mut *mut c_uchar, p_src: *mut c_uchar, len: c_uint);

/// Restore `len` bytes into `p_dst` from nine input slots (null = missing).
///
/// # Returns
/// 0 on success, non-zero on failure
pub type SizeRestoreFn =
    unsafe extern "C" fn(p_dst: *mut c_uchar, pp_src: *mut *const c_uchar, len: c_uint) -> c_int;

/// Report whether the nine input slots (null = missing) are restorable.
///
/// # Returns
/// Non-zero when restorable
pub type SizeCanRestoreFn = unsafe extern "C" fn(pp_src: *mut *const c_uchar) -> c_int;

/// Largest input length the `c_uint` length parameter can carry.
pub const MAX_TRANSFORM_LEN: usize = c_uint::MAX as usize;

/// Printable form of a NUL-terminated symbol constant.
pub fn symbol_name(symbol: &[u8]) -> &str {
    let bytes = symbol.strip_suffix(b"\0").unwrap_or(symbol);
    std::str::from_utf8(bytes).unwrap_or("<non-utf8 symbol>")
}
