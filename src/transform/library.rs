//! Transform backed by the shared library, resolved with `dlopen`
//!
//! The handle stays open for the lifetime of the [`LibraryTransform`]; it is
//! closed in `Drop`. The registry decides when that happens.

use std::ffi::{c_void, CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use super::ffi::{
    symbol_name, SizeCanRestoreFn, SizeRestoreFn, SizeSplitFn, MAX_TRANSFORM_LEN,
    SIZE_CAN_RESTORE_SYMBOL, SIZE_RESTORE_SYMBOL, SIZE_SPLIT_SYMBOL,
};
use super::{check_restore_layout, check_split_layout, SizeTransform};
use crate::config::LoaderConfig;
use crate::error::{Error, Result};

/// SIZE transform resolved from `sizeceph.so`.
#[derive(Debug)]
pub struct LibraryTransform {
    handle: *mut c_void,
    path: PathBuf,
    split_fn: SizeSplitFn,
    restore_fn: SizeRestoreFn,
    can_restore_fn: SizeCanRestoreFn,
}

// SAFETY: the handle and function pointers are immutable after load, and the
// library functions only touch the buffers passed to them on each call.
unsafe impl Send for LibraryTransform {}
unsafe impl Sync for LibraryTransform {}

impl LibraryTransform {
    /// Open the first loadable candidate and resolve the three symbols.
    ///
    /// # Errors
    ///
    /// - `LibraryNotFound` if no candidate can be opened
    /// - `SymbolMissing` if the opened library lacks a symbol; the handle is
    ///   closed before returning
    pub fn load(config: &LoaderConfig) -> Result<Self> {
        let candidates = config.candidates();
        let mut tried = Vec::with_capacity(candidates.len());

        for path in candidates {
            debug!("Trying transform library at {}", path.display());
            match open_library(&path) {
                Ok(handle) => {
                    info!("Transform library loaded from {}", path.display());
                    return Self::resolve(handle, path);
                }
                Err(reason) => {
                    debug!("Failed to load {}: {}", path.display(), reason);
                    tried.push(path.display().to_string());
                }
            }
        }

        error!("Cannot load transform library from any location:");
        for path in &tried {
            error!("  - {}", path);
        }
        error!(
            "Install the library system-wide or set {}",
            crate::config::LIBRARY_PATH_ENV
        );
        Err(Error::LibraryNotFound { tried })
    }

    /// Open exactly `path`, without the search list.
    pub fn load_from(path: &Path) -> Result<Self> {
        let handle = open_library(path).map_err(|reason| {
            debug!("Failed to load {}: {}", path.display(), reason);
            Error::LibraryNotFound {
                tried: vec![path.display().to_string()],
            }
        })?;
        Self::resolve(handle, path.to_path_buf())
    }

    fn resolve(handle: *mut c_void, path: PathBuf) -> Result<Self> {
        let symbols = (
            lookup(handle, SIZE_SPLIT_SYMBOL),
            lookup(handle, SIZE_RESTORE_SYMBOL),
            lookup(handle, SIZE_CAN_RESTORE_SYMBOL),
        );

        let (split, restore, can_restore) = match symbols {
            (Some(s), Some(r), Some(c)) => (s, r, c),
            (split, restore, _) => {
                let missing = if split.is_none() {
                    SIZE_SPLIT_SYMBOL
                } else if restore.is_none() {
                    SIZE_RESTORE_SYMBOL
                } else {
                    SIZE_CAN_RESTORE_SYMBOL
                };
                let symbol = symbol_name(missing).to_string();
                error!("Transform library {} lacks symbol {}", path.display(), symbol);
                // SAFETY: handle came from a successful dlopen and is not used again
                unsafe {
                    libc::dlclose(handle);
                }
                return Err(Error::SymbolMissing {
                    path: path.display().to_string(),
                    symbol,
                });
            }
        };

        // SAFETY: the exported symbols have the signatures declared in `ffi`
        let (split_fn, restore_fn, can_restore_fn) = unsafe {
            (
                std::mem::transmute::<*mut c_void, SizeSplitFn>(split),
                std::mem::transmute::<*mut c_void, SizeRestoreFn>(restore),
                std::mem::transmute::<*mut c_void, SizeCanRestoreFn>(can_restore),
            )
        };

        debug!("Transform symbols resolved from {}", path.display());

        Ok(Self {
            handle,
            path,
            split_fn,
            restore_fn,
            can_restore_fn,
        })
    }
}

impl SizeTransform for LibraryTransform {
    fn split(&self, input: &[u8], outputs: &mut [&mut [u8]]) -> Result<()> {
        check_split_layout(input.len(), outputs)?;
        let len = abi_len(input.len())?;

        let mut dst: Vec<*mut u8> = outputs.iter_mut().map(|o| o.as_mut_ptr()).collect();

        // SAFETY: layout checked above: nine outputs of len/4 bytes, len bytes of
        // input. `size_split` only reads `p_src`; the pointer is mutable in the
        // C signature alone.
        unsafe {
            (self.split_fn)(dst.as_mut_ptr(), input.as_ptr().cast_mut(), len);
        }
        Ok(())
    }

    fn restore(&self, output: &mut [u8], inputs: &[Option<&[u8]>]) -> Result<()> {
        check_restore_layout(output.len(), inputs)?;
        let len = abi_len(output.len())?;
        let mut src = slot_pointers(inputs);

        // SAFETY: layout checked above; null slots denote missing shards
        let code = unsafe { (self.restore_fn)(output.as_mut_ptr(), src.as_mut_ptr(), len) };
        if code != 0 {
            return Err(Error::RestoreFailed { code });
        }
        Ok(())
    }

    fn can_restore(&self, inputs: &[Option<&[u8]>]) -> bool {
        if inputs.len() != super::SIZE_SHARDS {
            return false;
        }
        let mut src = slot_pointers(inputs);
        // SAFETY: nine slots, each null or pointing at a live shard buffer
        unsafe { (self.can_restore_fn)(src.as_mut_ptr()) != 0 }
    }

    fn origin(&self) -> String {
        self.path.display().to_string()
    }
}

impl Drop for LibraryTransform {
    fn drop(&mut self) {
        debug!("Closing transform library {}", self.path.display());
        // SAFETY: handle came from dlopen and is closed exactly once
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

// =============================================================================
// dlopen helpers
// =============================================================================

fn open_library(path: &Path) -> std::result::Result<*mut c_void, String> {
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| e.to_string())?;
    // SAFETY: c_path is a valid NUL-terminated string
    let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL) };
    if handle.is_null() {
        Err(last_dl_error())
    } else {
        Ok(handle)
    }
}

fn lookup(handle: *mut c_void, symbol: &[u8]) -> Option<*mut c_void> {
    // SAFETY: handle is a live dlopen handle, symbol is NUL-terminated
    let ptr = unsafe { libc::dlsym(handle, symbol.as_ptr().cast()) };
    (!ptr.is_null()).then_some(ptr)
}

fn last_dl_error() -> String {
    // SAFETY: dlerror returns null or a NUL-terminated thread-local message
    unsafe {
        let msg = libc::dlerror();
        if msg.is_null() {
            "unknown dlopen error".to_string()
        } else {
            CStr::from_ptr(msg).to_string_lossy().into_owned()
        }
    }
}

fn slot_pointers(inputs: &[Option<&[u8]>]) -> Vec<*const u8> {
    inputs
        .iter()
        .map(|slot| slot.map_or(std::ptr::null(), <[u8]>::as_ptr))
        .collect()
}

fn abi_len(len: usize) -> Result<std::ffi::c_uint> {
    std::ffi::c_uint::try_from(len).map_err(|_| Error::InputTooLarge {
        len,
        max: MAX_TRANSFORM_LEN,
    })
}
