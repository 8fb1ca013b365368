//! Process-wide, reference-counted ownership of the SIZE transform
//!
//! The first codec instance loads the transform; each instance holds a
//! [`TransformLease`]; the transform is released when the last lease drops.
//! The count, the loaded transform and the load/unload transitions are all
//! guarded by one mutex. Once a lease exists its function pointers are used
//! without further locking.

use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::SizeTransform;
use crate::config::LoaderConfig;
use crate::error::Result;

/// Function that produces a fresh transform on first acquisition.
pub type TransformLoader = dyn Fn() -> Result<Arc<dyn SizeTransform>> + Send + Sync;

#[derive(Default)]
struct RegistryState {
    transform: Option<Arc<dyn SizeTransform>>,
    ref_count: usize,
    load_count: u64,
}

/// Reference-counted holder of the loaded transform.
pub struct TransformRegistry {
    state: Mutex<RegistryState>,
    loader: Box<TransformLoader>,
}

static GLOBAL: Lazy<Arc<TransformRegistry>> =
    Lazy::new(|| Arc::new(TransformRegistry::for_library(None)));

impl TransformRegistry {
    /// Registry with a custom loader.
    pub fn new(
        loader: impl Fn() -> Result<Arc<dyn SizeTransform>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            loader: Box::new(loader),
        }
    }

    /// Registry that loads the shared library.
    ///
    /// With `config = None` the search list is rebuilt from the environment
    /// on every load, so `SIZECEPH_LIBRARY_PATH` is honoured at load time.
    pub fn for_library(config: Option<LoaderConfig>) -> Self {
        Self::new(move || {
            let config = config.clone().unwrap_or_else(LoaderConfig::from_env);
            load_library(&config)
        })
    }

    /// Registry that always hands out `transform`.
    pub fn preloaded(transform: Arc<dyn SizeTransform>) -> Self {
        Self::new(move || Ok(Arc::clone(&transform)))
    }

    /// The process-wide registry used by codecs that load the library.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Take a lease, loading the transform if this is the first one.
    pub fn acquire(self: &Arc<Self>) -> Result<TransformLease> {
        let mut state = self.state.lock();

        let transform = match &state.transform {
            Some(loaded) => Arc::clone(loaded),
            None => {
                let loaded = (self.loader)()?;
                state.load_count += 1;
                info!("SIZE transform loaded from {}", loaded.origin());
                state.transform = Some(Arc::clone(&loaded));
                loaded
            }
        };

        state.ref_count += 1;
        debug!(ref_count = state.ref_count, "transform lease acquired");

        Ok(TransformLease {
            registry: Arc::clone(self),
            transform: ManuallyDrop::new(transform),
        })
    }

    fn retain(&self) {
        let mut state = self.state.lock();
        state.ref_count += 1;
        debug!(ref_count = state.ref_count, "transform lease cloned");
    }

    /// Drop one lease. `held` is the lease's own handle and is dropped before
    /// the lock is released, so an unload completes under the lock.
    fn release(&self, held: Option<Arc<dyn SizeTransform>>) {
        let mut state = self.state.lock();

        if state.ref_count == 0 {
            warn!("transform lease released with zero reference count");
        } else {
            state.ref_count -= 1;
        }
        debug!(ref_count = state.ref_count, "transform lease released");

        let unloaded = if state.ref_count == 0 {
            state.transform.take()
        } else {
            None
        };
        if let Some(transform) = &unloaded {
            info!("Unloading SIZE transform from {}", transform.origin());
        }

        drop(held);
        drop(unloaded);
        drop(state);
    }

    /// Number of live leases.
    pub fn ref_count(&self) -> usize {
        self.state.lock().ref_count
    }

    /// Whether a transform is currently held.
    pub fn is_loaded(&self) -> bool {
        self.state.lock().transform.is_some()
    }

    /// How many times the loader has run.
    pub fn load_count(&self) -> u64 {
        self.state.lock().load_count
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TransformRegistry")
            .field("loaded", &state.transform.is_some())
            .field("ref_count", &state.ref_count)
            .field("load_count", &state.load_count)
            .finish()
    }
}

#[cfg(unix)]
fn load_library(config: &LoaderConfig) -> Result<Arc<dyn SizeTransform>> {
    let transform = super::LibraryTransform::load(config)?;
    Ok(Arc::new(transform))
}

#[cfg(not(unix))]
fn load_library(config: &LoaderConfig) -> Result<Arc<dyn SizeTransform>> {
    Err(crate::error::Error::LibraryNotFound {
        tried: config
            .candidates()
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
    })
}

// =============================================================================
// Lease
// =============================================================================

/// One codec instance's hold on the transform.
pub struct TransformLease {
    registry: Arc<TransformRegistry>,
    // Handed back to the registry on drop.
    transform: ManuallyDrop<Arc<dyn SizeTransform>>,
}

impl Deref for TransformLease {
    type Target = dyn SizeTransform;

    fn deref(&self) -> &Self::Target {
        &**self.transform
    }
}

impl Clone for TransformLease {
    fn clone(&self) -> Self {
        self.registry.retain();
        Self {
            registry: Arc::clone(&self.registry),
            transform: ManuallyDrop::new(Arc::clone(&*self.transform)),
        }
    }
}

impl Drop for TransformLease {
    fn drop(&mut self) {
        // SAFETY: `transform` is taken exactly once, here, and never read again
        let transform = unsafe { ManuallyDrop::take(&mut self.transform) };
        self.registry.release(Some(transform));
    }
}

impl fmt::Debug for TransformLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformLease")
            .field("origin", &self.transform.origin())
            .finish()
    }
}
