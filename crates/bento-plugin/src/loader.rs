//! Shared-library handles for port-graph plugins.
//!
//! Libraries are reference-counted and shared between wrappers loading the
//! same path. A library unloads when the last wrapper referring to it is
//! destroyed — which happens on the dispatcher's reclaim path, never on the
//! audio thread.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use bento_core::ProcessorError;

use crate::error::{load_error, LoadStage};
use crate::portgraph::abi::{PgDescriptor, PgEntry, PG_ENTRY_SYMBOL, PORTGRAPH_ABI_VERSION};

/// A loaded library together with its resolved descriptor.
pub struct PluginLibrary {
    descriptor: *const PgDescriptor,
    // Field order matters: the descriptor points into the library's image,
    // so the library must drop last.
    _library: libloading::Library,
}

// The descriptor is a static table inside the library image, valid as long
// as the library is loaded, and the host only reads it.
unsafe impl Send for PluginLibrary {}
unsafe impl Sync for PluginLibrary {}

impl PluginLibrary {
    pub fn descriptor(&self) -> *const PgDescriptor {
        self.descriptor
    }
}

#[derive(Default)]
pub struct PluginLoader {
    loaded: Mutex<HashMap<PathBuf, Weak<PluginLibrary>>>,
}

impl PluginLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, path: &Path) -> Result<Arc<PluginLibrary>, ProcessorError> {
        let mut loaded = self.loaded.lock();
        if let Some(existing) = loaded.get(path).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let library = unsafe { libloading::Library::new(path) }
            .map_err(|e| load_error(LoadStage::Opening, e))?;
        let descriptor = unsafe {
            let entry: libloading::Symbol<PgEntry> = library
                .get(PG_ENTRY_SYMBOL)
                .map_err(|e| load_error(LoadStage::Entry, e))?;
            entry()
        };
        if descriptor.is_null() {
            return Err(load_error(LoadStage::Entry, "entry returned null"));
        }
        let abi_version = unsafe { (*descriptor).abi_version };
        if abi_version != PORTGRAPH_ABI_VERSION {
            return Err(load_error(
                LoadStage::Entry,
                format!("abi version {} (host speaks {})", abi_version, PORTGRAPH_ABI_VERSION),
            ));
        }

        let handle = Arc::new(PluginLibrary {
            descriptor,
            _library: library,
        });
        loaded.insert(path.to_path_buf(), Arc::downgrade(&handle));
        tracing::info!(path = %path.display(), "loaded port-graph library");
        Ok(handle)
    }

    /// Drop stale map entries for libraries that have fully unloaded.
    pub fn prune(&self) {
        self.loaded.lock().retain(|_, weak| weak.strong_count() > 0);
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded
            .lock()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}
