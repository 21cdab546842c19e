//! Symbol → integer interning for port-graph plugins.
//!
//! Interning happens on non-RT threads only (instantiate, extension
//! queries); the lock guards a short critical section. The audio thread
//! never calls `map` — it uses the ids precomputed in [`KnownUrids`].

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr};

use parking_lot::Mutex;

pub const URID_MIDI_EVENT: &str = "bento:midi_event";
pub const URID_TRANSPORT: &str = "bento:transport";
pub const URID_PATCH_GET: &str = "bento:patch_get";

#[derive(Default)]
pub struct UridMap {
    inner: Mutex<UridMapInner>,
}

#[derive(Default)]
struct UridMapInner {
    ids: HashMap<String, u32>,
    symbols: Vec<String>,
}

impl UridMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a symbol. Ids start at 1; 0 is never a valid URID.
    pub fn map(&self, symbol: &str) -> u32 {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.ids.get(symbol) {
            return *id;
        }
        inner.symbols.push(symbol.to_string());
        let id = inner.symbols.len() as u32;
        inner.ids.insert(symbol.to_string(), id);
        id
    }

    pub fn unmap(&self, urid: u32) -> Option<String> {
        let inner = self.inner.lock();
        inner.symbols.get(urid.checked_sub(1)? as usize).cloned()
    }
}

/// Ids the audio thread needs, resolved once at load time.
#[derive(Debug, Clone, Copy)]
pub struct KnownUrids {
    pub midi_event: u32,
    pub transport: u32,
    pub patch_get: u32,
}

impl KnownUrids {
    pub fn resolve(map: &UridMap) -> Self {
        Self {
            midi_event: map.map(URID_MIDI_EVENT),
            transport: map.map(URID_TRANSPORT),
            patch_get: map.map(URID_PATCH_GET),
        }
    }
}

/// `PgHost::urid_map` adapter; `handle` is a `*const UridMap`.
pub unsafe extern "C" fn urid_map_callback(handle: *mut c_void, symbol: *const c_char) -> u32 {
    if handle.is_null() || symbol.is_null() {
        return 0;
    }
    let map = &*(handle as *const UridMap);
    match CStr::from_ptr(symbol).to_str() {
        Ok(symbol) => map.map(symbol),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_stable() {
        let map = UridMap::new();
        let a = map.map("bento:midi_event");
        let b = map.map("bento:transport");
        assert_ne!(a, b);
        assert_eq!(map.map("bento:midi_event"), a);
        assert_eq!(map.unmap(a).as_deref(), Some("bento:midi_event"));
        assert_eq!(map.unmap(0), None);
    }

    #[test]
    fn test_callback_adapter() {
        let map = UridMap::new();
        let symbol = std::ffi::CString::new("bento:transport").unwrap();
        let id = unsafe {
            urid_map_callback(
                &map as *const UridMap as *mut c_void,
                symbol.as_ptr(),
            )
        };
        assert_eq!(id, map.map("bento:transport"));
        assert_eq!(unsafe { urid_map_callback(std::ptr::null_mut(), symbol.as_ptr()) }, 0);
    }

    #[test]
    fn test_known_urids() {
        let map = UridMap::new();
        let known = KnownUrids::resolve(&map);
        assert!(known.midi_event > 0);
        assert_ne!(known.midi_event, known.transport);
        assert_ne!(known.transport, known.patch_get);
    }
}
