//! C ABI of the port-graph plugin standard.
//!
//! A port-graph plugin is a shared library exporting
//! [`PG_ENTRY_SYMBOL`], a function returning a static [`PgDescriptor`].
//! The descriptor declares typed ports; the host allocates their backing
//! storage, connects each port by index, and drives the instance one block
//! at a time through `run`. Event ports exchange length-prefixed frames
//! whose types are named by URIDs obtained through the host's map callback.
//!
//! The same structs are used for plugins compiled into the host (see
//! [`crate::portgraph::PortGraphWrapper::from_descriptor`]).

use std::os::raw::{c_char, c_void};

pub const PORTGRAPH_ABI_VERSION: u32 = 1;

/// Exported entry symbol, NUL-terminated for symbol lookup.
pub const PG_ENTRY_SYMBOL: &[u8] = b"bento_portgraph_entry\0";

/// Extension URI answered by `extension_data` with a [`PgWorkerInterface`].
pub const PG_EXT_WORKER: &[u8] = b"bento:ext:worker\0";

pub type PgHandle = *mut c_void;

pub type PgEntry = unsafe extern "C" fn() -> *const PgDescriptor;

pub const PG_STATUS_OK: i32 = 0;
pub const PG_STATUS_ERROR: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PgPortKind {
    AudioIn = 0,
    AudioOut = 1,
    ControlIn = 2,
    ControlOut = 3,
    EventIn = 4,
    EventOut = 5,
    CvIn = 6,
    CvOut = 7,
}

impl PgPortKind {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::AudioIn),
            1 => Some(Self::AudioOut),
            2 => Some(Self::ControlIn),
            3 => Some(Self::ControlOut),
            4 => Some(Self::EventIn),
            5 => Some(Self::EventOut),
            6 => Some(Self::CvIn),
            7 => Some(Self::CvOut),
            _ => None,
        }
    }
}

#[repr(C)]
pub struct PgPort {
    pub kind: u32,
    pub name: *const c_char,
    /// Range and default for control ports; ignored elsewhere.
    pub min: f32,
    pub max: f32,
    pub default: f32,
    /// Non-zero on a control output carrying the plugin's latency in samples.
    pub reports_latency: u32,
    /// Non-zero on the event input designated as the main control port.
    pub is_control_designation: u32,
}

/// Host callbacks handed to `instantiate`. Lives as long as the instance.
#[repr(C)]
pub struct PgHost {
    pub urid_map_handle: *mut c_void,
    pub urid_map: Option<unsafe extern "C" fn(*mut c_void, *const c_char) -> u32>,
    pub schedule_handle: *mut c_void,
    /// RT-safe work scheduling; see [`PgWorkerInterface`].
    pub schedule_work: Option<unsafe extern "C" fn(*mut c_void, u32, *const c_void) -> i32>,
}

#[repr(C)]
pub struct PgDescriptor {
    pub abi_version: u32,
    pub uri: *const c_char,
    pub label: *const c_char,
    pub port_count: u32,
    pub ports: *const PgPort,
    /// Non-zero when scheduled work should run on a dedicated host thread
    /// instead of synchronously.
    pub wants_worker_thread: u32,
    pub instantiate:
        Option<unsafe extern "C" fn(sample_rate: f64, block_size: u32, host: *const PgHost) -> PgHandle>,
    pub connect_port: Option<unsafe extern "C" fn(PgHandle, index: u32, data: *mut c_void)>,
    pub activate: Option<unsafe extern "C" fn(PgHandle)>,
    pub run: Option<unsafe extern "C" fn(PgHandle, n_samples: u32)>,
    pub deactivate: Option<unsafe extern "C" fn(PgHandle)>,
    pub destroy: Option<unsafe extern "C" fn(PgHandle)>,
    pub extension_data: Option<unsafe extern "C" fn(uri: *const c_char) -> *const c_void>,
}

pub type PgRespondFn = unsafe extern "C" fn(handle: *mut c_void, size: u32, data: *const c_void) -> i32;

/// Worker extension. `work` runs off the audio thread (or synchronously
/// under the host work lock when no worker thread was requested) and may
/// call `respond`; responses are delivered to `work_response` on the audio
/// thread at the end of a later block. `end_run`, when present, closes
/// every block.
#[repr(C)]
pub struct PgWorkerInterface {
    pub work: Option<
        unsafe extern "C" fn(
            instance: PgHandle,
            respond: PgRespondFn,
            respond_handle: *mut c_void,
            size: u32,
            data: *const c_void,
        ) -> i32,
    >,
    pub work_response: Option<unsafe extern "C" fn(PgHandle, size: u32, data: *const c_void) -> i32>,
    pub end_run: Option<unsafe extern "C" fn(PgHandle) -> i32>,
}

/// Event frame header inside an event port buffer. The body follows
/// immediately and the next frame starts at the next 4-byte boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgEventHeader {
    /// Sample offset within the block.
    pub frames: u32,
    /// URID naming the body type.
    pub body_type: u32,
    pub body_size: u32,
}

/// Transport description written to event inputs when the clock changes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PgTransportBody {
    pub tempo: f32,
    pub playing: u32,
    pub beats: f64,
    pub sample: u64,
    pub time_sig_numerator: u32,
    pub time_sig_denominator: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_kind_roundtrip() {
        for raw in 0..8 {
            let kind = PgPortKind::from_raw(raw).unwrap();
            assert_eq!(kind as u32, raw);
        }
        assert_eq!(PgPortKind::from_raw(8), None);
    }

    #[test]
    fn test_event_header_layout() {
        assert_eq!(std::mem::size_of::<PgEventHeader>(), 12);
        assert_eq!(std::mem::align_of::<PgEventHeader>(), 4);
    }
}
