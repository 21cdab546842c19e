//! Worker plumbing for port-graph plugins.
//!
//! The plugin calls `schedule_work` on the audio thread. With a worker
//! thread, the request payload travels through a bounded channel whose
//! blocking receive doubles as the wakeup signal; the thread runs the
//! plugin's `work` under the host work lock, and any `respond` payloads go
//! into an SPSC ring drained on the audio thread, which calls
//! `work_response` at the end of a block. Without a worker thread,
//! `schedule_work` executes `work` synchronously under the same lock.
//!
//! Payloads up to [`INLINE_PAYLOAD`] bytes are carried without allocation.

use std::ffi::c_void;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use smallvec::SmallVec;

use crate::portgraph::abi::{
    PgHandle, PgWorkerInterface, PG_STATUS_ERROR, PG_STATUS_OK,
};

pub const INLINE_PAYLOAD: usize = 64;
const QUEUE_CAPACITY: usize = 64;

pub type WorkPayload = SmallVec<[u8; INLINE_PAYLOAD]>;

/// Raw plugin pointers shipped to the worker thread. The ABI requires
/// `work` to be callable off the audio thread while `run` executes, with
/// the host lock serialising `work` against state operations.
#[derive(Clone, Copy)]
struct PluginRef {
    iface: *const PgWorkerInterface,
    instance: PgHandle,
}

unsafe impl Send for PluginRef {}

unsafe extern "C" fn respond_callback(handle: *mut c_void, size: u32, data: *const c_void) -> i32 {
    if handle.is_null() || (data.is_null() && size > 0) {
        return PG_STATUS_ERROR;
    }
    let producer = &mut *(handle as *mut HeapProd<WorkPayload>);
    let bytes = std::slice::from_raw_parts(data as *const u8, size as usize);
    match producer.try_push(WorkPayload::from_slice(bytes)) {
        Ok(()) => PG_STATUS_OK,
        Err(_) => PG_STATUS_ERROR,
    }
}

/// State reachable from the `schedule_work` host callback. Boxed by the
/// wrapper so the pointer handed to the plugin stays stable.
pub struct ScheduleEndpoint {
    threaded: bool,
    requests: Option<Sender<WorkPayload>>,
    plugin: Option<PluginRef>,
    work_lock: Arc<Mutex<()>>,
    /// Respond target. Stays here for synchronous `work` calls; in threaded
    /// mode `attach` moves it onto the worker thread.
    sync_responses: Option<Box<HeapProd<WorkPayload>>>,
}

/// `PgHost::schedule_work` adapter; `handle` is a `*mut ScheduleEndpoint`.
pub unsafe extern "C" fn schedule_work_callback(
    handle: *mut c_void,
    size: u32,
    data: *const c_void,
) -> i32 {
    if handle.is_null() || (data.is_null() && size > 0) {
        return PG_STATUS_ERROR;
    }
    let endpoint = &mut *(handle as *mut ScheduleEndpoint);
    let bytes = std::slice::from_raw_parts(data as *const u8, size as usize);

    if endpoint.threaded {
        let Some(requests) = endpoint.requests.as_ref() else {
            return PG_STATUS_ERROR;
        };
        match requests.try_send(WorkPayload::from_slice(bytes)) {
            Ok(()) => PG_STATUS_OK,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => PG_STATUS_ERROR,
        }
    } else {
        let (Some(plugin), Some(responses)) =
            (endpoint.plugin, endpoint.sync_responses.as_mut())
        else {
            return PG_STATUS_ERROR;
        };
        let Some(work) = (*plugin.iface).work else {
            return PG_STATUS_ERROR;
        };
        let _guard = endpoint.work_lock.lock();
        work(
            plugin.instance,
            respond_callback,
            responses.as_mut() as *mut HeapProd<WorkPayload> as *mut c_void,
            size,
            data as *const c_void,
        )
    }
}

/// Host-side worker for one plugin instance.
pub struct PluginWorker {
    endpoint: Box<ScheduleEndpoint>,
    responses: HeapCons<WorkPayload>,
    plugin: PluginRef,
    thread: Option<JoinHandle<()>>,
}

impl PluginWorker {
    /// Create the endpoint before the instance exists; `attach` completes
    /// it once `instantiate` has returned.
    pub fn new(threaded: bool) -> Self {
        let (producer, consumer) = HeapRb::<WorkPayload>::new(QUEUE_CAPACITY).split();
        let endpoint = Box::new(ScheduleEndpoint {
            threaded,
            requests: None,
            plugin: None,
            work_lock: Arc::new(Mutex::new(())),
            sync_responses: Some(Box::new(producer)),
        });
        Self {
            endpoint,
            responses: consumer,
            plugin: PluginRef {
                iface: std::ptr::null(),
                instance: std::ptr::null_mut(),
            },
            thread: None,
        }
    }

    pub fn schedule_handle(&mut self) -> *mut c_void {
        self.endpoint.as_mut() as *mut ScheduleEndpoint as *mut c_void
    }

    /// Bind the instance and worker interface, spawning the thread in
    /// threaded mode. Called once, after `instantiate`.
    pub fn attach(&mut self, iface: *const PgWorkerInterface, instance: PgHandle) {
        let plugin = PluginRef { iface, instance };
        self.plugin = plugin;
        self.endpoint.plugin = Some(plugin);

        if self.endpoint.threaded {
            let (request_tx, request_rx): (Sender<WorkPayload>, Receiver<WorkPayload>) =
                crossbeam_channel::bounded(QUEUE_CAPACITY);
            self.endpoint.requests = Some(request_tx);
            let mut producer = self
                .endpoint
                .sync_responses
                .take()
                .expect("response producer staged in new()");
            let work_lock = Arc::clone(&self.endpoint.work_lock);

            let thread = std::thread::Builder::new()
                .name("bento-pg-worker".to_string())
                .spawn(move || {
                    let plugin = plugin;
                    while let Ok(payload) = request_rx.recv() {
                        unsafe {
                            let Some(work) = (*plugin.iface).work else {
                                continue;
                            };
                            let _guard = work_lock.lock();
                            work(
                                plugin.instance,
                                respond_callback,
                                producer.as_mut() as *mut HeapProd<WorkPayload> as *mut c_void,
                                payload.len() as u32,
                                payload.as_ptr() as *const c_void,
                            );
                        }
                    }
                })
                .expect("spawning plugin worker thread");
            self.thread = Some(thread);
        }
    }

    /// Drain queued responses into the plugin. Audio thread, end of block.
    pub fn emit_responses(&mut self) {
        if self.plugin.iface.is_null() {
            return;
        }
        while let Some(payload) = self.responses.try_pop() {
            unsafe {
                if let Some(work_response) = (*self.plugin.iface).work_response {
                    work_response(
                        self.plugin.instance,
                        payload.len() as u32,
                        payload.as_ptr() as *const c_void,
                    );
                }
            }
        }
    }

    /// Audio thread, after `emit_responses`.
    pub fn end_run(&mut self) {
        if self.plugin.iface.is_null() {
            return;
        }
        unsafe {
            if let Some(end_run) = (*self.plugin.iface).end_run {
                end_run(self.plugin.instance);
            }
        }
    }
}

impl Drop for PluginWorker {
    fn drop(&mut self) {
        // Closing the request channel wakes and terminates the thread.
        self.endpoint.requests = None;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

