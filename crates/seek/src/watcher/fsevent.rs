//! macOS FSEvents FFI adapter.
//!
//! The only unsafe code in the crate lives here. A dedicated thread
//! runs the stream's CFRunLoop; the registered callback lifts the raw
//! path/flag/id arrays into [`WatchEvent`] batches and pushes them onto
//! a crossbeam channel. Dropping the handle stops the run loop, which
//! unwinds and releases the stream.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use core_foundation_sys::array::{CFArrayCreate, CFArrayRef};
use core_foundation_sys::base::{kCFAllocatorDefault, CFIndex, CFRelease};
use core_foundation_sys::runloop::{
    kCFRunLoopDefaultMode, CFRunLoopGetCurrent, CFRunLoopRef, CFRunLoopRun, CFRunLoopStop,
};
use core_foundation_sys::string::{kCFStringEncodingUTF8, CFStringCreateWithBytes, CFStringRef};

use crate::error::{Result, SeekError};

use super::{EventBatchSender, EventFlags, EventStream, WatchEvent, STREAM_LATENCY_SECS};

// ---------------------------------------------------------------------------
// FSEvents C types and constants
// ---------------------------------------------------------------------------

type FSEventStreamRef = *mut c_void;
type FSEventStreamEventId = u64;

/// "Since now" sentinel from the FSEvents headers.
const K_FS_EVENT_STREAM_EVENT_ID_SINCE_NOW: u64 = u64::MAX;

#[repr(C)]
struct FSEventStreamContext {
    version: CFIndex,
    info: *mut c_void,
    retain: Option<extern "C" fn(*const c_void) -> *const c_void>,
    release: Option<extern "C" fn(*const c_void)>,
    copy_description: Option<extern "C" fn(*const c_void) -> CFStringRef>,
}

type FSEventStreamCallback = extern "C" fn(
    stream_ref: FSEventStreamRef,
    client_callback_info: *mut c_void,
    num_events: usize,
    event_paths: *mut c_void,
    event_flags: *const u32,
    event_ids: *const FSEventStreamEventId,
);

const K_FS_EVENT_STREAM_CREATE_FLAG_NO_DEFER: u32 = 0x02;
const K_FS_EVENT_STREAM_CREATE_FLAG_WATCH_ROOT: u32 = 0x04;
const K_FS_EVENT_STREAM_CREATE_FLAG_FILE_EVENTS: u32 = 0x10;

#[link(name = "CoreServices", kind = "framework")]
extern "C" {
    fn FSEventStreamCreate(
        allocator: *const c_void,
        callback: FSEventStreamCallback,
        context: *mut FSEventStreamContext,
        paths_to_watch: CFArrayRef,
        since_when: FSEventStreamEventId,
        latency: f64,
        flags: u32,
    ) -> FSEventStreamRef;

    fn FSEventStreamScheduleWithRunLoop(
        stream: FSEventStreamRef,
        run_loop: CFRunLoopRef,
        run_loop_mode: CFStringRef,
    );

    fn FSEventStreamStart(stream: FSEventStreamRef) -> bool;
    fn FSEventStreamStop(stream: FSEventStreamRef);
    fn FSEventStreamInvalidate(stream: FSEventStreamRef);
    fn FSEventStreamRelease(stream: FSEventStreamRef);

    fn FSEventsGetCurrentEventId() -> FSEventStreamEventId;
}

// ---------------------------------------------------------------------------
// RAII stream wrapper
// ---------------------------------------------------------------------------

/// A `CFRunLoopRef` that may cross threads.
///
/// Safety: `CFRunLoopStop` is documented as callable from any thread.
#[derive(Clone, Copy)]
struct SendableRunLoop(CFRunLoopRef);
unsafe impl Send for SendableRunLoop {}
unsafe impl Sync for SendableRunLoop {}

enum StartOutcome {
    Running(SendableRunLoop),
    CreateFailed,
    StartFailed,
}

pub struct FsEventStream {
    run_loop: Option<SendableRunLoop>,
    _thread: Option<JoinHandle<()>>,
}

impl FsEventStream {
    /// Creates and starts a stream over `roots`.
    ///
    /// `since` resumes from a persisted kernel event id; `None` begins
    /// at "now". Event batches land on `sender` until the handle is
    /// invalidated or dropped.
    pub fn open(
        roots: &[PathBuf],
        since: Option<u64>,
        sender: EventBatchSender,
    ) -> Result<Self> {
        let root_strings: Vec<String> = roots
            .iter()
            .map(|root| root.to_string_lossy().into_owned())
            .collect();
        if root_strings.is_empty() {
            return Err(SeekError::StreamCreate("no roots to watch".to_string()));
        }
        let since_id = since.unwrap_or(K_FS_EVENT_STREAM_EVENT_ID_SINCE_NOW);

        let outcome_slot: Arc<(Mutex<Option<StartOutcome>>, Condvar)> =
            Arc::new((Mutex::new(None), Condvar::new()));
        let outcome_publish = outcome_slot.clone();

        let thread = thread::spawn(move || {
            // Safety: all FFI below follows the documented CoreServices
            // contract; every created CF object is released on exit.
            unsafe {
                let cf_roots: Vec<CFStringRef> =
                    root_strings.iter().map(|s| str_to_cfstring(s)).collect();
                let root_array = CFArrayCreate(
                    kCFAllocatorDefault,
                    cf_roots.as_ptr() as *const *const c_void,
                    cf_roots.len() as CFIndex,
                    std::ptr::null(),
                );

                let sender_ptr = Box::into_raw(Box::new(sender)) as *mut c_void;
                let mut context = FSEventStreamContext {
                    version: 0,
                    info: sender_ptr,
                    retain: None,
                    release: None,
                    copy_description: None,
                };

                let flags = K_FS_EVENT_STREAM_CREATE_FLAG_NO_DEFER
                    | K_FS_EVENT_STREAM_CREATE_FLAG_FILE_EVENTS
                    | K_FS_EVENT_STREAM_CREATE_FLAG_WATCH_ROOT;

                let stream = FSEventStreamCreate(
                    kCFAllocatorDefault,
                    deliver_batch,
                    &mut context,
                    root_array,
                    since_id,
                    STREAM_LATENCY_SECS,
                    flags,
                );

                let release_roots = || unsafe {
                    CFRelease(root_array as *const c_void);
                    for cf_root in &cf_roots {
                        CFRelease(*cf_root as *const c_void);
                    }
                };

                if stream.is_null() {
                    release_roots();
                    drop(Box::from_raw(sender_ptr as *mut EventBatchSender));
                    publish_outcome(&outcome_publish, StartOutcome::CreateFailed);
                    return;
                }

                let current_run_loop = CFRunLoopGetCurrent();
                FSEventStreamScheduleWithRunLoop(stream, current_run_loop, kCFRunLoopDefaultMode);

                if !FSEventStreamStart(stream) {
                    FSEventStreamInvalidate(stream);
                    FSEventStreamRelease(stream);
                    release_roots();
                    drop(Box::from_raw(sender_ptr as *mut EventBatchSender));
                    publish_outcome(&outcome_publish, StartOutcome::StartFailed);
                    return;
                }

                publish_outcome(
                    &outcome_publish,
                    StartOutcome::Running(SendableRunLoop(current_run_loop)),
                );

                CFRunLoopRun();

                FSEventStreamStop(stream);
                FSEventStreamInvalidate(stream);
                FSEventStreamRelease(stream);
                release_roots();
                drop(Box::from_raw(sender_ptr as *mut EventBatchSender));
            }
        });

        let (lock, cvar) = &*outcome_slot;
        let mut guard = lock
            .lock()
            .map_err(|_| SeekError::StreamCreate("stream startup lock poisoned".to_string()))?;
        while guard.is_none() {
            guard = cvar
                .wait(guard)
                .map_err(|_| SeekError::StreamCreate("stream startup lock poisoned".to_string()))?;
        }

        match guard.take().expect("outcome present") {
            StartOutcome::Running(run_loop) => Ok(Self {
                run_loop: Some(run_loop),
                _thread: Some(thread),
            }),
            StartOutcome::CreateFailed => Err(SeekError::StreamCreate(
                "FSEventStreamCreate returned null".to_string(),
            )),
            StartOutcome::StartFailed => Err(SeekError::StreamStart(
                "FSEventStreamStart returned false".to_string(),
            )),
        }
    }

    /// The kernel's current event id, used to seed "since now" cursors.
    pub fn current_event_id() -> u64 {
        unsafe { FSEventsGetCurrentEventId() }
    }
}

impl EventStream for FsEventStream {
    fn invalidate(&mut self) {
        if let Some(run_loop) = self.run_loop.take() {
            unsafe {
                CFRunLoopStop(run_loop.0);
            }
        }
    }
}

impl Drop for FsEventStream {
    fn drop(&mut self) {
        self.invalidate();
        // The run-loop thread tears the stream down and exits; not
        // joined here so drops never block on the kernel.
    }
}

/// Opens a stream as a boxed trait object for the monitor.
pub fn open_stream(
    roots: &[PathBuf],
    since: Option<u64>,
    sender: EventBatchSender,
) -> Result<Box<dyn EventStream>> {
    Ok(Box::new(FsEventStream::open(roots, since, sender)?))
}

/// True when the kernel accepts `event_id` as a resume point for
/// `roots`: a stream created "since id" validates the cursor.
pub fn probe_event_id(roots: &[PathBuf], event_id: u64) -> bool {
    let (tx, _rx) = crossbeam_channel::unbounded();
    match FsEventStream::open(roots, Some(event_id), tx) {
        Ok(mut stream) => {
            stream.invalidate();
            true
        }
        Err(_) => false,
    }
}

fn publish_outcome(slot: &Arc<(Mutex<Option<StartOutcome>>, Condvar)>, outcome: StartOutcome) {
    let (lock, cvar) = &**slot;
    if let Ok(mut guard) = lock.lock() {
        *guard = Some(outcome);
        cvar.notify_all();
    }
}

// ---------------------------------------------------------------------------
// FFI callback
// ---------------------------------------------------------------------------

extern "C" fn deliver_batch(
    _stream_ref: FSEventStreamRef,
    client_callback_info: *mut c_void,
    num_events: usize,
    event_paths: *mut c_void,
    event_flags: *const u32,
    event_ids: *const FSEventStreamEventId,
) {
    let mut events = Vec::with_capacity(num_events);

    unsafe {
        let paths = event_paths as *const *const c_char;
        for i in 0..num_events {
            let path = CStr::from_ptr(*paths.add(i)).to_string_lossy();
            events.push(WatchEvent {
                path: PathBuf::from(path.as_ref()),
                flags: EventFlags::from_bits_truncate(*event_flags.add(i)),
                event_id: *event_ids.add(i),
            });
        }

        let sender = &*(client_callback_info as *const EventBatchSender);
        let _ = sender.send(events);
    }
}

unsafe fn str_to_cfstring(s: &str) -> CFStringRef {
    CFStringCreateWithBytes(
        kCFAllocatorDefault,
        s.as_ptr(),
        s.len() as CFIndex,
        kCFStringEncodingUTF8,
        false as u8,
    )
}
