//! Typed filesystem event stream.
//!
//! The unsafe kernel boundary lives in `fsevent.rs` (macOS). Everything
//! downstream consumes `WatchEvent` batches from a channel; the monitor
//! never touches raw pointers or C strings. On other platforms a
//! `notify`-based backend emits the same shape with synthesized event
//! ids (and no replay, so persisted cursors are never valid there).

use std::path::PathBuf;
use std::sync::Arc;

use bitflags::bitflags;
use crossbeam_channel::Sender;

use crate::error::Result;

#[cfg(target_os = "macos")]
pub mod fsevent;

#[cfg(not(target_os = "macos"))]
pub mod backend;

bitflags! {
    /// Logical abstraction over the kernel's per-event flag bits.
    /// Values mirror the FSEvents constants so the macOS adapter is a
    /// plain truncating cast.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventFlags: u32 {
        const MUST_SCAN_SUBDIRS = 0x0000_0001;
        const USER_DROPPED      = 0x0000_0002;
        const KERNEL_DROPPED    = 0x0000_0004;
        const EVENT_IDS_WRAPPED = 0x0000_0008;
        const HISTORY_DONE      = 0x0000_0010;
        const ROOT_CHANGED      = 0x0000_0020;
        const ITEM_CREATED      = 0x0000_0100;
        const ITEM_REMOVED      = 0x0000_0200;
        const ITEM_INODE_META   = 0x0000_0400;
        const ITEM_RENAMED      = 0x0000_0800;
        const ITEM_MODIFIED     = 0x0000_1000;
        const ITEM_IS_FILE      = 0x0001_0000;
        const ITEM_IS_DIR       = 0x0002_0000;
        const ITEM_IS_SYMLINK   = 0x0004_0000;
    }
}

impl EventFlags {
    /// True when the event describes a structural change the index
    /// must reflect (create, remove, or rename).
    pub fn is_structural(self) -> bool {
        self.intersects(Self::ITEM_CREATED | Self::ITEM_REMOVED | Self::ITEM_RENAMED)
    }

    /// True when the kernel reports lost events.
    pub fn is_dropped(self) -> bool {
        self.intersects(Self::KERNEL_DROPPED | Self::USER_DROPPED)
    }
}

/// One kernel change notification, already lifted into safe types.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub flags: EventFlags,
    pub event_id: u64,
}

/// A running event stream. Dropping the handle stops delivery.
pub trait EventStream: Send {
    /// Stops the stream; no further batches arrive after this returns.
    fn invalidate(&mut self);
}

/// Channel end the stream delivers batches into.
pub type EventBatchSender = Sender<Vec<WatchEvent>>;

/// Creates event streams. The monitor holds one of these so tests can
/// substitute a scripted stream for the kernel.
pub type StreamFactory =
    Arc<dyn Fn(&[PathBuf], Option<u64>, EventBatchSender) -> Result<Box<dyn EventStream>> + Send + Sync>;

/// The platform stream factory: FSEvents on macOS, `notify` elsewhere.
pub fn platform_stream_factory() -> StreamFactory {
    #[cfg(target_os = "macos")]
    {
        Arc::new(|roots: &[PathBuf], since: Option<u64>, tx: EventBatchSender| {
            fsevent::open_stream(roots, since, tx)
        })
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(|roots: &[PathBuf], since: Option<u64>, tx: EventBatchSender| {
            backend::open_stream(roots, since, tx)
        })
    }
}

/// Decides whether a persisted event id can seed a stream for `roots`.
pub type CursorProbeFn = Arc<dyn Fn(&[PathBuf], u64) -> bool + Send + Sync>;

/// The platform cursor probe. Only FSEvents supports journal replay;
/// the fallback backend rejects every cursor.
pub fn platform_cursor_probe() -> CursorProbeFn {
    #[cfg(target_os = "macos")]
    {
        Arc::new(|roots: &[PathBuf], event_id: u64| fsevent::probe_event_id(roots, event_id))
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(|roots: &[PathBuf], event_id: u64| backend::probe_event_id(roots, event_id))
    }
}

/// Latency (seconds) the kernel may coalesce events before delivery.
pub const STREAM_LATENCY_SECS: f64 = 0.3;
