// SPDX-License-Identifier: CEPL-1.0
//! Typed window events posted by the windowing layer and drained by the
//! frame loop once per iteration.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use portable_atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Keys the frame loop cares about. Everything else maps to `Other`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    W,
    A,
    S,
    D,
    Up,
    Down,
    Escape,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformEvent {
    /// Framebuffer size in physical pixels. May be 0x0 while minimized.
    Resized { width: u32, height: u32 },
    KeyChanged { key: Key, pressed: bool },
}

/// Producer half. Held by the window shell.
#[derive(Clone)]
pub struct EventSender {
    tx: SyncSender<PlatformEvent>,
    resize_dropped: Arc<AtomicBool>,
}

/// Consumer half. Held by the frame scheduler.
pub struct EventReceiver {
    rx: Receiver<PlatformEvent>,
    resize_dropped: Arc<AtomicBool>,
}

/// Bounded queue between the window callbacks and the frame loop.
///
/// Both halves normally live on the same thread, so `post` must never block:
/// a full queue drops the event instead. A dropped `Resized` is remembered
/// and reported by [`EventReceiver::take_dropped_resize`].
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    let resize_dropped = Arc::new(AtomicBool::new(false));
    (
        EventSender {
            tx,
            resize_dropped: resize_dropped.clone(),
        },
        EventReceiver { rx, resize_dropped },
    )
}

impl EventSender {
    /// Returns false when the event was dropped.
    pub fn post(&self, event: PlatformEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(ev)) => {
                if let PlatformEvent::Resized { .. } = ev {
                    self.resize_dropped.store(true, Ordering::Release);
                }
                warn!("event queue full, dropping {:?}", ev);
                false
            }
            Err(TrySendError::Disconnected(ev)) => {
                debug!("event queue closed, dropping {:?}", ev);
                false
            }
        }
    }
}

impl EventReceiver {
    /// Everything queued so far, oldest first. Never blocks.
    pub fn drain(&self) -> impl Iterator<Item = PlatformEvent> + '_ {
        self.rx.try_iter()
    }

    /// True once after a `Resized` was dropped on a full queue. The size
    /// itself is gone; callers re-read it from the window.
    pub fn take_dropped_resize(&self) -> bool {
        self.resize_dropped.swap(false, Ordering::AcqRel)
    }
}
