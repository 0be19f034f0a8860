//! Single-slot mailbox between the capture thread and a consumer.

use std::mem;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::traits::{DequeuedBuffer, Frame, FrameMetadata, PlaneMapping};

#[derive(Debug, Default)]
struct Slot {
    ready: bool,
    closed: bool,
    frame: Frame,
    published: u64,
    dropped: u64,
}

/// Holds at most one unread frame.
///
/// Publishing over an undrained frame replaces it and counts a drop. The
/// frame bytes are copied out of the mapped buffer while it is still
/// dequeued, so consumers never see memory the kernel may be writing.
#[derive(Debug, Default)]
pub struct FrameHandoff {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl FrameHandoff {
    /// Empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy the used bytes of a dequeued buffer into the slot.
    pub fn publish<M: PlaneMapping>(&self, buffer: &DequeuedBuffer, planes: &[M]) {
        let mut slot = self.lock();
        if slot.ready {
            slot.dropped += 1;
            trace!(
                index = slot.frame.metadata.index,
                "unread frame overwritten"
            );
        }

        let frame = &mut slot.frame;
        frame.data.clear();
        let mut plane_bytes = Vec::with_capacity(planes.len());
        for (mapping, &used) in planes.iter().zip(&buffer.plane_bytes) {
            let bytes = mapping.bytes();
            let used = (used as usize).min(bytes.len());
            frame.data.extend_from_slice(bytes.get(..used).unwrap_or_default());
            #[allow(clippy::cast_possible_truncation)]
            plane_bytes.push(used as u32);
        }
        frame.metadata = FrameMetadata {
            index: buffer.index,
            sequence: buffer.sequence,
            timestamp: buffer.timestamp,
            bytes_used: frame.data.len() as u64,
            plane_bytes,
        };

        slot.ready = true;
        slot.published += 1;
        drop(slot);
        self.ready.notify_all();
    }

    /// Index and bytes used of the pending frame, without draining it.
    pub fn peek(&self) -> Option<(u32, u64)> {
        let slot = self.lock();
        slot.ready
            .then(|| (slot.frame.metadata.index, slot.frame.metadata.bytes_used))
    }

    /// Drain the pending frame, if any.
    pub fn take(&self) -> Option<Frame> {
        Self::drain(&mut self.lock())
    }

    /// Wait at most `timeout` for a frame and drain it.
    ///
    /// Returns early with `None` once the mailbox is closed and empty.
    pub fn wait(&self, timeout: Duration) -> Option<Frame> {
        let guard = self.lock();
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |slot| !slot.ready && !slot.closed)
            .unwrap_or_else(PoisonError::into_inner);
        Self::drain(&mut slot)
    }

    fn drain(slot: &mut Slot) -> Option<Frame> {
        if !slot.ready {
            return None;
        }
        slot.ready = false;
        Some(mem::take(&mut slot.frame))
    }

    /// Mark that no further frames will be published and wake waiters.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    /// Whether the producer has finished.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Frames published so far.
    pub fn published(&self) -> u64 {
        self.lock().published
    }

    /// Frames overwritten before a consumer drained them.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}
