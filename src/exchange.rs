//! Buffer ownership state machine between the process and the kernel.
//!
//! Every buffer starts `Free`. The bulk enqueue at startup hands all of them
//! to the kernel (`Enqueued`). From then on a buffer is either owned by the
//! kernel or dequeued and readable (`Ready`), never both.

use tracing::trace;

use crate::error::{CaptureError, Result};
use crate::negotiate::CameraHandle;
use crate::pool::BufferPool;
use crate::traits::{DequeuedBuffer, PlaneMapping, VideoDevice};

/// Ownership state of one pool buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferState {
    /// Not yet handed to the kernel.
    #[default]
    Free,
    /// Owned by the kernel; the hardware may be writing to it.
    Enqueued,
    /// Dequeued and holding a complete frame; safe to read.
    Ready,
}

/// Tracks the state of every buffer and drives QBUF/DQBUF.
#[derive(Debug, Clone)]
pub struct ExchangeEngine {
    states: Vec<BufferState>,
}

impl ExchangeEngine {
    /// Engine for a pool of `len` buffers, all `Free`.
    pub fn new(len: usize) -> Self {
        Self {
            states: vec![BufferState::Free; len],
        }
    }

    /// Hand every `Free` buffer to the kernel. Stops at the first failure.
    pub fn enqueue_all<D: VideoDevice>(&mut self, camera: &mut CameraHandle<D>) -> Result<()> {
        let mode = camera.mode();
        let planes = camera.planes();
        for (index, state) in (0u32..).zip(self.states.iter_mut()) {
            if *state != BufferState::Free {
                continue;
            }
            camera.device_mut().enqueue(mode, index, planes)?;
            *state = BufferState::Enqueued;
        }
        trace!(buffers = self.states.len(), "all buffers enqueued");
        Ok(())
    }

    /// Reclaim one completed buffer.
    ///
    /// Returns `Ok(None)` when the kernel has no finished frame yet; no state
    /// changes in that case.
    pub fn dequeue<D: VideoDevice>(
        &mut self,
        camera: &mut CameraHandle<D>,
    ) -> Result<Option<DequeuedBuffer>> {
        let mode = camera.mode();
        let planes = camera.planes();
        let Some(buffer) = camera.device_mut().dequeue(mode, planes)? else {
            trace!("no frame ready");
            return Ok(None);
        };

        let state = self
            .states
            .get_mut(buffer.index as usize)
            .ok_or(CaptureError::BufferState {
                index: buffer.index,
                reason: "dequeued index outside the pool",
            })?;
        if *state != BufferState::Enqueued {
            return Err(CaptureError::BufferState {
                index: buffer.index,
                reason: "dequeued a buffer the kernel did not own",
            });
        }
        *state = BufferState::Ready;

        trace!(
            index = buffer.index,
            sequence = buffer.sequence,
            bytes = buffer.bytes_used(),
            "buffer dequeued"
        );
        Ok(Some(buffer))
    }

    /// Hand a `Ready` buffer back to the kernel.
    pub fn requeue<D: VideoDevice>(
        &mut self,
        camera: &mut CameraHandle<D>,
        index: u32,
    ) -> Result<()> {
        if self.state(index) != Some(BufferState::Ready) {
            return Err(CaptureError::BufferState {
                index,
                reason: "requeue of a buffer that is not ready",
            });
        }

        let mode = camera.mode();
        let planes = camera.planes();
        camera.device_mut().enqueue(mode, index, planes)?;
        if let Some(state) = self.states.get_mut(index as usize) {
            *state = BufferState::Enqueued;
        }
        Ok(())
    }

    /// Mapped planes of buffer `index`, only while it is `Ready`.
    pub fn ready_planes<'a, M: PlaneMapping>(
        &self,
        index: u32,
        pool: &'a BufferPool<M>,
    ) -> Option<&'a [M]> {
        if self.state(index) != Some(BufferState::Ready) {
            return None;
        }
        pool.get(index).map(|buffer| buffer.planes())
    }

    /// Mark every buffer `Free`, as after stream-off.
    pub fn reset(&mut self) {
        self.states.fill(BufferState::Free);
    }

    /// State of buffer `index`.
    pub fn state(&self, index: u32) -> Option<BufferState> {
        self.states.get(index as usize).copied()
    }

    /// States of all buffers in index order.
    pub fn states(&self) -> &[BufferState] {
        &self.states
    }

    /// Number of buffers currently owned by the kernel.
    pub fn enqueued(&self) -> usize {
        self.states
            .iter()
            .filter(|&&state| state == BufferState::Enqueued)
            .count()
    }
}
