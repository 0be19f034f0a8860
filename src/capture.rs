//! Capture loop, the resources it owns, and the state it shares.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::error::{CaptureError, Result};
use crate::exchange::ExchangeEngine;
use crate::handoff::FrameHandoff;
use crate::negotiate::CameraHandle;
use crate::pool::BufferPool;
use crate::traits::{Readiness, VideoDevice};

/// State shared between the capture thread and its consumers.
#[derive(Debug, Default)]
pub struct CaptureState {
    stop: Arc<AtomicBool>,
    handoff: FrameHandoff,
}

impl CaptureState {
    /// Fresh state: running, mailbox empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the capture loop to stop at its next cycle boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Whether a stop was requested.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Cloneable handle that can only request a stop.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop))
    }

    /// The raw stop flag. Storing `true` requests a stop.
    ///
    /// Suitable for `signal_hook::flag::register`.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// The frame mailbox.
    pub const fn handoff(&self) -> &FrameHandoff {
        &self.handoff
    }
}

/// Requests a stop from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Ask the capture loop to stop. Never blocks.
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Device, pool and exchange engine of one running session.
///
/// Dropping the context tears it down: stream-off if streaming, unmap every
/// buffer, close the device. Teardown runs at most once however it is
/// reached.
pub struct CaptureContext<D: VideoDevice> {
    camera: Option<CameraHandle<D>>,
    pool: BufferPool<D::Mapping>,
    engine: ExchangeEngine,
    streaming: bool,
}

impl<D: VideoDevice> CaptureContext<D> {
    /// Take ownership of a negotiated camera and its mapped pool.
    pub fn new(camera: CameraHandle<D>, pool: BufferPool<D::Mapping>) -> Self {
        Self {
            engine: ExchangeEngine::new(pool.len()),
            camera: Some(camera),
            pool,
            streaming: false,
        }
    }

    /// Hand every buffer to the kernel.
    pub fn enqueue_all(&mut self) -> Result<()> {
        let camera = self.camera.as_mut().ok_or(CaptureError::DeviceClosed)?;
        self.engine.enqueue_all(camera)
    }

    /// Start streaming.
    pub fn stream_on(&mut self) -> Result<()> {
        let camera = self.camera.as_mut().ok_or(CaptureError::DeviceClosed)?;
        let mode = camera.mode();
        camera.device_mut().stream_on(mode)?;
        self.streaming = true;
        info!(buffers = self.pool.len(), "streaming started");
        Ok(())
    }

    /// Bounded wait for a completed buffer.
    pub fn wait(&self, timeout: Duration) -> Result<Readiness> {
        let camera = self.camera.as_ref().ok_or(CaptureError::DeviceClosed)?;
        camera.device().wait_readable(timeout)
    }

    /// One dequeue, publish, requeue cycle.
    ///
    /// Returns `false` without touching the mailbox when no frame was ready.
    pub fn cycle(&mut self, handoff: &FrameHandoff) -> Result<bool> {
        let camera = self.camera.as_mut().ok_or(CaptureError::DeviceClosed)?;
        let Some(buffer) = self.engine.dequeue(camera)? else {
            return Ok(false);
        };

        if let Some(planes) = self.engine.ready_planes(buffer.index, &self.pool) {
            handoff.publish(&buffer, planes);
        }
        self.engine.requeue(camera, buffer.index)?;
        Ok(true)
    }

    /// Stream-off, unmap, close. Later calls do nothing.
    pub fn teardown(&mut self) {
        if self.streaming {
            if let Some(camera) = self.camera.as_mut() {
                let mode = camera.mode();
                if let Err(err) = camera.device_mut().stream_off(mode) {
                    warn!(error = %err, "stream-off failed during teardown");
                }
            }
            self.streaming = false;
            debug!("streaming stopped");
        }
        self.engine.reset();
        self.pool.release();
        if let Some(camera) = self.camera.take() {
            drop(camera);
            info!("device closed");
        }
    }

    /// Whether the stream is on.
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// The exchange engine.
    pub const fn engine(&self) -> &ExchangeEngine {
        &self.engine
    }

    /// The buffer pool.
    pub const fn pool(&self) -> &BufferPool<D::Mapping> {
        &self.pool
    }
}

impl<D: VideoDevice> Drop for CaptureContext<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[derive(Debug, Default)]
struct LoopStats {
    frames: u64,
    not_ready: u64,
    idle: u64,
    interrupted: u64,
}

/// The body of the capture thread.
pub struct CaptureLoop<D: VideoDevice> {
    context: CaptureContext<D>,
    state: Arc<CaptureState>,
    poll_timeout: Duration,
}

impl<D: VideoDevice> CaptureLoop<D> {
    /// Loop over a started context.
    pub const fn new(
        context: CaptureContext<D>,
        state: Arc<CaptureState>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            context,
            state,
            poll_timeout,
        }
    }

    /// Run until a stop is requested or a hard error occurs, then tear down.
    ///
    /// The stop flag is checked only between complete cycles, so no buffer
    /// is left dequeued when the loop exits.
    pub fn run(mut self) -> Result<()> {
        debug!(timeout = ?self.poll_timeout, "capture loop started");
        let mut stats = LoopStats::default();

        let result = self.drive(&mut stats);
        if let Err(err) = &result {
            error!(error = %err, "capture loop aborted");
        }

        self.context.teardown();
        self.state.handoff().close();
        info!(
            frames = stats.frames,
            not_ready = stats.not_ready,
            idle = stats.idle,
            interrupted = stats.interrupted,
            dropped = self.state.handoff().dropped(),
            "capture loop finished"
        );
        result
    }

    fn drive(&mut self, stats: &mut LoopStats) -> Result<()> {
        while !self.state.stop_requested() {
            match self.context.wait(self.poll_timeout)? {
                Readiness::Readable => {
                    if self.context.cycle(self.state.handoff())? {
                        stats.frames += 1;
                    } else {
                        stats.not_ready += 1;
                    }
                }
                Readiness::TimedOut => stats.idle += 1,
                Readiness::Interrupted => {
                    stats.interrupted += 1;
                    trace!("readiness wait interrupted, retrying");
                }
            }
        }
        debug!("stop requested");
        Ok(())
    }
}
