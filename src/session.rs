//! Ordered startup and shutdown of a capture session.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::capture::{CaptureContext, CaptureLoop, CaptureState, StopHandle};
use crate::config::CaptureConfig;
use crate::device::V4L2Device;
use crate::error::{CaptureError, Result};
use crate::negotiate::CameraHandle;
use crate::pool::BufferPool;
use crate::traits::{CaptureParams, Format, Frame, VideoDevice};

const THREAD_NAME: &str = "framegrab-capture";

/// A running capture: a background thread streaming into a frame mailbox.
///
/// Dropping the session requests a stop and waits for the thread, which
/// performs the teardown itself.
#[derive(Debug)]
pub struct CaptureSession {
    state: Arc<CaptureState>,
    params: CaptureParams,
    format: Format,
    thread: Option<JoinHandle<Result<()>>>,
}

impl CaptureSession {
    /// Open the configured device node and start capturing.
    pub fn start(config: &CaptureConfig) -> Result<Self> {
        let device = V4L2Device::open(&config.device)?;
        Self::start_with(device, config)
    }

    /// Start capturing from an already opened device.
    ///
    /// Negotiates, allocates, enqueues every buffer, turns the stream on and
    /// spawns the capture thread. If any step fails the completed ones are
    /// undone in reverse order before the error is returned.
    pub fn start_with<D>(device: D, config: &CaptureConfig) -> Result<Self>
    where
        D: VideoDevice + 'static,
    {
        let mut camera = CameraHandle::new(device, config.params.clone());
        camera.query_capabilities()?;
        let format = camera.negotiate_format()?.clone();

        let pool = BufferPool::allocate(&mut camera)?;
        let params = camera.params().clone();
        // From here on dropping the context rolls back.
        let mut context = CaptureContext::new(camera, pool);
        context.enqueue_all().inspect_err(|err| {
            warn!(error = %err, "bulk enqueue failed, rolling back");
        })?;
        context.stream_on().inspect_err(|err| {
            warn!(error = %err, "stream-on failed, rolling back");
        })?;

        let state = Arc::new(CaptureState::new());
        let capture = CaptureLoop::new(context, Arc::clone(&state), config.poll_timeout);
        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_owned())
            .spawn(move || capture.run())
            .map_err(CaptureError::Spawn)?;

        info!(
            width = params.width,
            height = params.height,
            fourcc = %params.fourcc,
            buffers = params.buffer_count,
            "capture session started"
        );
        Ok(Self {
            state,
            params,
            format,
            thread: Some(thread),
        })
    }

    /// Ask the capture thread to stop. Does not block.
    pub fn request_stop(&self) {
        self.state.request_stop();
    }

    /// Handle for stopping the session from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        self.state.stop_handle()
    }

    /// The raw stop flag, for signal handlers. Storing `true` stops.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.state.stop_flag()
    }

    /// Parameters the device accepted.
    pub const fn params(&self) -> &CaptureParams {
        &self.params
    }

    /// Format the device accepted.
    pub const fn format(&self) -> &Format {
        &self.format
    }

    /// Drain the pending frame without waiting.
    pub fn try_frame(&self) -> Option<Frame> {
        self.state.handoff().take()
    }

    /// Index and bytes used of the pending frame, without draining it.
    pub fn peek(&self) -> Option<(u32, u64)> {
        self.state.handoff().peek()
    }

    /// Wait at most `timeout` for a frame.
    pub fn wait_frame(&self, timeout: Duration) -> Option<Frame> {
        self.state.handoff().wait(timeout)
    }

    /// Frames published by the capture thread.
    pub fn published_frames(&self) -> u64 {
        self.state.handoff().published()
    }

    /// Frames overwritten before they were drained.
    pub fn dropped_frames(&self) -> u64 {
        self.state.handoff().dropped()
    }

    /// Whether the capture loop has stopped publishing frames.
    ///
    /// Becomes true after teardown, possibly before the thread has exited.
    pub fn is_closed(&self) -> bool {
        self.state.handoff().is_closed()
    }

    /// Whether the capture thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the capture thread and return how it ended.
    ///
    /// Does not request a stop; call [`request_stop`](Self::request_stop)
    /// first unless the loop is expected to fail on its own.
    pub fn join(mut self) -> Result<()> {
        self.thread
            .take()
            .map_or(Ok(()), |thread| {
                thread.join().map_err(|_| CaptureError::ThreadPanicked)?
            })
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.state.request_stop();
        match thread.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "capture thread ended with error"),
            Err(_) => warn!("capture thread panicked"),
        }
    }
}
