//! Mock device implementation for testing without hardware.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::error::{CaptureError, Op, Result};
use crate::traits::{
    CaptureMode, DequeuedBuffer, DeviceCapabilities, FieldOrder, Format, FourCC, PlaneFormat,
    PlaneGeometry, PlaneMapping, Readiness, VideoDevice,
};

/// Kernel-facing event recorded by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEvent {
    /// `VIDIOC_REQBUFS` granted this many buffers.
    RequestBuffers(u32),
    /// A plane was mapped.
    Map { index: u32, plane: u32 },
    /// A plane was unmapped.
    Unmap { index: u32, plane: u32 },
    /// A buffer was enqueued.
    Enqueue(u32),
    /// A buffer was dequeued.
    Dequeue(u32),
    /// Streaming started.
    StreamOn,
    /// Streaming stopped.
    StreamOff,
    /// The device was closed.
    Close,
}

/// Shared event log, readable after the mock has moved to another thread.
#[derive(Debug, Clone, Default)]
pub struct MockLog(Arc<Mutex<Vec<MockEvent>>>);

impl MockLog {
    fn push(&self, event: MockEvent) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Snapshot of every recorded event.
    pub fn events(&self) -> Vec<MockEvent> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of events matching `pred`.
    pub fn count<F: Fn(&MockEvent) -> bool>(&self, pred: F) -> usize {
        self.events().iter().filter(|event| pred(event)).count()
    }

    /// Planes mapped and not yet unmapped.
    pub fn live_mappings(&self) -> usize {
        let events = self.events();
        let maps = events
            .iter()
            .filter(|event| matches!(event, MockEvent::Map { .. }))
            .count();
        let unmaps = events
            .iter()
            .filter(|event| matches!(event, MockEvent::Unmap { .. }))
            .count();
        maps - unmaps
    }
}

/// Scripted outcome of the next dequeue.
#[derive(Debug, Clone, Copy)]
pub enum DequeueStep {
    /// Complete a frame. `index: None` takes the oldest queued buffer.
    Frame { index: Option<u32>, bytes_used: u32 },
    /// Nothing ready (EAGAIN).
    NotReady,
    /// Report a completed `index` whether or not it was queued.
    Forged { index: u32 },
    /// Hard failure with this errno.
    Fail(i32),
}

/// Scripted outcome of the next readiness wait.
#[derive(Debug, Clone, Copy)]
pub enum WaitStep {
    /// Report readable.
    Readable,
    /// Report a timeout.
    TimedOut,
    /// Report a signal interruption.
    Interrupted,
    /// Hard failure with this errno.
    Fail(i32),
}

/// Mock plane mapping backed by heap memory.
#[derive(Debug)]
pub struct MockMapping {
    data: Vec<u8>,
    index: u32,
    plane: u32,
    log: MockLog,
}

impl PlaneMapping for MockMapping {
    fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

impl Drop for MockMapping {
    fn drop(&mut self) {
        self.log.push(MockEvent::Unmap {
            index: self.index,
            plane: self.plane,
        });
    }
}

/// Content written into freshly mapped planes.
#[derive(Debug, Clone, Copy, Default)]
pub enum TestPattern {
    /// Every byte holds the buffer index.
    #[default]
    Index,
    /// SMPTE color bars pattern (YUYV).
    ColorBars,
    /// Horizontal gradient from dark to light (YUYV).
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

type DequeueHook = Box<dyn FnMut(u32) + Send>;

/// Mock device for testing without hardware.
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    format: Format,
    max_size: Option<(u32, u32)>,
    reject_format: bool,
    kernel_planes: usize,
    plane_len: u32,
    grant: Option<u32>,
    fail_map_at: Option<(u32, u32)>,
    fail_enqueue_at: Option<u32>,
    fail_stream_on: bool,
    auto_frames: bool,
    granted: u32,
    streaming: bool,
    sequence: u32,
    queued: VecDeque<u32>,
    dequeues: VecDeque<DequeueStep>,
    waits: Mutex<VecDeque<WaitStep>>,
    on_dequeue: Option<DequeueHook>,
    pattern: TestPattern,
    log: MockLog,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a single-plane 640x480 YUYV mock with 4096-byte buffers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                single_plane: true,
                multi_plane: false,
                can_stream: true,
            },
            format: Format::new(640, 480, FourCC::YUYV),
            max_size: None,
            reject_format: false,
            kernel_planes: 1,
            plane_len: 4096,
            grant: None,
            fail_map_at: None,
            fail_enqueue_at: None,
            fail_stream_on: false,
            auto_frames: false,
            granted: 0,
            streaming: false,
            sequence: 0,
            queued: VecDeque::new(),
            dequeues: VecDeque::new(),
            waits: Mutex::new(VecDeque::new()),
            on_dequeue: None,
            pattern: TestPattern::Index,
            log: MockLog::default(),
        }
    }

    /// Report multi-plane capture only, with `planes` planes per buffer.
    #[must_use]
    pub const fn multi_plane(mut self, planes: usize) -> Self {
        self.capabilities.single_plane = false;
        self.capabilities.multi_plane = true;
        self.kernel_planes = planes;
        self
    }

    /// Report no capture capability at all.
    #[must_use]
    pub const fn without_capture(mut self) -> Self {
        self.capabilities.single_plane = false;
        self.capabilities.multi_plane = false;
        self
    }

    /// Clamp accepted resolutions to at most `width` x `height`.
    #[must_use]
    pub const fn with_max_size(mut self, width: u32, height: u32) -> Self {
        self.max_size = Some((width, height));
        self
    }

    /// Reject every `S_FMT` with `EINVAL`.
    #[must_use]
    pub const fn rejecting_format(mut self) -> Self {
        self.reject_format = true;
        self
    }

    /// Size of every plane the mock hands out.
    #[must_use]
    pub const fn with_plane_len(mut self, len: u32) -> Self {
        self.plane_len = len;
        self
    }

    /// Grant this many buffers regardless of the request.
    #[must_use]
    pub const fn granting(mut self, count: u32) -> Self {
        self.grant = Some(count);
        self
    }

    /// Fail mapping plane `plane` of buffer `index`.
    #[must_use]
    pub const fn failing_map_at(mut self, index: u32, plane: u32) -> Self {
        self.fail_map_at = Some((index, plane));
        self
    }

    /// Fail enqueuing buffer `index`.
    #[must_use]
    pub const fn failing_enqueue_at(mut self, index: u32) -> Self {
        self.fail_enqueue_at = Some(index);
        self
    }

    /// Fail `VIDIOC_STREAMON`.
    #[must_use]
    pub const fn failing_stream_on(mut self) -> Self {
        self.fail_stream_on = true;
        self
    }

    /// Complete the oldest queued buffer whenever nothing is scripted.
    #[must_use]
    pub const fn with_auto_frames(mut self) -> Self {
        self.auto_frames = true;
        self
    }

    /// Script the next dequeue outcomes.
    #[must_use]
    pub fn with_dequeues<I: IntoIterator<Item = DequeueStep>>(mut self, steps: I) -> Self {
        self.dequeues.extend(steps);
        self
    }

    /// Script the next readiness wait outcomes.
    #[must_use]
    pub fn with_waits<I: IntoIterator<Item = WaitStep>>(mut self, steps: I) -> Self {
        self.waits
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(steps);
        self
    }

    /// Run `hook` with the index of every successfully dequeued buffer.
    #[must_use]
    pub fn on_dequeue<F: FnMut(u32) + Send + 'static>(mut self, hook: F) -> Self {
        self.on_dequeue = Some(Box::new(hook));
        self
    }

    /// Fill mapped planes with `pattern`.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Handle to the event log.
    pub fn log(&self) -> MockLog {
        self.log.clone()
    }

    /// Indices currently owned by the kernel, oldest first.
    pub fn queued(&self) -> Vec<u32> {
        self.queued.iter().copied().collect()
    }

    fn frame_ready(&self) -> bool {
        !self.dequeues.is_empty()
            || (self.auto_frames && self.streaming && !self.queued.is_empty())
    }
}

fn os_error(op: Op, errno: i32) -> CaptureError {
    CaptureError::io(op, io::Error::from_raw_os_error(errno))
}

impl VideoDevice for MockDevice {
    type Mapping = MockMapping;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn format(&self, _mode: CaptureMode) -> Result<Format> {
        Ok(self.format.clone())
    }

    fn set_format(&mut self, mode: CaptureMode, format: &Format) -> Result<Format> {
        if self.reject_format {
            return Err(CaptureError::FormatRejected {
                source: io::Error::from_raw_os_error(libc::EINVAL),
            });
        }

        let (width, height) = self.max_size.map_or((format.width, format.height), |(w, h)| {
            (format.width.min(w), format.height.min(h))
        });
        let planes = match mode {
            CaptureMode::SinglePlane => 1,
            CaptureMode::MultiPlane => self.kernel_planes,
        };

        self.format = Format {
            width,
            height,
            fourcc: format.fourcc,
            field: if format.field == FieldOrder::Any {
                FieldOrder::None
            } else {
                format.field
            },
            planes: vec![
                PlaneFormat {
                    stride: width * 2,
                    size: self.plane_len,
                };
                planes
            ],
        };
        Ok(self.format.clone())
    }

    fn request_buffers(&mut self, _mode: CaptureMode, count: u32) -> Result<u32> {
        self.granted = self.grant.map_or(count, |grant| grant.min(count));
        self.log.push(MockEvent::RequestBuffers(self.granted));
        Ok(self.granted)
    }

    fn query_buffer(
        &mut self,
        _mode: CaptureMode,
        index: u32,
        planes: usize,
    ) -> Result<Vec<PlaneGeometry>> {
        if index >= self.granted {
            return Err(os_error(Op::QueryBuffer, libc::EINVAL));
        }
        if planes != self.kernel_planes {
            return Err(CaptureError::PlaneMismatch {
                expected: planes,
                reported: self.kernel_planes,
            });
        }
        Ok((0u32..)
            .take(planes)
            .map(|plane| PlaneGeometry {
                index,
                plane,
                length: self.plane_len,
                offset: (index * 8 + plane) * self.plane_len,
            })
            .collect())
    }

    fn map_plane(&self, geometry: &PlaneGeometry) -> Result<MockMapping> {
        if self.fail_map_at == Some((geometry.index, geometry.plane)) {
            return Err(CaptureError::BufferMap {
                index: geometry.index,
                plane: geometry.plane,
                source: io::Error::from_raw_os_error(libc::ENOMEM),
            });
        }
        self.log.push(MockEvent::Map {
            index: geometry.index,
            plane: geometry.plane,
        });
        let mut data = vec![0u8; geometry.length as usize];
        fill_pattern(
            &mut data,
            self.format.width,
            self.format.height,
            geometry.index,
            self.pattern,
        );
        Ok(MockMapping {
            data,
            index: geometry.index,
            plane: geometry.plane,
            log: self.log.clone(),
        })
    }

    fn enqueue(&mut self, _mode: CaptureMode, index: u32, _planes: usize) -> Result<()> {
        if self.fail_enqueue_at == Some(index) {
            return Err(os_error(Op::Enqueue, libc::EIO));
        }
        if index >= self.granted || self.queued.contains(&index) {
            return Err(os_error(Op::Enqueue, libc::EINVAL));
        }
        self.queued.push_back(index);
        self.log.push(MockEvent::Enqueue(index));
        Ok(())
    }

    fn dequeue(&mut self, _mode: CaptureMode, planes: usize) -> Result<Option<DequeuedBuffer>> {
        let step = self.dequeues.pop_front().or_else(|| {
            self.auto_frames.then_some(DequeueStep::Frame {
                index: None,
                bytes_used: self.plane_len,
            })
        });

        let (index, bytes_used) = match step {
            None | Some(DequeueStep::NotReady) => return Ok(None),
            Some(DequeueStep::Fail(errno)) => return Err(os_error(Op::Dequeue, errno)),
            Some(DequeueStep::Frame { index: None, bytes_used }) => {
                match self.queued.pop_front() {
                    Some(index) => (index, bytes_used),
                    None => return Ok(None),
                }
            }
            Some(DequeueStep::Frame {
                index: Some(index),
                bytes_used,
            }) => {
                let Some(pos) = self.queued.iter().position(|&queued| queued == index) else {
                    return Err(os_error(Op::Dequeue, libc::EINVAL));
                };
                self.queued.remove(pos);
                (index, bytes_used)
            }
            Some(DequeueStep::Forged { index }) => (index, self.plane_len),
        };

        self.log.push(MockEvent::Dequeue(index));
        if let Some(hook) = self.on_dequeue.as_mut() {
            hook(index);
        }

        let sequence = self.sequence;
        self.sequence += 1;

        Ok(Some(DequeuedBuffer {
            index,
            plane_bytes: vec![bytes_used; planes],
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33),
        }))
    }

    fn stream_on(&mut self, _mode: CaptureMode) -> Result<()> {
        if self.fail_stream_on {
            return Err(os_error(Op::StreamOn, libc::EIO));
        }
        self.streaming = true;
        self.log.push(MockEvent::StreamOn);
        Ok(())
    }

    fn stream_off(&mut self, _mode: CaptureMode) -> Result<()> {
        self.streaming = false;
        self.queued.clear();
        self.log.push(MockEvent::StreamOff);
        Ok(())
    }

    fn wait_readable(&self, timeout: Duration) -> Result<Readiness> {
        let step = self
            .waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(step) = step {
            return match step {
                WaitStep::Readable => Ok(Readiness::Readable),
                WaitStep::TimedOut => Ok(Readiness::TimedOut),
                WaitStep::Interrupted => Ok(Readiness::Interrupted),
                WaitStep::Fail(errno) => Err(os_error(Op::Poll, errno)),
            };
        }
        if self.frame_ready() {
            return Ok(Readiness::Readable);
        }
        thread::sleep(timeout);
        Ok(Readiness::TimedOut)
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.log.push(MockEvent::Close);
    }
}

/// Fill `data` with `pattern` for a `width` x `height` YUYV frame.
fn fill_pattern(data: &mut [u8], width: u32, height: u32, index: u32, pattern: TestPattern) {
    match pattern {
        TestPattern::Index => {
            #[allow(clippy::cast_possible_truncation)]
            data.fill(index as u8);
        }
        TestPattern::ColorBars => generate_color_bars(data, width, height),
        TestPattern::Gradient => generate_gradient(data, width, height),
        TestPattern::Solid(y, u, v) => generate_solid(data, y, u, v),
    }
}

/// Write one YUYV pixel pair at `offset` if it fits.
fn put_pair(data: &mut [u8], offset: usize, y: u8, u: u8, v: u8) {
    if let Some(pair) = data.get_mut(offset..offset + 4) {
        pair.copy_from_slice(&[y, u, y, v]);
    }
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    const BARS: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = BARS.get(bar).copied().unwrap_or((16, 128, 128));
            put_pair(data, ((y * width + x) * 2) as usize, y_val, u_val, v_val);
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            put_pair(data, ((y * width + x) * 2) as usize, y_val, 128, 128);
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for pair in data.chunks_exact_mut(4) {
        pair.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().single_plane);
        assert!(device.capabilities().can_stream);
    }

    #[test]
    fn test_mock_clamps_format() {
        let mut device = MockDevice::new().with_max_size(320, 240);
        let accepted = device
            .set_format(CaptureMode::SinglePlane, &Format::new(1280, 720, FourCC::YUYV))
            .expect("set_format should succeed");
        assert_eq!((accepted.width, accepted.height), (320, 240));
    }

    #[test]
    fn test_mock_rejects_double_enqueue() {
        let mut device = MockDevice::new();
        device
            .request_buffers(CaptureMode::SinglePlane, 2)
            .expect("request_buffers should succeed");
        device
            .enqueue(CaptureMode::SinglePlane, 0, 1)
            .expect("first enqueue should succeed");
        let err = device
            .enqueue(CaptureMode::SinglePlane, 0, 1)
            .expect_err("second enqueue should fail");
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }

    #[test]
    fn test_color_bars_pattern() {
        let mut data = vec![0u8; 640 * 480 * 2];
        generate_color_bars(&mut data, 640, 480);

        // First bar should be white (Y=235), last bar black (Y=16)
        assert_eq!(data.first().copied(), Some(235));
        assert_eq!(data.get(638 * 2).copied(), Some(16));
    }

    #[test]
    fn test_gradient_pattern() {
        let mut data = vec![0u8; 640 * 480 * 2];
        generate_gradient(&mut data, 640, 480);

        assert!(data.first().copied().unwrap_or(255) < 10);
        let last_row_start = 479 * 640 * 2;
        let last_pixel_y = data.get(last_row_start + 638 * 2).copied().unwrap_or(0);
        assert!(last_pixel_y > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let mut data = vec![0u8; 64 * 64 * 2];
        generate_solid(&mut data, 128, 64, 192);
        assert_eq!(data.get(..4), Some(&[128u8, 64, 128, 192][..]));
    }
}
