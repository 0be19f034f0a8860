//! Capture configuration and defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::traits::{CaptureMode, CaptureParams, FieldOrder, FourCC};

/// Device node used when none is given.
pub const DEFAULT_DEVICE: &str = "/dev/video0";
/// Default frame width.
pub const DEFAULT_WIDTH: u32 = 640;
/// Default frame height.
pub const DEFAULT_HEIGHT: u32 = 480;
/// Default pixel format.
pub const DEFAULT_FOURCC: FourCC = FourCC::YUYV;
/// Default number of buffers requested from the kernel.
pub const DEFAULT_BUFFER_COUNT: u32 = 10;
/// Default number of planes per buffer.
pub const DEFAULT_PLANE_COUNT: u32 = 1;
/// Default bound on a single readiness wait.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(2);

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fourcc: DEFAULT_FOURCC,
            field: FieldOrder::Any,
            mode: CaptureMode::SinglePlane,
            buffer_count: DEFAULT_BUFFER_COUNT,
            plane_count: DEFAULT_PLANE_COUNT,
        }
    }
}

impl CaptureParams {
    /// Replace zero-valued fields with their defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.width == 0 {
            self.width = DEFAULT_WIDTH;
        }
        if self.height == 0 {
            self.height = DEFAULT_HEIGHT;
        }
        if self.fourcc.to_u32() == 0 {
            self.fourcc = DEFAULT_FOURCC;
        }
        if self.buffer_count == 0 {
            self.buffer_count = DEFAULT_BUFFER_COUNT;
        }
        if self.plane_count == 0 {
            self.plane_count = DEFAULT_PLANE_COUNT;
        }
        self
    }
}

/// Everything needed to start a capture session.
///
/// # Example
///
/// ```
/// use framegrab::{CaptureConfig, FourCC};
///
/// let config = CaptureConfig::default()
///     .with_device("/dev/video2")
///     .with_resolution(1280, 720)
///     .with_format(FourCC::MJPG)
///     .with_buffers(4);
/// assert_eq!(config.params.buffer_count, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Device node path.
    pub device: PathBuf,
    /// Requested capture parameters.
    pub params: CaptureParams,
    /// Upper bound on one readiness wait; also bounds shutdown latency.
    pub poll_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            params: CaptureParams::default(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl CaptureConfig {
    /// Set the device node.
    #[must_use]
    pub fn with_device<P: Into<PathBuf>>(mut self, device: P) -> Self {
        self.device = device.into();
        self
    }

    /// Set the requested resolution.
    #[must_use]
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.params.width = width;
        self.params.height = height;
        self
    }

    /// Set the requested pixel format.
    #[must_use]
    pub fn with_format(mut self, fourcc: FourCC) -> Self {
        self.params.fourcc = fourcc;
        self
    }

    /// Set the requested field order.
    #[must_use]
    pub fn with_field(mut self, field: FieldOrder) -> Self {
        self.params.field = field;
        self
    }

    /// Set the number of buffers to request.
    #[must_use]
    pub fn with_buffers(mut self, count: u32) -> Self {
        self.params.buffer_count = count;
        self
    }

    /// Set the number of planes per buffer.
    #[must_use]
    pub fn with_planes(mut self, count: u32) -> Self {
        self.params.plane_count = count;
        self
    }

    /// Set the readiness wait bound.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}
