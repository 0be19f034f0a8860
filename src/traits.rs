//! Core traits and types for the V4L2 capture engine.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::error::Result;

/// Pixel format representation (e.g., YUYV, MJPG, NV12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// NV12 pixel format, two planes in multi-planar drivers (`NM12`).
    pub const NM12: Self = Self::new(b"NM12");

    /// The code as the kernel stores it.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Decode a kernel pixel format code.
    #[must_use]
    pub const fn from_u32(code: u32) -> Self {
        Self(code.to_le_bytes())
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in &self.0 {
            let ch = if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            };
            write!(f, "{ch}")?;
        }
        Ok(())
    }
}

/// Error returned when a string is not a valid `FourCC`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid FourCC {0:?}: expected 1 to 4 ASCII characters")]
pub struct ParseFourCcError(String);

impl FromStr for FourCC {
    type Err = ParseFourCcError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 || !s.is_ascii() {
            return Err(ParseFourCcError(s.to_owned()));
        }
        // Short codes such as "Y8" are space padded by the kernel.
        let mut code = [b' '; 4];
        for (dst, src) in code.iter_mut().zip(bytes) {
            *dst = *src;
        }
        Ok(Self(code))
    }
}

/// Field ordering of interlaced content (`enum v4l2_field`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldOrder {
    /// Driver chooses.
    #[default]
    Any,
    /// Progressive, no fields.
    None,
    /// Top field only.
    Top,
    /// Bottom field only.
    Bottom,
    /// Both fields interlaced.
    Interlaced,
    /// Both fields sequential, top first.
    SequentialTopBottom,
    /// Both fields sequential, bottom first.
    SequentialBottomTop,
    /// Fields alternate between buffers.
    Alternate,
    /// Interlaced, top field first.
    InterlacedTopBottom,
    /// Interlaced, bottom field first.
    InterlacedBottomTop,
}

impl FieldOrder {
    /// Kernel value of this field order.
    #[must_use]
    pub const fn to_raw(self) -> u32 {
        match self {
            Self::Any => 0,
            Self::None => 1,
            Self::Top => 2,
            Self::Bottom => 3,
            Self::Interlaced => 4,
            Self::SequentialTopBottom => 5,
            Self::SequentialBottomTop => 6,
            Self::Alternate => 7,
            Self::InterlacedTopBottom => 8,
            Self::InterlacedBottomTop => 9,
        }
    }

    /// Decode a kernel field value. Unknown values map to `Any`.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::None,
            2 => Self::Top,
            3 => Self::Bottom,
            4 => Self::Interlaced,
            5 => Self::SequentialTopBottom,
            6 => Self::SequentialBottomTop,
            7 => Self::Alternate,
            8 => Self::InterlacedTopBottom,
            9 => Self::InterlacedBottomTop,
            _ => Self::Any,
        }
    }
}

/// Buffer layout the device is driven in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// `V4L2_BUF_TYPE_VIDEO_CAPTURE`: one plane per buffer.
    #[default]
    SinglePlane,
    /// `V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE`: one or more planes per buffer.
    MultiPlane,
}

impl CaptureMode {
    /// Pick the mode from device capabilities, preferring single-plane.
    pub const fn select(caps: &DeviceCapabilities) -> Option<Self> {
        if caps.single_plane {
            Some(Self::SinglePlane)
        } else if caps.multi_plane {
            Some(Self::MultiPlane)
        } else {
            None
        }
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Device reports `V4L2_CAP_VIDEO_CAPTURE`.
    pub single_plane: bool,
    /// Device reports `V4L2_CAP_VIDEO_CAPTURE_MPLANE`.
    pub multi_plane: bool,
    /// Device supports streaming I/O.
    pub can_stream: bool,
}

/// Requested or negotiated capture parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureParams {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Field ordering.
    pub field: FieldOrder,
    /// Buffer layout.
    pub mode: CaptureMode,
    /// Number of buffers to request from the kernel.
    pub buffer_count: u32,
    /// Number of planes per buffer.
    pub plane_count: u32,
}

/// Per-plane layout of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneFormat {
    /// Bytes per line.
    pub stride: u32,
    /// Maximum bytes the plane can hold.
    pub size: u32,
}

/// Video format as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Field ordering.
    pub field: FieldOrder,
    /// Plane layouts. Single-plane formats have exactly one entry.
    pub planes: Vec<PlaneFormat>,
}

impl Format {
    /// Create a single-plane format request; the driver fills in strides and sizes.
    #[must_use]
    pub fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Self {
            width,
            height,
            fourcc,
            field: FieldOrder::Any,
            planes: vec![PlaneFormat::default()],
        }
    }

    /// Total size in bytes of one frame across all planes.
    pub fn frame_size(&self) -> u64 {
        self.planes.iter().map(|plane| u64::from(plane.size)).sum()
    }
}

/// Kernel-reported location of one buffer plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    /// Pool index of the buffer.
    pub index: u32,
    /// Plane within the buffer.
    pub plane: u32,
    /// Plane length in bytes.
    pub length: u32,
    /// Offset to pass to `mmap`.
    pub offset: u32,
}

/// A buffer reclaimed from the kernel by a successful dequeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Pool index of the buffer.
    pub index: u32,
    /// Bytes used per plane.
    pub plane_bytes: Vec<u32>,
    /// Driver frame sequence number.
    pub sequence: u32,
    /// Driver capture timestamp.
    pub timestamp: Duration,
}

impl DequeuedBuffer {
    /// Bytes used across all planes.
    pub fn bytes_used(&self) -> u64 {
        self.plane_bytes.iter().map(|&n| u64::from(n)).sum()
    }
}

/// Outcome of a bounded readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A completed buffer can be dequeued.
    Readable,
    /// The timeout elapsed.
    TimedOut,
    /// The wait was interrupted by a signal.
    Interrupted,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Pool index of the buffer the frame came from.
    pub index: u32,
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Bytes used across all planes.
    pub bytes_used: u64,
    /// Bytes used per plane, in plane order.
    pub plane_bytes: Vec<u32>,
}

/// A captured video frame.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// Used bytes of every plane, concatenated in plane order.
    pub data: Vec<u8>,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Bytes of plane `plane`, if present.
    pub fn plane(&self, plane: usize) -> Option<&[u8]> {
        let start: usize = self
            .metadata
            .plane_bytes
            .iter()
            .take(plane)
            .map(|&n| n as usize)
            .sum();
        let len = *self.metadata.plane_bytes.get(plane)? as usize;
        self.data.get(start..start + len)
    }

    /// Get RGB values for a pixel at the specified coordinates.
    ///
    /// # Arguments
    ///
    /// * `x` - X coordinate (0-based)
    /// * `y` - Y coordinate (0-based)
    /// * `width` - Frame width in pixels
    ///
    /// # Returns
    ///
    /// Returns `Some((r, g, b))` if the coordinates are valid, `None` otherwise.
    ///
    /// # Notes
    ///
    /// This method assumes YUYV format (2 bytes per pixel). For odd x coordinates,
    /// it uses the Y value from the next pixel pair with the shared U/V values.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32, width: u32) -> Option<(u8, u8, u8)> {
        // YUYV format: [Y0 U Y1 V] repeats
        let pair_x = u64::from(x & !1);
        let offset = u64::from(y)
            .checked_mul(u64::from(width))?
            .checked_add(pair_x)?
            .checked_mul(2)?;
        let offset = usize::try_from(offset).ok()?;

        if offset.checked_add(3)? >= self.data.len() {
            return None;
        }

        let y_val = if x % 2 == 0 {
            *self.data.get(offset)?
        } else {
            *self.data.get(offset + 2)?
        };
        let u = *self.data.get(offset + 1)?;
        let v = *self.data.get(offset + 3)?;

        Some(yuv_to_rgb(y_val, u, v))
    }
}

/// Convert YUV values to RGB using the ITU-R BT.601 formula.
#[must_use]
#[allow(clippy::many_single_char_names)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |val: f32| -> u8 { val.clamp(0.0, 255.0) as u8 };

    (clamp(r), clamp(g), clamp(b))
}

/// A plane of kernel memory mapped into the process.
///
/// Dropping the mapping unmaps it with the length it was mapped with.
pub trait PlaneMapping: Send {
    /// View of the mapped bytes.
    ///
    /// Only meaningful while the owning buffer is dequeued; the hardware may
    /// be writing to it otherwise.
    fn bytes(&self) -> &[u8];

    /// Mapped length in bytes.
    fn len(&self) -> usize;

    /// Whether the mapping is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Device-protocol operations consumed from the driver.
///
/// Every call is synchronous. `dequeue` separates the transient "no frame
/// yet" outcome (`Ok(None)`) from hard failures.
pub trait VideoDevice: Send {
    /// Mapping type produced by `map_plane`.
    type Mapping: PlaneMapping;

    /// Capabilities queried when the device was opened.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Read the current format.
    fn format(&self, mode: CaptureMode) -> Result<Format>;

    /// Submit a format. Returns the format the driver actually accepted.
    fn set_format(&mut self, mode: CaptureMode, format: &Format) -> Result<Format>;

    /// Ask the kernel for `count` mmap buffers. Returns the confirmed count.
    fn request_buffers(&mut self, mode: CaptureMode, count: u32) -> Result<u32>;

    /// Query the per-plane geometry of buffer `index`.
    fn query_buffer(&mut self, mode: CaptureMode, index: u32, planes: usize)
        -> Result<Vec<PlaneGeometry>>;

    /// Map one plane shared read/write at its kernel offset.
    fn map_plane(&self, geometry: &PlaneGeometry) -> Result<Self::Mapping>;

    /// Hand buffer `index` to the kernel for filling.
    fn enqueue(&mut self, mode: CaptureMode, index: u32, planes: usize) -> Result<()>;

    /// Reclaim a filled buffer. `Ok(None)` means no completed frame exists yet.
    fn dequeue(&mut self, mode: CaptureMode, planes: usize) -> Result<Option<DequeuedBuffer>>;

    /// Start streaming.
    fn stream_on(&mut self, mode: CaptureMode) -> Result<()>;

    /// Stop streaming. The kernel returns every queued buffer to userspace.
    fn stream_off(&mut self, mode: CaptureMode) -> Result<()>;

    /// Wait at most `timeout` for a completed buffer.
    fn wait_readable(&self, timeout: Duration) -> Result<Readiness>;
}
