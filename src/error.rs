//! Error type for capture operations.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Device-protocol operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `VIDIOC_QUERYCAP`
    QueryCapabilities,
    /// `VIDIOC_G_FMT`
    GetFormat,
    /// `VIDIOC_S_FMT`
    SetFormat,
    /// `VIDIOC_REQBUFS`
    RequestBuffers,
    /// `VIDIOC_QUERYBUF`
    QueryBuffer,
    /// `VIDIOC_QBUF`
    Enqueue,
    /// `VIDIOC_DQBUF`
    Dequeue,
    /// `VIDIOC_STREAMON`
    StreamOn,
    /// `VIDIOC_STREAMOFF`
    StreamOff,
    /// `poll(2)` on the device descriptor
    Poll,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::QueryCapabilities => "VIDIOC_QUERYCAP",
            Self::GetFormat => "VIDIOC_G_FMT",
            Self::SetFormat => "VIDIOC_S_FMT",
            Self::RequestBuffers => "VIDIOC_REQBUFS",
            Self::QueryBuffer => "VIDIOC_QUERYBUF",
            Self::Enqueue => "VIDIOC_QBUF",
            Self::Dequeue => "VIDIOC_DQBUF",
            Self::StreamOn => "VIDIOC_STREAMON",
            Self::StreamOff => "VIDIOC_STREAMOFF",
            Self::Poll => "poll",
        };
        f.write_str(name)
    }
}

/// Broad failure category, used to decide how a failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad device path, unsupported capability, or rejected format.
    Configuration,
    /// A device call or readiness wait failed.
    HardIo,
    /// Buffer allocation or mapping failed.
    Resource,
}

/// Error type for capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device node could not be opened.
    #[error("cannot open {}: {source}", path.display())]
    Open {
        /// Device node path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The node exists but is not a V4L2 capture device.
    #[error("{} is not a V4L2 device", path.display())]
    NotCaptureDevice {
        /// Device node path.
        path: PathBuf,
    },

    /// The device supports neither single-plane nor multi-plane capture.
    #[error("device supports neither single-plane nor multi-plane video capture")]
    UnsupportedDevice,

    /// The driver refused the requested format outright.
    #[error("format rejected by driver: {source}")]
    FormatRejected {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The driver granted no buffers.
    #[error("driver granted no buffers (requested {requested})")]
    NoBuffers {
        /// Number of buffers asked for.
        requested: u32,
    },

    /// Mapping a buffer plane into process memory failed.
    #[error("mapping plane {plane} of buffer {index} failed: {source}")]
    BufferMap {
        /// Pool index of the buffer.
        index: u32,
        /// Plane within the buffer.
        plane: u32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The kernel reported a different plane count than was negotiated.
    #[error("driver reports {reported} planes, expected {expected}")]
    PlaneMismatch {
        /// Negotiated plane count.
        expected: usize,
        /// Count reported by the kernel.
        reported: usize,
    },

    /// A buffer index or state did not match the exchange protocol.
    #[error("buffer {index}: {reason}")]
    BufferState {
        /// Pool index of the buffer.
        index: u32,
        /// What was wrong.
        reason: &'static str,
    },

    /// A device-protocol call failed.
    #[error("{op} failed: {source}")]
    Io {
        /// Operation that failed.
        op: Op,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The device was already closed by teardown.
    #[error("device already closed")]
    DeviceClosed,

    /// The capture thread could not be started.
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] io::Error),

    /// The capture thread panicked.
    #[error("capture thread panicked")]
    ThreadPanicked,
}

impl CaptureError {
    /// Wrap an OS error from `op`.
    pub const fn io(op: Op, source: io::Error) -> Self {
        Self::Io { op, source }
    }

    /// Category of this failure.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Open { .. }
            | Self::NotCaptureDevice { .. }
            | Self::UnsupportedDevice
            | Self::FormatRejected { .. } => ErrorClass::Configuration,
            Self::NoBuffers { .. } | Self::BufferMap { .. } | Self::PlaneMismatch { .. } => {
                ErrorClass::Resource
            }
            Self::BufferState { .. }
            | Self::Io { .. }
            | Self::DeviceClosed
            | Self::Spawn(_)
            | Self::ThreadPanicked => ErrorClass::HardIo,
        }
    }

    /// The OS error code behind this failure, if there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Open { source, .. }
            | Self::FormatRejected { source }
            | Self::BufferMap { source, .. }
            | Self::Io { source, .. }
            | Self::Spawn(source) => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;
