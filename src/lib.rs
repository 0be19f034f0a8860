//! framegrab: low-latency V4L2 frame capture
//!
//! This library streams frames from a V4L2 capture device through a small
//! pool of kernel buffers mapped into the process. A dedicated thread drives
//! the enqueue/dequeue exchange with the kernel and publishes the newest
//! frame into a single-slot mailbox that a consumer drains.
//!
//! Device access goes through the [`VideoDevice`] trait, so the whole engine
//! runs against mock devices in tests as well as real hardware.
//!
//! ```no_run
//! use std::time::Duration;
//! use framegrab::{CaptureConfig, CaptureSession};
//!
//! # fn main() -> framegrab::Result<()> {
//! let session = CaptureSession::start(&CaptureConfig::default())?;
//! if let Some(frame) = session.wait_frame(Duration::from_secs(1)) {
//!     println!("frame {} with {} bytes", frame.metadata.sequence, frame.data.len());
//! }
//! session.request_stop();
//! session.join()
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod exchange;
pub mod handoff;
pub mod negotiate;
pub mod pool;
pub mod session;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use capture::StopHandle;
pub use config::CaptureConfig;
pub use device::V4L2Device;
pub use error::{CaptureError, ErrorClass, Result};
pub use session::CaptureSession;
pub use traits::{
    CaptureMode, CaptureParams, DeviceCapabilities, FieldOrder, Format, FourCC, Frame,
    FrameMetadata, VideoDevice,
};
