//! Device negotiation: capability probing and format agreement.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::device::V4L2Device;
use crate::error::{CaptureError, Result};
use crate::traits::{CaptureMode, CaptureParams, FieldOrder, Format, PlaneFormat, VideoDevice};

/// An open device plus the parameters it agreed to.
///
/// After [`negotiate_format`](Self::negotiate_format) the stored params are
/// what the driver accepted, which may differ from what was asked for.
pub struct CameraHandle<D: VideoDevice> {
    device: D,
    params: CaptureParams,
    format: Option<Format>,
}

impl CameraHandle<V4L2Device> {
    /// Open the device node at `path` with the given requested parameters.
    pub fn open<P: AsRef<Path>>(path: P, params: CaptureParams) -> Result<Self> {
        let device = V4L2Device::open(path)?;
        Ok(Self::new(device, params))
    }
}

impl<D: VideoDevice> CameraHandle<D> {
    /// Wrap an already open device. Zero-valued params take their defaults.
    pub fn new(device: D, params: CaptureParams) -> Self {
        Self {
            device,
            params: params.normalized(),
            format: None,
        }
    }

    /// Select the capture mode from the device capability flags.
    pub fn query_capabilities(&mut self) -> Result<CaptureMode> {
        let caps = self.device.capabilities();
        let mode = CaptureMode::select(caps).ok_or(CaptureError::UnsupportedDevice)?;
        if !caps.can_stream {
            warn!(card = %caps.card, "device does not advertise streaming I/O");
        }

        self.params.mode = mode;
        if mode == CaptureMode::MultiPlane && self.params.field == FieldOrder::Any {
            self.params.field = FieldOrder::None;
        }
        info!(card = %caps.card, driver = %caps.driver, ?mode, "capture mode selected");
        Ok(mode)
    }

    /// Submit the requested format and keep what the driver accepted.
    pub fn negotiate_format(&mut self) -> Result<&Format> {
        let mode = self.params.mode;
        let mut request = self.device.format(mode)?;
        request.width = self.params.width;
        request.height = self.params.height;
        request.fourcc = self.params.fourcc;
        request.field = self.params.field;
        if mode == CaptureMode::MultiPlane {
            request
                .planes
                .resize(self.params.plane_count as usize, PlaneFormat::default());
        }

        let accepted = self.device.set_format(mode, &request)?;

        if (accepted.width, accepted.height) != (request.width, request.height) {
            warn!(
                requested = %format_args!("{}x{}", request.width, request.height),
                accepted = %format_args!("{}x{}", accepted.width, accepted.height),
                "driver adjusted resolution"
            );
        }
        if accepted.fourcc != request.fourcc {
            warn!(
                requested = %request.fourcc,
                accepted = %accepted.fourcc,
                "driver substituted pixel format"
            );
        }
        #[allow(clippy::cast_possible_truncation)]
        let accepted_planes = accepted.planes.len() as u32;
        if mode == CaptureMode::MultiPlane && accepted_planes != self.params.plane_count {
            warn!(
                requested = self.params.plane_count,
                accepted = accepted_planes,
                "driver adjusted plane count"
            );
        }

        self.params.width = accepted.width;
        self.params.height = accepted.height;
        self.params.fourcc = accepted.fourcc;
        self.params.field = accepted.field;
        self.params.plane_count = accepted_planes;

        for (plane, layout) in accepted.planes.iter().enumerate() {
            debug!(plane, stride = layout.stride, size = layout.size, "plane layout");
        }
        info!(
            width = accepted.width,
            height = accepted.height,
            fourcc = %accepted.fourcc,
            planes = accepted_planes,
            "format negotiated"
        );

        Ok(self.format.insert(accepted))
    }

    /// Record the buffer count the kernel actually granted.
    pub(crate) fn confirm_buffers(&mut self, count: u32) {
        self.params.buffer_count = count;
    }

    /// Current parameters: requested before negotiation, accepted after.
    pub const fn params(&self) -> &CaptureParams {
        &self.params
    }

    /// Format accepted by the driver, once negotiated.
    pub const fn format(&self) -> Option<&Format> {
        self.format.as_ref()
    }

    /// Selected capture mode.
    pub const fn mode(&self) -> CaptureMode {
        self.params.mode
    }

    /// Negotiated plane count as a length.
    pub const fn planes(&self) -> usize {
        self.params.plane_count as usize
    }

    /// The underlying device.
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// The underlying device, mutably.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

impl<D: VideoDevice> std::fmt::Debug for CameraHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraHandle")
            .field("card", &self.device.capabilities().card)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
