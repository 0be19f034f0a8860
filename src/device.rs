//! V4L2 device implementation on top of the v4l crate's kernel bindings.
//!
//! This is the only module that talks to the kernel directly. Every ioctl
//! argument is a zero-initialised kernel struct that lives for the duration
//! of the call; plane descriptor arrays are sized to the negotiated plane
//! count.

#![allow(unsafe_code)]

use std::fs;
use std::io;
use std::mem;
use std::os::raw::{c_int, c_void};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::slice;
use std::time::Duration;

use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l2::vidioc;
use v4l::v4l_sys::{v4l2_buffer, v4l2_format, v4l2_plane, v4l2_requestbuffers};
use v4l::Device;

use crate::error::{CaptureError, Op, Result};
use crate::traits::{
    CaptureMode, DequeuedBuffer, DeviceCapabilities, FieldOrder, Format, FourCC, PlaneFormat,
    PlaneGeometry, PlaneMapping, Readiness, VideoDevice,
};

/// `VIDEO_MAX_PLANES` from the kernel headers.
const MAX_PLANES: usize = 8;

const fn buf_type(mode: CaptureMode) -> u32 {
    match mode {
        CaptureMode::SinglePlane => Type::VideoCapture as u32,
        CaptureMode::MultiPlane => Type::VideoCaptureMplane as u32,
    }
}

/// Issue an ioctl, retrying while it is interrupted by a signal.
fn xioctl<T>(fd: RawFd, request: u64, arg: &mut T) -> io::Result<()> {
    loop {
        // SAFETY: `arg` is the kernel struct `request` expects and outlives the call.
        let result = unsafe { v4l2::ioctl(fd, request as _, ptr::from_mut(arg).cast::<c_void>()) };
        match result {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            other => return other,
        }
    }
}

fn new_planes(count: usize) -> Vec<v4l2_plane> {
    // SAFETY: v4l2_plane is a plain C struct; all-zero is its reset state.
    (0..count).map(|_| unsafe { mem::zeroed() }).collect()
}

/// Build a `v4l2_buffer` for `index`, pointing at `planes` in multi-plane mode.
fn new_buffer(mode: CaptureMode, index: u32, planes: &mut [v4l2_plane]) -> v4l2_buffer {
    // SAFETY: v4l2_buffer is a plain C struct; all-zero is its reset state.
    let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
    buf.index = index;
    buf.type_ = buf_type(mode);
    buf.memory = Memory::Mmap as u32;
    if mode == CaptureMode::MultiPlane {
        buf.m.planes = planes.as_mut_ptr();
        #[allow(clippy::cast_possible_truncation)]
        {
            buf.length = planes.len() as u32;
        }
    }
    buf
}

fn check_planes(expected: usize, reported: u32) -> Result<()> {
    let reported = reported as usize;
    if reported == expected {
        Ok(())
    } else {
        Err(CaptureError::PlaneMismatch { expected, reported })
    }
}

/// V4L2 capture device opened from a device node.
pub struct V4L2Device {
    device: Device,
    fd: RawFd,
    capabilities: DeviceCapabilities,
}

impl V4L2Device {
    /// Open a V4L2 device node (e.g. `/dev/video0`) and query its capabilities.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let open_error = |source| CaptureError::Open {
            path: path.to_path_buf(),
            source,
        };

        let metadata = fs::metadata(path).map_err(open_error)?;
        if !metadata.file_type().is_char_device() {
            return Err(CaptureError::NotCaptureDevice {
                path: path.to_path_buf(),
            });
        }

        // v4l opens the node O_RDWR | O_NONBLOCK, so an empty queue yields EAGAIN.
        let device = Device::with_path(path).map_err(open_error)?;
        let fd = device.handle().fd();

        let caps = device.query_caps().map_err(|err| match err.raw_os_error() {
            Some(libc::EINVAL | libc::ENOTTY) => CaptureError::NotCaptureDevice {
                path: path.to_path_buf(),
            },
            _ => CaptureError::io(Op::QueryCapabilities, err),
        })?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            single_plane: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            multi_plane: caps.capabilities.contains(Flags::VIDEO_CAPTURE_MPLANE),
            can_stream: caps.capabilities.contains(Flags::STREAMING),
        };

        info!(
            fd,
            driver = %capabilities.driver,
            card = %capabilities.card,
            bus = %capabilities.bus_info,
            "opened {}",
            path.display()
        );

        Ok(Self {
            device,
            fd,
            capabilities,
        })
    }

    fn read_format(&self, mode: CaptureMode) -> Result<v4l2_format> {
        // SAFETY: v4l2_format is a plain C struct; all-zero is its reset state.
        let mut raw: v4l2_format = unsafe { mem::zeroed() };
        raw.type_ = buf_type(mode);
        xioctl(self.fd, vidioc::VIDIOC_G_FMT as u64, &mut raw)
            .map_err(|err| CaptureError::io(Op::GetFormat, err))?;
        Ok(raw)
    }
}

fn decode_format(mode: CaptureMode, raw: &v4l2_format) -> Format {
    match mode {
        CaptureMode::SinglePlane => {
            // SAFETY: G_FMT/S_FMT with a single-plane type fill `pix`.
            let pix = unsafe { raw.fmt.pix };
            Format {
                width: pix.width,
                height: pix.height,
                fourcc: FourCC::from_u32(pix.pixelformat),
                field: FieldOrder::from_raw(pix.field),
                planes: vec![PlaneFormat {
                    stride: pix.bytesperline,
                    size: pix.sizeimage,
                }],
            }
        }
        CaptureMode::MultiPlane => {
            // SAFETY: G_FMT/S_FMT with a multi-plane type fill `pix_mp`.
            let pix = unsafe { raw.fmt.pix_mp };
            let planes = pix
                .plane_fmt
                .iter()
                .take(usize::from(pix.num_planes).min(MAX_PLANES))
                .map(|plane| PlaneFormat {
                    stride: plane.bytesperline,
                    size: plane.sizeimage,
                })
                .collect();
            Format {
                width: pix.width,
                height: pix.height,
                fourcc: FourCC::from_u32(pix.pixelformat),
                field: FieldOrder::from_raw(pix.field),
                planes,
            }
        }
    }
}

impl VideoDevice for V4L2Device {
    type Mapping = MappedPlane;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn format(&self, mode: CaptureMode) -> Result<Format> {
        let raw = self.read_format(mode)?;
        Ok(decode_format(mode, &raw))
    }

    fn set_format(&mut self, mode: CaptureMode, format: &Format) -> Result<Format> {
        // Start from the current format so fields we do not manage stay intact.
        let mut raw = self.read_format(mode)?;

        match mode {
            CaptureMode::SinglePlane => {
                // SAFETY: filled by G_FMT with a single-plane type.
                let mut pix = unsafe { raw.fmt.pix };
                pix.width = format.width;
                pix.height = format.height;
                pix.pixelformat = format.fourcc.to_u32();
                pix.field = format.field.to_raw();
                raw.fmt.pix = pix;
            }
            CaptureMode::MultiPlane => {
                // SAFETY: filled by G_FMT with a multi-plane type.
                let mut pix = unsafe { raw.fmt.pix_mp };
                pix.width = format.width;
                pix.height = format.height;
                pix.pixelformat = format.fourcc.to_u32();
                pix.field = format.field.to_raw();
                #[allow(clippy::cast_possible_truncation)]
                {
                    pix.num_planes = format.planes.len().clamp(1, MAX_PLANES) as u8;
                }
                raw.fmt.pix_mp = pix;
            }
        }

        xioctl(self.fd, vidioc::VIDIOC_S_FMT as u64, &mut raw)
            .map_err(|source| CaptureError::FormatRejected { source })?;

        Ok(decode_format(mode, &raw))
    }

    fn request_buffers(&mut self, mode: CaptureMode, count: u32) -> Result<u32> {
        // SAFETY: v4l2_requestbuffers is a plain C struct; all-zero is its reset state.
        let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = count;
        req.type_ = buf_type(mode);
        req.memory = Memory::Mmap as u32;

        xioctl(self.fd, vidioc::VIDIOC_REQBUFS as u64, &mut req)
            .map_err(|err| CaptureError::io(Op::RequestBuffers, err))?;

        Ok(req.count)
    }

    fn query_buffer(
        &mut self,
        mode: CaptureMode,
        index: u32,
        planes: usize,
    ) -> Result<Vec<PlaneGeometry>> {
        let mut descriptors = new_planes(planes);
        let mut buf = new_buffer(mode, index, &mut descriptors);

        xioctl(self.fd, vidioc::VIDIOC_QUERYBUF as u64, &mut buf)
            .map_err(|err| CaptureError::io(Op::QueryBuffer, err))?;

        debug!(index, flags = format_args!("{:#x}", buf.flags), "queried buffer");

        match mode {
            CaptureMode::SinglePlane => Ok(vec![PlaneGeometry {
                index,
                plane: 0,
                length: buf.length,
                // SAFETY: QUERYBUF on an mmap buffer fills `m.offset`.
                offset: unsafe { buf.m.offset },
            }]),
            CaptureMode::MultiPlane => {
                check_planes(planes, buf.length)?;
                Ok(descriptors
                    .iter()
                    .zip(0u32..)
                    .map(|(plane, n)| PlaneGeometry {
                        index,
                        plane: n,
                        length: plane.length,
                        // SAFETY: QUERYBUF on an mmap buffer fills `m.mem_offset`.
                        offset: unsafe { plane.m.mem_offset },
                    })
                    .collect())
            }
        }
    }

    fn map_plane(&self, geometry: &PlaneGeometry) -> Result<MappedPlane> {
        let map_error = |source| CaptureError::BufferMap {
            index: geometry.index,
            plane: geometry.plane,
            source,
        };
        let len = geometry.length as usize;

        #[allow(clippy::cast_lossless, clippy::cast_possible_wrap)]
        let offset = geometry.offset as libc::off_t;

        // SAFETY: maps a fresh region; nothing else aliases it until it is unmapped.
        let ptr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd,
                offset,
            )
        }
        .map_err(map_error)?;

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| map_error(io::Error::from_raw_os_error(libc::EFAULT)))?;

        debug!(
            index = geometry.index,
            plane = geometry.plane,
            len,
            addr = ?ptr,
            "mapped plane"
        );

        Ok(MappedPlane { ptr, len })
    }

    fn enqueue(&mut self, mode: CaptureMode, index: u32, planes: usize) -> Result<()> {
        let mut descriptors = new_planes(planes);
        let mut buf = new_buffer(mode, index, &mut descriptors);

        xioctl(self.fd, vidioc::VIDIOC_QBUF as u64, &mut buf)
            .map_err(|err| CaptureError::io(Op::Enqueue, err))
    }

    fn dequeue(&mut self, mode: CaptureMode, planes: usize) -> Result<Option<DequeuedBuffer>> {
        let mut descriptors = new_planes(planes);
        let mut buf = new_buffer(mode, 0, &mut descriptors);

        match xioctl(self.fd, vidioc::VIDIOC_DQBUF as u64, &mut buf) {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == Some(libc::EAGAIN) => return Ok(None),
            Err(err) => return Err(CaptureError::io(Op::Dequeue, err)),
        }

        let plane_bytes = match mode {
            CaptureMode::SinglePlane => vec![buf.bytesused],
            CaptureMode::MultiPlane => {
                check_planes(planes, buf.length)?;
                descriptors.iter().map(|plane| plane.bytesused).collect()
            }
        };

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let timestamp = Duration::new(
            buf.timestamp.tv_sec.max(0) as u64,
            (buf.timestamp.tv_usec.max(0) as u32).saturating_mul(1000),
        );

        Ok(Some(DequeuedBuffer {
            index: buf.index,
            plane_bytes,
            sequence: buf.sequence,
            timestamp,
        }))
    }

    fn stream_on(&mut self, mode: CaptureMode) -> Result<()> {
        let mut kind = buf_type(mode);
        xioctl(self.fd, vidioc::VIDIOC_STREAMON as u64, &mut kind)
            .map_err(|err| CaptureError::io(Op::StreamOn, err))
    }

    fn stream_off(&mut self, mode: CaptureMode) -> Result<()> {
        let mut kind = buf_type(mode);
        xioctl(self.fd, vidioc::VIDIOC_STREAMOFF as u64, &mut kind)
            .map_err(|err| CaptureError::io(Op::StreamOff, err))
    }

    fn wait_readable(&self, timeout: Duration) -> Result<Readiness> {
        let mut fds = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // Round sub-millisecond timeouts up so a non-zero bound never busy-spins.
        let millis = timeout.as_millis().max(u128::from(!timeout.is_zero()));
        let millis = c_int::try_from(millis).unwrap_or(c_int::MAX);

        // SAFETY: `fds` is a single valid pollfd for the duration of the call.
        let rc = unsafe { libc::poll(&mut fds, 1, millis) };

        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Readiness::Interrupted);
            }
            return Err(CaptureError::io(Op::Poll, err));
        }
        if rc == 0 {
            return Ok(Readiness::TimedOut);
        }
        if fds.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(CaptureError::io(
                Op::Poll,
                io::Error::other(format!("device reported revents {:#x}", fds.revents)),
            ));
        }
        if fds.revents & libc::POLLIN != 0 {
            Ok(Readiness::Readable)
        } else {
            Ok(Readiness::TimedOut)
        }
    }
}

impl Drop for V4L2Device {
    fn drop(&mut self) {
        // The descriptor itself is closed when `device` drops right after.
        debug!(fd = self.fd, card = %self.capabilities.card, "closing device");
    }
}

impl std::fmt::Debug for V4L2Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4L2Device")
            .field("fd", &self.fd)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// One buffer plane mapped `MAP_SHARED` from the device.
pub struct MappedPlane {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is owned exclusively by this value and carries no thread affinity.
unsafe impl Send for MappedPlane {}

impl std::fmt::Debug for MappedPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedPlane")
            .field("addr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

impl PlaneMapping for MappedPlane {
    fn bytes(&self) -> &[u8] {
        // SAFETY: `ptr` maps `len` readable bytes until `self` is dropped.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MappedPlane {
    fn drop(&mut self) {
        // SAFETY: unmaps exactly the region returned by mmap, with the same length.
        if let Err(err) = unsafe { v4l2::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) } {
            warn!(addr = ?self.ptr, len = self.len, "munmap failed: {err}");
        }
    }
}
