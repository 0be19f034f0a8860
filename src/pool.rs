//! Kernel buffer pool mapped into process memory.

use std::io;

use tracing::{debug, info, warn};

use crate::error::{CaptureError, Result};
use crate::negotiate::CameraHandle;
use crate::traits::{PlaneMapping, VideoDevice};

/// One pool entry: a buffer index and one mapping per plane.
#[derive(Debug)]
pub struct FrameBuffer<M> {
    index: u32,
    planes: Vec<M>,
}

impl<M: PlaneMapping> FrameBuffer<M> {
    /// Pool index, as known to the kernel.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Mapped planes in plane order.
    pub fn planes(&self) -> &[M] {
        &self.planes
    }

    /// Total mapped length across planes.
    pub fn len(&self) -> usize {
        self.planes.iter().map(PlaneMapping::len).sum()
    }

    /// Whether no bytes are mapped.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-length pool sized to the kernel-confirmed buffer count.
#[derive(Debug)]
pub struct BufferPool<M> {
    buffers: Vec<FrameBuffer<M>>,
}

impl<M: PlaneMapping> BufferPool<M> {
    /// Request buffers for `camera` and map every plane of every buffer.
    ///
    /// The kernel may grant fewer buffers than requested; the pool holds
    /// exactly the granted count. If any query or mapping fails, everything
    /// this call mapped is unmapped before the error is returned.
    pub fn allocate<D>(camera: &mut CameraHandle<D>) -> Result<Self>
    where
        D: VideoDevice<Mapping = M>,
    {
        let requested = camera.params().buffer_count;
        let mode = camera.mode();
        let count = camera.device_mut().request_buffers(mode, requested)?;
        if count == 0 {
            return Err(CaptureError::NoBuffers { requested });
        }
        if count < requested {
            warn!(requested, granted = count, "driver granted fewer buffers");
        }
        camera.confirm_buffers(count);

        let mut buffers = Vec::with_capacity(count as usize);
        for index in 0..count {
            match map_buffer(camera, index) {
                Ok(buffer) => buffers.push(buffer),
                Err(err) => {
                    warn!(
                        index,
                        unmapping = buffers.len(),
                        error = %err,
                        "buffer setup failed, unrolling partial pool"
                    );
                    return Err(err);
                }
            }
        }

        let pool = Self { buffers };
        info!(
            buffers = pool.len(),
            bytes = pool.mapped_bytes(),
            "buffer pool mapped"
        );
        Ok(pool)
    }

    /// Unmap every plane of every buffer. Safe to call more than once.
    pub fn release(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        let planes = self.mapped_planes();
        self.buffers.clear();
        debug!(planes, "buffer pool released");
    }

    /// Number of buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the pool holds no buffers.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffer at pool `index`.
    pub fn get(&self, index: u32) -> Option<&FrameBuffer<M>> {
        self.buffers.get(index as usize)
    }

    /// Buffers in index order.
    pub fn iter(&self) -> impl Iterator<Item = &FrameBuffer<M>> {
        self.buffers.iter()
    }

    /// Number of planes currently mapped.
    pub fn mapped_planes(&self) -> usize {
        self.buffers.iter().map(|buffer| buffer.planes.len()).sum()
    }

    /// Number of bytes currently mapped.
    pub fn mapped_bytes(&self) -> usize {
        self.buffers.iter().map(FrameBuffer::len).sum()
    }
}

/// Query and map every plane of buffer `index`.
fn map_buffer<D: VideoDevice>(
    camera: &mut CameraHandle<D>,
    index: u32,
) -> Result<FrameBuffer<D::Mapping>> {
    let mode = camera.mode();
    let planes = camera.planes();
    let geometry = camera.device_mut().query_buffer(mode, index, planes)?;

    let mut mapped = Vec::with_capacity(geometry.len());
    for plane in &geometry {
        if plane.length == 0 {
            return Err(CaptureError::BufferMap {
                index,
                plane: plane.plane,
                source: io::Error::new(io::ErrorKind::InvalidData, "zero-length plane"),
            });
        }
        mapped.push(camera.device().map_plane(plane)?);
        debug!(
            index,
            plane = plane.plane,
            length = plane.length,
            offset = plane.offset,
            "plane mapped"
        );
    }

    Ok(FrameBuffer {
        index,
        planes: mapped,
    })
}
