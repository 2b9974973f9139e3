//! Safe wrapper for the `VIDIOC_QBUF` ioctl.
use nix::errno::Errno;
use std::fmt::Debug;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

use crate::bindings;
use crate::bindings::v4l2_buffer;
use crate::ioctl::BufferFlags;
use crate::ioctl::QueryBuf;
use crate::ioctl::V4l2BufferPlanes;
use crate::memory::Memory;
use crate::memory::PlaneHandle;
use crate::QueueType;

#[derive(Debug, Error)]
pub enum QBufError<Q: QueryBuf> {
    #[error("error while converting from v4l2_buffer: {0}")]
    ConversionError(Q::Error),
    #[error("invalid number of planes specified for the buffer: got {0}, expected {1}")]
    NumPlanesMismatch(usize, usize),
    #[error("buffer {0} is already queued, or its backing memory was rejected")]
    InvalidBuffer(usize),
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl<Q: QueryBuf> From<QBufError<Q>> for Errno {
    fn from(err: QBufError<Q>) -> Self {
        match err {
            QBufError::ConversionError(_) => Errno::EINVAL,
            QBufError::NumPlanesMismatch(_, _) => Errno::EINVAL,
            QBufError::InvalidBuffer(_) => Errno::EINVAL,
            QBufError::IoctlError(e) => e,
        }
    }
}

/// Representation of a single plane of a V4L2 buffer.
pub struct QBufPlane(pub bindings::v4l2_plane);

impl QBufPlane {
    pub fn new_from_handle<H: PlaneHandle>(handle: &H, bytes_used: usize) -> Self {
        let mut plane = bindings::v4l2_plane {
            bytesused: bytes_used as u32,
            data_offset: 0,
            ..Default::default()
        };
        handle.fill_v4l2_plane(&mut plane);
        QBufPlane(plane)
    }
}

impl Debug for QBufPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QBufPlane")
            .field("bytesused", &self.0.bytesused)
            .field("length", &self.0.length)
            .field("data_offset", &self.0.data_offset)
            .finish()
    }
}

/// Contains all the information that can be passed to the `qbuf` ioctl.
#[derive(Debug)]
pub struct QBuffer<H: PlaneHandle> {
    pub flags: BufferFlags,
    pub field: u32,
    pub planes: Vec<QBufPlane>,
    pub _h: std::marker::PhantomData<H>,
}

impl<H: PlaneHandle> Default for QBuffer<H> {
    fn default() -> Self {
        QBuffer {
            flags: Default::default(),
            field: Default::default(),
            planes: Vec::new(),
            _h: std::marker::PhantomData,
        }
    }
}

impl<H: PlaneHandle> QBuffer<H> {
    /// Creates a single-plane buffer backed by `handle`, with `bytes_used` bytes of payload.
    pub fn from_handle(handle: &H, bytes_used: usize) -> Self {
        QBuffer {
            planes: vec![QBufPlane::new_from_handle(handle, bytes_used)],
            ..Default::default()
        }
    }

    /// Fill the multi-planar `v4l2_buf` with our information, using `v4l2_planes` to store the
    /// plane data. Fail if the number of planes is not between 1 and `VIDEO_MAX_PLANES`
    /// included.
    fn fill_mplane_v4l2_buffer<Q: QueryBuf>(
        self,
        v4l2_buf: &mut v4l2_buffer,
        v4l2_planes: &mut V4l2BufferPlanes,
    ) -> Result<(), QBufError<Q>> {
        if self.planes.is_empty() || self.planes.len() > v4l2_planes.len() {
            return Err(QBufError::NumPlanesMismatch(
                self.planes.len(),
                v4l2_planes.len(),
            ));
        }

        v4l2_buf.memory = H::Memory::MEMORY_TYPE as u32;
        v4l2_buf.flags = self.flags.bits();
        v4l2_buf.field = self.field;
        // Some drivers look at the buffer-level payload even with the multi-planar API.
        v4l2_buf.bytesused = self.planes[0].0.bytesused;
        v4l2_buf.length = self.planes.len() as u32;
        v4l2_planes
            .iter_mut()
            .zip(self.planes)
            .for_each(|(v4l2_plane, plane)| {
                *v4l2_plane = plane.0;
            });

        Ok(())
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_buffer;
    nix::ioctl_readwrite!(vidioc_qbuf, b'V', 15, v4l2_buffer);
}

/// Safe wrapper around the `VIDIOC_QBUF` ioctl.
///
/// For MMAP buffers, the mapping must not be accessed by the caller while the buffer is queued.
/// For USERPTR and DMABUF buffers, the backing memory must stay alive until the buffer is
/// returned by either `dqbuf` or `streamoff`.
pub fn qbuf<H: PlaneHandle, O: QueryBuf>(
    fd: &impl AsRawFd,
    queue: QueueType,
    index: usize,
    buf_data: QBuffer<H>,
) -> Result<O, QBufError<O>> {
    let mut v4l2_buf = v4l2_buffer {
        index: index as u32,
        type_: queue as u32,
        ..Default::default()
    };

    let mut plane_data: V4l2BufferPlanes = Default::default();
    buf_data.fill_mplane_v4l2_buffer(&mut v4l2_buf, &mut plane_data)?;
    v4l2_buf.m.planes = plane_data.as_mut_ptr();

    match unsafe { ioctl::vidioc_qbuf(fd.as_raw_fd(), &mut v4l2_buf) } {
        Ok(_) => O::try_from_v4l2_buffer(v4l2_buf, plane_data).map_err(QBufError::ConversionError),
        Err(Errno::EINVAL) => Err(QBufError::InvalidBuffer(index)),
        Err(e) => Err(QBufError::IoctlError(e)),
    }
}
