use std::convert::Infallible;
use std::os::unix::io::AsRawFd;

use nix::errno::Errno;
use thiserror::Error;

use crate::bindings::v4l2_buffer;
use crate::ioctl::BufferFlags;
use crate::ioctl::V4l2BufferPlanes;
use crate::QueueType;

/// Implementors can receive the result from the `querybuf`, `qbuf` and `dqbuf` ioctls.
pub trait QueryBuf: Sized {
    type Error: std::fmt::Display + std::fmt::Debug;

    /// Try to retrieve the data from `v4l2_buf`. Only the multi-planar API is used, so the
    /// first `v4l2_buf.length` entries of `v4l2_planes` contain the plane data.
    fn try_from_v4l2_buffer(
        v4l2_buf: v4l2_buffer,
        v4l2_planes: V4l2BufferPlanes,
    ) -> Result<Self, Self::Error>;
}

/// For cases where we are not interested in the result of the ioctl.
impl QueryBuf for () {
    type Error = Infallible;

    fn try_from_v4l2_buffer(
        _v4l2_buf: v4l2_buffer,
        _v4l2_planes: V4l2BufferPlanes,
    ) -> Result<Self, Self::Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryBufPlane {
    /// Offset to pass to `mmap()` in order to obtain a mapping for this plane.
    pub mem_offset: u32,
    /// Length of this plane.
    pub length: u32,
}

/// Contains all the information that makes sense when using `querybuf`.
#[derive(Debug)]
pub struct QueryBuffer {
    pub index: usize,
    pub flags: BufferFlags,
    pub planes: Vec<QueryBufPlane>,
}

impl QueryBuf for QueryBuffer {
    type Error = Infallible;

    fn try_from_v4l2_buffer(
        v4l2_buf: v4l2_buffer,
        v4l2_planes: V4l2BufferPlanes,
    ) -> Result<Self, Self::Error> {
        let planes = v4l2_planes
            .iter()
            .take(v4l2_buf.length as usize)
            .map(|v4l2_plane| QueryBufPlane {
                // Only meaningful for MMAP buffers, which is the only case we query.
                mem_offset: unsafe { v4l2_plane.m.mem_offset },
                length: v4l2_plane.length,
            })
            .collect();

        Ok(QueryBuffer {
            index: v4l2_buf.index as usize,
            flags: BufferFlags::from_bits_truncate(v4l2_buf.flags),
            planes,
        })
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_buffer;
    nix::ioctl_readwrite!(vidioc_querybuf, b'V', 9, v4l2_buffer);
}

#[derive(Debug, Error)]
pub enum QueryBufError<Q: QueryBuf> {
    #[error("error while converting from v4l2_buffer: {0}")]
    ConversionError(Q::Error),
    #[error("ioctl error: {0}")]
    IoctlError(#[from] Errno),
}

impl<Q: QueryBuf> From<QueryBufError<Q>> for Errno {
    fn from(err: QueryBufError<Q>) -> Self {
        match err {
            QueryBufError::ConversionError(_) => Errno::EINVAL,
            QueryBufError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `VIDIOC_QUERYBUF` ioctl.
pub fn querybuf<T: QueryBuf>(
    fd: &impl AsRawFd,
    queue: QueueType,
    index: usize,
) -> Result<T, QueryBufError<T>> {
    let mut plane_data: V4l2BufferPlanes = Default::default();
    let mut v4l2_buf = v4l2_buffer {
        index: index as u32,
        type_: queue as u32,
        length: plane_data.len() as u32,
        ..Default::default()
    };
    v4l2_buf.m.planes = plane_data.as_mut_ptr();

    unsafe { ioctl::vidioc_querybuf(fd.as_raw_fd(), &mut v4l2_buf) }?;
    T::try_from_v4l2_buffer(v4l2_buf, plane_data).map_err(QueryBufError::ConversionError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings;

    #[test]
    fn query_buffer_planes() {
        let mut planes: V4l2BufferPlanes = Default::default();
        planes[0].length = 3_686_400;
        planes[0].m.mem_offset = 0x4000;
        // Beyond `length`, must be ignored.
        planes[1].length = 42;

        let v4l2_buf = v4l2_buffer {
            index: 0,
            type_: bindings::v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE,
            flags: bindings::V4L2_BUF_FLAG_MAPPED,
            length: 1,
            ..Default::default()
        };

        let buffer = QueryBuffer::try_from_v4l2_buffer(v4l2_buf, planes).unwrap();
        assert_eq!(buffer.index, 0);
        assert_eq!(buffer.flags, BufferFlags::MAPPED);
        assert_eq!(
            buffer.planes,
            vec![QueryBufPlane {
                mem_offset: 0x4000,
                length: 3_686_400,
            }]
        );
    }
}
