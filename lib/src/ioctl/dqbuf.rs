//! Safe wrapper for the `VIDIOC_DQBUF` ioctl.
use nix::errno::Errno;
use nix::sys::time::TimeVal;
use std::convert::Infallible;
use std::fmt::Debug;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

use crate::bindings;
use crate::bindings::v4l2_buffer;
use crate::ioctl::BufferFlags;
use crate::ioctl::QueryBuf;
use crate::ioctl::V4l2BufferPlanes;
use crate::memory::MemoryType;
use crate::QueueType;

/// Allows to dequeue a buffer when only its index is of interest.
impl QueryBuf for u32 {
    type Error = Infallible;

    fn try_from_v4l2_buffer(
        v4l2_buf: v4l2_buffer,
        _v4l2_planes: V4l2BufferPlanes,
    ) -> Result<Self, Self::Error> {
        Ok(v4l2_buf.index)
    }
}

/// Information about a single plane of a dequeued buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DqBufPlane {
    pub bytesused: u32,
    pub length: u32,
    pub data_offset: u32,
}

/// Information for a dequeued buffer. Safe variant of `struct v4l2_buffer`.
#[derive(Debug, Clone)]
pub struct DqBuffer {
    pub index: u32,
    pub flags: BufferFlags,
    pub sequence: u32,
    pub timestamp: TimeVal,
    pub planes: Vec<DqBufPlane>,
}

impl DqBuffer {
    pub fn is_last(&self) -> bool {
        self.flags.contains(BufferFlags::LAST)
    }

    /// Whether the driver flagged the buffer as containing corrupted data.
    pub fn has_error(&self) -> bool {
        self.flags.contains(BufferFlags::ERROR)
    }

    /// Returns the first plane of the buffer, if any.
    pub fn first_plane(&self) -> Option<&DqBufPlane> {
        self.planes.first()
    }
}

#[derive(Debug, Error)]
pub enum DqBufFromError {
    #[error("invalid number of planes {0}")]
    InvalidNumberOfPlanes(u32),
    #[error("plane {0} has bytesused field larger than its length ({1} > {2})")]
    PlaneSizeOverflow(usize, u32, u32),
}

impl QueryBuf for DqBuffer {
    type Error = DqBufFromError;

    fn try_from_v4l2_buffer(
        v4l2_buf: v4l2_buffer,
        v4l2_planes: V4l2BufferPlanes,
    ) -> Result<Self, Self::Error> {
        if v4l2_buf.length == 0 || v4l2_buf.length > bindings::VIDEO_MAX_PLANES {
            return Err(DqBufFromError::InvalidNumberOfPlanes(v4l2_buf.length));
        }

        let mut planes = Vec::with_capacity(v4l2_buf.length as usize);
        for (i, plane) in v4l2_planes[0..v4l2_buf.length as usize].iter().enumerate() {
            // A zero length means the driver did not report it, e.g. for imported memory.
            if plane.length != 0 && plane.bytesused > plane.length {
                return Err(DqBufFromError::PlaneSizeOverflow(
                    i,
                    plane.bytesused,
                    plane.length,
                ));
            }

            planes.push(DqBufPlane {
                bytesused: plane.bytesused,
                length: plane.length,
                data_offset: plane.data_offset,
            });
        }

        Ok(DqBuffer {
            index: v4l2_buf.index,
            flags: BufferFlags::from_bits_truncate(v4l2_buf.flags),
            sequence: v4l2_buf.sequence,
            timestamp: TimeVal::new(v4l2_buf.timestamp.tv_sec, v4l2_buf.timestamp.tv_usec),
            planes,
        })
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_buffer;
    nix::ioctl_readwrite!(vidioc_dqbuf, b'V', 17, v4l2_buffer);
}

#[derive(Debug, Error)]
pub enum DqBufError<T: Debug> {
    #[error("no buffer ready for dequeue")]
    NotReady,
    #[error("end-of-stream reached")]
    Eos,
    #[error("error while converting from v4l2_buffer: {0:?}")]
    ConversionError(T),
    #[error("unexpected ioctl error: {0}")]
    IoctlError(Errno),
}

impl<T: Debug> From<Errno> for DqBufError<T> {
    fn from(error: Errno) -> Self {
        match error {
            Errno::EAGAIN => Self::NotReady,
            Errno::EPIPE => Self::Eos,
            error => Self::IoctlError(error),
        }
    }
}

impl<T: Debug> From<DqBufError<T>> for Errno {
    fn from(err: DqBufError<T>) -> Self {
        match err {
            DqBufError::NotReady => Errno::EAGAIN,
            DqBufError::Eos => Errno::EPIPE,
            DqBufError::ConversionError(_) => Errno::EINVAL,
            DqBufError::IoctlError(e) => e,
        }
    }
}

pub type DqBufResult<T, E> = Result<T, DqBufError<E>>;

/// Safe wrapper around the `VIDIOC_DQBUF` ioctl.
pub fn dqbuf<T: QueryBuf>(
    fd: &impl AsRawFd,
    queue: QueueType,
    memory: MemoryType,
) -> DqBufResult<T, T::Error> {
    let mut plane_data: V4l2BufferPlanes = Default::default();
    let mut v4l2_buf = v4l2_buffer {
        type_: queue as u32,
        memory: memory as u32,
        length: plane_data.len() as u32,
        ..Default::default()
    };
    v4l2_buf.m.planes = plane_data.as_mut_ptr();

    unsafe { ioctl::vidioc_dqbuf(fd.as_raw_fd(), &mut v4l2_buf) }?;

    T::try_from_v4l2_buffer(v4l2_buf, plane_data).map_err(DqBufError::ConversionError)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dequeued(length: u32, bytesused: u32, flags: u32) -> Result<DqBuffer, DqBufFromError> {
        let mut planes: V4l2BufferPlanes = Default::default();
        planes[0].length = length;
        planes[0].bytesused = bytesused;

        let v4l2_buf = v4l2_buffer {
            index: 0,
            type_: bindings::v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
            flags,
            sequence: 3,
            length: 1,
            ..Default::default()
        };

        DqBuffer::try_from_v4l2_buffer(v4l2_buf, planes)
    }

    #[test]
    fn valid_capture_buffer() {
        let buffer = dequeued(3_686_400, 3_686_400, bindings::V4L2_BUF_FLAG_DONE).unwrap();

        assert_eq!(buffer.sequence, 3);
        assert!(!buffer.has_error());
        assert!(!buffer.is_last());
        assert_eq!(
            buffer.first_plane(),
            Some(&DqBufPlane {
                bytesused: 3_686_400,
                length: 3_686_400,
                data_offset: 0,
            })
        );
    }

    #[test]
    fn overflowing_plane() {
        assert!(matches!(
            dequeued(4096, 8192, 0),
            Err(DqBufFromError::PlaneSizeOverflow(0, 8192, 4096))
        ));
    }

    #[test]
    fn error_flag() {
        let buffer = dequeued(4096, 4096, bindings::V4L2_BUF_FLAG_ERROR).unwrap();
        assert!(buffer.has_error());
    }

    #[test]
    fn errno_mapping() {
        assert!(matches!(
            DqBufError::<()>::from(Errno::EAGAIN),
            DqBufError::NotReady
        ));
        assert!(matches!(DqBufError::<()>::from(Errno::EPIPE), DqBufError::Eos));
        assert_eq!(
            Errno::from(DqBufError::<()>::from(Errno::EIO)),
            Errno::EIO
        );
    }
}
