//! Safe wrappers for the `VIDIOC_STREAMON` and `VIDIOC_STREAMOFF` ioctls.
use nix::errno::Errno;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

use crate::QueueType;

#[doc(hidden)]
mod ioctl {
    nix::ioctl_write_ptr!(vidioc_streamon, b'V', 18, u32);
    nix::ioctl_write_ptr!(vidioc_streamoff, b'V', 19, u32);
}

#[derive(Debug, Error)]
pub enum StreamOnError {
    #[error("{0} queue has no buffers allocated")]
    InvalidQueue(QueueType),
    #[error("formats of linked pads do not match")]
    PadFormatMismatch,
    #[error("pipeline is not fully linked")]
    PipelineNotLinked,
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<StreamOnError> for Errno {
    fn from(err: StreamOnError) -> Self {
        match err {
            StreamOnError::InvalidQueue(_) => Errno::EINVAL,
            StreamOnError::PadFormatMismatch => Errno::EPIPE,
            StreamOnError::PipelineNotLinked => Errno::ENOLINK,
            StreamOnError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `VIDIOC_STREAMON` ioctl.
///
/// On the VSP2 the whole pipeline is validated when the last of its video nodes starts
/// streaming, so link and format errors surface here.
pub fn streamon(fd: &impl AsRawFd, queue: QueueType) -> Result<(), StreamOnError> {
    let type_ = queue as u32;

    unsafe { ioctl::vidioc_streamon(fd.as_raw_fd(), &type_) }
        .map(drop)
        .map_err(|e| match e {
            Errno::EINVAL => StreamOnError::InvalidQueue(queue),
            Errno::EPIPE => StreamOnError::PadFormatMismatch,
            Errno::ENOLINK => StreamOnError::PipelineNotLinked,
            e => StreamOnError::IoctlError(e),
        })
}

#[derive(Debug, Error)]
pub enum StreamOffError {
    #[error("{0} queue is not supported")]
    InvalidQueue(QueueType),
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<StreamOffError> for Errno {
    fn from(err: StreamOffError) -> Self {
        match err {
            StreamOffError::InvalidQueue(_) => Errno::EINVAL,
            StreamOffError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `VIDIOC_STREAMOFF` ioctl. Buffers still queued are returned to
/// user-space and can be reused.
pub fn streamoff(fd: &impl AsRawFd, queue: QueueType) -> Result<(), StreamOffError> {
    let type_ = queue as u32;

    unsafe { ioctl::vidioc_streamoff(fd.as_raw_fd(), &type_) }
        .map(drop)
        .map_err(|e| match e {
            Errno::EINVAL => StreamOffError::InvalidQueue(queue),
            e => StreamOffError::IoctlError(e),
        })
}
