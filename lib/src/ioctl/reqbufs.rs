//! Safe wrapper for the `VIDIOC_REQBUFS` ioctl.
use bitflags::bitflags;
use nix::errno::Errno;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

use crate::bindings;
use crate::bindings::v4l2_requestbuffers;
use crate::memory::MemoryType;
use crate::QueueType;

bitflags! {
    /// Memory models and features of a queue, as reported by `VIDIOC_REQBUFS`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BufferCapabilities: u32 {
        const SUPPORTS_MMAP = bindings::V4L2_BUF_CAP_SUPPORTS_MMAP;
        const SUPPORTS_USERPTR = bindings::V4L2_BUF_CAP_SUPPORTS_USERPTR;
        const SUPPORTS_DMABUF = bindings::V4L2_BUF_CAP_SUPPORTS_DMABUF;
        const SUPPORTS_REQUESTS = bindings::V4L2_BUF_CAP_SUPPORTS_REQUESTS;
        const SUPPORTS_ORPHANED_BUFS = bindings::V4L2_BUF_CAP_SUPPORTS_ORPHANED_BUFS;
    }
}

impl BufferCapabilities {
    /// Capability flag advertising support for `memory`.
    pub fn for_memory(memory: MemoryType) -> Self {
        match memory {
            MemoryType::Mmap => Self::SUPPORTS_MMAP,
            MemoryType::UserPtr => Self::SUPPORTS_USERPTR,
            MemoryType::DmaBuf => Self::SUPPORTS_DMABUF,
        }
    }

    /// Whether the queue accepts `memory` buffers.
    ///
    /// Drivers predating buffer capabilities report none at all, in which case support is
    /// assumed and left for `VIDIOC_REQBUFS` to reject.
    pub fn supports(&self, memory: MemoryType) -> bool {
        self.is_empty() || self.contains(Self::for_memory(memory))
    }
}

/// For when the caller does not care about the result.
impl From<v4l2_requestbuffers> for () {
    fn from(_reqbufs: v4l2_requestbuffers) -> Self {}
}

/// Number of buffers actually allocated by the driver.
impl From<v4l2_requestbuffers> for usize {
    fn from(reqbufs: v4l2_requestbuffers) -> Self {
        reqbufs.count as usize
    }
}

impl From<v4l2_requestbuffers> for BufferCapabilities {
    fn from(reqbufs: v4l2_requestbuffers) -> Self {
        BufferCapabilities::from_bits_truncate(reqbufs.capabilities)
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_requestbuffers;
    nix::ioctl_readwrite!(vidioc_reqbufs, b'V', 8, v4l2_requestbuffers);
}

#[derive(Debug, Error)]
pub enum ReqbufsError {
    #[error("{1} memory is not supported by the {0} queue")]
    InvalidBufferType(QueueType, MemoryType),
    #[error("buffers of the {0} queue are mapped or streaming")]
    Busy(QueueType),
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<ReqbufsError> for Errno {
    fn from(err: ReqbufsError) -> Self {
        match err {
            ReqbufsError::InvalidBufferType(_, _) => Errno::EINVAL,
            ReqbufsError::Busy(_) => Errno::EBUSY,
            ReqbufsError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `VIDIOC_REQBUFS` ioctl.
///
/// Asking for zero buffers releases those currently allocated on `queue`, and can also be used
/// to query its capabilities.
pub fn reqbufs<O: From<v4l2_requestbuffers>>(
    fd: &impl AsRawFd,
    queue: QueueType,
    memory: MemoryType,
    count: u32,
) -> Result<O, ReqbufsError> {
    let mut reqbufs = v4l2_requestbuffers {
        count,
        type_: queue as u32,
        memory: memory as u32,
        ..Default::default()
    };

    match unsafe { ioctl::vidioc_reqbufs(fd.as_raw_fd(), &mut reqbufs) } {
        Ok(_) => Ok(O::from(reqbufs)),
        Err(Errno::EINVAL) => Err(ReqbufsError::InvalidBufferType(queue, memory)),
        Err(Errno::EBUSY) => Err(ReqbufsError::Busy(queue)),
        Err(e) => Err(ReqbufsError::IoctlError(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_support() {
        let caps = BufferCapabilities::SUPPORTS_MMAP | BufferCapabilities::SUPPORTS_DMABUF;
        assert!(caps.supports(MemoryType::Mmap));
        assert!(caps.supports(MemoryType::DmaBuf));
        assert!(!caps.supports(MemoryType::UserPtr));

        // No capabilities reported at all.
        assert!(BufferCapabilities::empty().supports(MemoryType::UserPtr));
    }

    #[test]
    fn requested_count() {
        let reqbufs = v4l2_requestbuffers {
            count: 1,
            capabilities: bindings::V4L2_BUF_CAP_SUPPORTS_USERPTR,
            ..Default::default()
        };
        assert_eq!(usize::from(reqbufs), 1);
        assert_eq!(
            BufferCapabilities::from(reqbufs),
            BufferCapabilities::SUPPORTS_USERPTR
        );
    }
}
