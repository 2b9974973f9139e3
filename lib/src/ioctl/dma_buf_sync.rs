//! Safe wrapper for the `DMA_BUF_IOCTL_SYNC` ioctl, which brackets CPU accesses to a DMABUF.
use bitflags::bitflags;
use nix::errno::Errno;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

use crate::bindings;
use crate::bindings::dma_buf_sync;

bitflags! {
    /// Direction of the CPU access being bracketed.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DmaBufSyncAccess: u64 {
        const READ = bindings::DMA_BUF_SYNC_READ;
        const WRITE = bindings::DMA_BUF_SYNC_WRITE;
        const RW = bindings::DMA_BUF_SYNC_RW;
    }
}

/// Whether the CPU access starts or ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaBufSyncPhase {
    Start,
    End,
}

impl DmaBufSyncPhase {
    fn flags(self) -> u64 {
        match self {
            DmaBufSyncPhase::Start => bindings::DMA_BUF_SYNC_START,
            DmaBufSyncPhase::End => bindings::DMA_BUF_SYNC_END,
        }
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::dma_buf_sync;
    nix::ioctl_write_ptr!(dma_buf_ioctl_sync, b'b', 0, dma_buf_sync);
}

#[derive(Debug, Error)]
pub enum DmaBufSyncError {
    #[error("file descriptor is not a DMABUF")]
    NotADmaBuf,
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<DmaBufSyncError> for Errno {
    fn from(err: DmaBufSyncError) -> Self {
        match err {
            DmaBufSyncError::NotADmaBuf => Errno::ENOTTY,
            DmaBufSyncError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `DMA_BUF_IOCTL_SYNC` ioctl.
pub fn dma_buf_sync(
    fd: &impl AsRawFd,
    phase: DmaBufSyncPhase,
    access: DmaBufSyncAccess,
) -> Result<(), DmaBufSyncError> {
    let sync = dma_buf_sync {
        flags: phase.flags() | access.bits(),
    };

    match unsafe { ioctl::dma_buf_ioctl_sync(fd.as_raw_fd(), &sync) } {
        Ok(_) => Ok(()),
        Err(Errno::ENOTTY) => Err(DmaBufSyncError::NotADmaBuf),
        Err(e) => Err(DmaBufSyncError::IoctlError(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_flags() {
        assert_eq!(
            DmaBufSyncPhase::Start.flags() | DmaBufSyncAccess::WRITE.bits(),
            0x2
        );
        assert_eq!(
            DmaBufSyncPhase::End.flags() | DmaBufSyncAccess::RW.bits(),
            0x7
        );
    }
}
