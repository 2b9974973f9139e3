//! Physically contiguous memory allocators.
//!
//! The VSP2 has no IOMMU on the paths we use, so memory imported through `USERPTR` or `DMABUF`
//! must be physically contiguous. This module provides a small abstraction over the allocators
//! able to provide such memory:
//!
//! * [`Mmngr`], the memory manager shipped with the R-Car BSP, loaded at runtime,
//! * [`DmaHeap`], the upstream `/dev/dma_heap` interface.
//!
//! Both hand out [`ContiguousBuffer`]s that are CPU-accessible and can be exported as DMABUF.
mod dma_heap;
mod mmngr;

pub use self::dma_heap::*;
pub use self::mmngr::*;

use std::fmt::{self, Debug, Display};
use std::os::unix::io::BorrowedFd;
use std::str::FromStr;

use thiserror::Error;

use crate::ioctl::{DmaBufSyncAccess, DmaBufSyncError, MmapError};

#[derive(Debug, Error)]
pub enum ContigError {
    #[error("cannot allocate an empty buffer")]
    ZeroSize,
    #[error("failed to load {0}: {1}")]
    LibraryLoad(&'static str, libloading::Error),
    #[error("symbol {0} not found: {1}")]
    Symbol(&'static str, libloading::Error),
    #[error("{0} failed with code {1}")]
    Mmngr(&'static str, i32),
    #[error("no usable DMA heap: {0}")]
    HeapOpen(String),
    #[error("DMA heap allocation of {0} bytes failed: {1}")]
    HeapAllocate(usize, String),
    #[error("failed to map buffer: {0}")]
    Mmap(#[from] MmapError),
    #[error("failed to synchronize buffer: {0}")]
    Sync(#[from] DmaBufSyncError),
}

/// A CPU-accessible, physically contiguous buffer.
pub trait ContiguousBuffer: Debug {
    fn as_slice(&self) -> &[u8];
    fn as_mut_slice(&mut self) -> &mut [u8];

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a DMABUF descriptor for this buffer, exporting it on first call. The descriptor
    /// remains owned by the buffer.
    fn dmabuf(&mut self) -> Result<BorrowedFd<'_>, ContigError>;

    /// Ends the DMABUF export, if the allocator distinguishes it from the allocation. The memory
    /// itself remains valid until the buffer is dropped.
    fn release_dmabuf(&mut self) -> Result<(), ContigError> {
        Ok(())
    }

    /// Must be called before the CPU accesses the buffer content.
    fn begin_cpu_access(&self, _access: DmaBufSyncAccess) -> Result<(), ContigError> {
        Ok(())
    }

    /// Must be called once the CPU is done accessing the buffer content.
    fn end_cpu_access(&self, _access: DmaBufSyncAccess) -> Result<(), ContigError> {
        Ok(())
    }
}

pub trait ContiguousAllocator {
    fn allocate(&self, size: usize) -> Result<Box<dyn ContiguousBuffer>, ContigError>;
}

/// The allocators that can be selected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocatorKind {
    #[default]
    Mmngr,
    DmaHeap,
}

impl AllocatorKind {
    pub fn open(self) -> Result<Box<dyn ContiguousAllocator>, ContigError> {
        Ok(match self {
            AllocatorKind::Mmngr => Box::new(Mmngr::open()?),
            AllocatorKind::DmaHeap => Box::new(DmaHeap::open()?),
        })
    }
}

impl FromStr for AllocatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mmngr" => Ok(AllocatorKind::Mmngr),
            "dma-heap" => Ok(AllocatorKind::DmaHeap),
            _ => Err(format!("unknown allocator {}", s)),
        }
    }
}

impl Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AllocatorKind::Mmngr => "mmngr",
            AllocatorKind::DmaHeap => "dma-heap",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_kind_from_str() {
        assert_eq!("mmngr".parse(), Ok(AllocatorKind::Mmngr));
        assert_eq!("dma-heap".parse(), Ok(AllocatorKind::DmaHeap));
        assert!("ion".parse::<AllocatorKind>().is_err());
        assert_eq!(AllocatorKind::default(), AllocatorKind::Mmngr);
        assert_eq!(AllocatorKind::DmaHeap.to_string(), "dma-heap");
    }
}
