//! Allocator backed by the kernel DMA heaps (`/dev/dma_heap/*`).
use std::fmt::Display;
use std::os::unix::io::{AsFd, BorrowedFd, OwnedFd};

use ::dma_heap::{Heap, HeapKind};
use log::{debug, warn};

use super::*;
use crate::ioctl::{self, DmaBufSyncPhase, PlaneMapping};

/// Allocates from the CMA heap, which provides physically contiguous memory, or from the system
/// heap if no CMA heap is exposed.
pub struct DmaHeap {
    heap: Heap,
}

impl DmaHeap {
    pub fn open() -> Result<Self, ContigError> {
        let heap = open_heap(Heap::new)?;

        Ok(DmaHeap { heap })
    }
}

/// Opens the CMA heap using `open`, or the system heap if that fails.
fn open_heap<H, E: Display>(
    mut open: impl FnMut(HeapKind) -> Result<H, E>,
) -> Result<H, ContigError> {
    match open(HeapKind::Cma) {
        Ok(heap) => Ok(heap),
        Err(e) => {
            warn!(
                "No CMA heap ({}), falling back to the system heap which is not physically contiguous",
                e
            );
            open(HeapKind::System).map_err(|e| ContigError::HeapOpen(e.to_string()))
        }
    }
}

impl ContiguousAllocator for DmaHeap {
    fn allocate(&self, size: usize) -> Result<Box<dyn ContiguousBuffer>, ContigError> {
        if size == 0 {
            return Err(ContigError::ZeroSize);
        }

        let fd = self
            .heap
            .allocate(size)
            .map_err(|e| ContigError::HeapAllocate(size, e.to_string()))?;
        let mapping = ioctl::mmap(&fd, 0, size)?;
        debug!("dma-heap: allocated {} bytes", size);

        Ok(Box::new(DmaHeapBuffer { mapping, fd }))
    }
}

#[derive(Debug)]
pub struct DmaHeapBuffer {
    // Declared first so it is unmapped before the descriptor is closed.
    mapping: PlaneMapping,
    fd: OwnedFd,
}

impl ContiguousBuffer for DmaHeapBuffer {
    fn as_slice(&self) -> &[u8] {
        &self.mapping
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mapping
    }

    fn dmabuf(&mut self) -> Result<BorrowedFd<'_>, ContigError> {
        Ok(self.fd.as_fd())
    }

    fn begin_cpu_access(&self, access: DmaBufSyncAccess) -> Result<(), ContigError> {
        Ok(ioctl::dma_buf_sync(&self.fd, DmaBufSyncPhase::Start, access)?)
    }

    fn end_cpu_access(&self, access: DmaBufSyncAccess) -> Result<(), ContigError> {
        Ok(ioctl::dma_buf_sync(&self.fd, DmaBufSyncPhase::End, access)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cma_heap_is_preferred() {
        let mut tried = Vec::new();
        let heap = open_heap(|kind| {
            tried.push(matches!(kind, HeapKind::Cma));
            Ok::<_, String>("cma")
        })
        .unwrap();
        assert_eq!(heap, "cma");
        assert_eq!(tried, vec![true]);
    }

    #[test]
    fn system_heap_fallback() {
        let mut tried = Vec::new();
        let heap = open_heap(|kind| {
            let cma = matches!(kind, HeapKind::Cma);
            tried.push(cma);
            if cma {
                Err("no such file")
            } else {
                Ok("system")
            }
        })
        .unwrap();
        assert_eq!(heap, "system");
        assert_eq!(tried, vec![true, false]);

        let err = open_heap(|_| Err::<(), _>("no such file")).unwrap_err();
        assert!(matches!(err, ContigError::HeapOpen(_)));
    }

    #[test]
    fn heap_buffer_roundtrip() {
        // Skip on hosts without DMA heaps, or without permission to use them.
        let Ok(heap) = DmaHeap::open() else {
            return;
        };
        let Ok(mut buffer) = heap.allocate(4096) else {
            return;
        };

        assert_eq!(buffer.len(), 4096);
        buffer.begin_cpu_access(DmaBufSyncAccess::WRITE).unwrap();
        buffer.as_mut_slice()[..4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        buffer.end_cpu_access(DmaBufSyncAccess::WRITE).unwrap();
        assert_eq!(&buffer.as_slice()[..4], &[0xde, 0xad, 0xbe, 0xef]);
        assert!(buffer.dmabuf().is_ok());
    }
}
