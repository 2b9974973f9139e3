//! Operations specific to MMAP-type buffers.
use super::*;
use crate::bindings;

#[derive(Default, Debug)]
pub struct Mmap;

impl Memory for Mmap {
    const MEMORY_TYPE: MemoryType = MemoryType::Mmap;
}

/// Dummy handle for a MMAP plane, to use with APIs that require handles. MMAP buffers are backed
/// by the device, and thus we don't need to attach any extra information to them. Use
/// `querybuf` and `mmap` to access their memory.
#[derive(Default, Debug, Clone)]
pub struct MmapHandle;

// There is no information to fill with MMAP buffers ; the index is enough.
impl PlaneHandle for MmapHandle {
    type Memory = Mmap;

    fn fill_v4l2_plane(&self, _plane: &mut bindings::v4l2_plane) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmap_handle_fills_nothing() {
        let mut plane = bindings::v4l2_plane {
            length: 42,
            ..Default::default()
        };
        MmapHandle.fill_v4l2_plane(&mut plane);
        assert_eq!(plane.length, 42);
        assert_eq!(unsafe { plane.m.userptr }, 0);
    }
}
