//! Operations specific to DMABuf-type buffers.
use super::*;
use crate::bindings;
use std::os::unix::io::{AsRawFd, BorrowedFd};

pub struct DmaBuf;

impl Memory for DmaBuf {
    const MEMORY_TYPE: MemoryType = MemoryType::DmaBuf;
}

/// A file descriptor that can be imported as a DMABUF plane.
pub trait DmaBufSource: AsRawFd + Debug {
    fn len(&self) -> u64;

    /// Make Clippy happy.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A DMABUF file descriptor whose size is known by other means, e.g. because it has just been
/// exported by an allocator. DMABUF files do not always report their size through `fstat`.
#[derive(Debug)]
pub struct SizedDmaBuf<F: AsRawFd + Debug> {
    pub fd: F,
    pub len: u64,
}

impl<F: AsRawFd + Debug> AsRawFd for SizedDmaBuf<F> {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.fd.as_raw_fd()
    }
}

impl<F: AsRawFd + Debug> DmaBufSource for SizedDmaBuf<F> {
    fn len(&self) -> u64 {
        self.len
    }
}

/// Borrowed DMABUF, for when the allocator keeps ownership of the descriptor.
pub type BorrowedDmaBuf<'a> = SizedDmaBuf<BorrowedFd<'a>>;

/// Handle for a DMABUF plane. Any type that can provide a file descriptor is valid.
#[derive(Debug)]
pub struct DmaBufHandle<T: DmaBufSource>(pub T);

impl<T: DmaBufSource> From<T> for DmaBufHandle<T> {
    fn from(dmabuf: T) -> Self {
        DmaBufHandle(dmabuf)
    }
}

impl<T: DmaBufSource> PlaneHandle for DmaBufHandle<T> {
    type Memory = DmaBuf;

    fn fill_v4l2_plane(&self, plane: &mut bindings::v4l2_plane) {
        plane.m.fd = self.0.as_raw_fd();
        plane.length = self.0.len() as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsFd;

    #[test]
    fn dmabuf_handle_fills_fd_and_length() {
        let file = std::fs::File::open("/dev/null").unwrap();
        let handle = DmaBufHandle::from(BorrowedDmaBuf {
            fd: file.as_fd(),
            len: 1280 * 720 * 4,
        });
        let mut plane: bindings::v4l2_plane = Default::default();

        handle.fill_v4l2_plane(&mut plane);
        assert_eq!(unsafe { plane.m.fd }, file.as_raw_fd());
        assert_eq!(plane.length, 1280 * 720 * 4);
    }
}
