//! Abstracts the different kinds of backing memory (`MMAP`, `USERPTR`, `DMABUF`) supported by
//! V4L2.
//!
//! V4L2 allows to use either memory that is provided by the device itself (MMAP) or memory
//! imported via user allocation (USERPTR) or the dma-buf subsystem (DMABUF).
//!
//! The `Memory` trait represents these memory types and is thus implemented by exactly 3 types:
//! `Mmap`, `UserPtr`, and `DmaBuf`. These types do very little apart from providing a constant
//! with the corresponding V4L2 memory type they model.
//!
//! The `PlaneHandle` trait is used by types which can bind to one of these memory types, i.e. a
//! type that can represent a single memory plane of a buffer. For `Mmap` memory this is a void
//! type (since `MMAP` provides its own memory). For `UserPtr`, any byte slice can be used as
//! backing memory, and for `DmaBuf` we will use a file descriptor.
mod dmabuf;
mod mmap;
mod userptr;

pub use dmabuf::*;
pub use mmap::*;
pub use userptr::*;

use std::fmt::{self, Debug, Display};

use enumn::N;

use crate::bindings;

/// All the supported V4L2 memory types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, N)]
#[repr(u32)]
pub enum MemoryType {
    Mmap = bindings::v4l2_memory_V4L2_MEMORY_MMAP,
    UserPtr = bindings::v4l2_memory_V4L2_MEMORY_USERPTR,
    DmaBuf = bindings::v4l2_memory_V4L2_MEMORY_DMABUF,
}

impl Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemoryType::Mmap => "MMAP",
            MemoryType::UserPtr => "USERPTR",
            MemoryType::DmaBuf => "DMABUF",
        })
    }
}

/// Trait describing a memory type that can be used to back V4L2 buffers.
pub trait Memory: 'static {
    /// The memory type represented.
    const MEMORY_TYPE: MemoryType;
}

/// Trait for a handle that represents actual data for a single plane. A buffer will have as many
/// of these as it has planes.
pub trait PlaneHandle: Debug {
    /// The kind of memory the handle attaches to.
    type Memory: Memory;

    /// Fill a plane of a multi-planar V4L2 buffer with the handle's information.
    fn fill_v4l2_plane(&self, plane: &mut bindings::v4l2_plane);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_type_values() {
        assert_eq!(MemoryType::Mmap as u32, 1);
        assert_eq!(MemoryType::UserPtr as u32, 2);
        assert_eq!(MemoryType::DmaBuf as u32, 4);
        assert_eq!(MemoryType::n(3), None);
        assert_eq!(MemoryType::n(4), Some(MemoryType::DmaBuf));
    }

    #[test]
    fn memory_type_names() {
        assert_eq!(MemoryType::Mmap.to_string(), "MMAP");
        assert_eq!(MemoryType::UserPtr.to_string(), "USERPTR");
        assert_eq!(MemoryType::DmaBuf.to_string(), "DMABUF");
    }
}
