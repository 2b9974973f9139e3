//! Operations specific to UserPtr-type buffers.
use super::*;
use crate::bindings;

pub struct UserPtr;

impl Memory for UserPtr {
    const MEMORY_TYPE: MemoryType = MemoryType::UserPtr;
}

/// Handle for a USERPTR plane. These buffers are backed by user-allocated memory, which must be
/// physically contiguous for devices without an IOMMU such as the VSP2.
#[derive(Debug)]
pub struct UserPtrHandle<T: AsRef<[u8]> + Debug>(pub T);

impl<T: AsRef<[u8]> + Debug> From<T> for UserPtrHandle<T> {
    fn from(buffer: T) -> Self {
        UserPtrHandle(buffer)
    }
}

impl<T: AsRef<[u8]> + Debug> PlaneHandle for UserPtrHandle<T> {
    type Memory = UserPtr;

    fn fill_v4l2_plane(&self, plane: &mut bindings::v4l2_plane) {
        let slice = self.0.as_ref();

        plane.m.userptr = slice.as_ptr() as std::os::raw::c_ulong;
        plane.length = slice.len() as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn userptr_handle_fills_pointer_and_length() {
        let backing = vec![0u8; 1024];
        let handle = UserPtrHandle::from(&backing[..]);
        let mut plane: bindings::v4l2_plane = Default::default();

        handle.fill_v4l2_plane(&mut plane);
        assert_eq!(plane.length, 1024);
        assert_eq!(
            unsafe { plane.m.userptr },
            backing.as_ptr() as std::os::raw::c_ulong
        );
    }
}
