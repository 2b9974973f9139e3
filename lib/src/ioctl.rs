//! Thin, safe wrappers around the ioctls needed to drive the VSP2.
//!
//! Each ioctl gets a function that only takes the fields user-space is expected to provide, and
//! returns the fields filled by the kernel converted into whatever type the caller asks for. For
//! instance [`g_fmt()`] only needs a queue type, and can return either a raw `v4l2_format` or a
//! validated [`crate::Format`]:
//!
//! ```text
//! pub fn g_fmt<O: TryFrom<bindings::v4l2_format>>(
//!     fd: &impl AsRawFd,
//!     queue: QueueType,
//! ) -> Result<O, GFmtError>;
//! ```
//!
//! Every ioctl has its own error type. Error codes with a well-known meaning for that ioctl get
//! their own variant (e.g. `EPIPE` on `VIDIOC_STREAMON` means two linked pads disagree on their
//! format), and everything else ends up in `IoctlError`. All error types convert back into the
//! `Errno` they originate from.
//!
//! Three families of ioctls are covered:
//!
//! * the multi-planar video node ioctls (`VIDIOC_*`),
//! * the sub-device pad format ioctls (`VIDIOC_SUBDEV_[GS]_FMT`) and the VSP2 private
//!   `VIDIOC_VSP2_LUT_CONFIG`,
//! * `DMA_BUF_IOCTL_SYNC`.
//!
//! The media controller ioctls live in [`crate::media`].

mod dma_buf_sync;
mod dqbuf;
mod g_fmt;
mod mmap;
mod qbuf;
mod querybuf;
mod querycap;
mod reqbufs;
mod streamon;
mod subdev_fmt;
mod vsp2_lut;

pub use dma_buf_sync::*;
pub use dqbuf::*;
pub use g_fmt::*;
pub use mmap::*;
pub use qbuf::*;
pub use querybuf::*;
pub use querycap::*;
pub use reqbufs::*;
pub use streamon::*;
pub use subdev_fmt::*;
pub use vsp2_lut::*;

use std::ffi::{CStr, FromBytesUntilNulError};

use bitflags::bitflags;

use crate::bindings;

/// Decodes a fixed-size, nul-terminated string field of a kernel structure.
pub(crate) fn string_from_cstr(c_str: &[u8]) -> Result<String, FromBytesUntilNulError> {
    Ok(CStr::from_bytes_until_nul(c_str)?
        .to_string_lossy()
        .into_owned())
}

/// A memory area we can pass to ioctls in order to get/set plane information
/// with the multi-planar API.
pub(crate) type V4l2BufferPlanes = [bindings::v4l2_plane; bindings::VIDEO_MAX_PLANES as usize];

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    /// `flags` member of `struct `v4l2_buffer`.
    pub struct BufferFlags: u32 {
        const MAPPED = bindings::V4L2_BUF_FLAG_MAPPED;
        const QUEUED = bindings::V4L2_BUF_FLAG_QUEUED;
        const DONE = bindings::V4L2_BUF_FLAG_DONE;
        const ERROR = bindings::V4L2_BUF_FLAG_ERROR;
        const PREPARED = bindings::V4L2_BUF_FLAG_PREPARED;
        const LAST = bindings::V4L2_BUF_FLAG_LAST;
        const TIMESTAMP_MONOTONIC = bindings::V4L2_BUF_FLAG_TIMESTAMP_MONOTONIC;
        const TIMESTAMP_COPY = bindings::V4L2_BUF_FLAG_TIMESTAMP_COPY;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_from_cstr_stops_at_nul() {
        let mut raw = [0u8; 32];
        raw[..13].copy_from_slice(b"fe9a0000.vsp\0");
        assert_eq!(string_from_cstr(&raw).unwrap(), "fe9a0000.vsp");
    }

    #[test]
    fn string_from_cstr_without_nul() {
        assert!(string_from_cstr(b"vsp2").is_err());
    }

    #[test]
    fn errno_conversion() {
        let err = StreamOffError::IoctlError(nix::errno::Errno::EBUSY);
        assert_eq!(nix::errno::Errno::from(err), nix::errno::Errno::EBUSY);
    }
}
