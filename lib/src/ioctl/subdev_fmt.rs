//! Safe wrappers for the `VIDIOC_SUBDEV_(G|S)_FMT` ioctls, used to set the media bus format of
//! sub-device pads.
use enumn::N;
use nix::errno::Errno;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

use crate::bindings;
use crate::bindings::v4l2_mbus_framefmt;
use crate::bindings::v4l2_subdev_format;
use crate::BufferField;

/// Whether a sub-device format applies to the hardware or only to the file handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, N)]
#[repr(u32)]
pub enum SubdevFormatWhich {
    Try = bindings::V4L2_SUBDEV_FORMAT_TRY,
    Active = bindings::V4L2_SUBDEV_FORMAT_ACTIVE,
}

/// Safe variant of `struct v4l2_mbus_framefmt`, limited to the members we negotiate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MbusFrameFormat {
    pub width: u32,
    pub height: u32,
    /// Media bus pixel code, e.g. `MEDIA_BUS_FMT_ARGB8888_1X32`.
    pub code: u32,
    pub field: BufferField,
}

impl From<&MbusFrameFormat> for v4l2_mbus_framefmt {
    fn from(format: &MbusFrameFormat) -> Self {
        v4l2_mbus_framefmt {
            width: format.width,
            height: format.height,
            code: format.code,
            field: format.field as u32,
            ..Default::default()
        }
    }
}

impl From<v4l2_mbus_framefmt> for MbusFrameFormat {
    fn from(format: v4l2_mbus_framefmt) -> Self {
        MbusFrameFormat {
            width: format.width,
            height: format.height,
            code: format.code,
            field: BufferField::n(format.field).unwrap_or_default(),
        }
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_subdev_format;
    nix::ioctl_readwrite!(vidioc_subdev_g_fmt, b'V', 4, v4l2_subdev_format);
    nix::ioctl_readwrite!(vidioc_subdev_s_fmt, b'V', 5, v4l2_subdev_format);
}

#[derive(Debug, Error)]
pub enum SubdevFmtError {
    #[error("invalid pad {0}")]
    InvalidPad(u32),
    #[error("sub-device is busy streaming")]
    Busy,
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<SubdevFmtError> for Errno {
    fn from(err: SubdevFmtError) -> Self {
        match err {
            SubdevFmtError::InvalidPad(_) => Errno::EINVAL,
            SubdevFmtError::Busy => Errno::EBUSY,
            SubdevFmtError::IoctlError(e) => e,
        }
    }
}

fn subdev_error(pad: u32, errno: Errno) -> SubdevFmtError {
    match errno {
        Errno::EINVAL => SubdevFmtError::InvalidPad(pad),
        Errno::EBUSY => SubdevFmtError::Busy,
        e => SubdevFmtError::IoctlError(e),
    }
}

/// Safe wrapper around the `VIDIOC_SUBDEV_G_FMT` ioctl.
pub fn subdev_g_fmt<O: From<v4l2_mbus_framefmt>>(
    fd: &impl AsRawFd,
    pad: u32,
    which: SubdevFormatWhich,
) -> Result<O, SubdevFmtError> {
    let mut fmt = v4l2_subdev_format {
        which: which as u32,
        pad,
        ..Default::default()
    };

    match unsafe { ioctl::vidioc_subdev_g_fmt(fd.as_raw_fd(), &mut fmt) } {
        Ok(_) => Ok(O::from(fmt.format)),
        Err(e) => Err(subdev_error(pad, e)),
    }
}

/// Safe wrapper around the `VIDIOC_SUBDEV_S_FMT` ioctl.
///
/// The driver may adjust the format, in which case the returned format differs from `format`.
pub fn subdev_s_fmt<O: From<v4l2_mbus_framefmt>>(
    fd: &impl AsRawFd,
    pad: u32,
    which: SubdevFormatWhich,
    format: &MbusFrameFormat,
) -> Result<O, SubdevFmtError> {
    let mut fmt = v4l2_subdev_format {
        which: which as u32,
        pad,
        format: format.into(),
        ..Default::default()
    };

    match unsafe { ioctl::vidioc_subdev_s_fmt(fd.as_raw_fd(), &mut fmt) } {
        Ok(_) => Ok(O::from(fmt.format)),
        Err(e) => Err(subdev_error(pad, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mbus_format_conversion() {
        let format = MbusFrameFormat {
            width: 1280,
            height: 720,
            code: bindings::MEDIA_BUS_FMT_ARGB8888_1X32,
            field: BufferField::Any,
        };

        let raw = v4l2_mbus_framefmt::from(&format);
        assert_eq!(raw.code, 0x100d);
        assert_eq!(raw.field, 0);
        assert_eq!(raw.colorspace, 0);
        assert_eq!(MbusFrameFormat::from(raw), format);
    }

    #[test]
    fn subdev_errno_mapping() {
        assert!(matches!(
            subdev_error(3, Errno::EINVAL),
            SubdevFmtError::InvalidPad(3)
        ));
        assert!(matches!(subdev_error(0, Errno::EBUSY), SubdevFmtError::Busy));
    }
}
