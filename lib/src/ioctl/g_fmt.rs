//! Safe wrappers for the `VIDIOC_G_FMT` and `VIDIOC_S_FMT` ioctls, limited to the multi-planar
//! `pix_mp` member of `struct v4l2_format`.
use nix::errno::Errno;
use std::convert::{TryFrom, TryInto};
use std::os::unix::io::AsRawFd;
use thiserror::Error;

use crate::bindings;
use crate::bindings::v4l2_format;
use crate::{Format, FormatConversionError, PlaneLayout, QueueType};

impl TryFrom<(QueueType, &Format)> for v4l2_format {
    type Error = FormatConversionError;

    fn try_from((queue, format): (QueueType, &Format)) -> Result<Self, Self::Error> {
        if format.plane_fmt.len() > bindings::VIDEO_MAX_PLANES as usize {
            return Err(Self::Error::TooManyPlanes(format.plane_fmt.len()));
        }

        let mut pix_mp = bindings::v4l2_pix_format_mplane {
            width: format.width,
            height: format.height,
            pixelformat: format.pixelformat.into(),
            field: format.field as u32,
            num_planes: format.plane_fmt.len() as u8,
            flags: format.flags.bits(),
            ..Default::default()
        };

        for (plane, v4l2_plane) in format.plane_fmt.iter().zip(pix_mp.plane_fmt.iter_mut()) {
            *v4l2_plane = plane.into();
        }

        Ok(v4l2_format {
            type_: queue as u32,
            fmt: bindings::v4l2_format__bindgen_ty_1 { pix_mp },
        })
    }
}

impl From<&PlaneLayout> for bindings::v4l2_plane_pix_format {
    fn from(plane: &PlaneLayout) -> Self {
        bindings::v4l2_plane_pix_format {
            sizeimage: plane.sizeimage,
            bytesperline: plane.bytesperline,
            ..Default::default()
        }
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_format;
    nix::ioctl_readwrite!(vidioc_g_fmt, b'V', 4, v4l2_format);
    nix::ioctl_readwrite!(vidioc_s_fmt, b'V', 5, v4l2_format);
}

#[derive(Debug, Error)]
pub enum GFmtError {
    #[error("driver returned a format that cannot be represented")]
    InvalidFormat,
    #[error("{0} queue is not supported by this node")]
    InvalidBufferType(QueueType),
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<GFmtError> for Errno {
    fn from(err: GFmtError) -> Self {
        match err {
            GFmtError::InvalidFormat | GFmtError::InvalidBufferType(_) => Errno::EINVAL,
            GFmtError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `VIDIOC_G_FMT` ioctl.
pub fn g_fmt<O: TryFrom<v4l2_format>>(fd: &impl AsRawFd, queue: QueueType) -> Result<O, GFmtError> {
    let mut fmt = v4l2_format {
        type_: queue as u32,
        ..Default::default()
    };

    match unsafe { ioctl::vidioc_g_fmt(fd.as_raw_fd(), &mut fmt) } {
        Ok(_) => O::try_from(fmt).map_err(|_| GFmtError::InvalidFormat),
        Err(Errno::EINVAL) => Err(GFmtError::InvalidBufferType(queue)),
        Err(e) => Err(GFmtError::IoctlError(e)),
    }
}

#[derive(Debug, Error)]
pub enum SFmtError {
    #[error("requested format cannot be passed to the driver")]
    InvalidRequest,
    #[error("driver returned a format that cannot be represented")]
    InvalidFormat,
    #[error("{0} queue is not supported by this node")]
    InvalidBufferType(QueueType),
    #[error("format cannot be changed while buffers are allocated")]
    DeviceBusy,
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<SFmtError> for Errno {
    fn from(err: SFmtError) -> Self {
        match err {
            SFmtError::InvalidRequest
            | SFmtError::InvalidFormat
            | SFmtError::InvalidBufferType(_) => Errno::EINVAL,
            SFmtError::DeviceBusy => Errno::EBUSY,
            SFmtError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `VIDIOC_S_FMT` ioctl.
///
/// The driver may adjust the requested format, and the adjusted one is returned.
pub fn s_fmt<I: TryInto<v4l2_format>, O: TryFrom<v4l2_format>>(
    fd: &mut impl AsRawFd,
    format: I,
) -> Result<O, SFmtError> {
    let mut fmt: v4l2_format = format.try_into().map_err(|_| SFmtError::InvalidRequest)?;
    let queue = QueueType::n(fmt.type_);

    match unsafe { ioctl::vidioc_s_fmt(fd.as_raw_fd(), &mut fmt) } {
        Ok(_) => O::try_from(fmt).map_err(|_| SFmtError::InvalidFormat),
        Err(Errno::EINVAL) => match queue {
            Some(queue) => Err(SFmtError::InvalidBufferType(queue)),
            None => Err(SFmtError::InvalidRequest),
        },
        Err(Errno::EBUSY) => Err(SFmtError::DeviceBusy),
        Err(e) => Err(SFmtError::IoctlError(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferField, FormatFlags, PixelFormat};

    #[test]
    // Convert from Format to multi-planar v4l2_format and back.
    fn mplane_to_v4l2_format() {
        let argb = Format {
            width: 1280,
            height: 720,
            pixelformat: PixelFormat::ARGB32,
            field: BufferField::None,
            flags: FormatFlags::PREMUL_ALPHA,
            plane_fmt: vec![PlaneLayout {
                sizeimage: 1280 * 720 * 4,
                bytesperline: 1280 * 4,
            }],
        };

        let v4l2_format: v4l2_format = (QueueType::VideoOutputMplane, &argb).try_into().unwrap();
        assert_eq!(v4l2_format.type_, QueueType::VideoOutputMplane as u32);
        // Safe because we just built a multi-planar format.
        let pix_mp = unsafe { v4l2_format.fmt.pix_mp };
        let (width, height, pixelformat, field) =
            (pix_mp.width, pix_mp.height, pix_mp.pixelformat, pix_mp.field);
        assert_eq!((width, height), (1280, 720));
        assert_eq!(pixelformat, u32::from(PixelFormat::ARGB32));
        assert_eq!(field, bindings::v4l2_field_V4L2_FIELD_NONE);
        assert_eq!(pix_mp.num_planes, 1);
        assert_eq!(pix_mp.flags, 0x01);
        let sizeimage = pix_mp.plane_fmt[0].sizeimage;
        assert_eq!(sizeimage, 1280 * 720 * 4);

        let back: Format = v4l2_format.try_into().unwrap();
        assert_eq!(back, argb);
    }

    #[test]
    fn too_many_planes() {
        let mut format = Format::from((PixelFormat::ARGB32, (1280, 720)));
        format.plane_fmt = vec![Default::default(); 9];

        assert_eq!(
            v4l2_format::try_from((QueueType::VideoCaptureMplane, &format)).err(),
            Some(FormatConversionError::TooManyPlanes(9))
        );
    }
}
