//! This library provides the pieces needed to drive the LUT module of a Renesas R-Car VSP2
//! video processing unit from user-space:
//!
//! * The `ioctl` module provides direct, thin wrappers over the V4L2 video and sub-device ioctls
//!   with added safety, including the VSP2 private `VIDIOC_VSP2_LUT_CONFIG` ioctl. Note that
//!   "safety" here is in terms of memory safety: this layer won't guard against passing invalid
//!   data that the ioctls will reject - it just makes sure that data passed from and to the
//!   kernel can be accessed safely.
//!
//! * The `media` module wraps the media controller API, used to discover the entities of the
//!   VSP2 pipeline and to enable the links between them.
//!
//! * The `device` module provides a higher-level abstraction over V4L2 video nodes and their
//!   queues. Strong typing makes sure the queue state machine (allocate, queue, stream on,
//!   dequeue, stream off, release) is followed in order.
//!
//! * The `memory` and `contig` modules model the three V4L2 memory types (MMAP, USERPTR,
//!   DMABUF) and the physically contiguous allocators backing the imported ones.
//!
//! * The `lut` and `pipeline` modules describe the fixed `rpf.0 -> lut -> wpf.0` pipeline
//!   exercised by the `vsp2-lut-test` program.
#[doc(hidden)]
pub mod bindings;
pub mod contig;
pub mod device;
pub mod ioctl;
pub mod lut;
pub mod media;
pub mod memory;
pub mod pipeline;

use std::convert::TryFrom;
use std::fmt;
use std::fmt::{Debug, Display};

use bitflags::bitflags;
use enumn::N;
use thiserror::Error;

/// Possible directions for the queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueueDirection {
    Output,
    Capture,
}

/// Types of queues supported by this library. The VSP2 video nodes only expose the multi-planar
/// API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(u32)]
pub enum QueueType {
    VideoCaptureMplane = bindings::v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
    VideoOutputMplane = bindings::v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE,
}

impl QueueType {
    /// Returns the direction of the queue type (Output or Capture).
    pub fn direction(&self) -> QueueDirection {
        match self {
            QueueType::VideoOutputMplane => QueueDirection::Output,
            QueueType::VideoCaptureMplane => QueueDirection::Capture,
        }
    }
}

impl Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

/// A Fourcc pixel format, used to pass formats to V4L2. It can be converted
/// back and forth from a 32-bit integer, or a 4-bytes string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct PixelFormat(u32);

impl PixelFormat {
    /// 32-bit ARGB 8-8-8-8, stored as B, G, R, A in memory (`V4L2_PIX_FMT_ARGB32`).
    pub const ARGB32: PixelFormat = PixelFormat::from_fourcc(b"BA24");

    pub const fn from_u32(v: u32) -> Self {
        Self(v)
    }

    pub const fn to_u32(self) -> u32 {
        self.0
    }

    pub const fn from_fourcc(n: &[u8; 4]) -> Self {
        Self(n[0] as u32 | (n[1] as u32) << 8 | (n[2] as u32) << 16 | (n[3] as u32) << 24)
    }

    pub const fn to_fourcc(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

/// Converts a Fourcc in 32-bit integer format (like the ones passed in V4L2
/// structures) into the matching pixel format.
///
/// # Examples
///
/// ```
/// # use vsp2r::PixelFormat;
/// // Fourcc representation of ARGB32.
/// let argb32 = u32::from_le(0x34324142);
/// let f = PixelFormat::from(argb32);
/// assert_eq!(f, PixelFormat::ARGB32);
/// assert_eq!(u32::from(f), argb32);
/// ```
impl From<u32> for PixelFormat {
    fn from(i: u32) -> Self {
        Self::from_u32(i)
    }
}

impl From<PixelFormat> for u32 {
    fn from(format: PixelFormat) -> Self {
        format.to_u32()
    }
}

/// Simple way to convert a string litteral (e.g. b"BA24") into a pixel
/// format that can be passed to V4L2.
///
/// # Examples
///
/// ```
/// # use vsp2r::PixelFormat;
/// let argb32 = b"BA24";
/// let f = PixelFormat::from(argb32);
/// assert_eq!(&<[u8; 4]>::from(f), argb32);
/// ```
impl From<&[u8; 4]> for PixelFormat {
    fn from(n: &[u8; 4]) -> Self {
        Self::from_fourcc(n)
    }
}

impl From<PixelFormat> for [u8; 4] {
    fn from(format: PixelFormat) -> Self {
        format.to_fourcc()
    }
}

/// Produces a debug string for this PixelFormat, including its hexadecimal
/// and string representation.
///
/// # Examples
///
/// ```
/// # use vsp2r::PixelFormat;
/// assert_eq!(format!("{:?}", PixelFormat::ARGB32), "0x34324142 (BA24)");
/// ```
impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_fmt(format_args!("0x{:08x} ({})", self.0, self))
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let fourcc = self
            .0
            .to_le_bytes()
            .iter()
            .map(|&x| x as char)
            .collect::<String>();
        f.write_str(fourcc.as_str())
    }
}

/// Equivalent of `enum v4l2_field`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(u32)]
pub enum BufferField {
    #[default]
    Any = bindings::v4l2_field_V4L2_FIELD_ANY,
    None = bindings::v4l2_field_V4L2_FIELD_NONE,
    Top = bindings::v4l2_field_V4L2_FIELD_TOP,
    Bottom = bindings::v4l2_field_V4L2_FIELD_BOTTOM,
    Interlaced = bindings::v4l2_field_V4L2_FIELD_INTERLACED,
    SeqTb = bindings::v4l2_field_V4L2_FIELD_SEQ_TB,
    SeqBt = bindings::v4l2_field_V4L2_FIELD_SEQ_BT,
    Alternate = bindings::v4l2_field_V4L2_FIELD_ALTERNATE,
    InterlacedTb = bindings::v4l2_field_V4L2_FIELD_INTERLACED_TB,
    InterlacedBt = bindings::v4l2_field_V4L2_FIELD_INTERLACED_BT,
}

bitflags! {
    /// `flags` member of `struct v4l2_pix_format_mplane`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FormatFlags: u8 {
        const PREMUL_ALPHA = 0x01;
        const SET_CSC = 0x02;
    }
}

/// Description of a single plane in a format.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct PlaneLayout {
    /// Useful size of the plane ; the backing memory must be at least that large.
    pub sizeimage: u32,
    /// Bytes per line of data.
    pub bytesperline: u32,
}

/// Safe representation of a multi-planar V4L2 format.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Format {
    /// Width of the image in pixels.
    pub width: u32,
    /// Height of the image in pixels.
    pub height: u32,
    /// Format each pixel is encoded in.
    pub pixelformat: PixelFormat,
    pub field: BufferField,
    pub flags: FormatFlags,
    /// Individual layout of each plane in this format. The exact number of planes
    /// is defined by `pixelformat`.
    pub plane_fmt: Vec<PlaneLayout>,
}

impl Format {
    /// Returns whether `other` describes the same image as `self`, i.e. whether the driver
    /// accepted a format as requested. Plane layouts are not compared since drivers are expected
    /// to fill them, but their number is.
    pub fn matches(&self, other: &Format) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.field == other.field
            && self.pixelformat == other.pixelformat
            && self.plane_fmt.len() == other.plane_fmt.len()
            && self.flags == other.flags
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatConversionError {
    #[error("too many planes ({0}) specified")]
    TooManyPlanes(usize),
    #[error("invalid buffer type requested")]
    InvalidBufferType(u32),
    #[error("invalid field value {0}")]
    InvalidField(u32),
}

impl TryFrom<bindings::v4l2_format> for Format {
    type Error = FormatConversionError;

    fn try_from(fmt: bindings::v4l2_format) -> std::result::Result<Self, Self::Error> {
        match QueueType::n(fmt.type_) {
            Some(_) => {
                // Safe because the buffer type tells us the union holds a multi-planar format.
                let pix_mp = unsafe { fmt.fmt.pix_mp };
                let num_planes = pix_mp.num_planes as usize;

                // Can only happen if we passed a malformed v4l2_format.
                if num_planes > bindings::VIDEO_MAX_PLANES as usize {
                    return Err(Self::Error::TooManyPlanes(num_planes));
                }

                let field = pix_mp.field;
                let field = BufferField::n(field).ok_or(Self::Error::InvalidField(field))?;

                let plane_fmt = pix_mp.plane_fmt[..num_planes]
                    .iter()
                    .map(|plane| PlaneLayout {
                        sizeimage: plane.sizeimage,
                        bytesperline: plane.bytesperline,
                    })
                    .collect();

                Ok(Format {
                    width: pix_mp.width,
                    height: pix_mp.height,
                    pixelformat: PixelFormat::from(pix_mp.pixelformat),
                    field,
                    flags: FormatFlags::from_bits_truncate(pix_mp.flags),
                    plane_fmt,
                })
            }
            None => Err(Self::Error::InvalidBufferType(fmt.type_)),
        }
    }
}

/// Quickly build a usable single-plane `Format` from a pixel format and resolution.
///
/// # Examples
///
/// ```
/// # use vsp2r::{Format, PixelFormat};
/// let f = Format::from((PixelFormat::ARGB32, (1280, 720)));
/// assert_eq!(f.width, 1280);
/// assert_eq!(f.height, 720);
/// assert_eq!(f.pixelformat.to_string(), "BA24");
/// assert_eq!(f.plane_fmt.len(), 1);
/// ```
impl<T: Into<PixelFormat>> From<(T, (usize, usize))> for Format {
    fn from((pixel_format, (width, height)): (T, (usize, usize))) -> Self {
        Format {
            width: width as u32,
            height: height as u32,
            pixelformat: pixel_format.into(),
            plane_fmt: vec![Default::default()],
            ..Default::default()
        }
    }
}
