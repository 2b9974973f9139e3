//! Subset of the Linux UAPI used by this crate (`videodev2.h`, `v4l2-subdev.h`, `media.h`,
//! `dma-buf.h` and the VSP2 private LUT ioctl).
//!
//! Only the structures and constants we actually use are present. Their names follow bindgen's
//! conventions so code reads the same as code written against generated bindings.
#![allow(dead_code)]
#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(clippy::all)]

use std::mem;
use std::os::raw::{c_ulong, c_void};

pub use nix::libc::timeval;

pub const VIDEO_MAX_PLANES: u32 = 8;
pub const BASE_VIDIOC_PRIVATE: u32 = 192;

pub type v4l2_buf_type = u32;
pub const v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE: v4l2_buf_type = 1;
pub const v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_OUTPUT: v4l2_buf_type = 2;
pub const v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE: v4l2_buf_type = 9;
pub const v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE: v4l2_buf_type = 10;

pub type v4l2_memory = u32;
pub const v4l2_memory_V4L2_MEMORY_MMAP: v4l2_memory = 1;
pub const v4l2_memory_V4L2_MEMORY_USERPTR: v4l2_memory = 2;
pub const v4l2_memory_V4L2_MEMORY_OVERLAY: v4l2_memory = 3;
pub const v4l2_memory_V4L2_MEMORY_DMABUF: v4l2_memory = 4;

pub type v4l2_field = u32;
pub const v4l2_field_V4L2_FIELD_ANY: v4l2_field = 0;
pub const v4l2_field_V4L2_FIELD_NONE: v4l2_field = 1;
pub const v4l2_field_V4L2_FIELD_TOP: v4l2_field = 2;
pub const v4l2_field_V4L2_FIELD_BOTTOM: v4l2_field = 3;
pub const v4l2_field_V4L2_FIELD_INTERLACED: v4l2_field = 4;
pub const v4l2_field_V4L2_FIELD_SEQ_TB: v4l2_field = 5;
pub const v4l2_field_V4L2_FIELD_SEQ_BT: v4l2_field = 6;
pub const v4l2_field_V4L2_FIELD_ALTERNATE: v4l2_field = 7;
pub const v4l2_field_V4L2_FIELD_INTERLACED_TB: v4l2_field = 8;
pub const v4l2_field_V4L2_FIELD_INTERLACED_BT: v4l2_field = 9;

pub const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x00000001;
pub const V4L2_CAP_VIDEO_OUTPUT: u32 = 0x00000002;
pub const V4L2_CAP_VIDEO_CAPTURE_MPLANE: u32 = 0x00001000;
pub const V4L2_CAP_VIDEO_OUTPUT_MPLANE: u32 = 0x00002000;
pub const V4L2_CAP_VIDEO_M2M_MPLANE: u32 = 0x00004000;
pub const V4L2_CAP_VIDEO_M2M: u32 = 0x00008000;
pub const V4L2_CAP_EXT_PIX_FORMAT: u32 = 0x00200000;
pub const V4L2_CAP_META_CAPTURE: u32 = 0x00800000;
pub const V4L2_CAP_READWRITE: u32 = 0x01000000;
pub const V4L2_CAP_STREAMING: u32 = 0x04000000;
pub const V4L2_CAP_META_OUTPUT: u32 = 0x08000000;
pub const V4L2_CAP_IO_MC: u32 = 0x20000000;
pub const V4L2_CAP_DEVICE_CAPS: u32 = 0x80000000;

pub const V4L2_BUF_FLAG_MAPPED: u32 = 0x00000001;
pub const V4L2_BUF_FLAG_QUEUED: u32 = 0x00000002;
pub const V4L2_BUF_FLAG_DONE: u32 = 0x00000004;
pub const V4L2_BUF_FLAG_ERROR: u32 = 0x00000040;
pub const V4L2_BUF_FLAG_PREPARED: u32 = 0x00000400;
pub const V4L2_BUF_FLAG_TIMESTAMP_MONOTONIC: u32 = 0x00002000;
pub const V4L2_BUF_FLAG_TIMESTAMP_COPY: u32 = 0x00004000;
pub const V4L2_BUF_FLAG_LAST: u32 = 0x00100000;

pub const V4L2_BUF_CAP_SUPPORTS_MMAP: u32 = 0x00000001;
pub const V4L2_BUF_CAP_SUPPORTS_USERPTR: u32 = 0x00000002;
pub const V4L2_BUF_CAP_SUPPORTS_DMABUF: u32 = 0x00000004;
pub const V4L2_BUF_CAP_SUPPORTS_REQUESTS: u32 = 0x00000008;
pub const V4L2_BUF_CAP_SUPPORTS_ORPHANED_BUFS: u32 = 0x00000010;

pub const V4L2_SUBDEV_FORMAT_TRY: u32 = 0;
pub const V4L2_SUBDEV_FORMAT_ACTIVE: u32 = 1;

pub const MEDIA_BUS_FMT_ARGB8888_1X32: u32 = 0x100d;

pub const MEDIA_ENT_ID_FLAG_NEXT: u32 = 1 << 31;
pub const MEDIA_PAD_FL_SINK: u32 = 1 << 0;
pub const MEDIA_PAD_FL_SOURCE: u32 = 1 << 1;
pub const MEDIA_LNK_FL_ENABLED: u32 = 1 << 0;
pub const MEDIA_LNK_FL_IMMUTABLE: u32 = 1 << 1;
pub const MEDIA_LNK_FL_DYNAMIC: u32 = 1 << 2;

pub const DMA_BUF_SYNC_READ: u64 = 1 << 0;
pub const DMA_BUF_SYNC_WRITE: u64 = 1 << 1;
pub const DMA_BUF_SYNC_RW: u64 = DMA_BUF_SYNC_READ | DMA_BUF_SYNC_WRITE;
pub const DMA_BUF_SYNC_START: u64 = 0 << 2;
pub const DMA_BUF_SYNC_END: u64 = 1 << 2;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct v4l2_capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

#[repr(C, packed)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct v4l2_plane_pix_format {
    pub sizeimage: u32,
    pub bytesperline: u32,
    pub reserved: [u16; 6],
}

#[repr(C, packed)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct v4l2_pix_format_mplane {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub colorspace: u32,
    pub plane_fmt: [v4l2_plane_pix_format; VIDEO_MAX_PLANES as usize],
    pub num_planes: u8,
    pub flags: u8,
    pub ycbcr_enc: u8,
    pub quantization: u8,
    pub xfer_func: u8,
    pub reserved: [u8; 7],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union v4l2_format__bindgen_ty_1 {
    pub pix_mp: v4l2_pix_format_mplane,
    pub raw_data: [u8; 200],
    // `struct v4l2_window` contains pointers, which gives the union pointer alignment.
    _align: [*mut c_void; 0],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format__bindgen_ty_1,
}

impl Default for v4l2_format {
    fn default() -> Self {
        // Safe because all-zeroes is a valid value for every member of the union.
        unsafe { mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union v4l2_plane__bindgen_ty_1 {
    pub mem_offset: u32,
    pub userptr: c_ulong,
    pub fd: i32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct v4l2_plane {
    pub bytesused: u32,
    pub length: u32,
    pub m: v4l2_plane__bindgen_ty_1,
    pub data_offset: u32,
    pub reserved: [u32; 11],
}

impl Default for v4l2_plane {
    fn default() -> Self {
        // Safe because all-zeroes is a valid value for every member of the union.
        unsafe { mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union v4l2_buffer__bindgen_ty_1 {
    pub offset: u32,
    pub userptr: c_ulong,
    pub planes: *mut v4l2_plane,
    pub fd: i32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union v4l2_buffer__bindgen_ty_2 {
    pub request_fd: i32,
    pub reserved: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer__bindgen_ty_1,
    pub length: u32,
    pub reserved2: u32,
    pub __bindgen_anon_1: v4l2_buffer__bindgen_ty_2,
}

impl Default for v4l2_buffer {
    fn default() -> Self {
        // Safe because all-zeroes is a valid value for every member, the `planes` pointer
        // included (it is only dereferenced by the kernel for multi-planar buffers, after we set
        // it).
        unsafe { mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct v4l2_mbus_framefmt {
    pub width: u32,
    pub height: u32,
    pub code: u32,
    pub field: u32,
    pub colorspace: u32,
    pub ycbcr_enc: u16,
    pub quantization: u16,
    pub xfer_func: u16,
    pub flags: u16,
    pub reserved: [u16; 10],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct v4l2_subdev_format {
    pub which: u32,
    pub pad: u32,
    pub format: v4l2_mbus_framefmt,
    pub stream: u32,
    pub reserved: [u32; 7],
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct media_device_info {
    pub driver: [u8; 16],
    pub model: [u8; 32],
    pub serial: [u8; 40],
    pub bus_info: [u8; 32],
    pub media_version: u32,
    pub hw_revision: u32,
    pub driver_version: u32,
    pub reserved: [u32; 31],
}

impl Default for media_device_info {
    fn default() -> Self {
        unsafe { mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct media_entity_desc__bindgen_ty_1__bindgen_ty_1 {
    pub major: u32,
    pub minor: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union media_entity_desc__bindgen_ty_1 {
    pub dev: media_entity_desc__bindgen_ty_1__bindgen_ty_1,
    pub raw: [u8; 184],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct media_entity_desc {
    pub id: u32,
    pub name: [u8; 32],
    pub type_: u32,
    pub revision: u32,
    pub flags: u32,
    pub group_id: u32,
    pub pads: u16,
    pub links: u16,
    pub reserved: [u32; 4],
    pub __bindgen_anon_1: media_entity_desc__bindgen_ty_1,
}

impl Default for media_entity_desc {
    fn default() -> Self {
        unsafe { mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct media_pad_desc {
    pub entity: u32,
    pub index: u16,
    pub flags: u32,
    pub reserved: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct media_link_desc {
    pub source: media_pad_desc,
    pub sink: media_pad_desc,
    pub flags: u32,
    pub reserved: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct media_links_enum {
    pub entity: u32,
    pub pads: *mut media_pad_desc,
    pub links: *mut media_link_desc,
    pub reserved: [u32; 4],
}

/// Argument of the `VIDIOC_VSP2_LUT_CONFIG` ioctl. `addr` points to `tbl_num` pairs of 32-bit
/// words (register offset, value), i.e. `tbl_num * 8` bytes.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct vsp2_lut_config {
    pub addr: *mut c_void,
    pub tbl_num: u16,
    pub fxa: u8,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct dma_buf_sync {
    pub flags: u64,
}

#[cfg(all(test, target_pointer_width = "64"))]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn v4l2_struct_sizes() {
        assert_eq!(size_of::<v4l2_capability>(), 104);
        assert_eq!(size_of::<v4l2_plane_pix_format>(), 20);
        assert_eq!(size_of::<v4l2_pix_format_mplane>(), 192);
        assert_eq!(size_of::<v4l2_format>(), 208);
        assert_eq!(size_of::<v4l2_requestbuffers>(), 20);
        assert_eq!(size_of::<v4l2_plane>(), 64);
        assert_eq!(size_of::<v4l2_buffer>(), 88);
    }

    #[test]
    fn subdev_struct_sizes() {
        assert_eq!(size_of::<v4l2_mbus_framefmt>(), 48);
        assert_eq!(size_of::<v4l2_subdev_format>(), 88);
    }

    #[test]
    fn media_struct_sizes() {
        assert_eq!(size_of::<media_device_info>(), 256);
        assert_eq!(size_of::<media_entity_desc>(), 256);
        assert_eq!(size_of::<media_pad_desc>(), 20);
        assert_eq!(size_of::<media_link_desc>(), 52);
        assert_eq!(size_of::<media_links_enum>(), 40);
    }

    #[test]
    fn private_struct_sizes() {
        assert_eq!(size_of::<vsp2_lut_config>(), 16);
        assert_eq!(size_of::<dma_buf_sync>(), 8);
    }
}
