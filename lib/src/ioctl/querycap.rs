//! Safe wrapper for the `VIDIOC_QUERYCAP` ioctl.
use super::string_from_cstr;
use crate::bindings;
use crate::bindings::v4l2_capability;
use bitflags::bitflags;
use nix::errno::Errno;
use std::fmt;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

bitflags! {
    /// Flags returned by the `VIDIOC_QUERYCAP` ioctl into the `capabilities`
    /// or `device_capabilities` field of `v4l2_capability`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const VIDEO_CAPTURE = bindings::V4L2_CAP_VIDEO_CAPTURE;
        const VIDEO_OUTPUT = bindings::V4L2_CAP_VIDEO_OUTPUT;

        const VIDEO_CAPTURE_MPLANE = bindings::V4L2_CAP_VIDEO_CAPTURE_MPLANE;
        const VIDEO_OUTPUT_MPLANE = bindings::V4L2_CAP_VIDEO_OUTPUT_MPLANE;
        const VIDEO_M2M_MPLANE = bindings::V4L2_CAP_VIDEO_M2M_MPLANE;
        const VIDEO_M2M = bindings::V4L2_CAP_VIDEO_M2M;

        const EXT_PIX_FORMAT = bindings::V4L2_CAP_EXT_PIX_FORMAT;
        const META_CAPTURE = bindings::V4L2_CAP_META_CAPTURE;

        const READWRITE = bindings::V4L2_CAP_READWRITE;
        const STREAMING = bindings::V4L2_CAP_STREAMING;
        const META_OUTPUT = bindings::V4L2_CAP_META_OUTPUT;

        const IO_MC = bindings::V4L2_CAP_IO_MC;

        const DEVICE_CAPS = bindings::V4L2_CAP_DEVICE_CAPS;
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Used to get the capability flags from a `VIDIOC_QUERYCAP` ioctl.
impl From<v4l2_capability> for Capabilities {
    fn from(qcap: v4l2_capability) -> Self {
        Capabilities::from_bits_truncate(qcap.capabilities)
    }
}

/// Safe variant of the `v4l2_capability` struct, to be used with `querycap`.
#[derive(Debug)]
pub struct Capability {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub version: u32,
    pub capabilities: Capabilities,
    pub device_caps: Option<Capabilities>,
}

impl Capability {
    /// Returns the set of capabilities of the hardware as a whole.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Returns the capabilities that apply to the currently opened V4L2 node.
    ///
    /// Drivers that report per-node capabilities set `DEVICE_CAPS`, in which case `device_caps`
    /// is authoritative. Otherwise the global capabilities are used.
    pub fn device_caps(&self) -> Capabilities {
        self.device_caps
            .unwrap_or_else(|| self.capabilities.difference(Capabilities::DEVICE_CAPS))
    }
}

impl From<v4l2_capability> for Capability {
    fn from(qcap: v4l2_capability) -> Self {
        Capability {
            driver: string_from_cstr(&qcap.driver).unwrap_or_else(|_| "".into()),
            card: string_from_cstr(&qcap.card).unwrap_or_else(|_| "".into()),
            bus_info: string_from_cstr(&qcap.bus_info).unwrap_or_else(|_| "".into()),
            version: qcap.version,
            capabilities: Capabilities::from_bits_truncate(qcap.capabilities),
            device_caps: if qcap.capabilities & bindings::V4L2_CAP_DEVICE_CAPS != 0 {
                Some(Capabilities::from_bits_truncate(qcap.device_caps))
            } else {
                None
            },
        }
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_capability;
    nix::ioctl_read!(vidioc_querycap, b'V', 0, v4l2_capability);
}

#[derive(Debug, Error)]
pub enum QueryCapError {
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<QueryCapError> for Errno {
    fn from(err: QueryCapError) -> Self {
        match err {
            QueryCapError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `VIDIOC_QUERYCAP` ioctl.
pub fn querycap<T: From<v4l2_capability>>(fd: &impl AsRawFd) -> Result<T, QueryCapError> {
    let mut qcap: v4l2_capability = Default::default();

    match unsafe { ioctl::vidioc_querycap(fd.as_raw_fd(), &mut qcap) } {
        Ok(_) => Ok(T::from(qcap)),
        Err(e) => Err(QueryCapError::IoctlError(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_capability(capabilities: u32, device_caps: u32) -> v4l2_capability {
        let mut qcap = v4l2_capability {
            capabilities,
            device_caps,
            ..Default::default()
        };
        qcap.driver[..9].copy_from_slice(b"vsp1\0\0\0\0\0");
        qcap.bus_info[..22].copy_from_slice(b"platform:fe9a0000.vsp\0");
        qcap
    }

    #[test]
    fn device_caps_preferred_when_reported() {
        let cap = Capability::from(raw_capability(
            bindings::V4L2_CAP_DEVICE_CAPS
                | bindings::V4L2_CAP_VIDEO_CAPTURE_MPLANE
                | bindings::V4L2_CAP_VIDEO_OUTPUT_MPLANE
                | bindings::V4L2_CAP_STREAMING,
            bindings::V4L2_CAP_VIDEO_OUTPUT_MPLANE | bindings::V4L2_CAP_STREAMING,
        ));

        assert_eq!(cap.driver, "vsp1");
        assert_eq!(cap.bus_info, "platform:fe9a0000.vsp");
        assert_eq!(
            cap.device_caps(),
            Capabilities::VIDEO_OUTPUT_MPLANE | Capabilities::STREAMING
        );
        assert!(!cap
            .device_caps()
            .contains(Capabilities::VIDEO_CAPTURE_MPLANE));
    }

    #[test]
    fn global_caps_used_without_device_caps() {
        let cap = Capability::from(raw_capability(
            bindings::V4L2_CAP_VIDEO_CAPTURE_MPLANE | bindings::V4L2_CAP_STREAMING,
            // Must be ignored since DEVICE_CAPS is not set.
            bindings::V4L2_CAP_VIDEO_OUTPUT_MPLANE,
        ));

        assert!(cap.device_caps.is_none());
        assert_eq!(
            cap.device_caps(),
            Capabilities::VIDEO_CAPTURE_MPLANE | Capabilities::STREAMING
        );
    }
}
