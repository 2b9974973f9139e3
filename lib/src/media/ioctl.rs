//! Safe wrappers for the media controller ioctls (`MEDIA_IOC_*`).
use nix::errno::Errno;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

use crate::bindings;
use crate::bindings::{
    media_device_info, media_entity_desc, media_link_desc, media_links_enum, media_pad_desc,
};

#[doc(hidden)]
mod ioctl {
    use crate::bindings::{media_device_info, media_entity_desc, media_link_desc, media_links_enum};
    nix::ioctl_readwrite!(media_ioc_device_info, b'|', 0x00, media_device_info);
    nix::ioctl_readwrite!(media_ioc_enum_entities, b'|', 0x01, media_entity_desc);
    nix::ioctl_readwrite!(media_ioc_enum_links, b'|', 0x02, media_links_enum);
    nix::ioctl_readwrite!(media_ioc_setup_link, b'|', 0x03, media_link_desc);
}

#[derive(Debug, Error)]
pub enum DeviceInfoError {
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<DeviceInfoError> for Errno {
    fn from(err: DeviceInfoError) -> Self {
        match err {
            DeviceInfoError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `MEDIA_IOC_DEVICE_INFO` ioctl.
pub fn device_info<O: From<media_device_info>>(fd: &impl AsRawFd) -> Result<O, DeviceInfoError> {
    let mut info: media_device_info = Default::default();

    match unsafe { ioctl::media_ioc_device_info(fd.as_raw_fd(), &mut info) } {
        Ok(_) => Ok(O::from(info)),
        Err(e) => Err(DeviceInfoError::IoctlError(e)),
    }
}

#[derive(Debug, Error)]
pub enum EnumEntitiesError {
    #[error("no entity after id {0}")]
    NoMoreEntities(u32),
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<EnumEntitiesError> for Errno {
    fn from(err: EnumEntitiesError) -> Self {
        match err {
            EnumEntitiesError::NoMoreEntities(_) => Errno::EINVAL,
            EnumEntitiesError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `MEDIA_IOC_ENUM_ENTITIES` ioctl.
///
/// Returns the first entity whose id is strictly greater than `after`. Start with `after == 0`
/// and pass the id of the last returned entity to walk the whole graph.
pub fn enum_next_entity<O: From<media_entity_desc>>(
    fd: &impl AsRawFd,
    after: u32,
) -> Result<O, EnumEntitiesError> {
    let mut desc = media_entity_desc {
        id: after | bindings::MEDIA_ENT_ID_FLAG_NEXT,
        ..Default::default()
    };

    match unsafe { ioctl::media_ioc_enum_entities(fd.as_raw_fd(), &mut desc) } {
        Ok(_) => Ok(O::from(desc)),
        Err(Errno::EINVAL) => Err(EnumEntitiesError::NoMoreEntities(after)),
        Err(e) => Err(EnumEntitiesError::IoctlError(e)),
    }
}

#[derive(Debug, Error)]
pub enum EnumLinksError {
    #[error("invalid entity {0}")]
    InvalidEntity(u32),
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<EnumLinksError> for Errno {
    fn from(err: EnumLinksError) -> Self {
        match err {
            EnumLinksError::InvalidEntity(_) => Errno::EINVAL,
            EnumLinksError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `MEDIA_IOC_ENUM_LINKS` ioctl.
///
/// `num_pads` and `num_links` must be the counts reported by `MEDIA_IOC_ENUM_ENTITIES` for
/// `entity`. Only the outbound links of `entity` are returned by the kernel.
pub fn enum_links(
    fd: &impl AsRawFd,
    entity: u32,
    num_pads: usize,
    num_links: usize,
) -> Result<(Vec<media_pad_desc>, Vec<media_link_desc>), EnumLinksError> {
    let mut pads = vec![media_pad_desc::default(); num_pads];
    let mut links = vec![media_link_desc::default(); num_links];

    let mut links_enum = media_links_enum {
        entity,
        pads: pads.as_mut_ptr(),
        links: links.as_mut_ptr(),
        reserved: Default::default(),
    };

    match unsafe { ioctl::media_ioc_enum_links(fd.as_raw_fd(), &mut links_enum) } {
        Ok(_) => Ok((pads, links)),
        Err(Errno::EINVAL) => Err(EnumLinksError::InvalidEntity(entity)),
        Err(e) => Err(EnumLinksError::IoctlError(e)),
    }
}

#[derive(Debug, Error)]
pub enum SetupLinkError {
    #[error("link does not exist or is immutable")]
    InvalidLink,
    #[error("link is in use by a running pipeline")]
    Busy,
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<SetupLinkError> for Errno {
    fn from(err: SetupLinkError) -> Self {
        match err {
            SetupLinkError::InvalidLink => Errno::EINVAL,
            SetupLinkError::Busy => Errno::EBUSY,
            SetupLinkError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `MEDIA_IOC_SETUP_LINK` ioctl.
pub fn setup_link(
    fd: &impl AsRawFd,
    source: media_pad_desc,
    sink: media_pad_desc,
    flags: u32,
) -> Result<(), SetupLinkError> {
    let mut link = media_link_desc {
        source,
        sink,
        flags,
        ..Default::default()
    };

    match unsafe { ioctl::media_ioc_setup_link(fd.as_raw_fd(), &mut link) } {
        Ok(_) => Ok(()),
        Err(Errno::EINVAL) => Err(SetupLinkError::InvalidLink),
        Err(Errno::EBUSY) => Err(SetupLinkError::Busy),
        Err(e) => Err(SetupLinkError::IoctlError(e)),
    }
}
