//! Safe wrapper for the VSP2 private `VIDIOC_VSP2_LUT_CONFIG` ioctl.
use log::debug;
use nix::errno::Errno;
use std::os::raw::c_void;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

use crate::bindings::vsp2_lut_config;
use crate::lut::LutTable;

/// Maximum number of entries the LUT module accepts.
pub const VSP2_LUT_MAX_ENTRIES: usize = 256;

#[doc(hidden)]
mod ioctl {
    use crate::bindings::vsp2_lut_config;
    use crate::bindings::BASE_VIDIOC_PRIVATE;
    nix::ioctl_readwrite!(
        vidioc_vsp2_lut_config,
        b'V',
        BASE_VIDIOC_PRIVATE + 1,
        vsp2_lut_config
    );
}

#[derive(Debug, Error)]
pub enum Vsp2LutConfigError {
    #[error("LUT table must have between 1 and 256 entries, got {0}")]
    InvalidTableSize(usize),
    #[error("table or fxa value rejected by the driver")]
    InvalidConfig,
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<Vsp2LutConfigError> for Errno {
    fn from(err: Vsp2LutConfigError) -> Self {
        match err {
            Vsp2LutConfigError::InvalidTableSize(_) => Errno::EINVAL,
            Vsp2LutConfigError::InvalidConfig => Errno::EINVAL,
            Vsp2LutConfigError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `VIDIOC_VSP2_LUT_CONFIG` ioctl. `fd` must be the LUT sub-device.
///
/// The driver copies the table during the call, so `table` only needs to live until this
/// function returns.
pub fn vsp2_lut_config(
    fd: &impl AsRawFd,
    table: &LutTable,
    fxa: u8,
) -> Result<(), Vsp2LutConfigError> {
    let entries = table.entries();
    if entries.is_empty() || entries.len() > VSP2_LUT_MAX_ENTRIES {
        return Err(Vsp2LutConfigError::InvalidTableSize(entries.len()));
    }

    let mut config = vsp2_lut_config {
        // The kernel only reads through this pointer.
        addr: entries.as_ptr() as *mut c_void,
        tbl_num: entries.len() as u16,
        fxa,
    };

    debug!(
        "Configuring LUT with {} entries, fxa 0x{:02x}",
        config.tbl_num, config.fxa
    );

    match unsafe { ioctl::vidioc_vsp2_lut_config(fd.as_raw_fd(), &mut config) } {
        Ok(_) => Ok(()),
        Err(Errno::EINVAL) => Err(Vsp2LutConfigError::InvalidConfig),
        Err(e) => Err(Vsp2LutConfigError::IoctlError(e)),
    }
}
