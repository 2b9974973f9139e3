//! Higher-level abstraction over V4L2 video nodes and their queues.
//!
//! A [`VideoNode`] is an opened video device node. Its queues are obtained as [`Queue`] objects
//! whose type encodes both the direction of the queue and its allocation state, so that the
//! V4L2 buffer state machine can only be followed in order.
pub mod queue;

pub use queue::*;

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use crate::ioctl::{self, Capabilities, Capability, QueryCapError};

#[derive(Debug, Error)]
pub enum VideoNodeOpenError {
    #[error("error while opening {0}: {1}")]
    Open(PathBuf, io::Error),
    #[error("error while querying capabilities: {0}")]
    QueryCap(#[from] QueryCapError),
}

#[derive(Debug, Error)]
#[error("{} does not support {missing}", path.display())]
pub struct MissingCapabilities {
    pub path: PathBuf,
    pub missing: Capabilities,
}

/// An opened V4L2 video node.
pub struct VideoNode {
    capability: Capability,
    fd: File,
    path: PathBuf,
}

impl VideoNode {
    /// Opens the video node at `path` and queries its capabilities.
    pub fn open(path: &Path) -> Result<Self, VideoNodeOpenError> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_CLOEXEC)
            .open(path)
            .map_err(|e| VideoNodeOpenError::Open(path.to_path_buf(), e))?;

        let capability: Capability = ioctl::querycap(&fd)?;
        debug!(
            "Opened {}: driver {}, card {}, caps {}",
            path.display(),
            capability.driver,
            capability.card,
            capability.device_caps()
        );

        Ok(VideoNode {
            capability,
            fd,
            path: path.to_path_buf(),
        })
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checks that this node supports all of `caps`.
    pub fn require(&self, caps: Capabilities) -> Result<(), MissingCapabilities> {
        check_capabilities(&self.path, self.capability.device_caps(), caps)
    }
}

fn check_capabilities(
    path: &Path,
    available: Capabilities,
    required: Capabilities,
) -> Result<(), MissingCapabilities> {
    let missing = required.difference(available);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(MissingCapabilities {
            path: path.to_path_buf(),
            missing,
        })
    }
}

impl AsRawFd for VideoNode {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for VideoNode {
    fn as_fd(&self) -> BorrowedFd {
        self.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_check() {
        let path = Path::new("/dev/video0");
        let available = Capabilities::VIDEO_OUTPUT_MPLANE | Capabilities::STREAMING;

        assert!(check_capabilities(path, available, Capabilities::VIDEO_OUTPUT_MPLANE).is_ok());

        let err = check_capabilities(
            path,
            available,
            Capabilities::VIDEO_CAPTURE_MPLANE | Capabilities::STREAMING,
        )
        .unwrap_err();
        assert_eq!(err.missing, Capabilities::VIDEO_CAPTURE_MPLANE);
        assert_eq!(err.path, path);
    }

    #[test]
    fn open_missing_node() {
        assert!(matches!(
            VideoNode::open(Path::new("/nonexistent/video42")),
            Err(VideoNodeOpenError::Open(_, _))
        ));
    }
}
