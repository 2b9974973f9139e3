//! Media controller support.
//!
//! The VSP2 exposes its processing blocks (RPF, LUT, WPF, ...) as entities of a media graph. The
//! links between them must be enabled and the format of their pads configured before the video
//! nodes at both ends of the pipeline can stream.
//!
//! [`MediaDevice`] opens a media node, enumerates its graph and caches it, and provides the
//! operations of the `media-ctl` tool that are needed to set a pipeline up.
mod ioctl;
mod parse;

pub use ioctl::*;
pub use parse::*;

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use log::{debug, warn};
use thiserror::Error;

use crate::bindings;
use crate::bindings::{media_device_info, media_entity_desc, media_link_desc, media_pad_desc};
use crate::ioctl::string_from_cstr;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PadFlags: u32 {
        const SINK = bindings::MEDIA_PAD_FL_SINK;
        const SOURCE = bindings::MEDIA_PAD_FL_SOURCE;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct LinkFlags: u32 {
        const ENABLED = bindings::MEDIA_LNK_FL_ENABLED;
        const IMMUTABLE = bindings::MEDIA_LNK_FL_IMMUTABLE;
        const DYNAMIC = bindings::MEDIA_LNK_FL_DYNAMIC;
    }
}

/// Safe variant of `struct media_device_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub driver: String,
    pub model: String,
    pub serial: String,
    pub bus_info: String,
    pub media_version: u32,
    pub hw_revision: u32,
    pub driver_version: u32,
}

impl From<media_device_info> for DeviceInfo {
    fn from(info: media_device_info) -> Self {
        DeviceInfo {
            driver: string_from_cstr(&info.driver).unwrap_or_else(|_| "".into()),
            model: string_from_cstr(&info.model).unwrap_or_else(|_| "".into()),
            serial: string_from_cstr(&info.serial).unwrap_or_else(|_| "".into()),
            bus_info: string_from_cstr(&info.bus_info).unwrap_or_else(|_| "".into()),
            media_version: info.media_version,
            hw_revision: info.hw_revision,
            driver_version: info.driver_version,
        }
    }
}

impl DeviceInfo {
    /// Returns the prefix shared by the names of the entities of this device, i.e. the part of
    /// `bus_info` that follows the first `:`, or the whole of `bus_info` if it has none.
    ///
    /// For the VSP2, `bus_info` is `platform:fe9a0000.vsp` and entities are named
    /// `fe9a0000.vsp rpf.0`, `fe9a0000.vsp lut`, and so on.
    pub fn entity_prefix(&self) -> &str {
        match self.bus_info.split_once(':') {
            Some((_, prefix)) => prefix,
            None => &self.bus_info,
        }
    }
}

/// Identifies a pad by its entity id and index within that entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PadRef {
    pub entity: u32,
    pub index: u16,
}

impl From<&media_pad_desc> for PadRef {
    fn from(pad: &media_pad_desc) -> Self {
        PadRef {
            entity: pad.entity,
            index: pad.index,
        }
    }
}

impl From<PadRef> for media_pad_desc {
    fn from(pad: PadRef) -> Self {
        media_pad_desc {
            entity: pad.entity,
            index: pad.index,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaPad {
    pub pad: PadRef,
    pub flags: PadFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaLink {
    pub source: PadRef,
    pub sink: PadRef,
    pub flags: LinkFlags,
}

impl From<&media_link_desc> for MediaLink {
    fn from(link: &media_link_desc) -> Self {
        MediaLink {
            source: PadRef::from(&link.source),
            sink: PadRef::from(&link.sink),
            flags: LinkFlags::from_bits_truncate(link.flags),
        }
    }
}

/// An entity of the media graph, along with its pads and outbound links.
#[derive(Debug, Clone, Default)]
pub struct MediaEntity {
    pub id: u32,
    pub name: String,
    pub type_: u32,
    pub flags: u32,
    /// Character device numbers, for entities that have a device node.
    pub dev: Option<(u32, u32)>,
    pub pads: Vec<MediaPad>,
    /// Links whose source is one of this entity's pads.
    pub links: Vec<MediaLink>,
    /// Path to the device node, if it could be resolved.
    pub devnode: Option<PathBuf>,
    num_pads: usize,
    num_links: usize,
}

impl From<media_entity_desc> for MediaEntity {
    fn from(desc: media_entity_desc) -> Self {
        // Safe because the `dev` member is valid for every entity type the kernel reports, and
        // zeroed when there is no device node.
        let dev = unsafe { desc.__bindgen_anon_1.dev };

        MediaEntity {
            id: desc.id,
            name: string_from_cstr(&desc.name).unwrap_or_else(|_| "".into()),
            type_: desc.type_,
            flags: desc.flags,
            dev: if dev.major != 0 || dev.minor != 0 {
                Some((dev.major, dev.minor))
            } else {
                None
            },
            pads: Vec::new(),
            links: Vec::new(),
            devnode: None,
            num_pads: desc.pads as usize,
            num_links: desc.links as usize,
        }
    }
}

impl MediaEntity {
    pub fn pad(&self, index: u16) -> Option<&MediaPad> {
        self.pads.iter().find(|p| p.pad.index == index)
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("error while opening {0}: {1}")]
    Open(PathBuf, io::Error),
    #[error("error while querying device info: {0}")]
    DeviceInfo(#[from] DeviceInfoError),
    #[error("error while enumerating entities: {0}")]
    EnumEntities(#[from] EnumEntitiesError),
    #[error("error while enumerating links: {0}")]
    EnumLinks(#[from] EnumLinksError),
    #[error("error while setting up link {0:?} -> {1:?}: {2}")]
    SetupLink(PadRef, PadRef, SetupLinkError),
    #[error("entity {0} not found")]
    EntityNotFound(String),
    #[error("entity {0} has no pad {1}")]
    PadNotFound(String, u16),
    #[error("no link from {0:?} to {1:?}")]
    LinkNotFound(PadRef, PadRef),
    #[error("no device node for entity {0}")]
    NoDevnode(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// A media controller device node, and the graph it exposes.
///
/// The graph is cached by [`MediaDevice::enumerate`] and kept up-to-date with the changes done
/// through this object.
pub struct MediaDevice {
    file: File,
    path: PathBuf,
    info: DeviceInfo,
    entities: Vec<MediaEntity>,
    sysfs_root: PathBuf,
}

impl MediaDevice {
    /// Opens the media device at `path` and queries its information. The graph is not enumerated
    /// until [`MediaDevice::enumerate`] is called.
    pub fn open(path: &Path) -> Result<Self, MediaError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_CLOEXEC)
            .open(path)
            .map_err(|e| MediaError::Open(path.to_path_buf(), e))?;

        let info: DeviceInfo = device_info(&file)?;
        debug!(
            "Opened media device {}: driver {}, model {}, bus {}",
            path.display(),
            info.driver,
            info.model,
            info.bus_info
        );

        Ok(MediaDevice {
            file,
            path: path.to_path_buf(),
            info,
            entities: Vec::new(),
            sysfs_root: PathBuf::from("/sys"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Shortcut for `self.info().entity_prefix()`.
    pub fn entity_prefix(&self) -> &str {
        self.info.entity_prefix()
    }

    pub fn entities(&self) -> &[MediaEntity] {
        &self.entities
    }

    /// Enumerates all the entities of the graph, their pads and their outbound links, and
    /// resolves the device node of the entities that have one. Replaces any previously cached
    /// graph.
    pub fn enumerate(&mut self) -> Result<(), MediaError> {
        let mut entities = Vec::new();
        let mut last_id = 0;

        loop {
            let mut entity: MediaEntity = match enum_next_entity(&self.file, last_id) {
                Ok(entity) => entity,
                Err(EnumEntitiesError::NoMoreEntities(_)) => break,
                Err(e) => return Err(e.into()),
            };
            last_id = entity.id;

            let (pads, links) = enum_links(&self.file, entity.id, entity.num_pads, entity.num_links)?;
            entity.pads = pads
                .iter()
                .map(|p| MediaPad {
                    pad: PadRef::from(p),
                    flags: PadFlags::from_bits_truncate(p.flags),
                })
                .collect();
            // Each link is cached once, on its source entity.
            entity.links = links
                .iter()
                .map(MediaLink::from)
                .filter(|l| l.source.entity == entity.id)
                .collect();

            if let Some((major, minor)) = entity.dev {
                entity.devnode = resolve_devnode(&self.sysfs_root, major, minor);
                if entity.devnode.is_none() {
                    warn!(
                        "Could not resolve device node {}:{} of entity {}",
                        major, minor, entity.name
                    );
                }
            }

            debug!(
                "Entity {} \"{}\": {} pads, {} links, devnode {:?}",
                entity.id,
                entity.name,
                entity.pads.len(),
                entity.links.len(),
                entity.devnode
            );
            entities.push(entity);
        }

        self.entities = entities;
        Ok(())
    }

    pub fn entity_by_name(&self, name: &str) -> Result<&MediaEntity, MediaError> {
        self.entities
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| MediaError::EntityNotFound(name.to_owned()))
    }

    pub fn entity_by_id(&self, id: u32) -> Result<&MediaEntity, MediaError> {
        self.entities
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| MediaError::EntityNotFound(id.to_string()))
    }

    /// Returns the path to the device node of `entity`.
    pub fn devnode<'a>(&self, entity: &'a MediaEntity) -> Result<&'a Path, MediaError> {
        entity
            .devnode
            .as_deref()
            .ok_or_else(|| MediaError::NoDevnode(entity.name.clone()))
    }

    /// Disables every link of the graph that is enabled and not immutable.
    pub fn reset_links(&mut self) -> Result<(), MediaError> {
        let to_disable: Vec<MediaLink> = self
            .entities
            .iter()
            .flat_map(|e| e.links.iter())
            .filter(|l| {
                l.flags.contains(LinkFlags::ENABLED) && !l.flags.contains(LinkFlags::IMMUTABLE)
            })
            .copied()
            .collect();

        for link in to_disable {
            self.setup_link(link.source, link.sink, LinkFlags::empty())?;
        }

        Ok(())
    }

    /// Resolves a pad specification in `media-ctl` syntax against the enumerated graph.
    pub fn parse_pad(&self, spec: &str) -> Result<PadRef, MediaError> {
        let spec = parse_pad_spec(spec)?;
        self.resolve_pad(&spec)
    }

    /// Resolves a link specification in `media-ctl` syntax against the enumerated graph.
    pub fn parse_link(&self, spec: &str) -> Result<MediaLink, MediaError> {
        let spec = parse_link_spec(spec)?;
        let source = self.resolve_pad(&spec.source)?;
        let sink = self.resolve_pad(&spec.sink)?;

        self.find_link(source, sink)
            .copied()
            .ok_or(MediaError::LinkNotFound(source, sink))
    }

    fn resolve_pad(&self, spec: &PadSpec) -> Result<PadRef, MediaError> {
        let entity = match spec.entity {
            EntityRef::Name(name) => self.entity_by_name(name)?,
            EntityRef::Id(id) => self.entity_by_id(id)?,
        };

        entity
            .pad(spec.index)
            .map(|p| p.pad)
            .ok_or_else(|| MediaError::PadNotFound(entity.name.clone(), spec.index))
    }

    fn find_link(&self, source: PadRef, sink: PadRef) -> Option<&MediaLink> {
        self.entities
            .iter()
            .find(|e| e.id == source.entity)?
            .links
            .iter()
            .find(|l| l.source == source && l.sink == sink)
    }

    /// Sets the flags of the link between `source` and `sink`, which must exist in the
    /// enumerated graph.
    pub fn setup_link(
        &mut self,
        source: PadRef,
        sink: PadRef,
        flags: LinkFlags,
    ) -> Result<(), MediaError> {
        if self.find_link(source, sink).is_none() {
            return Err(MediaError::LinkNotFound(source, sink));
        }

        debug!("Setting up link {:?} -> {:?}: {:?}", source, sink, flags);
        setup_link(&self.file, source.into(), sink.into(), flags.bits())
            .map_err(|e| MediaError::SetupLink(source, sink, e))?;

        if let Some(link) = self
            .entities
            .iter_mut()
            .find(|e| e.id == source.entity)
            .and_then(|e| {
                e.links
                    .iter_mut()
                    .find(|l| l.source == source && l.sink == sink)
            })
        {
            link.flags = (link.flags & LinkFlags::IMMUTABLE) | flags;
        }

        Ok(())
    }
}

impl AsRawFd for MediaDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for MediaDevice {
    fn as_fd(&self) -> BorrowedFd {
        self.file.as_fd()
    }
}

/// Extracts the value of `DEVNAME` from the content of a sysfs `uevent` file.
fn parse_uevent_devname(uevent: &str) -> Option<&str> {
    uevent
        .lines()
        .find_map(|line| line.strip_prefix("DEVNAME="))
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

/// Finds the `/dev` node of character device `major:minor` using sysfs mounted at `sysfs_root`.
fn resolve_devnode(sysfs_root: &Path, major: u32, minor: u32) -> Option<PathBuf> {
    let dev_dir = sysfs_root
        .join("dev/char")
        .join(format!("{}:{}", major, minor));

    if let Ok(uevent) = std::fs::read_to_string(dev_dir.join("uevent")) {
        if let Some(name) = parse_uevent_devname(&uevent) {
            return Some(Path::new("/dev").join(name));
        }
    }

    let target = std::fs::read_link(&dev_dir).ok()?;
    target.file_name().map(|name| Path::new("/dev").join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(bus_info: &str) -> DeviceInfo {
        DeviceInfo {
            bus_info: bus_info.into(),
            ..Default::default()
        }
    }

    #[test]
    fn entity_prefix() {
        assert_eq!(info("platform:fe9a0000.vsp").entity_prefix(), "fe9a0000.vsp");
        assert_eq!(info("fe9a0000.vsp").entity_prefix(), "fe9a0000.vsp");
        assert_eq!(info("a:b:c").entity_prefix(), "b:c");
        assert_eq!(info("").entity_prefix(), "");
    }

    #[test]
    fn device_info_from_raw() {
        let mut raw = media_device_info::default();
        raw.driver[..5].copy_from_slice(b"vsp1\0");
        raw.bus_info[..22].copy_from_slice(b"platform:fe9a0000.vsp\0");
        raw.hw_revision = 0x0d;

        let info = DeviceInfo::from(raw);
        assert_eq!(info.driver, "vsp1");
        assert_eq!(info.model, "");
        assert_eq!(info.bus_info, "platform:fe9a0000.vsp");
        assert_eq!(info.hw_revision, 0x0d);
    }

    #[test]
    fn entity_from_raw() {
        let mut raw = media_entity_desc {
            id: 5,
            pads: 2,
            links: 1,
            ..Default::default()
        };
        raw.name[..14].copy_from_slice(b"fe9a0000.vsp \0");
        assert_eq!(MediaEntity::from(raw).dev, None);

        raw.__bindgen_anon_1.dev = bindings::media_entity_desc__bindgen_ty_1__bindgen_ty_1 {
            major: 81,
            minor: 12,
        };
        let entity = MediaEntity::from(raw);
        assert_eq!(entity.id, 5);
        assert_eq!(entity.name, "fe9a0000.vsp ");
        assert_eq!(entity.dev, Some((81, 12)));
        assert_eq!(entity.num_pads, 2);
        assert_eq!(entity.num_links, 1);
    }

    #[test]
    fn uevent_devname() {
        let uevent = "MAJOR=81\nMINOR=12\nDEVNAME=v4l-subdev3\n";
        assert_eq!(parse_uevent_devname(uevent), Some("v4l-subdev3"));
        assert_eq!(parse_uevent_devname("MAJOR=81\nMINOR=12\n"), None);
        assert_eq!(parse_uevent_devname("DEVNAME=\n"), None);
    }

    #[test]
    fn devnode_from_sysfs() {
        let root = std::env::temp_dir().join(format!("vsp2r-sysfs-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);

        // Device with a uevent file.
        let dev = root.join("dev/char/81:12");
        std::fs::create_dir_all(&dev).unwrap();
        std::fs::write(dev.join("uevent"), "MAJOR=81\nMINOR=12\nDEVNAME=video7\n").unwrap();
        assert_eq!(
            resolve_devnode(&root, 81, 12),
            Some(PathBuf::from("/dev/video7"))
        );

        // Device only reachable through its link.
        let target = root.join("devices/v4l-subdev4");
        std::fs::create_dir_all(&target).unwrap();
        std::os::unix::fs::symlink(&target, root.join("dev/char/81:20")).unwrap();
        assert_eq!(
            resolve_devnode(&root, 81, 20),
            Some(PathBuf::from("/dev/v4l-subdev4"))
        );

        assert_eq!(resolve_devnode(&root, 81, 99), None);

        std::fs::remove_dir_all(&root).unwrap();
    }

    fn test_graph() -> MediaDevice {
        let pad = |entity, index, flags| MediaPad {
            pad: PadRef { entity, index },
            flags,
        };
        let link = |source: (u32, u16), sink: (u32, u16), flags| MediaLink {
            source: PadRef {
                entity: source.0,
                index: source.1,
            },
            sink: PadRef {
                entity: sink.0,
                index: sink.1,
            },
            flags,
        };

        let entities = vec![
            MediaEntity {
                id: 1,
                name: "vsp rpf.0".into(),
                pads: vec![pad(1, 0, PadFlags::SINK), pad(1, 1, PadFlags::SOURCE)],
                links: vec![link((1, 1), (2, 0), LinkFlags::ENABLED)],
                ..Default::default()
            },
            MediaEntity {
                id: 2,
                name: "vsp lut".into(),
                pads: vec![pad(2, 0, PadFlags::SINK), pad(2, 1, PadFlags::SOURCE)],
                links: vec![link((2, 1), (3, 0), LinkFlags::empty())],
                ..Default::default()
            },
            MediaEntity {
                id: 3,
                name: "vsp wpf.0".into(),
                pads: vec![pad(3, 0, PadFlags::SINK), pad(3, 1, PadFlags::SOURCE)],
                ..Default::default()
            },
        ];

        MediaDevice {
            // Any file will do since the tests do not issue ioctls.
            file: File::open("/dev/null").unwrap(),
            path: PathBuf::from("/dev/null"),
            info: info("platform:vsp"),
            entities,
            sysfs_root: PathBuf::from("/sys"),
        }
    }

    #[test]
    fn parse_pad_and_link() {
        let media = test_graph();

        assert_eq!(
            media.parse_pad("'vsp lut':1").unwrap(),
            PadRef {
                entity: 2,
                index: 1
            }
        );
        assert_eq!(
            media.parse_pad("3:0").unwrap(),
            PadRef {
                entity: 3,
                index: 0
            }
        );
        assert!(matches!(
            media.parse_pad("'vsp lut':4"),
            Err(MediaError::PadNotFound(_, 4))
        ));
        assert!(matches!(
            media.parse_pad("'vsp hgo':0"),
            Err(MediaError::EntityNotFound(_))
        ));

        let link = media.parse_link("'vsp rpf.0':1 -> 'vsp lut':0").unwrap();
        assert_eq!(link.sink.entity, 2);
        assert!(link.flags.contains(LinkFlags::ENABLED));

        assert!(matches!(
            media.parse_link("'vsp rpf.0':1 -> 'vsp wpf.0':0"),
            Err(MediaError::LinkNotFound(_, _))
        ));
        assert!(matches!(
            media.parse_link("'vsp rpf.0':1 'vsp lut':0"),
            Err(MediaError::Parse(_))
        ));
    }

    #[test]
    fn lookups() {
        let media = test_graph();
        assert_eq!(media.entity_prefix(), "vsp");
        assert_eq!(media.entity_by_name("vsp lut").unwrap().id, 2);
        assert_eq!(media.entity_by_id(3).unwrap().name, "vsp wpf.0");

        let lut = media.entity_by_name("vsp lut").unwrap();
        assert!(matches!(
            media.devnode(lut),
            Err(MediaError::NoDevnode(_))
        ));
    }
}
