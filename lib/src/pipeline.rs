//! The `rpf.0 -> lut -> wpf.0` pipeline of the VSP2.
//!
//! Frames enter the VSP2 through the `rpf.0 input` video node (an OUTPUT queue), are read by
//! the RPF, go through the LUT, and are written by the WPF to the `wpf.0 output` video node (a
//! CAPTURE queue). [`LutPipeline::configure`] performs the equivalent of the following
//! `media-ctl` invocation, with `vsp` standing for the device's entity prefix:
//!
//! ```text
//! media-ctl -r
//! media-ctl -l "'vsp rpf.0':1 -> 'vsp lut':0 [1]"
//! media-ctl -l "'vsp lut':1 -> 'vsp wpf.0':0 [1]"
//! media-ctl -l "'vsp wpf.0':1 -> 'vsp wpf.0 output':0 [1]"
//! media-ctl -V "'vsp rpf.0':0 [fmt:ARGB8888_1X32/1280x720]"   # and so on for each pad
//! ```
use std::fmt::{self, Display};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info, warn};
use thiserror::Error;

use crate::bindings;
use crate::device::{VideoNode, VideoNodeOpenError};
use crate::ioctl::{self, Capabilities, MbusFrameFormat, SubdevFmtError, SubdevFormatWhich};
use crate::lut::{LutConfig, LutError};
use crate::media::{LinkFlags, MediaDevice, MediaError};
use crate::{BufferField, Format, PixelFormat};

pub const WIDTH: u32 = 1280;
pub const HEIGHT: u32 = 720;
pub const BYTES_PER_PIXEL: u32 = 4;
/// Size in bytes of one ARGB32 frame.
pub const FRAME_SIZE: usize = (WIDTH * HEIGHT * BYTES_PER_PIXEL) as usize;
pub const PIXEL_FORMAT: PixelFormat = PixelFormat::ARGB32;
pub const MBUS_CODE: u32 = bindings::MEDIA_BUS_FMT_ARGB8888_1X32;

/// Entities whose pads 0 (sink) and 1 (source) carry the frame.
const PROCESSING_ENTITIES: [&str; 3] = ["rpf.0", "lut", "wpf.0"];

/// Supported R-Car SoCs. They only differ by the media node the VSP2 instance we use is
/// registered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Soc {
    #[default]
    H3,
    M3,
}

impl Soc {
    pub fn default_media_device(self) -> &'static Path {
        Path::new(match self {
            Soc::H3 => "/dev/media3",
            Soc::M3 => "/dev/media2",
        })
    }
}

impl FromStr for Soc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h3" => Ok(Soc::H3),
            "m3" => Ok(Soc::M3),
            _ => Err(format!("unsupported SoC {}", s)),
        }
    }
}

impl Display for Soc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Soc::H3 => "h3",
            Soc::M3 => "m3",
        })
    }
}

/// The video nodes at both ends of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineNode {
    /// `rpf.0 input`, where source frames are queued.
    RpfInput,
    /// `wpf.0 output`, where processed frames are dequeued.
    WpfOutput,
}

impl PipelineNode {
    pub fn entity_suffix(self) -> &'static str {
        match self {
            PipelineNode::RpfInput => "rpf.0 input",
            PipelineNode::WpfOutput => "wpf.0 output",
        }
    }

    pub fn required_capabilities(self) -> Capabilities {
        match self {
            PipelineNode::RpfInput => Capabilities::VIDEO_OUTPUT_MPLANE,
            PipelineNode::WpfOutput => Capabilities::VIDEO_CAPTURE_MPLANE,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("error while opening {0}: {1}")]
    Open(PathBuf, io::Error),
    #[error("error while setting format of {entity}:{pad}: {source}")]
    SubdevFmt {
        entity: String,
        pad: u32,
        source: SubdevFmtError,
    },
    #[error("error while opening video node: {0}")]
    VideoNode(#[from] VideoNodeOpenError),
}

/// Media bus format set on every pad of the pipeline.
pub fn bus_format() -> MbusFrameFormat {
    MbusFrameFormat {
        width: WIDTH,
        height: HEIGHT,
        code: MBUS_CODE,
        field: BufferField::Any,
    }
}

/// Whether the driver changed the geometry or bus code of `requested`. The field is left for the
/// driver to pick, so it is not compared.
fn bus_format_adjusted(requested: &MbusFrameFormat, applied: &MbusFrameFormat) -> bool {
    (applied.width, applied.height, applied.code)
        != (requested.width, requested.height, requested.code)
}

/// Format of the frames queued to and dequeued from the pipeline's video nodes.
pub fn video_format() -> Format {
    Format::from((PIXEL_FORMAT, (WIDTH as usize, HEIGHT as usize)))
}

/// Formats the link specifications enabled by [`LutPipeline::configure`].
fn link_specs(prefix: &str) -> [String; 3] {
    [
        format!("'{p} rpf.0':1 -> '{p} lut':0", p = prefix),
        format!("'{p} lut':1 -> '{p} wpf.0':0", p = prefix),
        format!("'{p} wpf.0':1 -> '{p} wpf.0 output':0", p = prefix),
    ]
}

/// A configured LUT pipeline.
#[derive(Debug)]
pub struct LutPipeline {
    prefix: String,
}

impl LutPipeline {
    /// Enumerates `media`, resets its links, then enables the links of the pipeline and sets the
    /// format of all its pads.
    pub fn configure(media: &mut MediaDevice) -> Result<Self, PipelineError> {
        media.enumerate()?;
        media.reset_links()?;

        let prefix = media.entity_prefix().to_owned();
        debug!("Entity prefix of {}: {}", media.path().display(), prefix);

        for spec in link_specs(&prefix) {
            let link = media.parse_link(&spec)?;
            media.setup_link(link.source, link.sink, LinkFlags::ENABLED)?;
            debug!("Enabled link {}", spec);
        }

        let format = bus_format();
        for entity in PROCESSING_ENTITIES {
            let name = format!("{} {}", prefix, entity);
            let devnode = media.devnode(media.entity_by_name(&name)?)?;
            let subdev = OpenOptions::new()
                .read(true)
                .write(true)
                .open(devnode)
                .map_err(|e| PipelineError::Open(devnode.to_path_buf(), e))?;

            for pad in [0u16, 1] {
                // Make sure the pad exists in the graph before touching it.
                media.parse_pad(&format!("'{}':{}", name, pad))?;

                let applied: MbusFrameFormat =
                    ioctl::subdev_s_fmt(&subdev, pad as u32, SubdevFormatWhich::Active, &format)
                        .map_err(|source| PipelineError::SubdevFmt {
                            entity: name.clone(),
                            pad: pad as u32,
                            source,
                        })?;

                if bus_format_adjusted(&format, &applied) {
                    warn!(
                        "Format of {}:{} adjusted by the driver to {:?}",
                        name, pad, applied
                    );
                } else {
                    debug!("Format of {}:{} set to {:?}", name, pad, applied);
                }
            }
        }

        info!("Pipeline rpf.0 -> lut -> wpf.0 configured on {}", prefix);

        Ok(LutPipeline { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Opens the video node at one end of the pipeline.
    pub fn video_node(
        &self,
        media: &MediaDevice,
        node: PipelineNode,
    ) -> Result<VideoNode, PipelineError> {
        let name = format!("{} {}", self.prefix, node.entity_suffix());
        let devnode = media.devnode(media.entity_by_name(&name)?)?;

        Ok(VideoNode::open(devnode)?)
    }

    /// Programs `config` into the LUT of the pipeline.
    pub fn program_lut(&self, media: &MediaDevice, config: &LutConfig) -> Result<(), LutError> {
        config.program(media, &self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_geometry() {
        assert_eq!(FRAME_SIZE, 3_686_400);
        assert_eq!(MBUS_CODE, 0x100d);
        assert_eq!(PIXEL_FORMAT.to_string(), "BA24");

        let format = video_format();
        assert_eq!((format.width, format.height), (1280, 720));
        assert_eq!(format.plane_fmt.len(), 1);
        assert_eq!(format.field, BufferField::Any);
    }

    #[test]
    fn bus_format_adjustments() {
        let requested = bus_format();

        let progressive = MbusFrameFormat {
            field: BufferField::None,
            ..bus_format()
        };
        assert!(!bus_format_adjusted(&requested, &progressive));
        assert!(!bus_format_adjusted(&requested, &requested));

        let smaller = MbusFrameFormat {
            width: 640,
            ..bus_format()
        };
        assert!(bus_format_adjusted(&requested, &smaller));

        let other_code = MbusFrameFormat {
            code: 0x2006,
            ..bus_format()
        };
        assert!(bus_format_adjusted(&requested, &other_code));
    }

    #[test]
    fn soc_media_devices() {
        assert_eq!(Soc::H3.default_media_device(), Path::new("/dev/media3"));
        assert_eq!(Soc::M3.default_media_device(), Path::new("/dev/media2"));
        assert_eq!("M3".parse(), Ok(Soc::M3));
        assert!("e3".parse::<Soc>().is_err());
        assert_eq!(Soc::default(), Soc::H3);
    }

    #[test]
    fn links() {
        let [rpf_lut, lut_wpf, wpf_output] = link_specs("fe9a0000.vsp");
        assert_eq!(rpf_lut, "'fe9a0000.vsp rpf.0':1 -> 'fe9a0000.vsp lut':0");
        assert_eq!(lut_wpf, "'fe9a0000.vsp lut':1 -> 'fe9a0000.vsp wpf.0':0");
        assert_eq!(
            wpf_output,
            "'fe9a0000.vsp wpf.0':1 -> 'fe9a0000.vsp wpf.0 output':0"
        );

        // The specifications must be understood by the parser.
        for spec in link_specs("fe9a0000.vsp") {
            assert!(crate::media::parse_link_spec(&spec).is_ok());
        }
    }

    #[test]
    fn node_capabilities() {
        assert_eq!(
            PipelineNode::RpfInput.required_capabilities(),
            Capabilities::VIDEO_OUTPUT_MPLANE
        );
        assert_eq!(PipelineNode::WpfOutput.entity_suffix(), "wpf.0 output");
    }
}
