//! Validation program for the LUT module of the R-Car VSP2.
//!
//! A 1280x720 ARGB32 frame is sent through the `rpf.0 -> lut -> wpf.0` pipeline with a negative
//! LUT programmed, once per selected memory type, and each processed frame is written to a file.
mod image;
mod runner;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{App, Arg, ArgMatches};
use log::info;

use vsp2r::contig::AllocatorKind;
use vsp2r::lut::{LutConfig, LutTable, DEFAULT_FXA};
use vsp2r::memory::MemoryType;
use vsp2r::pipeline::Soc;

use runner::RunConfig;

const DEFAULT_INPUT: &str = "1280_720_ARGB32.argb";

fn build_app() -> App<'static> {
    App::new("vsp2-lut-test")
        .about("Runs a frame through the LUT of a VSP2 and saves the result")
        .arg(
            Arg::new("mmap")
                .long("mmap")
                .short('m')
                .help("Use MMAP buffers (default if no memory type is selected)"),
        )
        .arg(
            Arg::new("userptr")
                .long("userptr")
                .short('u')
                .help("Use USERPTR buffers backed by contiguous memory"),
        )
        .arg(
            Arg::new("dmabuf")
                .long("dmabuf")
                .short('d')
                .help("Use DMABUF buffers exported from contiguous memory"),
        )
        .arg(
            Arg::new("soc")
                .long("soc")
                .takes_value(true)
                .possible_values(["h3", "m3"])
                .default_value("h3")
                .help("SoC the program runs on, selects the default media device"),
        )
        .arg(
            Arg::new("media_device")
                .long("media-device")
                .takes_value(true)
                .help("Path to the media device of the VSP2, overrides --soc"),
        )
        .arg(
            Arg::new("input")
                .long("input")
                .short('i')
                .takes_value(true)
                .default_value(DEFAULT_INPUT)
                .help("Raw 1280x720 ARGB32 frame to process"),
        )
        .arg(
            Arg::new("output_dir")
                .long("output-dir")
                .short('o')
                .takes_value(true)
                .default_value(".")
                .help("Directory processed frames are written to"),
        )
        .arg(
            Arg::new("allocator")
                .long("allocator")
                .takes_value(true)
                .possible_values(["mmngr", "dma-heap"])
                .default_value("mmngr")
                .help("Contiguous memory allocator for USERPTR and DMABUF buffers"),
        )
        .arg(
            Arg::new("timeout_ms")
                .long("timeout-ms")
                .takes_value(true)
                .default_value("0")
                .help("Time to wait for a processed frame in milliseconds, 0 waits forever"),
        )
        .arg(
            Arg::new("fxa")
                .long("fxa")
                .takes_value(true)
                .default_value("0x80")
                .help("Value of the LUT fxa field"),
        )
}

#[derive(Debug)]
struct Options {
    memories: Vec<MemoryType>,
    media_device: PathBuf,
    input: PathBuf,
    output_dir: PathBuf,
    allocator: AllocatorKind,
    timeout: Option<Duration>,
    fxa: u8,
}

/// Parses a decimal or `0x`-prefixed hexadecimal byte.
fn parse_u8(value: &str) -> Result<u8> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };

    parsed.with_context(|| format!("invalid byte value {}", value))
}

fn parse_options(matches: &ArgMatches) -> Result<Options> {
    // Runs are performed in this order, no matter the order of the arguments.
    let mut memories: Vec<MemoryType> = [
        ("mmap", MemoryType::Mmap),
        ("userptr", MemoryType::UserPtr),
        ("dmabuf", MemoryType::DmaBuf),
    ]
    .into_iter()
    .filter(|(arg, _)| matches.is_present(*arg))
    .map(|(_, memory)| memory)
    .collect();
    if memories.is_empty() {
        memories.push(MemoryType::Mmap);
    }

    let media_device = match matches.value_of("media_device") {
        Some(path) => PathBuf::from(path),
        None => {
            let soc: Soc = matches
                .value_of("soc")
                .unwrap_or_default()
                .parse()
                .map_err(|e: String| anyhow!(e))?;
            soc.default_media_device().to_path_buf()
        }
    };

    let allocator = matches
        .value_of("allocator")
        .unwrap_or_default()
        .parse()
        .map_err(|e: String| anyhow!(e))?;

    let timeout_ms: u64 = matches
        .value_of("timeout_ms")
        .unwrap_or_default()
        .parse()
        .context("invalid timeout")?;
    let timeout = match timeout_ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    };

    let fxa = match matches.value_of("fxa") {
        Some(fxa) => parse_u8(fxa)?,
        None => DEFAULT_FXA,
    };

    Ok(Options {
        memories,
        media_device,
        input: PathBuf::from(matches.value_of("input").unwrap_or(DEFAULT_INPUT)),
        output_dir: PathBuf::from(matches.value_of("output_dir").unwrap_or(".")),
        allocator,
        timeout,
        fxa,
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = parse_options(&build_app().get_matches())?;
    info!(
        "Using {} with {} memory",
        options.media_device.display(),
        options
            .memories
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    // Only imported memory needs an allocator.
    let allocator = if options.memories.iter().any(|m| *m != MemoryType::Mmap) {
        let allocator = options
            .allocator
            .open()
            .with_context(|| format!("cannot open {} allocator", options.allocator))?;
        info!("Using {} allocator", options.allocator);
        Some(allocator)
    } else {
        None
    };

    let config = RunConfig {
        media_device: options.media_device,
        input: options.input,
        output_dir: options.output_dir,
        lut: LutConfig {
            table: LutTable::negative(),
            fxa: options.fxa,
        },
        timeout: options.timeout,
    };

    for memory in options.memories {
        runner::run(&config, memory, allocator.as_deref())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options> {
        let matches = build_app().try_get_matches_from(
            std::iter::once("vsp2-lut-test").chain(args.iter().copied()),
        )?;
        parse_options(&matches)
    }

    #[test]
    fn defaults() {
        let options = parse(&[]).unwrap();
        assert_eq!(options.memories, vec![MemoryType::Mmap]);
        assert_eq!(options.media_device, PathBuf::from("/dev/media3"));
        assert_eq!(options.input, PathBuf::from("1280_720_ARGB32.argb"));
        assert_eq!(options.output_dir, PathBuf::from("."));
        assert_eq!(options.allocator, AllocatorKind::Mmngr);
        assert_eq!(options.timeout, None);
        assert_eq!(options.fxa, 0x80);
    }

    #[test]
    fn memory_order_is_fixed() {
        let options = parse(&["-d", "-m", "-u"]).unwrap();
        assert_eq!(
            options.memories,
            vec![MemoryType::Mmap, MemoryType::UserPtr, MemoryType::DmaBuf]
        );

        let options = parse(&["--dmabuf"]).unwrap();
        assert_eq!(options.memories, vec![MemoryType::DmaBuf]);
    }

    #[test]
    fn media_device_selection() {
        let options = parse(&["--soc", "m3"]).unwrap();
        assert_eq!(options.media_device, PathBuf::from("/dev/media2"));

        let options =
            parse(&["--soc", "m3", "--media-device", "/dev/media0"]).unwrap();
        assert_eq!(options.media_device, PathBuf::from("/dev/media0"));

        assert!(parse(&["--soc", "e3"]).is_err());
    }

    #[test]
    fn allocator_timeout_and_fxa() {
        let options = parse(&[
            "--allocator",
            "dma-heap",
            "--timeout-ms",
            "500",
            "--fxa",
            "0x40",
        ])
        .unwrap();
        assert_eq!(options.allocator, AllocatorKind::DmaHeap);
        assert_eq!(options.timeout, Some(Duration::from_millis(500)));
        assert_eq!(options.fxa, 0x40);

        assert!(parse(&["--timeout-ms", "soon"]).is_err());
        assert!(parse(&["--fxa", "0x100"]).is_err());
    }

    #[test]
    fn byte_values() {
        assert_eq!(parse_u8("128").unwrap(), 128);
        assert_eq!(parse_u8("0xff").unwrap(), 255);
        assert_eq!(parse_u8("0X0a").unwrap(), 10);
        assert!(parse_u8("256").is_err());
        assert!(parse_u8("0x").is_err());
    }
}
