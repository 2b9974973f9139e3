//! Raw frame files.
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Fills `frame` with the beginning of the file at `path`. The file must hold at least one
/// complete frame.
pub fn read_frame(path: &Path, frame: &mut [u8]) -> Result<()> {
    let mut file =
        File::open(path).with_context(|| format!("cannot open input {}", path.display()))?;

    match file.read_exact(frame) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => bail!(
            "input {} is shorter than one frame ({} bytes)",
            path.display(),
            frame.len()
        ),
        Err(e) => Err(e).with_context(|| format!("cannot read input {}", path.display())),
    }
}

/// Writes `frame` to `path`, replacing any existing file.
pub fn write_frame(path: &Path, frame: &[u8]) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("cannot create output {}", path.display()))?;
    file.write_all(frame)
        .with_context(|| format!("cannot write output {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("vsp2-lut-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn write_then_read() {
        let path = temp_path("frame");
        let frame: Vec<u8> = (0..=255).collect();
        write_frame(&path, &frame).unwrap();

        let mut read = vec![0u8; frame.len()];
        read_frame(&path, &mut read).unwrap();
        assert_eq!(read, frame);

        // Reading less than the file holds is fine.
        let mut head = [0u8; 16];
        read_frame(&path, &mut head).unwrap();
        assert_eq!(&head[..], &frame[..16]);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn short_input() {
        let path = temp_path("short");
        write_frame(&path, &[0xffu8; 100]).unwrap();

        let mut frame = vec![0u8; 101];
        let err = read_frame(&path, &mut frame).unwrap_err();
        assert!(err.to_string().contains("shorter than one frame"));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_input() {
        let mut frame = [0u8; 4];
        assert!(read_frame(&temp_path("does-not-exist"), &mut frame).is_err());
    }
}
