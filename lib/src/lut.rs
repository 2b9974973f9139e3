//! Look-up tables for the VSP2 LUT module.
//!
//! The LUT module maps each 8-bit component value through a 256-entry table. The table is handed
//! to the driver as a list of (register address, value) pairs, one per entry, where the value
//! packs the red, green and blue outputs as `0x00RRGGBB`.
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;

use log::{debug, info};
use thiserror::Error;

use crate::ioctl::{self, Vsp2LutConfigError, VSP2_LUT_MAX_ENTRIES};
use crate::media::{MediaDevice, MediaError};

/// Address of the register holding the first entry of the table.
pub const LUT_BASE_ADDR: u32 = 0x7000;

/// Default `fxa` value, i.e. the fixed alpha value used by the module.
pub const DEFAULT_FXA: u8 = 0x80;

/// One table entry as laid out in memory for the driver.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LutEntry {
    pub addr: u32,
    pub value: u32,
}

impl LutEntry {
    pub fn new(index: usize, r: u8, g: u8, b: u8) -> Self {
        LutEntry {
            addr: LUT_BASE_ADDR + 4 * index as u32,
            value: (r as u32) << 16 | (g as u32) << 8 | b as u32,
        }
    }
}

#[derive(Debug, Error)]
pub enum LutError {
    #[error("cannot find LUT entity: {0}")]
    Media(#[from] MediaError),
    #[error("error while opening {0}: {1}")]
    Open(PathBuf, io::Error),
    #[error("error while configuring LUT: {0}")]
    Config(#[from] Vsp2LutConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LutTable {
    entries: Vec<LutEntry>,
}

impl LutTable {
    /// Builds a full table where entry `i` maps to the components returned by `f(i)`.
    pub fn from_fn<F: Fn(u8) -> (u8, u8, u8)>(f: F) -> Self {
        let entries = (0..VSP2_LUT_MAX_ENTRIES)
            .map(|i| {
                let (r, g, b) = f(i as u8);
                LutEntry::new(i, r, g, b)
            })
            .collect();

        LutTable { entries }
    }

    /// Table inverting every component, i.e. producing the negative of the input image.
    pub fn negative() -> Self {
        Self::from_fn(|i| {
            let v = 0xffu8.wrapping_sub(i);
            (v, v, v)
        })
    }

    pub fn entries(&self) -> &[LutEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A table and the `fxa` value to program it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LutConfig {
    pub table: LutTable,
    pub fxa: u8,
}

impl Default for LutConfig {
    fn default() -> Self {
        LutConfig {
            table: LutTable::negative(),
            fxa: DEFAULT_FXA,
        }
    }
}

impl LutConfig {
    /// Programs this configuration into the `"<prefix> lut"` entity of `media`, which must have
    /// been enumerated.
    pub fn program(&self, media: &MediaDevice, prefix: &str) -> Result<(), LutError> {
        let name = format!("{} lut", prefix);
        let entity = media.entity_by_name(&name)?;
        let devnode = media.devnode(entity)?;

        // Closed once the table is programmed.
        let subdev = OpenOptions::new()
            .read(true)
            .write(true)
            .open(devnode)
            .map_err(|e| LutError::Open(devnode.to_path_buf(), e))?;

        debug!("Programming {} through {}", name, devnode.display());
        ioctl::vsp2_lut_config(&subdev, &self.table, self.fxa)?;
        info!(
            "LUT programmed with {} entries, fxa 0x{:02x}",
            self.table.len(),
            self.fxa
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_table() {
        let table = LutTable::negative();
        let entries = table.entries();

        assert_eq!(entries.len(), 256);
        assert_eq!(
            entries[0],
            LutEntry {
                addr: 0x7000,
                value: 0x00ffffff
            }
        );
        assert_eq!(
            entries[1],
            LutEntry {
                addr: 0x7004,
                value: 0x00fefefe
            }
        );
        assert_eq!(
            entries[255],
            LutEntry {
                addr: 0x73fc,
                value: 0x00000000
            }
        );
    }

    #[test]
    fn byte_layout() {
        assert_eq!(std::mem::size_of::<LutEntry>(), 8);

        // The driver reads the entries as pairs of native-endian words.
        let table = LutTable::negative();
        let raw = unsafe {
            std::slice::from_raw_parts(
                table.entries().as_ptr() as *const u8,
                table.len() * std::mem::size_of::<LutEntry>(),
            )
        };
        assert_eq!(raw.len(), 256 * 8);
        assert_eq!(&raw[0..4], &0x7000u32.to_ne_bytes());
        assert_eq!(&raw[4..8], &0x00ffffffu32.to_ne_bytes());
        assert_eq!(&raw[8..12], &0x7004u32.to_ne_bytes());
        assert_eq!(&raw[2044..2048], &0u32.to_ne_bytes());
    }

    #[test]
    fn table_from_fn() {
        let table = LutTable::from_fn(|i| (i, 0, 0xff - i));
        assert_eq!(table.len(), 256);
        assert!(!table.is_empty());
        assert_eq!(table.entries()[0x42], LutEntry::new(0x42, 0x42, 0x00, 0xbd));
        assert_eq!(table.entries()[0x42].value, 0x004200bd);
    }

    #[test]
    fn default_config() {
        let config = LutConfig::default();
        assert_eq!(config.fxa, 0x80);
        assert_eq!(config.table, LutTable::negative());
    }
}
