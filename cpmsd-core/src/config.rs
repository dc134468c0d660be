//! Emulator configuration.
//!
//! Loaded from a JSON file; every field has a default so an empty object
//! (or no file at all) gives a working setup rooted at the current directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bdos::addr;
use crate::error::{CpmError, CpmResult};

/// Disk Parameter Block as reported to guest programs.
///
/// Only `bsh`, `blm`, `exm`, `dsm` and the directory allocation bits drive
/// any behavior here; the rest is reported verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskParams {
    /// Sectors per track.
    pub spt: u16,
    /// Block shift factor.
    pub bsh: u8,
    /// Block mask.
    pub blm: u8,
    /// Extent mask.
    pub exm: u8,
    /// Highest block number.
    pub dsm: u16,
    /// Highest directory entry number.
    pub drm: u16,
    /// Directory allocation bitmap, first byte.
    pub al0: u8,
    /// Directory allocation bitmap, second byte.
    pub al1: u8,
    /// Check vector size.
    pub cks: u16,
    /// Reserved tracks.
    pub off: u16,
}

impl Default for DiskParams {
    /// 8 MiB drive with 2 KiB blocks and 512 directory entries.
    fn default() -> Self {
        Self {
            spt: 64,
            bsh: 4,
            blm: 15,
            exm: 0,
            dsm: 4095,
            drm: 511,
            al0: 0xFF,
            al1: 0x00,
            cks: 0,
            off: 0,
        }
    }
}

/// Size in bytes of the packed DPB.
pub const DPB_SIZE: usize = 15;

impl DiskParams {
    /// Allocation block size in bytes.
    pub fn block_size(&self) -> u32 {
        128 << self.bsh
    }

    /// Logical extents covered by one directory entry.
    pub fn extents_per_entry(&self) -> u32 {
        self.exm as u32 + 1
    }

    /// Block numbers are 16-bit when the disk has more than 256 blocks.
    pub fn wide_blocks(&self) -> bool {
        self.dsm > 255
    }

    /// Block numbers that fit in the 16-byte allocation map of an entry.
    pub fn blocks_per_entry(&self) -> u32 {
        if self.wide_blocks() {
            8
        } else {
            16
        }
    }

    /// Blocks reserved for the directory.
    pub fn directory_blocks(&self) -> u16 {
        (self.al0.count_ones() + self.al1.count_ones()) as u16
    }

    /// Bytes of the allocation vector (one bit per block).
    pub fn alv_size(&self) -> usize {
        self.dsm as usize / 8 + 1
    }

    /// Packed little-endian DPB layout.
    pub fn to_bytes(&self) -> [u8; DPB_SIZE] {
        let mut buf = [0u8; DPB_SIZE];
        buf[0..2].copy_from_slice(&self.spt.to_le_bytes());
        buf[2] = self.bsh;
        buf[3] = self.blm;
        buf[4] = self.exm;
        buf[5..7].copy_from_slice(&self.dsm.to_le_bytes());
        buf[7..9].copy_from_slice(&self.drm.to_le_bytes());
        buf[9] = self.al0;
        buf[10] = self.al1;
        buf[11..13].copy_from_slice(&self.cks.to_le_bytes());
        buf[13..15].copy_from_slice(&self.off.to_le_bytes());
        buf
    }

    fn validate(&self) -> CpmResult<()> {
        if !(3..=7).contains(&self.bsh) || self.blm as u32 != (1u32 << self.bsh) - 1 {
            return Err(CpmError::Config(format!(
                "inconsistent block shift/mask: bsh={} blm={}",
                self.bsh, self.blm
            )));
        }
        let max_exm = (self.blocks_per_entry() * self.block_size()) / (128 * 128);
        if self.extents_per_entry() > max_exm.max(1) || !(self.exm as u32 + 1).is_power_of_two() {
            return Err(CpmError::Config(format!("extent mask {} too large", self.exm)));
        }
        Ok(())
    }
}

/// Top-level emulator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Root of the drive tree: `<base_dir>/<DRIVE>/<USER>/<NAME.TYP>`.
    pub base_dir: PathBuf,
    /// Drive letters write-protected at boot.
    pub read_only: Vec<char>,
    /// Geometry reported to guests.
    pub dpb: DiskParams,
    /// Guest address of the CCP's `$$$.SUB` FCB.
    pub batch_fcb: Option<u16>,
    /// Host path of the CCP image loaded on boot.
    pub ccp: Option<PathBuf>,
    /// Load address of the CCP.
    pub ccp_address: u16,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            read_only: Vec::new(),
            dpb: DiskParams::default(),
            batch_fcb: Some(addr::CCP + 0x07AC),
            ccp: None,
            ccp_address: addr::CCP,
        }
    }
}

impl EmulatorConfig {
    /// Configuration rooted at `base_dir` with everything else defaulted.
    pub fn with_base(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> CpmResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> CpmResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Initial read-only vector built from `read_only`.
    pub fn read_only_vector(&self) -> CpmResult<u16> {
        let mut vector = 0u16;
        for &letter in &self.read_only {
            let upper = letter.to_ascii_uppercase();
            if !('A'..='P').contains(&upper) {
                return Err(CpmError::InvalidDrive(letter));
            }
            vector |= 1 << (upper as u8 - b'A');
        }
        Ok(vector)
    }

    pub fn validate(&self) -> CpmResult<()> {
        self.dpb.validate()?;
        self.read_only_vector()?;
        Ok(())
    }
}
