//! File Control Block (FCB) implementation.
//!
//! The FCB is CP/M's file descriptor structure, stored in the program's
//! memory space and passed to BDOS functions. It is decoded into a typed
//! record on entry and encoded back on exit.
//!
//! Layout (36 bytes):
//! - Byte 0: Drive (0=default, 1=A:, 2=B:, ..., '?'=all, search only)
//! - Bytes 1-8: Filename (space-padded)
//! - Bytes 9-11: Extension (space-padded)
//! - Byte 12: Current extent (EX)
//! - Byte 13: Reserved (S1)
//! - Byte 14: Module (S2), bit 7 set while the file is unmodified
//! - Byte 15: Record count (RC)
//! - Bytes 16-31: Disk allocation map (d0-d15)
//! - Byte 32: Current record (CR)
//! - Bytes 33-35: Random record number (R0, R1, R2)

use super::extent::{random_record, SeqPosition, MODULE_MASK};
use crate::drive::CpmName;
use crate::error::DiskError;
use crate::memory::GuestMemory;

/// Size of an FCB in bytes.
pub const FCB_SIZE: usize = 36;

/// S2 flag: file not written since it was opened.
pub const S2_UNMODIFIED: u8 = 0x80;

/// Drive byte requesting a match on every drive entry (search only).
pub const DRIVE_WILDCARD: u8 = b'?';

/// File Control Block, decoded from guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fcb {
    pub drive: u8,
    /// Raw name and type bytes, attribute bits included.
    pub name: [u8; 11],
    pub ex: u8,
    pub s1: u8,
    pub s2: u8,
    pub rc: u8,
    pub al: [u8; 16],
    pub cr: u8,
    pub r: [u8; 3],
}

impl Default for Fcb {
    fn default() -> Self {
        Self {
            drive: 0,
            name: [b' '; 11],
            ex: 0,
            s1: 0,
            s2: 0,
            rc: 0,
            al: [0; 16],
            cr: 0,
            r: [0; 3],
        }
    }
}

impl Fcb {
    /// Decode the 36-byte binary layout.
    pub fn from_bytes(bytes: &[u8; FCB_SIZE]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&bytes[1..12]);
        let mut al = [0u8; 16];
        al.copy_from_slice(&bytes[16..32]);
        Self {
            drive: bytes[0],
            name,
            ex: bytes[12],
            s1: bytes[13],
            s2: bytes[14],
            rc: bytes[15],
            al,
            cr: bytes[32],
            r: [bytes[33], bytes[34], bytes[35]],
        }
    }

    /// Encode into the 36-byte binary layout.
    pub fn to_bytes(&self) -> [u8; FCB_SIZE] {
        let mut bytes = [0u8; FCB_SIZE];
        bytes[0] = self.drive;
        bytes[1..12].copy_from_slice(&self.name);
        bytes[12] = self.ex;
        bytes[13] = self.s1;
        bytes[14] = self.s2;
        bytes[15] = self.rc;
        bytes[16..32].copy_from_slice(&self.al);
        bytes[32] = self.cr;
        bytes[33..36].copy_from_slice(&self.r);
        bytes
    }

    /// Read an FCB from guest memory.
    pub fn read_from(mem: &dyn GuestMemory, addr: u16) -> Self {
        let mut bytes = [0u8; FCB_SIZE];
        mem.read_block(addr, &mut bytes);
        Self::from_bytes(&bytes)
    }

    /// Write this FCB back to guest memory.
    pub fn write_to(&self, mem: &mut dyn GuestMemory, addr: u16) {
        mem.write_block(addr, &self.to_bytes());
    }

    /// File name, attribute bits stripped.
    pub fn file_name(&self) -> CpmName {
        CpmName::from_raw(&self.name)
    }

    /// Replace the name, keeping the drive byte.
    pub fn set_file_name(&mut self, name: &CpmName) {
        self.name.copy_from_slice(name.as_bytes());
    }

    /// Module number (S2 without the flag bit).
    pub fn module(&self) -> u8 {
        self.s2 & MODULE_MASK
    }

    /// Absolute extent number: module * 32 + EX.
    pub fn extent_number(&self) -> u32 {
        self.module() as u32 * 32 + (self.ex & 0x1F) as u32
    }

    /// True while the file has not been written since open.
    pub fn is_unmodified(&self) -> bool {
        self.s2 & S2_UNMODIFIED != 0
    }

    pub fn set_unmodified(&mut self, unmodified: bool) {
        if unmodified {
            self.s2 |= S2_UNMODIFIED;
        } else {
            self.s2 &= !S2_UNMODIFIED;
        }
    }

    /// Sequential position, validated.
    pub fn seq_position(&self) -> Result<SeqPosition, DiskError> {
        SeqPosition::new(self.cr, self.ex, self.s2 & !S2_UNMODIFIED)
    }

    /// Store a sequential position, keeping the S2 flag bit.
    pub fn set_seq_position(&mut self, pos: SeqPosition) {
        self.cr = pos.cr;
        self.ex = pos.extent;
        self.s2 = (self.s2 & S2_UNMODIFIED) | pos.module;
    }

    /// Random record number (24-bit, from R0, R1, R2).
    pub fn random_record(&self) -> u32 {
        random_record(self.r[0], self.r[1], self.r[2])
    }

    /// Set random record number.
    pub fn set_random_record(&mut self, n: u32) {
        self.r = [n as u8, (n >> 8) as u8, (n >> 16) as u8];
    }

    /// Parse a filename string into an FCB.
    /// Handles formats like "A:FILE.TXT", "FILE.TXT", "FILE", "*.COM".
    pub fn parse(filename: &str) -> Self {
        let mut fcb = Self::default();
        let mut s = filename.to_uppercase();

        if s.len() >= 2 && s.as_bytes()[1] == b':' {
            let drive = s.as_bytes()[0];
            if (b'A'..=b'P').contains(&drive) {
                fcb.drive = drive - b'A' + 1;
            }
            s = s[2..].to_string();
        }

        if let Some(name) = CpmName::parse_pattern(&s) {
            fcb.set_file_name(&name);
        }
        fcb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MEMORY_SIZE;

    #[test]
    fn test_parse_filename() {
        let fcb = Fcb::parse("test.txt");
        assert_eq!(fcb.drive, 0);
        assert_eq!(fcb.file_name().name(), "TEST");
        assert_eq!(fcb.file_name().extension(), "TXT");
        assert_eq!(fcb.file_name().to_host(), "TEST.TXT");
    }

    #[test]
    fn test_parse_filename_with_drive() {
        let fcb = Fcb::parse("B:HELLO.COM");
        assert_eq!(fcb.drive, 2); // B = 2
        assert_eq!(&fcb.name, b"HELLO   COM");
    }

    #[test]
    fn test_parse_wildcard() {
        let fcb = Fcb::parse("*.ASM");
        assert_eq!(&fcb.name, b"????????ASM");
    }

    #[test]
    fn test_binary_layout() {
        let mut bytes = [0u8; FCB_SIZE];
        bytes[0] = 1;
        bytes[1..12].copy_from_slice(b"SAMPLE  TXT");
        bytes[12] = 2; // EX
        bytes[14] = 0x81; // S2
        bytes[15] = 0x80; // RC
        bytes[16] = 0xAA;
        bytes[31] = 0xBB;
        bytes[32] = 5; // CR
        bytes[33..36].copy_from_slice(&[0x34, 0x12, 0x00]);

        let fcb = Fcb::from_bytes(&bytes);
        assert_eq!(fcb.drive, 1);
        assert_eq!(fcb.ex, 2);
        assert_eq!(fcb.module(), 1);
        assert!(fcb.is_unmodified());
        assert_eq!(fcb.rc, 128);
        assert_eq!(fcb.al[0], 0xAA);
        assert_eq!(fcb.al[15], 0xBB);
        assert_eq!(fcb.cr, 5);
        assert_eq!(fcb.random_record(), 0x1234);
        assert_eq!(fcb.extent_number(), 34);
        assert_eq!(fcb.to_bytes(), bytes);
    }

    #[test]
    fn test_seq_position_keeps_flag() {
        let mut fcb = Fcb {
            s2: S2_UNMODIFIED,
            ..Fcb::default()
        };
        fcb.set_seq_position(SeqPosition::new(7, 3, 2).unwrap());
        assert_eq!((fcb.cr, fcb.ex, fcb.s2), (7, 3, 0x82));
        assert_eq!(fcb.seq_position().unwrap().record(), 2 * 4096 + 3 * 128 + 7);

        fcb.set_unmodified(false);
        assert_eq!(fcb.s2, 0x02);
    }

    #[test]
    fn test_seq_position_rejects_garbage() {
        let fcb = Fcb {
            ex: 40,
            ..Fcb::default()
        };
        assert_eq!(fcb.seq_position(), Err(DiskError::SeekPastEnd));
    }

    #[test]
    fn test_memory_round_trip() {
        let mut mem = Box::new([0u8; MEMORY_SIZE]);
        let mut fcb = Fcb::parse("C:DATA.BIN");
        fcb.set_random_record(0x010203);
        fcb.write_to(&mut *mem, 0x005C);

        assert_eq!(mem[0x005C], 3);
        assert_eq!(&mem[0x005D..0x0068], b"DATA    BIN");
        assert_eq!(&mem[0x007D..0x0080], &[0x03, 0x02, 0x01]);
        assert_eq!(Fcb::read_from(&*mem, 0x005C), fcb);
    }
}
