//! Directory entry layout.
//!
//! Entries are never stored on the host; they are synthesized from file
//! metadata whenever a guest searches the directory.
//!
//! Layout (32 bytes):
//! - Byte 0: User number (0xE5 = empty slot)
//! - Bytes 1-11: Name and type
//! - Byte 12: Extent (EX)
//! - Byte 13: S1
//! - Byte 14: Module (S2)
//! - Byte 15: Record count (RC)
//! - Bytes 16-31: Allocation map

use crate::drive::CpmName;

/// Size of a directory entry in bytes.
pub const DIR_ENTRY_SIZE: usize = 32;

/// User byte marking an unused directory slot.
pub const EMPTY_ENTRY: u8 = 0xE5;

/// One 32-byte directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub user: u8,
    pub name: CpmName,
    pub ex: u8,
    pub s1: u8,
    pub s2: u8,
    pub rc: u8,
    pub al: [u8; 16],
}

impl DirEntry {
    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut bytes = [0u8; DIR_ENTRY_SIZE];
        bytes[0] = self.user;
        bytes[1..12].copy_from_slice(self.name.as_bytes());
        bytes[12] = self.ex;
        bytes[13] = self.s1;
        bytes[14] = self.s2;
        bytes[15] = self.rc;
        bytes[16..32].copy_from_slice(&self.al);
        bytes
    }

    pub fn from_bytes(bytes: &[u8; DIR_ENTRY_SIZE]) -> Self {
        let mut al = [0u8; 16];
        al.copy_from_slice(&bytes[16..32]);
        Self {
            user: bytes[0],
            name: CpmName::from_raw(&bytes[1..12]),
            ex: bytes[12],
            s1: bytes[13],
            s2: bytes[14],
            rc: bytes[15],
            al,
        }
    }

    /// Absolute number of the last extent this entry describes.
    pub fn extent_number(&self) -> u32 {
        (self.s2 & 0x0F) as u32 * 32 + (self.ex & 0x1F) as u32
    }

    /// A full 128-byte directory record with this entry in slot 0 and the
    /// other three slots empty.
    pub fn to_record(&self) -> [u8; 128] {
        let mut record = [0u8; 128];
        record[..DIR_ENTRY_SIZE].copy_from_slice(&self.to_bytes());
        for slot in record[DIR_ENTRY_SIZE..].chunks_mut(DIR_ENTRY_SIZE) {
            slot[0] = EMPTY_ENTRY;
            slot[1..12].fill(b' ');
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let entry = DirEntry {
            user: 3,
            name: CpmName::from_raw(b"SAMPLE  TXT"),
            ex: 2,
            s1: 0,
            s2: 1,
            rc: 0x45,
            al: [7; 16],
        };
        let bytes = entry.to_bytes();
        assert_eq!(bytes[0], 3);
        assert_eq!(&bytes[1..12], b"SAMPLE  TXT");
        assert_eq!(bytes[12], 2);
        assert_eq!(bytes[14], 1);
        assert_eq!(bytes[15], 0x45);
        assert_eq!(&bytes[16..32], &[7; 16]);
        assert_eq!(DirEntry::from_bytes(&bytes), entry);
        assert_eq!(entry.extent_number(), 34);
    }

    #[test]
    fn test_record_marks_empty_slots() {
        let entry = DirEntry {
            user: 0,
            name: CpmName::from_raw(b"A       TXT"),
            ex: 0,
            s1: 0,
            s2: 0,
            rc: 1,
            al: [0; 16],
        };
        let record = entry.to_record();
        assert_eq!(record[0], 0);
        assert_eq!(record[32], EMPTY_ENTRY);
        assert_eq!(record[64], EMPTY_ENTRY);
        assert_eq!(record[96], EMPTY_ENTRY);
    }
}
