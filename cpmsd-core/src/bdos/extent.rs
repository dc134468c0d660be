//! Record, extent and module arithmetic.
//!
//! A file position is either the sequential triple (CR, EX, S2) kept in the
//! FCB or the 24-bit random record number (R0, R1, R2). Both reduce to an
//! absolute record index, and from there to a byte offset in the host file.

use crate::error::DiskError;

/// Record size in CP/M (always 128 bytes).
pub const RECORD_SIZE: usize = 128;

/// Records in one logical extent.
pub const RECORDS_PER_EXTENT: u32 = 128;

/// Bytes in one logical extent.
pub const EXTENT_SIZE: u64 = RECORD_SIZE as u64 * RECORDS_PER_EXTENT as u64;

/// Highest value of the EX field.
pub const MAX_EXTENT: u8 = 31;

/// Valid bits of the module number in S2.
pub const MODULE_MASK: u8 = 0x0F;

/// Records in one module (32 extents).
pub const RECORDS_PER_MODULE: u32 = (MAX_EXTENT as u32 + 1) * RECORDS_PER_EXTENT;

/// Number of addressable records in one file.
pub const MAX_RECORDS: u32 = (MODULE_MASK as u32 + 1) * RECORDS_PER_MODULE;

/// Largest file size in bytes (8 MiB).
pub const MAX_FILE_SIZE: u64 = MAX_RECORDS as u64 * RECORD_SIZE as u64;

/// Sequential position of an FCB.
///
/// `cr` may be 128, meaning the active extent has been consumed; the next
/// sequential access moves on to the following extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqPosition {
    pub cr: u8,
    pub extent: u8,
    pub module: u8,
}

impl SeqPosition {
    /// Build a position, rejecting fields a valid FCB can never hold.
    pub fn new(cr: u8, extent: u8, module: u8) -> Result<Self, DiskError> {
        if cr as u32 > RECORDS_PER_EXTENT || extent > MAX_EXTENT || module > MODULE_MASK {
            return Err(DiskError::SeekPastEnd);
        }
        Ok(Self { cr, extent, module })
    }

    /// Position of an absolute record index.
    pub fn from_record(record: u32) -> Result<Self, DiskError> {
        if record >= MAX_RECORDS {
            return Err(DiskError::SeekPastEnd);
        }
        Ok(Self {
            cr: (record % RECORDS_PER_EXTENT) as u8,
            extent: ((record / RECORDS_PER_EXTENT) % (MAX_EXTENT as u32 + 1)) as u8,
            module: (record / RECORDS_PER_MODULE) as u8,
        })
    }

    /// Absolute extent number: module * 32 + extent.
    pub fn extent_number(&self) -> u32 {
        (self.module & MODULE_MASK) as u32 * (MAX_EXTENT as u32 + 1) + self.extent as u32
    }

    /// Absolute record index.
    pub fn record(&self) -> u32 {
        (self.module & MODULE_MASK) as u32 * RECORDS_PER_MODULE
            + self.extent as u32 * RECORDS_PER_EXTENT
            + self.cr as u32
    }

    /// Byte offset of the current record in the host file.
    pub fn offset(&self) -> u64 {
        sequential_offset(self.extent, self.module, self.cr)
    }

    /// Move a consumed extent (`cr == 128`) on to the next one.
    pub fn normalized(self) -> Result<Self, DiskError> {
        if (self.cr as u32) < RECORDS_PER_EXTENT {
            return Ok(self);
        }
        let mut extent = self.extent + 1;
        let mut module = self.module;
        if extent > MAX_EXTENT {
            extent = 0;
            module += 1;
            if module > MODULE_MASK {
                return Err(DiskError::SeekPastEnd);
            }
        }
        Ok(Self {
            cr: 0,
            extent,
            module,
        })
    }

    /// Position after consuming the current record.
    ///
    /// A position sitting at `cr == 128` first rolls over to record 0 of the
    /// next extent, so the result there is `cr == 1`.
    pub fn advance(self) -> Result<Self, DiskError> {
        let current = self.normalized()?;
        Ok(Self {
            cr: current.cr + 1,
            ..current
        })
    }
}

/// Byte offset of a sequential (EX, S2, CR) position.
pub fn sequential_offset(extent: u8, module: u8, cr: u8) -> u64 {
    ((module & MODULE_MASK) as u64 * RECORDS_PER_MODULE as u64
        + extent as u64 * RECORDS_PER_EXTENT as u64
        + cr as u64)
        * RECORD_SIZE as u64
}

/// Absolute record index of a random record number.
pub fn random_record(r0: u8, r1: u8, r2: u8) -> u32 {
    (r2 as u32) << 16 | (r1 as u32) << 8 | r0 as u32
}

/// Number of records needed to hold `size` bytes.
pub fn records_for(size: u64) -> u32 {
    size.div_ceil(RECORD_SIZE as u64).min(u32::MAX as u64) as u32
}

/// Number of logical extents needed to hold `records` records.
pub fn extents_for(records: u32) -> u32 {
    records.div_ceil(RECORDS_PER_EXTENT)
}

/// Record count (RC) of the given absolute extent of a file of `size` bytes.
pub fn records_in_extent(size: u64, extent_number: u32) -> u8 {
    let records = records_for(size) as u64;
    let base = extent_number as u64 * RECORDS_PER_EXTENT as u64;
    records
        .saturating_sub(base)
        .min(RECORDS_PER_EXTENT as u64) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_offset() {
        assert_eq!(sequential_offset(0, 0, 0), 0);
        assert_eq!(sequential_offset(0, 0, 1), 128);
        assert_eq!(sequential_offset(1, 0, 0), 16384);
        assert_eq!(sequential_offset(0, 1, 0), 32 * 16384);
        // Flag bit of S2 is not part of the module number
        assert_eq!(sequential_offset(0, 0x81, 0), 32 * 16384);
        assert_eq!(sequential_offset(31, 15, 127), MAX_FILE_SIZE - 128);
    }

    #[test]
    fn test_random_record() {
        assert_eq!(random_record(0x34, 0x12, 0), 0x1234);
        assert_eq!(random_record(0, 0, 1), 65536);
        let pos = SeqPosition::from_record(random_record(1, 0, 0)).unwrap();
        assert_eq!(pos.offset(), 128);
    }

    #[test]
    fn test_offset_round_trip() {
        for module in 0..=MODULE_MASK {
            for extent in 0..=MAX_EXTENT {
                for cr in [0u8, 1, 63, 127] {
                    let pos = SeqPosition::new(cr, extent, module).unwrap();
                    let record = (pos.offset() / 128) as u32;
                    assert_eq!(record, pos.record());
                    assert_eq!(SeqPosition::from_record(record), Ok(pos));
                }
            }
        }
    }

    #[test]
    fn test_from_record_limit() {
        let last = SeqPosition::from_record(MAX_RECORDS - 1).unwrap();
        assert_eq!((last.cr, last.extent, last.module), (127, 31, 15));
        assert_eq!(SeqPosition::from_record(MAX_RECORDS), Err(DiskError::SeekPastEnd));
    }

    #[test]
    fn test_new_rejects_bad_fields() {
        assert!(SeqPosition::new(128, 31, 15).is_ok());
        assert_eq!(SeqPosition::new(129, 0, 0), Err(DiskError::SeekPastEnd));
        assert_eq!(SeqPosition::new(0, 32, 0), Err(DiskError::SeekPastEnd));
        assert_eq!(SeqPosition::new(0, 0, 16), Err(DiskError::SeekPastEnd));
    }

    #[test]
    fn test_advance_within_extent() {
        let pos = SeqPosition::new(0, 0, 0).unwrap();
        let next = pos.advance().unwrap();
        assert_eq!((next.cr, next.extent, next.module), (1, 0, 0));
    }

    #[test]
    fn test_advance_rolls_extent() {
        let pos = SeqPosition::new(128, 3, 0).unwrap();
        let next = pos.advance().unwrap();
        assert_eq!((next.cr, next.extent, next.module), (1, 4, 0));

        let pos = SeqPosition::new(128, 31, 2).unwrap();
        let next = pos.advance().unwrap();
        assert_eq!((next.cr, next.extent, next.module), (1, 0, 3));
    }

    #[test]
    fn test_advance_is_monotonic_until_limit() {
        let mut pos = SeqPosition::new(0, 0, 0).unwrap();
        let mut last = pos.record();
        let mut steps = 0u32;
        loop {
            match pos.advance() {
                Ok(next) => {
                    assert!(next.record() > last);
                    last = next.record();
                    pos = next;
                    steps += 1;
                }
                Err(e) => {
                    assert_eq!(e, DiskError::SeekPastEnd);
                    break;
                }
            }
        }
        assert_eq!(steps, MAX_RECORDS);
        assert_eq!((pos.cr, pos.extent, pos.module), (128, 31, 15));
    }

    #[test]
    fn test_records_in_extent() {
        assert_eq!(records_for(300), 3);
        assert_eq!(records_in_extent(300, 0), 3);
        assert_eq!(records_in_extent(300, 1), 0);
        assert_eq!(records_in_extent(20000, 0), 128);
        assert_eq!(records_in_extent(20000, 1), 29);
        assert_eq!(extents_for(0), 0);
        assert_eq!(extents_for(129), 2);
    }
}
