//! Error types for the CP/M disk emulator.
//!
//! Two layers: `CpmError` covers host-side failures that never reach the
//! guest (configuration, runner I/O), while `DiskError` is the fixed BDOS
//! status vocabulary handed back to guest programs.

use thiserror::Error;

/// Errors that can occur while setting up or running the emulator.
#[derive(Error, Debug)]
pub enum CpmError {
    #[error("Invalid drive: {0}")]
    InvalidDrive(char),

    #[error("Invalid user number: {0}")]
    InvalidUser(u8),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for CP/M operations.
pub type CpmResult<T> = Result<T, CpmError>;

/// Recoverable disk errors, reported to the guest as a BDOS status byte.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    /// Reading unwritten data (also end of file on sequential reads).
    #[error("reading unwritten data")]
    UnwrittenData,

    /// Host refused to extend or write the file.
    #[error("disk full")]
    DiskFull,

    /// Random read beyond the last written extent.
    #[error("reading unwritten extent")]
    UnwrittenExtent,

    /// Write attempted on a write-protected drive.
    #[error("drive is read-only")]
    ReadOnly,

    /// Position beyond the largest addressable file.
    #[error("seek past end of disk")]
    SeekPastEnd,

    /// Host file could not be opened.
    #[error("cannot open host file")]
    OpenFailed,

    /// No matching file.
    #[error("file not found")]
    NotFound,
}

impl DiskError {
    /// Status byte returned to the guest in register A.
    pub fn code(self) -> u8 {
        match self {
            DiskError::UnwrittenData => status::UNWRITTEN_DATA,
            DiskError::DiskFull => status::DISK_FULL,
            DiskError::UnwrittenExtent | DiskError::ReadOnly => status::READ_ONLY,
            DiskError::SeekPastEnd => status::SEEK_PAST_END,
            DiskError::OpenFailed => status::OPEN_FAILED,
            DiskError::NotFound => status::NOT_FOUND,
        }
    }
}

/// BDOS status codes.
pub mod status {
    pub const OK: u8 = 0x00;
    pub const UNWRITTEN_DATA: u8 = 0x01;
    pub const DISK_FULL: u8 = 0x02;
    pub const READ_ONLY: u8 = 0x04;
    pub const SEEK_PAST_END: u8 = 0x06;
    pub const OPEN_FAILED: u8 = 0x10;
    pub const NOT_FOUND: u8 = 0xFF;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(DiskError::UnwrittenData.code(), 0x01);
        assert_eq!(DiskError::DiskFull.code(), 0x02);
        assert_eq!(DiskError::ReadOnly.code(), 0x04);
        assert_eq!(DiskError::UnwrittenExtent.code(), 0x04);
        assert_eq!(DiskError::SeekPastEnd.code(), 0x06);
        assert_eq!(DiskError::OpenFailed.code(), 0x10);
        assert_eq!(DiskError::NotFound.code(), 0xFF);
    }
}
