//! Single-slot host file handle cache.
//!
//! Guest programs issue one 128-byte transfer per BDOS call. Keeping the
//! last host file open (and remembering where its cursor is) turns a run of
//! sequential calls into plain reads and writes with no reopen and no seek.
//!
//! At most one file is open at a time. Asking for another path closes the
//! current one first; asking for the same path in a stronger mode reopens
//! it and restores the cursor.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::bdos::extent::{EXTENT_SIZE, MAX_FILE_SIZE, RECORD_SIZE};
use crate::error::DiskError;

/// Byte CP/M uses for data that was never written (^Z).
pub const SENTINEL: u8 = 0x1A;

/// One record worth of bytes.
pub type Record = [u8; RECORD_SIZE];

/// Host open mode. `ReadWrite` satisfies a `Read` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessMode {
    Read,
    ReadWrite,
}

/// Host-side operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub opens: u32,
    pub closes: u32,
    pub seeks: u32,
}

/// Result of a block read.
#[derive(Debug, Clone, Copy)]
pub struct BlockRead {
    /// Record contents, padded with [`SENTINEL`] past the live bytes.
    pub data: Record,
    /// Bytes that came from the file (1..=128).
    pub live: usize,
    /// Host file length.
    pub file_len: u64,
}

struct OpenFile {
    file: File,
    mode: AccessMode,
    path: PathBuf,
    position: u64,
}

/// Holds at most one open host file.
#[derive(Default)]
pub struct FileHandleCache {
    slot: Option<OpenFile>,
    stats: CacheStats,
}

impl FileHandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Path and mode of the open file, if any.
    pub fn current(&self) -> Option<(&Path, AccessMode)> {
        self.slot.as_ref().map(|f| (f.path.as_path(), f.mode))
    }

    /// Cursor of the open file.
    pub fn position(&self) -> Option<u64> {
        self.slot.as_ref().map(|f| f.position)
    }

    /// Make sure `path` is open in at least `mode`.
    pub fn ensure_open(&mut self, path: &Path, mode: AccessMode) -> bool {
        let reopen_at = match &self.slot {
            Some(open) if open.path == path && open.mode >= mode => return true,
            Some(open) if open.path == path => Some(open.position),
            Some(_) => None,
            None => None,
        };

        self.close_slot();

        let file = match Self::open_file(path, mode) {
            Ok(file) => file,
            Err(e) => {
                log::debug!("cannot open {} ({:?}): {}", path.display(), mode, e);
                return false;
            }
        };
        self.stats.opens += 1;

        let mut open = OpenFile {
            file,
            mode,
            path: path.to_path_buf(),
            position: 0,
        };

        if let Some(position) = reopen_at {
            log::debug!("reopened {} as {:?} at {}", path.display(), mode, position);
            self.stats.seeks += 1;
            if open.file.seek(SeekFrom::Start(position)).is_err() {
                self.stats.closes += 1;
                return false;
            }
            open.position = position;
        }

        self.slot = Some(open);
        true
    }

    /// Read the record at `offset`.
    pub fn read_block(&mut self, path: &Path, offset: u64) -> Result<BlockRead, DiskError> {
        if offset >= MAX_FILE_SIZE {
            return Err(DiskError::SeekPastEnd);
        }
        if !self.ensure_open(path, AccessMode::Read) {
            return Err(DiskError::OpenFailed);
        }
        let stats = &mut self.stats;
        let open = self.slot.as_mut().ok_or(DiskError::OpenFailed)?;

        let file_len = open.file.metadata().map_err(|_| DiskError::OpenFailed)?.len();
        if offset >= file_len {
            // Round up to the next full extent: inside it the data is just
            // unwritten, past it the extent itself does not exist.
            let allocated = file_len.div_ceil(EXTENT_SIZE) * EXTENT_SIZE;
            return Err(if offset < allocated {
                DiskError::UnwrittenData
            } else {
                DiskError::UnwrittenExtent
            });
        }

        if open.position != offset {
            stats.seeks += 1;
            open.file
                .seek(SeekFrom::Start(offset))
                .map_err(|_| DiskError::SeekPastEnd)?;
            open.position = offset;
        }

        let mut data = [SENTINEL; RECORD_SIZE];
        let mut live = 0;
        while live < RECORD_SIZE {
            match open.file.read(&mut data[live..]) {
                Ok(0) => break,
                Ok(n) => live += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("read error on {}: {}", open.path.display(), e);
                    open.position += live as u64;
                    return Err(DiskError::UnwrittenData);
                }
            }
        }
        open.position += live as u64;

        if live == 0 {
            return Err(DiskError::UnwrittenData);
        }
        Ok(BlockRead {
            data,
            live,
            file_len,
        })
    }

    /// Write one record at `offset`, extending the file with `fill` bytes
    /// first when `offset` lies past its end. Returns the new file length.
    pub fn write_block(
        &mut self,
        path: &Path,
        offset: u64,
        data: &Record,
        fill: u8,
    ) -> Result<u64, DiskError> {
        if offset >= MAX_FILE_SIZE {
            return Err(DiskError::SeekPastEnd);
        }
        if !self.ensure_open(path, AccessMode::ReadWrite) {
            return Err(DiskError::OpenFailed);
        }
        let stats = &mut self.stats;
        let open = self.slot.as_mut().ok_or(DiskError::OpenFailed)?;

        let mut file_len = open.file.metadata().map_err(|_| DiskError::OpenFailed)?.len();
        if offset > file_len {
            if open.position != file_len {
                stats.seeks += 1;
                open.file
                    .seek(SeekFrom::Start(file_len))
                    .map_err(|_| DiskError::SeekPastEnd)?;
                open.position = file_len;
            }
            // Append real bytes; never rely on sparse files.
            let pad = [fill; RECORD_SIZE];
            while open.position < offset {
                let n = (offset - open.position).min(RECORD_SIZE as u64) as usize;
                if let Err(e) = open.file.write_all(&pad[..n]) {
                    log::warn!("cannot extend {}: {}", open.path.display(), e);
                    return Err(DiskError::DiskFull);
                }
                open.position += n as u64;
            }
            file_len = offset;
        }

        if open.position != offset {
            stats.seeks += 1;
            open.file
                .seek(SeekFrom::Start(offset))
                .map_err(|_| DiskError::SeekPastEnd)?;
            open.position = offset;
        }

        if let Err(e) = open.file.write_all(data) {
            log::warn!("write error on {}: {}", open.path.display(), e);
            return Err(DiskError::DiskFull);
        }
        open.position += RECORD_SIZE as u64;
        Ok(file_len.max(open.position))
    }

    /// Close `path` if it is the cached file.
    pub fn close(&mut self, path: &Path) {
        if self.slot.as_ref().is_some_and(|f| f.path == path) {
            self.close_slot();
        }
    }

    /// Close whatever is open.
    pub fn close_all(&mut self) {
        self.close_slot();
    }

    /// Cut `path` down to `records` records.
    pub fn truncate(&mut self, path: &Path, records: u32) -> Result<(), DiskError> {
        if !self.ensure_open(path, AccessMode::ReadWrite) {
            return Err(DiskError::OpenFailed);
        }
        let open = self.slot.as_mut().ok_or(DiskError::OpenFailed)?;
        let len = records as u64 * RECORD_SIZE as u64;
        open.file.set_len(len).map_err(|e| {
            log::warn!("cannot truncate {}: {}", open.path.display(), e);
            DiskError::DiskFull
        })?;
        // set_len leaves the cursor alone; make the next access seek.
        if open.position > len {
            open.position = u64::MAX;
        }
        Ok(())
    }

    fn open_file(path: &Path, mode: AccessMode) -> std::io::Result<File> {
        match mode {
            AccessMode::Read => OpenOptions::new().read(true).open(path),
            AccessMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path),
        }
    }

    fn close_slot(&mut self) {
        if let Some(open) = self.slot.take() {
            if open.mode == AccessMode::ReadWrite {
                if let Err(e) = open.file.sync_data() {
                    log::warn!("flush failed on {}: {}", open.path.display(), e);
                }
            }
            self.stats.closes += 1;
        }
    }
}
