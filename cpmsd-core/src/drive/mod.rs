//! Host filesystem adapter for CP/M drives.
//!
//! This module provides the layers between BDOS calls and the host:
//! - `CpmName`: packed 8.3 names and their host spelling
//! - `DriveMap`: drive/user to `<base>/<DRIVE>/<USER>/`
//! - `FileHandleCache`: the single open host file
//! - `DirectoryEnumerator`: wildcard search with synthesized entries
//! - `HostDrive`: the above bundled behind one interface

mod cache;
mod map;
mod name;
mod search;

use std::path::{Path, PathBuf};

pub use cache::{AccessMode, BlockRead, CacheStats, FileHandleCache, Record, SENTINEL};
pub use map::{drive_letter, DriveMap, MAX_DRIVES};
pub use name::{host_to_guest, parse_user, user_segment, CpmName};
pub use search::{BlockCounter, DirectoryEnumerator, PendingFile, SearchMatch, UserScope};

use crate::bdos::DiskSessionState;
use crate::config::DiskParams;
use crate::error::{CpmResult, DiskError};

/// Name of the CCP batch file.
pub const BATCH_FILE: &[u8; 11] = b"$$$     SUB";

/// The disk set: a directory tree on the host.
pub struct HostDrive {
    map: DriveMap,
    cache: FileHandleCache,
    search: DirectoryEnumerator,
}

impl HostDrive {
    pub fn new(base: impl Into<PathBuf>, dpb: DiskParams) -> Self {
        Self {
            map: DriveMap::new(base),
            cache: FileHandleCache::new(),
            search: DirectoryEnumerator::new(dpb),
        }
    }

    pub fn map(&self) -> &DriveMap {
        &self.map
    }

    pub fn cache(&self) -> &FileHandleCache {
        &self.cache
    }

    pub fn dpb(&self) -> &DiskParams {
        self.search.dpb()
    }

    /// Check a drive exists and log it in.
    pub fn select(&self, session: &mut DiskSessionState, drive: u8) -> bool {
        self.map.select_drive(session, drive)
    }

    pub fn path(&self, drive: u8, user: u8, name: &CpmName) -> PathBuf {
        self.map.file_path(drive, user, name)
    }

    /// Size of a regular host file.
    pub fn file_size(&self, path: &Path) -> Option<u64> {
        std::fs::metadata(path)
            .ok()
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
    }

    pub fn make_user_dir(&self, drive: u8, user: u8) -> CpmResult<()> {
        self.map.make_user_dir(drive, user)
    }

    /// True if `$$$.SUB` exists in the user area.
    pub fn has_batch_file(&self, drive: u8, user: u8) -> bool {
        let path = self.path(drive, user, &CpmName::from_raw(BATCH_FILE));
        self.file_size(&path).is_some()
    }

    pub fn find_first(
        &mut self,
        drive: u8,
        scope: UserScope,
        pattern: &CpmName,
    ) -> Option<SearchMatch> {
        self.search.find_first(&self.map, drive, scope, pattern)
    }

    pub fn find_next(&mut self) -> Option<SearchMatch> {
        self.search.find_next()
    }

    /// Host files matching a pattern, each listed once.
    pub fn matching_files(&mut self, drive: u8, scope: UserScope, pattern: &CpmName) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        let mut hit = self.find_first(drive, scope, pattern);
        while let Some(found) = hit {
            if paths.last() != Some(&found.path) {
                paths.push(found.path);
            }
            hit = self.find_next();
        }
        paths
    }

    pub fn read(&mut self, path: &Path, offset: u64) -> Result<BlockRead, DiskError> {
        self.cache.read_block(path, offset)
    }

    pub fn write(
        &mut self,
        path: &Path,
        offset: u64,
        data: &Record,
        fill: u8,
    ) -> Result<u64, DiskError> {
        self.cache.write_block(path, offset, data, fill)
    }

    /// Create a file. An existing file is emptied when `truncate` is set and
    /// left alone otherwise.
    pub fn create(&mut self, path: &Path, truncate: bool) -> Result<(), DiskError> {
        self.cache.close(path);
        let result = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(path);
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                log::warn!("cannot create {}: {}", path.display(), e);
                Err(DiskError::OpenFailed)
            }
        }
    }

    pub fn remove(&mut self, path: &Path) -> Result<(), DiskError> {
        self.cache.close(path);
        std::fs::remove_file(path).map_err(|e| {
            log::warn!("cannot remove {}: {}", path.display(), e);
            DiskError::NotFound
        })
    }

    /// Rename by copying then deleting; an existing target is replaced.
    pub fn rename(&mut self, from: &Path, to: &Path) -> Result<(), DiskError> {
        if self.file_size(from).is_none() {
            return Err(DiskError::NotFound);
        }
        if from == to {
            return Ok(());
        }
        self.cache.close(from);
        self.cache.close(to);
        if self.file_size(to).is_some() {
            self.remove(to)?;
        }
        if let Err(e) = std::fs::copy(from, to) {
            log::warn!("cannot copy {} to {}: {}", from.display(), to.display(), e);
            return Err(DiskError::DiskFull);
        }
        self.remove(from)
    }

    pub fn truncate(&mut self, path: &Path, records: u32) -> Result<(), DiskError> {
        self.cache.truncate(path, records)
    }

    pub fn close(&mut self, path: &Path) {
        self.cache.close(path);
    }

    /// Close the cached file and forget the active search.
    pub fn close_all(&mut self) {
        self.cache.close_all();
        self.search.reset();
    }
}
