//! Directory search with synthesized directory entries.
//!
//! The host directory holds plain files; CP/M expects one 32-byte entry per
//! group of extents. A file bigger than one entry can describe is reported
//! as several consecutive entries, handed out one per `find_next` call
//! before the host directory cursor moves on.

use std::path::PathBuf;

use super::map::DriveMap;
use super::name::{host_to_guest, CpmName};
use crate::bdos::dirent::DirEntry;
use crate::bdos::extent::{extents_for, records_for, MAX_RECORDS, RECORDS_PER_EXTENT, RECORD_SIZE};
use crate::config::DiskParams;

/// Which user areas a search walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserScope {
    One(u8),
    All,
}

/// One search hit: the host file and the entry describing (part of) it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub path: PathBuf,
    pub size: u64,
    pub entry: DirEntry,
}

/// Hands out increasing phoney block numbers for allocation maps.
#[derive(Debug, Clone, Copy)]
pub struct BlockCounter {
    first: u16,
    last: u16,
    next: u16,
}

impl BlockCounter {
    /// Counter starting at the first block after the directory.
    pub fn new(dpb: &DiskParams) -> Self {
        let first = dpb.directory_blocks().min(dpb.dsm);
        Self {
            first,
            last: dpb.dsm,
            next: first,
        }
    }

    pub fn next_block(&mut self) -> u16 {
        let block = self.next;
        self.next = if self.next >= self.last {
            self.first
        } else {
            self.next + 1
        };
        block
    }
}

/// Extents of one host file still waiting to be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub name: CpmName,
    pub user: u8,
    pub records_left: u32,
    pub extents_left: u32,
    pub next_extent: u32,
}

impl PendingFile {
    pub fn new(name: CpmName, user: u8, size: u64) -> Self {
        let records = records_for(size).min(MAX_RECORDS);
        Self {
            name,
            user,
            records_left: records,
            extents_left: extents_for(records),
            next_extent: 0,
        }
    }

    /// True once every extent has been reported.
    pub fn is_done(&self) -> bool {
        self.extents_left == 0 && self.next_extent > 0
    }

    /// Build the next directory entry for this file and consume its extents.
    pub fn next_entry(&mut self, dpb: &DiskParams, blocks: &mut BlockCounter) -> DirEntry {
        let per_entry = dpb.extents_per_entry();

        let (extents, records, rc) = if self.extents_left <= per_entry {
            // Final entry: whatever is left, reporting the trailing extent's count.
            let extents = self.extents_left.max(1);
            let trailing = self.records_left - (extents - 1).min(self.extents_left) * RECORDS_PER_EXTENT;
            (extents, self.records_left, trailing)
        } else {
            (per_entry, per_entry * RECORDS_PER_EXTENT, RECORDS_PER_EXTENT)
        };

        let last_extent = self.next_extent + extents - 1;
        let mut entry = DirEntry {
            user: self.user,
            name: self.name,
            ex: (last_extent & 0x1F) as u8,
            s1: 0,
            s2: ((last_extent >> 5) & 0x0F) as u8,
            rc: rc as u8,
            al: [0; 16],
        };

        let bytes = records as u64 * RECORD_SIZE as u64;
        let used = bytes.div_ceil(dpb.block_size() as u64) as u32;
        for i in 0..used.min(dpb.blocks_per_entry()) as usize {
            let block = blocks.next_block();
            if dpb.wide_blocks() {
                entry.al[2 * i..2 * i + 2].copy_from_slice(&block.to_le_bytes());
            } else {
                entry.al[i] = block as u8;
            }
        }

        self.extents_left = self.extents_left.saturating_sub(extents);
        self.records_left -= records;
        self.next_extent += extents;
        entry
    }
}

struct Candidate {
    user: u8,
    path: PathBuf,
}

struct SearchState {
    pattern: CpmName,
    candidates: Vec<Candidate>,
    cursor: usize,
    pending: Option<(PendingFile, PathBuf, u64)>,
    blocks: BlockCounter,
}

/// Walks one drive's user directories for names matching a pattern.
///
/// Only one search is active at a time; `find_first` discards any
/// previous one.
pub struct DirectoryEnumerator {
    dpb: DiskParams,
    search: Option<SearchState>,
}

impl DirectoryEnumerator {
    pub fn new(dpb: DiskParams) -> Self {
        Self { dpb, search: None }
    }

    pub fn dpb(&self) -> &DiskParams {
        &self.dpb
    }

    /// Start a new search. Returns `None` when the directory cannot be
    /// read or nothing matches.
    pub fn find_first(
        &mut self,
        map: &DriveMap,
        drive: u8,
        scope: UserScope,
        pattern: &CpmName,
    ) -> Option<SearchMatch> {
        self.search = None;

        let users: Vec<u8> = match scope {
            UserScope::One(user) => vec![user],
            UserScope::All => (0..16).collect(),
        };

        let mut candidates = Vec::new();
        let mut opened = false;
        for user in users {
            let dir = map.user_dir(drive, user);
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    if scope != UserScope::All {
                        log::debug!("cannot open {}: {}", dir.display(), e);
                    }
                    continue;
                }
            };
            opened = true;

            let mut files: Vec<Candidate> = entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().map(|t| !t.is_dir()).unwrap_or(false))
                .map(|entry| Candidate {
                    user,
                    path: entry.path(),
                })
                .collect();
            files.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
            candidates.extend(files);
        }

        if !opened {
            return None;
        }

        self.search = Some(SearchState {
            pattern: *pattern,
            candidates,
            cursor: 0,
            pending: None,
            blocks: BlockCounter::new(&self.dpb),
        });
        self.find_next()
    }

    /// Continue the active search.
    pub fn find_next(&mut self) -> Option<SearchMatch> {
        let dpb = self.dpb;
        let state = self.search.as_mut()?;

        if let Some((pending, path, size)) = &mut state.pending {
            if !pending.is_done() {
                let entry = pending.next_entry(&dpb, &mut state.blocks);
                let found = SearchMatch {
                    path: path.clone(),
                    size: *size,
                    entry,
                };
                if pending.is_done() {
                    state.pending = None;
                }
                return Some(found);
            }
        }
        state.pending = None;

        while state.cursor < state.candidates.len() {
            let candidate = &state.candidates[state.cursor];
            state.cursor += 1;

            let Some((name, _)) = host_to_guest(&candidate.path) else {
                continue;
            };
            if !name.matches(&state.pattern) {
                continue;
            }
            let size = match std::fs::metadata(&candidate.path) {
                Ok(meta) => meta.len(),
                Err(_) => continue,
            };

            let mut pending = PendingFile::new(name, candidate.user, size);
            let entry = pending.next_entry(&dpb, &mut state.blocks);
            let path = candidate.path.clone();
            if !pending.is_done() {
                state.pending = Some((pending, path.clone(), size));
            }
            return Some(SearchMatch { path, size, entry });
        }
        None
    }

    /// Drop the active search.
    pub fn reset(&mut self) {
        self.search = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_drive(name: &str) -> (PathBuf, DriveMap) {
        let base = std::env::temp_dir().join("cpmsd_search_tests").join(name);
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(base.join("A").join("0")).unwrap();
        let map = DriveMap::new(&base);
        (base, map)
    }

    fn entries_for(size: u64, dpb: &DiskParams) -> Vec<DirEntry> {
        let mut pending = PendingFile::new(CpmName::from_raw(b"BIG     DAT"), 0, size);
        let mut blocks = BlockCounter::new(dpb);
        let mut entries = vec![pending.next_entry(dpb, &mut blocks)];
        while !pending.is_done() {
            entries.push(pending.next_entry(dpb, &mut blocks));
        }
        entries
    }

    #[test]
    fn test_small_file_single_entry() {
        let dpb = DiskParams::default();
        let entries = entries_for(300, &dpb);
        assert_eq!(entries.len(), 1);
        assert_eq!((entries[0].ex, entries[0].s2, entries[0].rc), (0, 0, 3));
        // 384 bytes fit in one 2K block right after the directory
        assert_eq!(&entries[0].al[..4], &[8, 0, 0, 0]);
    }

    #[test]
    fn test_empty_file_single_entry() {
        let dpb = DiskParams::default();
        let entries = entries_for(0, &dpb);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rc, 0);
        assert_eq!(entries[0].al, [0; 16]);
    }

    #[test]
    fn test_record_coverage() {
        let dpb = DiskParams::default();
        for size in [1u64, 128, 16384, 16385, 40000, 100_000, 1 << 20] {
            let entries = entries_for(size, &dpb);
            let records = size.div_ceil(128) as u32;
            let total: u32 = entries.iter().map(|e| e.rc as u32).sum();
            assert_eq!(total, records, "size {}", size);
            assert_eq!(entries.len() as u32, records.div_ceil(128), "size {}", size);
            for (i, entry) in entries.iter().enumerate() {
                assert_eq!(entry.extent_number(), i as u32);
            }
        }
    }

    #[test]
    fn test_two_extents_per_entry() {
        let dpb = DiskParams {
            exm: 1,
            dsm: 255,
            ..DiskParams::default()
        };
        // 3 extents: one full entry (extents 0-1) then a final one (extent 2)
        let entries = entries_for(2 * 16384 + 1000, &dpb);
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].ex, entries[0].rc), (1, 128));
        assert_eq!((entries[1].ex, entries[1].rc), (2, 8));
        // Byte-wide block numbers, 16 blocks in the first entry
        assert_eq!(entries[0].al[0], 8);
        assert_eq!(entries[0].al[15], 23);
        assert_eq!(entries[1].al[0], 24);

        // 2 extents fit in one final entry
        let entries = entries_for(16384 + 1, &dpb);
        assert_eq!(entries.len(), 1);
        assert_eq!((entries[0].ex, entries[0].rc), (1, 1));
    }

    #[test]
    fn test_large_file_uses_modules() {
        let dpb = DiskParams::default();
        let entries = entries_for(33 * 16384, &dpb);
        let last = entries.last().unwrap();
        assert_eq!((last.ex, last.s2, last.rc), (0, 1, 128));
    }

    #[test]
    fn test_wildcard_search() {
        let (base, map) = temp_drive("wildcard");
        let user0 = base.join("A").join("0");
        std::fs::write(user0.join("REPORT.TXT"), b"r").unwrap();
        std::fs::write(user0.join("REPORT.DOC"), b"d").unwrap();
        std::fs::write(user0.join("notes.txt"), b"n").unwrap();
        std::fs::create_dir(user0.join("SUB.TXT")).unwrap();
        std::fs::write(user0.join("TOOLONGNAME.TXT"), b"x").unwrap();

        let mut search = DirectoryEnumerator::new(DiskParams::default());
        let pattern = CpmName::from_raw(b"????????TXT");

        let mut names = Vec::new();
        let mut hit = search.find_first(&map, 0, UserScope::One(0), &pattern);
        while let Some(found) = hit {
            names.push(found.entry.name.to_host());
            hit = search.find_next();
        }
        assert_eq!(names, vec!["REPORT.TXT", "NOTES.TXT"]);
        assert!(search.find_next().is_none());
    }

    #[test]
    fn test_multi_extent_file_continues_before_next_file() {
        let (base, map) = temp_drive("continue");
        let user0 = base.join("A").join("0");
        std::fs::write(user0.join("A.DAT"), vec![0u8; 16384 * 2 + 10]).unwrap();
        std::fs::write(user0.join("B.DAT"), b"b").unwrap();

        let mut search = DirectoryEnumerator::new(DiskParams::default());
        let first = search.find_first(&map, 0, UserScope::One(0), &CpmName::ALL).unwrap();
        let second = search.find_next().unwrap();
        let third = search.find_next().unwrap();
        let fourth = search.find_next().unwrap();

        assert_eq!(first.entry.name.to_host(), "A.DAT");
        assert_eq!((first.entry.ex, first.entry.rc), (0, 128));
        assert_eq!((second.entry.ex, second.entry.rc), (1, 128));
        assert_eq!((third.entry.ex, third.entry.rc), (2, 1));
        assert_eq!(third.path, first.path);
        assert_eq!(fourth.entry.name.to_host(), "B.DAT");
        assert!(search.find_next().is_none());
    }

    #[test]
    fn test_all_users() {
        let (base, map) = temp_drive("all_users");
        std::fs::write(base.join("A").join("0").join("ZERO.TXT"), b"0").unwrap();
        std::fs::create_dir(base.join("A").join("7")).unwrap();
        std::fs::write(base.join("A").join("7").join("SEVEN.TXT"), b"7").unwrap();

        let mut search = DirectoryEnumerator::new(DiskParams::default());
        let first = search.find_first(&map, 0, UserScope::All, &CpmName::ALL).unwrap();
        let second = search.find_next().unwrap();
        assert_eq!((first.entry.user, first.entry.name.to_host()), (0, "ZERO.TXT".to_string()));
        assert_eq!((second.entry.user, second.entry.name.to_host()), (7, "SEVEN.TXT".to_string()));
        assert!(search.find_next().is_none());
    }

    #[test]
    fn test_missing_directory() {
        let (_, map) = temp_drive("missing");
        let mut search = DirectoryEnumerator::new(DiskParams::default());
        assert!(search.find_first(&map, 0, UserScope::One(4), &CpmName::ALL).is_none());
        assert!(search.find_first(&map, 1, UserScope::One(0), &CpmName::ALL).is_none());
        assert!(search.find_next().is_none());
    }
}
