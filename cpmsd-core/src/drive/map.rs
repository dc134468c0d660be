//! Drive and user namespace mapping.
//!
//! Drive `A`..`P` is the host directory `<base>/<LETTER>`, and user area
//! 0..15 inside it is the sub-directory named by one hex digit.

use std::path::{Path, PathBuf};

use super::name::{host_to_guest, user_segment, CpmName};
use crate::bdos::fcb::DRIVE_WILDCARD;
use crate::bdos::DiskSessionState;
use crate::error::{CpmError, CpmResult};

/// Number of drives CP/M can address.
pub const MAX_DRIVES: u8 = 16;

/// Drive letter of a 0-based drive index.
pub fn drive_letter(drive: u8) -> char {
    (b'A' + (drive % MAX_DRIVES)) as char
}

/// Translates drive/user pairs to host directories.
#[derive(Debug, Clone)]
pub struct DriveMap {
    base: PathBuf,
}

impl DriveMap {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolve an FCB drive byte to a 0-based drive index.
    ///
    /// `0` and `?` mean the current drive; `1..=16` are A..P.
    pub fn resolve(field: u8, current: u8) -> CpmResult<u8> {
        match field {
            0 | DRIVE_WILDCARD => Ok(current),
            1..=MAX_DRIVES => Ok(field - 1),
            _ => Err(CpmError::InvalidDrive(field as char)),
        }
    }

    /// Host directory of a drive.
    pub fn drive_dir(&self, drive: u8) -> PathBuf {
        self.base.join(drive_letter(drive).to_string())
    }

    /// Host directory of a user area on a drive. An existing lowercase
    /// `a`..`f` directory is used when the uppercase one is missing.
    pub fn user_dir(&self, drive: u8, user: u8) -> PathBuf {
        let segment = user_segment(user);
        let dir = self.drive_dir(drive).join(&segment);
        if user & 0x0F >= 10 && !dir.is_dir() {
            let lower = self.drive_dir(drive).join(segment.to_ascii_lowercase());
            if lower.is_dir() {
                return lower;
            }
        }
        dir
    }

    /// Host path of a file. The uppercase spelling wins; failing that, an
    /// existing host file whose name differs only in case is used.
    pub fn file_path(&self, drive: u8, user: u8, name: &CpmName) -> PathBuf {
        let dir = self.user_dir(drive, user);
        let exact = dir.join(name.to_host());
        if exact.exists() {
            return exact;
        }
        std::fs::read_dir(&dir)
            .ok()
            .and_then(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .find(|path| host_to_guest(path).is_some_and(|(found, _)| found == *name))
            })
            .unwrap_or(exact)
    }

    /// True if the drive's host directory exists.
    pub fn drive_exists(&self, drive: u8) -> bool {
        drive < MAX_DRIVES && self.drive_dir(drive).is_dir()
    }

    /// Select a drive for an operation. Logs the drive in on success.
    pub fn select_drive(&self, session: &mut DiskSessionState, drive: u8) -> bool {
        if !self.drive_exists(drive) {
            log::debug!("drive {}: has no host directory", drive_letter(drive));
            return false;
        }
        session.login_vector |= 1 << drive;
        true
    }

    /// Create the user directory on an existing drive.
    pub fn make_user_dir(&self, drive: u8, user: u8) -> CpmResult<()> {
        if !self.drive_exists(drive) {
            return Err(CpmError::InvalidDrive(drive_letter(drive)));
        }
        if user > 15 {
            return Err(CpmError::InvalidUser(user));
        }
        let dir = self.user_dir(drive, user);
        if !dir.is_dir() {
            std::fs::create_dir(&dir)?;
            log::debug!("created user directory {}", dir.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_base(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("cpmsd_map_tests").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_resolve() {
        assert_eq!(DriveMap::resolve(0, 2).unwrap(), 2);
        assert_eq!(DriveMap::resolve(b'?', 2).unwrap(), 2);
        assert_eq!(DriveMap::resolve(1, 2).unwrap(), 0);
        assert_eq!(DriveMap::resolve(16, 0).unwrap(), 15);
        assert!(DriveMap::resolve(17, 0).is_err());
    }

    #[test]
    fn test_paths() {
        let map = DriveMap::new("/sd");
        let name = CpmName::from_raw(b"SAMPLE  TXT");
        assert_eq!(map.file_path(0, 0, &name), PathBuf::from("/sd/A/0/SAMPLE.TXT"));
        assert_eq!(map.user_dir(1, 11), PathBuf::from("/sd/B/B"));
    }

    #[test]
    fn test_select_drive_sets_login_bit() {
        let base = temp_base("select");
        std::fs::create_dir(base.join("A")).unwrap();
        std::fs::create_dir(base.join("C")).unwrap();
        let map = DriveMap::new(&base);
        let mut session = DiskSessionState::default();

        assert!(map.select_drive(&mut session, 0));
        assert!(!map.select_drive(&mut session, 1));
        assert!(map.select_drive(&mut session, 2));
        assert_eq!(session.login_vector, 0b101);
    }

    #[test]
    fn test_select_rejects_plain_file() {
        let base = temp_base("select_file");
        std::fs::write(base.join("A"), b"not a directory").unwrap();
        let map = DriveMap::new(&base);
        let mut session = DiskSessionState::default();
        assert!(!map.select_drive(&mut session, 0));
        assert_eq!(session.login_vector, 0);
    }

    #[test]
    fn test_make_user_dir() {
        let base = temp_base("mkdir");
        std::fs::create_dir(base.join("A")).unwrap();
        let map = DriveMap::new(&base);

        map.make_user_dir(0, 5).unwrap();
        assert!(base.join("A").join("5").is_dir());
        // Idempotent
        map.make_user_dir(0, 5).unwrap();
        // Missing drive is not created
        assert!(map.make_user_dir(1, 0).is_err());
        assert!(!base.join("B").exists());
    }

    #[test]
    fn test_lowercase_user_dir() {
        let base = temp_base("lowercase");
        std::fs::create_dir_all(base.join("A").join("c")).unwrap();
        let map = DriveMap::new(&base);
        assert!(map.user_dir(0, 12).is_dir());
        assert_eq!(map.user_dir(0, 13), base.join("A").join("D"));
    }

    #[test]
    fn test_file_path_folds_case() {
        let base = temp_base("fold");
        std::fs::create_dir_all(base.join("A").join("0")).unwrap();
        std::fs::write(base.join("A").join("0").join("notes.txt"), b"n").unwrap();
        let map = DriveMap::new(&base);

        let path = map.file_path(0, 0, &CpmName::from_raw(b"NOTES   TXT"));
        assert_eq!(std::fs::read(&path).unwrap(), b"n");
        let missing = map.file_path(0, 0, &CpmName::from_raw(b"OTHER   TXT"));
        assert_eq!(missing, base.join("A").join("0").join("OTHER.TXT"));
    }
}
