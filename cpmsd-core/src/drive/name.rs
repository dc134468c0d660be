//! Conversion between packed CP/M names and host file names.
//!
//! CP/M keeps a file name as 11 bytes: 8 for the name and 3 for the type,
//! both space-padded, without the dot. On the host the same file is
//! `NAME.TYP` (or `NAME` when the type is blank), always uppercase.

use std::fmt;
use std::path::Path;

/// Characters that cannot appear in a CP/M file name.
const ILLEGAL: &[u8] = b" <>.,;:=?*[]|/\\";

/// Packed 8+3 CP/M file name, 7-bit uppercase, space-padded.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpmName([u8; 11]);

impl CpmName {
    /// Pattern that matches every name.
    pub const ALL: CpmName = CpmName([b'?'; 11]);

    /// Build from the raw name and type bytes of an FCB or directory entry.
    /// Attribute bits (bit 7) are dropped and letters uppercased.
    pub fn from_raw(raw: &[u8]) -> Self {
        let mut name = [b' '; 11];
        for (dst, &src) in name.iter_mut().zip(raw.iter()) {
            *dst = (src & 0x7F).to_ascii_uppercase();
        }
        Self(name)
    }

    /// Parse a `NAME.TYP` string, as typed by a user or stored on the host.
    ///
    /// Returns `None` for names that do not fit the 8.3 format or contain
    /// characters CP/M cannot represent.
    pub fn parse(filename: &str) -> Option<Self> {
        let (name, ext) = match filename.split_once('.') {
            Some((name, ext)) => (name, ext),
            None => (filename, ""),
        };

        fn valid(s: &str, max: usize) -> bool {
            s.len() <= max && s.bytes().all(|b| b.is_ascii_graphic() && !ILLEGAL.contains(&b))
        }

        if name.is_empty() || !valid(name, 8) || !valid(ext, 3) {
            return None;
        }

        let mut packed = [b' '; 11];
        packed[..name.len()].copy_from_slice(name.as_bytes());
        packed[8..8 + ext.len()].copy_from_slice(ext.as_bytes());
        Some(Self::from_raw(&packed))
    }

    /// Parse a wildcard pattern such as `*.COM` or `A?.TXT` into `?` form.
    pub fn parse_pattern(pattern: &str) -> Option<Self> {
        let (name, ext) = match pattern.split_once('.') {
            Some((name, ext)) => (name, ext),
            None => (pattern, ""),
        };

        fn expand(part: &str, out: &mut [u8]) -> bool {
            let mut i = 0;
            for b in part.bytes() {
                if b == b'*' {
                    out[i..].fill(b'?');
                    return true;
                }
                if i >= out.len() || !(b == b'?' || b.is_ascii_graphic() && !ILLEGAL.contains(&b)) {
                    return false;
                }
                out[i] = b;
                i += 1;
            }
            true
        }

        let mut packed = [b' '; 11];
        let (name_part, ext_part) = packed.split_at_mut(8);
        if name.is_empty() || !expand(name, name_part) || !expand(ext, ext_part) {
            return None;
        }
        Some(Self::from_raw(&packed))
    }

    /// Raw 11-byte form.
    pub fn as_bytes(&self) -> &[u8; 11] {
        &self.0
    }

    /// Name part, trimmed.
    pub fn name(&self) -> String {
        trimmed(&self.0[..8])
    }

    /// Type part, trimmed.
    pub fn extension(&self) -> String {
        trimmed(&self.0[8..])
    }

    /// Host file name: `NAME.TYP`, or `NAME` when the type is blank.
    pub fn to_host(&self) -> String {
        let name = self.name();
        let ext = self.extension();
        if ext.is_empty() {
            name
        } else {
            format!("{}.{}", name, ext)
        }
    }

    /// True if the name can stand for a host file in its user directory:
    /// a non-blank name part, legal characters only, and blanks only as
    /// trailing padding. `?` passes only when `wildcards` is set.
    pub fn is_legal(&self, wildcards: bool) -> bool {
        fn legal_part(part: &[u8], wildcards: bool) -> bool {
            let len = part.iter().position(|&b| b == b' ').unwrap_or(part.len());
            part[..len]
                .iter()
                .all(|&b| (wildcards && b == b'?') || (b.is_ascii_graphic() && !ILLEGAL.contains(&b)))
                && part[len..].iter().all(|&b| b == b' ')
        }
        self.0[0] != b' ' && legal_part(&self.0[..8], wildcards) && legal_part(&self.0[8..], wildcards)
    }

    /// True if any position holds the `?` wildcard.
    pub fn is_ambiguous(&self) -> bool {
        self.0.contains(&b'?')
    }

    /// Match against a pattern where `?` accepts any character.
    pub fn matches(&self, pattern: &CpmName) -> bool {
        self.0
            .iter()
            .zip(pattern.0.iter())
            .all(|(&c, &p)| p == b'?' || p == c)
    }
}

impl fmt::Display for CpmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_host())
    }
}

impl fmt::Debug for CpmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpmName({:?})", String::from_utf8_lossy(&self.0))
    }
}

fn trimmed(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| b as char)
        .take_while(|&c| c != ' ')
        .collect()
}

/// Parse a user directory name (one hex digit).
pub fn parse_user(segment: &str) -> Option<u8> {
    if segment.len() != 1 {
        return None;
    }
    u8::from_str_radix(segment, 16).ok()
}

/// Directory name of a user area.
pub fn user_segment(user: u8) -> String {
    format!("{:X}", user & 0x0F)
}

/// Map a host path `.../<USER>/<NAME.TYP>` back to a CP/M name and user.
///
/// The user comes from the parent directory; a parent that is not a hex
/// digit yields user 0.
pub fn host_to_guest(path: &Path) -> Option<(CpmName, u8)> {
    let leaf = path.file_name()?.to_str()?;
    let name = CpmName::parse(&leaf.to_ascii_uppercase())?;
    let user = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .and_then(parse_user)
        .unwrap_or(0);
    Some((name, user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_is_legal() {
        assert!(CpmName::from_raw(b"SAMPLE  TXT").is_legal(false));
        assert!(CpmName::from_raw(b"$$$     SUB").is_legal(false));
        assert!(CpmName::from_raw(b"README     ").is_legal(false));
        assert!(!CpmName::from_raw(b"../../X    ").is_legal(false));
        assert!(!CpmName::from_raw(b"A/B     TXT").is_legal(true));
        assert!(!CpmName::from_raw(b"A\\B     TXT").is_legal(false));
        assert!(!CpmName::from_raw(b"A\0B     TXT").is_legal(false));
        assert!(!CpmName::from_raw(b"A B     TXT").is_legal(false));
        assert!(!CpmName::from_raw(b"        TXT").is_legal(false));
        assert!(!CpmName::from_raw(b"????????TXT").is_legal(false));
        assert!(CpmName::from_raw(b"????????TXT").is_legal(true));
    }

    #[test]
    fn test_from_raw_masks_and_uppercases() {
        let name = CpmName::from_raw(b"he\xECLO   t\xD8t");
        assert_eq!(name.as_bytes(), b"HELLO   TXT");
        assert_eq!(name.to_host(), "HELLO.TXT");
    }

    #[test]
    fn test_to_host_without_type() {
        let name = CpmName::from_raw(b"README     ");
        assert_eq!(name.to_host(), "README");
    }

    #[test]
    fn test_parse() {
        assert_eq!(CpmName::parse("SAMPLE.TXT").unwrap().as_bytes(), b"SAMPLE  TXT");
        assert_eq!(CpmName::parse("a.b").unwrap().as_bytes(), b"A       B  ");
        assert_eq!(CpmName::parse("NOEXT").unwrap().as_bytes(), b"NOEXT      ");
    }

    #[test]
    fn test_parse_rejects_non_8_3() {
        assert!(CpmName::parse("VERYLONGNAME.TXT").is_none());
        assert!(CpmName::parse("FILE.TEXT").is_none());
        assert!(CpmName::parse("A.B.C").is_none());
        assert!(CpmName::parse(".HIDDEN").is_none());
        assert!(CpmName::parse("SP ACE.TXT").is_none());
    }

    #[test]
    fn test_parse_pattern() {
        assert_eq!(CpmName::parse_pattern("*.COM").unwrap().as_bytes(), b"????????COM");
        assert_eq!(CpmName::parse_pattern("A?.*").unwrap().as_bytes(), b"A?      ???");
        assert_eq!(CpmName::parse_pattern("*.*").unwrap(), CpmName::ALL);
    }

    #[test]
    fn test_matches() {
        let report_txt = CpmName::from_raw(b"REPORT  TXT");
        let report_doc = CpmName::from_raw(b"REPORT  DOC");
        let pattern = CpmName::from_raw(b"????????TXT");

        assert!(report_txt.matches(&pattern));
        assert!(!report_doc.matches(&pattern));
        assert!(report_txt.matches(&CpmName::ALL));
        assert!(report_doc.matches(&CpmName::ALL));
        assert!(report_txt.matches(&report_txt));
        assert!(!report_txt.matches(&CpmName::from_raw(b"REPORT  TX ")));
    }

    #[test]
    fn test_host_to_guest() {
        let path = PathBuf::from("/sd/A/3/sample.txt");
        let (name, user) = host_to_guest(&path).unwrap();
        assert_eq!(name.as_bytes(), b"SAMPLE  TXT");
        assert_eq!(user, 3);

        let path = PathBuf::from("/sd/B/f/X.COM");
        assert_eq!(host_to_guest(&path).unwrap().1, 15);
    }

    #[test]
    fn test_user_segment() {
        assert_eq!(user_segment(0), "0");
        assert_eq!(user_segment(10), "A");
        assert_eq!(parse_user("A"), Some(10));
        assert_eq!(parse_user("a"), Some(10));
        assert_eq!(parse_user("10"), None);
        assert_eq!(parse_user("G"), None);
    }
}
