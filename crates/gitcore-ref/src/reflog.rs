//! Reflogs: per-ref append-only logs of value transitions.
//!
//! Line format:
//! `<old-hex> <new-hex> <name> <<email>> <timestamp> <tz>\t<message>\n`

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice, ByteVec};
use gitcore_hash::ObjectId;
use gitcore_utils::date::Signature;

use crate::error::RefError;
use crate::name::RefName;

/// A single reflog entry recording a ref value change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    pub old_oid: ObjectId,
    pub new_oid: ObjectId,
    pub identity: Signature,
    pub message: BString,
}

/// A checkout recorded in the HEAD reflog, parsed from messages of the
/// form `checkout: moving from X to Y`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutEntry {
    pub from_branch: String,
    pub to_branch: String,
}

const CHECKOUT_PREFIX: &[u8] = b"checkout: moving from ";
const CHECKOUT_SEPARATOR: &[u8] = b" to ";

impl ReflogEntry {
    /// Parse a reflog entry from a single line (no trailing newline
    /// required).
    pub fn parse(line: &BStr) -> Result<Self, RefError> {
        let line = line.as_bytes();

        // Two 40-char ids and their separators take 82 bytes.
        if line.len() < 82 {
            return Err(RefError::Parse(format!(
                "reflog line too short: {} bytes",
                line.len()
            )));
        }

        let old_hex = std::str::from_utf8(&line[..40])
            .map_err(|_| RefError::Parse("invalid UTF-8 in old id".into()))?;
        let old_oid = ObjectId::from_hex(old_hex).map_err(RefError::Hash)?;

        if line[40] != b' ' {
            return Err(RefError::Parse("expected space after old id".into()));
        }

        let new_hex = std::str::from_utf8(&line[41..81])
            .map_err(|_| RefError::Parse("invalid UTF-8 in new id".into()))?;
        let new_oid = ObjectId::from_hex(new_hex).map_err(RefError::Hash)?;

        if line[81] != b' ' {
            return Err(RefError::Parse("expected space after new id".into()));
        }

        let rest = &line[82..];
        let (identity_part, message) = match rest.find_byte(b'\t') {
            Some(tab_pos) => (&rest[..tab_pos], &rest[tab_pos + 1..]),
            None => (rest, &b""[..]),
        };

        let identity = Signature::parse(identity_part.as_bstr())
            .map_err(|e| RefError::Parse(format!("invalid identity in reflog: {e}")))?;

        let message = message.strip_suffix(b"\n").unwrap_or(message);

        Ok(Self {
            old_oid,
            new_oid,
            identity,
            message: BString::from(message),
        })
    }

    /// Serialize to the reflog line format (without trailing newline).
    pub fn to_bytes(&self) -> BString {
        let mut out = BString::new(Vec::with_capacity(128 + self.message.len()));
        out.push_str(self.old_oid.to_hex().as_bytes());
        out.push(b' ');
        out.push_str(self.new_oid.to_hex().as_bytes());
        out.push(b' ');
        out.push_str(self.identity.to_bytes());
        out.push(b'\t');
        // Reflog entries are single lines; embedded newlines would corrupt
        // the log.
        for &b in self.message.iter() {
            out.push(if b == b'\n' { b' ' } else { b });
        }
        out
    }

    /// Parse the message as a checkout record, if it is one.
    pub fn parse_checkout(&self) -> Option<CheckoutEntry> {
        let msg = self.message.as_slice();
        let rest = msg.strip_prefix(CHECKOUT_PREFIX)?;
        let sep = rest.find(CHECKOUT_SEPARATOR)?;
        let from = &rest[..sep];
        let to = &rest[sep + CHECKOUT_SEPARATOR.len()..];
        if from.is_empty() || to.is_empty() {
            return None;
        }
        Some(CheckoutEntry {
            from_branch: String::from_utf8_lossy(from).into_owned(),
            to_branch: String::from_utf8_lossy(to).into_owned(),
        })
    }
}

/// The reflog file path for a ref.
pub fn reflog_path(git_dir: &Path, name: &RefName) -> PathBuf {
    git_dir.join("logs").join(name.as_str())
}

/// Read all entries for a ref, oldest first. Missing log reads empty.
pub fn read_reflog(git_dir: &Path, name: &RefName) -> Result<Vec<ReflogEntry>, RefError> {
    let path = reflog_path(git_dir, name);
    let contents = match fs::read(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(RefError::IoPath {
                path: path.clone(),
                source: e,
            })
        }
    };

    let mut entries = Vec::new();
    for line in contents.lines() {
        if line.is_empty() {
            continue;
        }
        entries.push(ReflogEntry::parse(line.as_bstr())?);
    }
    Ok(entries)
}

/// Read entries newest first.
pub fn read_reverse(git_dir: &Path, name: &RefName) -> Result<Vec<ReflogEntry>, RefError> {
    let mut entries = read_reflog(git_dir, name)?;
    entries.reverse();
    Ok(entries)
}

/// The n-th entry counting back from the newest (0 = newest).
pub fn read_reverse_entry(
    git_dir: &Path,
    name: &RefName,
    n: usize,
) -> Result<Option<ReflogEntry>, RefError> {
    let entries = read_reflog(git_dir, name)?;
    let len = entries.len();
    if n < len {
        Ok(Some(entries[len - 1 - n].clone()))
    } else {
        Ok(None)
    }
}

/// Append an entry to a ref's log, creating the log file as needed.
pub fn append_entry(
    git_dir: &Path,
    name: &RefName,
    entry: &ReflogEntry,
) -> Result<(), RefError> {
    let path = reflog_path(git_dir, name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let mut line = entry.to_bytes();
    line.push(b'\n');

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| RefError::IoPath {
            path: path.clone(),
            source: e,
        })?;
    file.write_all(&line).map_err(|e| RefError::IoPath {
        path: path.clone(),
        source: e,
    })?;
    Ok(())
}

/// Append only where a log already exists (used when
/// `core.logallrefupdates` is off).
pub fn append_if_exists(
    git_dir: &Path,
    name: &RefName,
    entry: &ReflogEntry,
) -> Result<(), RefError> {
    if reflog_path(git_dir, name).exists() {
        append_entry(git_dir, name, entry)?;
    }
    Ok(())
}

/// Remove a ref's log (on ref deletion).
pub fn delete_reflog(git_dir: &Path, name: &RefName) -> Result<(), RefError> {
    let path = reflog_path(git_dir, name);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RefError::IoPath { path, source: e }),
    }
}

/// Rename a ref's log along with the ref, where one exists.
pub fn rename_reflog(git_dir: &Path, from: &RefName, to: &RefName) -> Result<(), RefError> {
    let from_path = reflog_path(git_dir, from);
    if !from_path.exists() {
        return Ok(());
    }
    let to_path = reflog_path(git_dir, to);
    if let Some(parent) = to_path.parent() {
        fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    fs::rename(&from_path, &to_path).map_err(|e| RefError::IoPath {
        path: from_path,
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitcore_utils::date::GitDate;

    fn make_entry(old_hex: &str, new_hex: &str, msg: &str) -> ReflogEntry {
        ReflogEntry {
            old_oid: ObjectId::from_hex(old_hex).unwrap(),
            new_oid: ObjectId::from_hex(new_hex).unwrap(),
            identity: Signature {
                name: BString::from("Test User"),
                email: BString::from("test@example.com"),
                date: GitDate::new(1234567890, 0),
            },
            message: BString::from(msg),
        }
    }

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const Z: &str = "0000000000000000000000000000000000000000";

    #[test]
    fn roundtrip() {
        let entry = make_entry(Z, A, "commit (initial): first");
        let parsed = ReflogEntry::parse(entry.to_bytes().as_bstr()).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn parse_c_git_line() {
        let line = format!(
            "{Z} {A} Test User <test@example.com> 1234567890 +0000\tcommit: message"
        );
        let entry = ReflogEntry::parse(line.as_bytes().as_bstr()).unwrap();
        assert!(entry.old_oid.is_zero());
        assert_eq!(entry.new_oid.to_hex(), A);
        assert_eq!(entry.message, BString::from("commit: message"));
        assert_eq!(entry.identity.date.timestamp, 1234567890);
    }

    #[test]
    fn newlines_in_message_flattened() {
        let entry = make_entry(Z, A, "multi\nline");
        let bytes = entry.to_bytes();
        assert!(!bytes.contains(&b'\n'));
        let parsed = ReflogEntry::parse(bytes.as_bstr()).unwrap();
        assert_eq!(parsed.message, BString::from("multi line"));
    }

    #[test]
    fn short_line_rejected() {
        assert!(ReflogEntry::parse(b"too short".as_bstr()).is_err());
    }

    #[test]
    fn append_and_read_order() {
        let dir = tempfile::tempdir().unwrap();
        let name = RefName::new("refs/heads/main").unwrap();

        append_entry(dir.path(), &name, &make_entry(Z, A, "first")).unwrap();
        append_entry(dir.path(), &name, &make_entry(A, B, "second")).unwrap();

        let forward = read_reflog(dir.path(), &name).unwrap();
        assert_eq!(forward.len(), 2);
        assert_eq!(forward[0].message, BString::from("first"));

        let reverse = read_reverse(dir.path(), &name).unwrap();
        assert_eq!(reverse[0].message, BString::from("second"));
    }

    #[test]
    fn nth_reverse_entry() {
        let dir = tempfile::tempdir().unwrap();
        let name = RefName::new("refs/heads/main").unwrap();

        append_entry(dir.path(), &name, &make_entry(Z, A, "first")).unwrap();
        append_entry(dir.path(), &name, &make_entry(A, B, "second")).unwrap();

        let newest = read_reverse_entry(dir.path(), &name, 0).unwrap().unwrap();
        assert_eq!(newest.new_oid.to_hex(), B);
        let prior = read_reverse_entry(dir.path(), &name, 1).unwrap().unwrap();
        assert_eq!(prior.new_oid.to_hex(), A);
        assert!(read_reverse_entry(dir.path(), &name, 2).unwrap().is_none());
    }

    #[test]
    fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let name = RefName::new("refs/heads/absent").unwrap();
        assert!(read_reflog(dir.path(), &name).unwrap().is_empty());
    }

    #[test]
    fn append_if_exists_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let name = RefName::new("refs/heads/quiet").unwrap();
        append_if_exists(dir.path(), &name, &make_entry(Z, A, "skipped")).unwrap();
        assert!(!reflog_path(dir.path(), &name).exists());
    }

    #[test]
    fn checkout_entry_parsing() {
        let entry = make_entry(A, B, "checkout: moving from main to feature");
        let checkout = entry.parse_checkout().unwrap();
        assert_eq!(checkout.from_branch, "main");
        assert_eq!(checkout.to_branch, "feature");

        assert!(make_entry(A, B, "commit: nope").parse_checkout().is_none());
    }

    #[test]
    fn rename_carries_log() {
        let dir = tempfile::tempdir().unwrap();
        let from = RefName::new("refs/heads/old").unwrap();
        let to = RefName::new("refs/heads/new").unwrap();

        append_entry(dir.path(), &from, &make_entry(Z, A, "created")).unwrap();
        rename_reflog(dir.path(), &from, &to).unwrap();

        assert!(read_reflog(dir.path(), &from).unwrap().is_empty());
        assert_eq!(read_reflog(dir.path(), &to).unwrap().len(), 1);
    }
}
