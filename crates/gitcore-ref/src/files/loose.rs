use std::fs;
use std::path::{Path, PathBuf};

use bstr::ByteSlice;
use gitcore_hash::ObjectId;

use crate::error::RefError;
use crate::name::RefName;
use crate::{Ref, Storage};

/// Read a loose ref file: either a hex id or `ref: <target>`.
///
/// Returns `Ok(None)` if no loose file exists for the name.
pub(crate) fn read_loose_ref(git_dir: &Path, name: &RefName) -> Result<Option<Ref>, RefError> {
    let path = loose_ref_path(git_dir, name);
    let contents = match fs::read(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(RefError::IoPath {
                path: path.clone(),
                source: e,
            })
        }
    };

    // Only the first line carries the ref value. FETCH_HEAD and a
    // multi-parent MERGE_HEAD carry more, which lookups must ignore.
    let first_line = contents
        .splitn_str(2, b"\n")
        .next()
        .unwrap_or(&[])
        .trim();

    if let Some(target_bytes) = first_line.strip_prefix(b"ref: ") {
        let target_str = std::str::from_utf8(target_bytes.trim())
            .map_err(|_| RefError::Parse("invalid UTF-8 in symbolic ref target".into()))?;
        let target = RefName::new(target_str)?;
        Ok(Some(Ref::symbolic(name.clone(), target, Storage::Loose)))
    } else {
        // FETCH_HEAD lines append metadata after the id.
        let hex_part = if first_line.len() > 40 {
            &first_line[..40]
        } else {
            first_line
        };
        let hex = std::str::from_utf8(hex_part)
            .map_err(|_| RefError::Parse("invalid UTF-8 in ref value".into()))?;
        let oid = ObjectId::from_hex(hex).map_err(RefError::Hash)?;
        Ok(Some(Ref::direct(name.clone(), oid, Storage::Loose)))
    }
}

/// Serialized loose content for a direct ref.
pub(crate) fn direct_content(oid: &ObjectId) -> String {
    format!("{}\n", oid.to_hex())
}

/// Serialized loose content for a symbolic ref.
pub(crate) fn symbolic_content(target: &RefName) -> String {
    format!("ref: {}\n", target)
}

/// Delete a loose ref file and prune now-empty parent directories.
pub(crate) fn delete_loose_ref(git_dir: &Path, name: &RefName) -> Result<(), RefError> {
    let path = loose_ref_path(git_dir, name);
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(RefError::IoPath {
                path: path.clone(),
                source: e,
            })
        }
    }

    let refs_dir = git_dir.join("refs");
    let mut dir = path.parent().map(|p| p.to_path_buf());
    while let Some(d) = dir {
        if d == refs_dir || d == *git_dir {
            break;
        }
        if d.read_dir().map(|mut e| e.next().is_none()).unwrap_or(false) {
            let _ = fs::remove_dir(&d);
            dir = d.parent().map(|p| p.to_path_buf());
        } else {
            break;
        }
    }
    Ok(())
}

/// Refuse names whose loose path collides with an existing file or
/// directory: `refs/heads/a/b` cannot coexist with a `refs/heads/a` file,
/// and vice versa.
pub(crate) fn check_dir_file_conflict(git_dir: &Path, name: &RefName) -> Result<(), RefError> {
    let ref_path = loose_ref_path(git_dir, name);

    let mut current = git_dir.to_path_buf();
    for component in name.as_str().split('/') {
        current = current.join(component);
        if current == ref_path {
            break;
        }
        if current.is_file() {
            return Err(RefError::DirectoryConflict {
                name: name.to_string(),
                conflict: current
                    .strip_prefix(git_dir)
                    .unwrap_or(&current)
                    .display()
                    .to_string(),
            });
        }
    }

    if ref_path.is_dir() {
        return Err(RefError::DirectoryConflict {
            name: name.to_string(),
            conflict: format!(
                "{} (is a directory)",
                ref_path.strip_prefix(git_dir).unwrap_or(&ref_path).display()
            ),
        });
    }

    Ok(())
}

/// Enumerate loose refs under a prefix, sorted by name. The empty prefix
/// also reports the special top-level refs (`HEAD`, ...).
pub(crate) fn enumerate_loose_refs(
    git_dir: &Path,
    prefix: &str,
) -> Result<Vec<RefName>, RefError> {
    let refs_base = git_dir.join("refs");
    let sub = prefix.strip_prefix("refs/").unwrap_or("");
    let search_dir = if sub.is_empty() {
        refs_base.clone()
    } else {
        refs_base.join(sub.trim_end_matches('/'))
    };

    let mut result = Vec::new();
    if search_dir.is_dir() {
        collect_recursive(git_dir, &search_dir, prefix, &mut result)?;
    }

    if prefix.is_empty() {
        for special in [
            "HEAD",
            "MERGE_HEAD",
            "CHERRY_PICK_HEAD",
            "REVERT_HEAD",
            "ORIG_HEAD",
            "FETCH_HEAD",
            "BISECT_HEAD",
            "REBASE_HEAD",
        ] {
            if git_dir.join(special).is_file() {
                result.push(RefName::new_unchecked(special));
            }
        }
    }

    result.sort();
    Ok(result)
}

fn collect_recursive(
    git_dir: &Path,
    dir: &Path,
    prefix: &str,
    result: &mut Vec<RefName>,
) -> Result<(), RefError> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(RefError::IoPath {
                path: dir.to_path_buf(),
                source: e,
            })
        }
    };

    for entry in entries {
        let entry = entry.map_err(|e| RefError::IoPath {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();

        if path.is_dir() {
            collect_recursive(git_dir, &path, prefix, result)?;
        } else if path.is_file() {
            let rel = path
                .strip_prefix(git_dir)
                .map_err(|_| RefError::Parse("ref path outside git dir".into()))?;
            let Some(name_str) = rel.to_str() else {
                continue;
            };
            if name_str.ends_with(".lock") {
                continue;
            }
            if let Ok(name) = RefName::new(name_str) {
                if name.as_str().starts_with(prefix) {
                    result.push(name);
                }
            }
        }
    }
    Ok(())
}

/// The filesystem path backing a loose ref.
pub(crate) fn loose_ref_path(git_dir: &Path, name: &RefName) -> PathBuf {
    git_dir.join(name.as_str())
}
