//! Alternates file parsing and recursive loading.
//!
//! `objects/info/alternates` lists additional object directories, one per
//! line, absolute or relative to the objects directory. Each alternate is
//! itself an object database that may declare further alternates; chains
//! are bounded and cycles are rejected.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{ObjectDatabase, OdbError};

/// Maximum depth for recursive alternates loading (matches C git).
const MAX_ALTERNATES_DEPTH: usize = 5;

/// Load the alternates for an objects directory.
///
/// `extra` holds additional directories injected by the environment
/// (`GIT_ALTERNATE_OBJECT_DIRECTORIES`), searched after the file entries.
pub fn load_alternates(
    objects_dir: &Path,
    extra: &[PathBuf],
) -> Result<Vec<ObjectDatabase>, OdbError> {
    let mut visited = HashSet::new();
    let canonical = objects_dir
        .canonicalize()
        .unwrap_or_else(|_| objects_dir.to_path_buf());
    visited.insert(canonical);
    load_recursive(objects_dir, extra, &mut visited, 0)
}

fn load_recursive(
    objects_dir: &Path,
    extra: &[PathBuf],
    visited: &mut HashSet<PathBuf>,
    depth: usize,
) -> Result<Vec<ObjectDatabase>, OdbError> {
    if depth >= MAX_ALTERNATES_DEPTH {
        return Err(OdbError::Alternates(format!(
            "alternates chain too deep (>{MAX_ALTERNATES_DEPTH} levels)"
        )));
    }

    let mut paths = read_alternates_file(objects_dir)?;
    paths.extend(extra.iter().cloned());

    let mut result = Vec::new();
    for alt_path in paths {
        // Missing directories are skipped, not fatal; the alternate may be
        // on storage that is temporarily absent.
        if !alt_path.is_dir() {
            continue;
        }

        let canonical = alt_path
            .canonicalize()
            .unwrap_or_else(|_| alt_path.clone());
        if !visited.insert(canonical) {
            return Err(OdbError::CircularAlternates(alt_path));
        }

        let nested = load_recursive(&alt_path, &[], visited, depth + 1)?;
        result.push(ObjectDatabase::open_as_alternate(&alt_path, nested)?);
    }

    Ok(result)
}

/// Parse the alternates file into raw paths (relative entries resolved
/// against the objects directory). Blank lines and `#` comments skipped.
pub fn read_alternates_file(objects_dir: &Path) -> Result<Vec<PathBuf>, OdbError> {
    let path = objects_dir.join("info").join("alternates");
    if !path.is_file() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&path).map_err(|e| {
        OdbError::Alternates(format!("failed to read {}: {}", path.display(), e))
    })?;

    Ok(content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| {
            if Path::new(l).is_absolute() {
                PathBuf::from(l)
            } else {
                objects_dir.join(l)
            }
        })
        .collect())
}
