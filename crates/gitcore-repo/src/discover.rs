//! Repository discovery: walk parents until a git dir is found.

use std::path::{Path, PathBuf};

use crate::RepoError;

/// Walk up from `start` looking for a `.git` directory or a bare git
/// dir. Never ascends past a ceiling directory.
pub(crate) fn discover_git_dir(
    start: &Path,
    ceilings: &[PathBuf],
) -> Result<PathBuf, RepoError> {
    let start = if start.is_relative() {
        std::env::current_dir()?.join(start)
    } else {
        start.to_path_buf()
    };

    let mut current = Some(start.as_path());
    while let Some(dir) = current {
        let dot_git = dir.join(".git");
        if dot_git.join("HEAD").is_file() {
            return Ok(dot_git);
        }
        if looks_like_git_dir(dir) {
            return Ok(dir.to_path_buf());
        }
        if ceilings.iter().any(|c| c == dir) {
            break;
        }
        current = dir.parent();
    }

    Err(RepoError::NotFound(start))
}

/// A bare git dir has HEAD, an objects directory, and a refs directory.
fn looks_like_git_dir(dir: &Path) -> bool {
    dir.join("HEAD").is_file() && dir.join("objects").is_dir() && dir.join("refs").is_dir()
}
