//! Empty-repository initialization.

use std::fs;
use std::path::{Path, PathBuf};

use crate::RepoError;

/// Create the standard git-dir layout. Returns the git dir path.
///
/// Re-running init on an existing repository is a safe no-op.
pub(crate) fn init_repository(path: &Path, bare: bool) -> Result<PathBuf, RepoError> {
    let path = if path.is_relative() {
        std::env::current_dir()?.join(path)
    } else {
        path.to_path_buf()
    };

    let git_dir = if bare { path } else { path.join(".git") };

    if git_dir.join("HEAD").is_file() {
        return Ok(git_dir);
    }

    fs::create_dir_all(git_dir.join("objects/info"))?;
    fs::create_dir_all(git_dir.join("objects/pack"))?;
    fs::create_dir_all(git_dir.join("refs/heads"))?;
    fs::create_dir_all(git_dir.join("refs/tags"))?;
    fs::create_dir_all(git_dir.join("info"))?;

    fs::write(git_dir.join("HEAD"), "ref: refs/heads/master\n")?;

    let config = gitcore_config::render(&[
        ("core.repositoryformatversion", "0"),
        ("core.filemode", "true"),
        ("core.bare", if bare { "true" } else { "false" }),
        ("core.logallrefupdates", if bare { "false" } else { "true" }),
    ]);
    fs::write(git_dir.join("config"), config)?;

    fs::write(
        git_dir.join("description"),
        "Unnamed repository; edit this file 'description' to name the repository.\n",
    )?;
    fs::write(
        git_dir.join("info/exclude"),
        "# git ls-files --others --exclude-from=.git/info/exclude\n\
         # Lines that start with '#' are comments.\n",
    )?;

    Ok(git_dir)
}
