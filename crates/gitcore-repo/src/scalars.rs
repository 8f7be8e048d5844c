//! Typed access to the small scalar files in the git dir: the merge and
//! sequencer heads and the message templates. Writing `None` deletes the
//! file.

use std::fs;
use std::path::Path;

use gitcore_hash::ObjectId;

use crate::{RepoError, Repository};

const OID_HEX_LEN: usize = 40;

impl Repository {
    // --- id-list and single-id files ---

    /// The ids listed in `MERGE_HEAD`, or `None` when absent or empty.
    pub fn read_merge_heads(&self) -> Result<Option<Vec<ObjectId>>, RepoError> {
        let raw = self.read_git_dir_file("MERGE_HEAD")?;
        let Some(raw) = raw else { return Ok(None) };

        let mut heads = Vec::new();
        for line in raw.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            heads.push(parse_oid_line(self.git_dir_or_err()?, "MERGE_HEAD", line)?);
        }
        Ok(if heads.is_empty() { None } else { Some(heads) })
    }

    /// Write `MERGE_HEAD`; `None` deletes it.
    pub fn write_merge_heads(&self, heads: Option<&[ObjectId]>) -> Result<(), RepoError> {
        self.write_heads_file("MERGE_HEAD", heads)
    }

    pub fn read_orig_head(&self) -> Result<Option<ObjectId>, RepoError> {
        self.read_single_head("ORIG_HEAD")
    }

    pub fn write_orig_head(&self, head: Option<ObjectId>) -> Result<(), RepoError> {
        self.write_heads_file("ORIG_HEAD", head.as_ref().map(std::slice::from_ref))
    }

    pub fn read_cherry_pick_head(&self) -> Result<Option<ObjectId>, RepoError> {
        self.read_single_head("CHERRY_PICK_HEAD")
    }

    pub fn write_cherry_pick_head(&self, head: Option<ObjectId>) -> Result<(), RepoError> {
        self.write_heads_file("CHERRY_PICK_HEAD", head.as_ref().map(std::slice::from_ref))
    }

    pub fn read_revert_head(&self) -> Result<Option<ObjectId>, RepoError> {
        self.read_single_head("REVERT_HEAD")
    }

    pub fn write_revert_head(&self, head: Option<ObjectId>) -> Result<(), RepoError> {
        self.write_heads_file("REVERT_HEAD", head.as_ref().map(std::slice::from_ref))
    }

    // --- message files ---

    /// The merge commit message template, if one is staged.
    pub fn read_merge_msg(&self) -> Result<Option<String>, RepoError> {
        self.read_message_file("MERGE_MSG")
    }

    pub fn write_merge_msg(&self, msg: Option<&str>) -> Result<(), RepoError> {
        self.write_message_file("MERGE_MSG", msg)
    }

    pub fn read_squash_msg(&self) -> Result<Option<String>, RepoError> {
        self.read_message_file("SQUASH_MSG")
    }

    pub fn write_squash_msg(&self, msg: Option<&str>) -> Result<(), RepoError> {
        self.write_message_file("SQUASH_MSG", msg)
    }

    pub fn read_commit_edit_msg(&self) -> Result<Option<String>, RepoError> {
        self.read_message_file("COMMIT_EDITMSG")
    }

    pub fn write_commit_edit_msg(&self, msg: Option<&str>) -> Result<(), RepoError> {
        self.write_message_file("COMMIT_EDITMSG", msg)
    }

    // --- helpers ---

    fn read_single_head(&self, name: &str) -> Result<Option<ObjectId>, RepoError> {
        let raw = self.read_git_dir_file(name)?;
        match raw {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(raw) => {
                let line = raw.split(|&b| b == b'\n').next().unwrap_or(&[]);
                Ok(Some(parse_oid_line(self.git_dir_or_err()?, name, line)?))
            }
        }
    }

    /// Read a file directly under the git dir. The id-bearing scalar
    /// files are coupled to a working tree, so bare repositories report
    /// `NoWorkTree`.
    fn read_git_dir_file(&self, name: &str) -> Result<Option<Vec<u8>>, RepoError> {
        if self.is_bare() {
            return Err(RepoError::NoWorkTree);
        }
        let path = self.git_dir_or_err()?.join(name);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_heads_file(
        &self,
        name: &str,
        heads: Option<&[ObjectId]>,
    ) -> Result<(), RepoError> {
        let path = self.git_dir_or_err()?.join(name);
        match heads {
            None => remove_if_exists(&path),
            Some(heads) => {
                let mut out = String::with_capacity(heads.len() * (OID_HEX_LEN + 1));
                for head in heads {
                    out.push_str(&head.to_hex());
                    out.push('\n');
                }
                Ok(fs::write(&path, out)?)
            }
        }
    }

    fn read_message_file(&self, name: &str) -> Result<Option<String>, RepoError> {
        if self.is_bare() {
            return Err(RepoError::NoWorkTree);
        }
        let path = self.git_dir_or_err()?.join(name);
        match fs::read_to_string(&path) {
            Ok(msg) => Ok(Some(msg)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_message_file(&self, name: &str, msg: Option<&str>) -> Result<(), RepoError> {
        let path = self.git_dir_or_err()?.join(name);
        match msg {
            None => remove_if_exists(&path),
            Some(msg) => Ok(fs::write(&path, msg)?),
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<(), RepoError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn parse_oid_line(git_dir: &Path, name: &str, line: &[u8]) -> Result<ObjectId, RepoError> {
    let line = if line.len() > OID_HEX_LEN {
        &line[..OID_HEX_LEN]
    } else {
        line
    };
    let hex = std::str::from_utf8(line).map_err(|_| RepoError::InvalidFile {
        path: git_dir.join(name),
        reason: "non-UTF-8 id".into(),
    })?;
    ObjectId::from_hex(hex.trim()).map_err(|e| RepoError::InvalidFile {
        path: git_dir.join(name),
        reason: e.to_string(),
    })
}
