use std::path::PathBuf;

use gitcore_hash::ObjectId;

/// Error types for reference operations.
///
/// Contended or failed individual updates are reported through
/// [`UpdateResult`](crate::UpdateResult) codes rather than errors; the
/// variants here are policy violations and storage failures.
#[derive(Debug, thiserror::Error)]
pub enum RefError {
    #[error("invalid ref name: {0}")]
    InvalidName(String),

    #[error("ref not found: {0}")]
    NotFound(String),

    #[error("ref already exists: {0}")]
    AlreadyExists(String),

    #[error("cannot delete the branch HEAD points to: {0}")]
    CannotDeleteCurrentBranch(String),

    #[error("HEAD is detached")]
    DetachedHead,

    #[error("new value for ref {name} is not present in the object database: {oid}")]
    MissingObject { name: String, oid: ObjectId },

    #[error("symbolic ref chain too long or cyclic at: {0}")]
    SymrefLoop(String),

    #[error("ref update misconfigured: {0}")]
    Misconfigured(&'static str),

    #[error("directory-file conflict: cannot create ref '{name}' because '{conflict}' exists")]
    DirectoryConflict { name: String, conflict: String },

    #[error("corrupt ref storage: {0}")]
    Corrupt(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("lock file error: {0}")]
    Lock(#[from] gitcore_utils::LockError),

    #[error("{0}")]
    Util(#[from] gitcore_utils::UtilError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error on {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Odb(#[from] gitcore_odb::OdbError),

    #[error(transparent)]
    Hash(#[from] gitcore_hash::HashError),
}
