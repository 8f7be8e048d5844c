use std::path::PathBuf;

use gitcore_hash::ObjectId;
use gitcore_object::ObjectType;

/// Errors from repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("not a git repository (or any of the parent directories): {0}")]
    NotFound(PathBuf),

    #[error("invalid git directory: {path}: {reason}")]
    InvalidGitDir { path: PathBuf, reason: String },

    #[error("unknown repository format version: {0}")]
    UnknownFormatVersion(i64),

    #[error("unsupported repository extension: {key} = {value}")]
    UnsupportedExtension { key: String, value: String },

    #[error("bare repository has no work tree")]
    NoWorkTree,

    #[error("invalid revision syntax: {0}")]
    RevisionSyntax(String),

    #[error("object {oid} is a {actual}, not a {expected}")]
    IncorrectType {
        oid: ObjectId,
        expected: ObjectType,
        actual: ObjectType,
    },

    #[error("unable to read {path}: {reason}")]
    InvalidFile { path: PathBuf, reason: String },

    #[error(transparent)]
    Config(#[from] gitcore_config::ConfigError),

    #[error(transparent)]
    Odb(#[from] gitcore_odb::OdbError),

    #[error(transparent)]
    Ref(#[from] gitcore_ref::RefError),

    #[error(transparent)]
    Hash(#[from] gitcore_hash::HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
