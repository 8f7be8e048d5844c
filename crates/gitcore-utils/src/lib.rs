//! Shared utilities for the gitcore workspace.
//!
//! Lock files (the `.lock` sentinel protocol with bounded-retry
//! acquisition), git dates and identity signatures, and cooperative
//! cancellation tokens for long-running scans.

pub mod cancel;
pub mod date;
pub mod error;
pub mod lockfile;

pub use cancel::CancelToken;
pub use error::{LockError, UtilError};
pub use lockfile::{LockFile, LockRetry};

pub type Result<T> = std::result::Result<T, UtilError>;
