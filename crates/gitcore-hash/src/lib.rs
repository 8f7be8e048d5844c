//! Object identity for gitcore.
//!
//! Provides the 20-byte SHA-1 [`ObjectId`], abbreviated-prefix matching
//! via [`AbbreviatedId`], streaming hash computation, and the hex codec
//! used throughout the workspace.

mod abbrev;
mod error;
pub mod hasher;
pub mod hex;
mod oid;

pub use abbrev::AbbreviatedId;
pub use error::HashError;
pub use hasher::Hasher;
pub use oid::ObjectId;
