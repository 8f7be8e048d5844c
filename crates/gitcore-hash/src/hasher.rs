//! Streaming SHA-1 computation with collision detection.

use digest::Digest;

use crate::oid::OID_RAW_LEN;
use crate::{HashError, ObjectId};

/// Streaming hash computation over object content.
///
/// Data is fed incrementally with [`update`](Hasher::update) or through the
/// [`std::io::Write`] implementation, then finalised into an [`ObjectId`].
/// The underlying SHA-1 runs with collision detection; a detected collision
/// attack surfaces as [`HashError::Sha1Collision`].
pub struct Hasher {
    inner: Box<sha1_checked::Sha1>,
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            inner: Box::new(sha1_checked::Sha1::new()),
        }
    }

    /// Feed data into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalize and return the ObjectId.
    pub fn finalize(self) -> Result<ObjectId, HashError> {
        let result = self.inner.try_finalize();
        if result.has_collision() {
            return Err(HashError::Sha1Collision);
        }
        let mut bytes = [0u8; OID_RAW_LEN];
        bytes.copy_from_slice(result.hash().as_slice());
        Ok(ObjectId::from_raw(bytes))
    }

    /// Convenience: hash a byte slice in one call.
    pub fn digest(data: &[u8]) -> Result<ObjectId, HashError> {
        let mut h = Self::new();
        h.update(data);
        h.finalize()
    }

    /// Hash a git object: `"<type> <len>\0<content>"`.
    pub fn hash_object(obj_type: &str, content: &[u8]) -> Result<ObjectId, HashError> {
        let header = format!("{} {}\0", obj_type, content.len());
        let mut h = Self::new();
        h.update(header.as_bytes());
        h.update(content);
        h.finalize()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_well_known_digest() {
        let oid = Hasher::digest(b"").unwrap();
        assert_eq!(oid.to_hex(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn incremental_equals_oneshot() {
        let mut h = Hasher::new();
        h.update(b"hello ");
        h.update(b"world");
        assert_eq!(h.finalize().unwrap(), Hasher::digest(b"hello world").unwrap());
    }

    #[test]
    fn hash_object_matches_git_blob_id() {
        // `echo -n 'what is up, doc?' | git hash-object --stdin`
        let oid = Hasher::hash_object("blob", b"what is up, doc?").unwrap();
        assert_eq!(oid.to_hex(), "bd9dbf5aae1a3862dd1526723246b20206e5fc37");
    }

    #[test]
    fn write_impl_feeds_the_hasher() {
        use std::io::Write;
        let mut h = Hasher::new();
        h.write_all(b"hello world").unwrap();
        assert_eq!(h.finalize().unwrap(), Hasher::digest(b"hello world").unwrap());
    }
}
