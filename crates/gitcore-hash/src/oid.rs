use std::fmt;
use std::str::FromStr;

use crate::hex::{hex_decode, hex_to_string};
use crate::HashError;

/// Length of a SHA-1 object id in bytes.
pub const OID_RAW_LEN: usize = 20;
/// Length of a SHA-1 object id in hex characters.
pub const OID_HEX_LEN: usize = 40;

/// A git object identifier: the SHA-1 of an object's type-prefixed form.
///
/// The all-zero id is a reserved sentinel meaning "absent" in ref updates;
/// it never names a stored object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; OID_RAW_LEN]);

impl ObjectId {
    /// The null id (all zeros).
    pub const ZERO: Self = Self([0u8; OID_RAW_LEN]);

    /// Create from raw bytes. Must be exactly 20 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != OID_RAW_LEN {
            return Err(HashError::InvalidHashLength {
                expected: OID_RAW_LEN,
                actual: bytes.len(),
            });
        }
        let mut raw = [0u8; OID_RAW_LEN];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Create from a 40-character hex string (case-insensitive).
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let mut raw = [0u8; OID_RAW_LEN];
        hex_decode(hex, &mut raw)?;
        Ok(Self(raw))
    }

    pub(crate) const fn from_raw(raw: [u8; OID_RAW_LEN]) -> Self {
        Self(raw)
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; OID_RAW_LEN] {
        &self.0
    }

    /// Is this the null (all-zeros) sentinel?
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Lowercase hex form (40 characters).
    pub fn to_hex(&self) -> String {
        hex_to_string(&self.0)
    }

    /// First byte of the digest, for fan-out indexing.
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }

    /// Does this id's hex form start with the given hex prefix?
    pub fn starts_with_hex(&self, prefix: &str) -> bool {
        let hex = self.to_hex();
        hex.starts_with(&prefix.to_ascii_lowercase())
    }

    /// Loose object path component: `"xx/<38 hex chars>"`.
    pub fn loose_path(&self) -> String {
        let hex = self.to_hex();
        format!("{}/{}", &hex[..2], &hex[2..])
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..8])
    }
}

impl FromStr for ObjectId {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
