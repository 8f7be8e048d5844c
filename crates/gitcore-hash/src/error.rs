/// Error types for hashing and id parsing.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hex length: expected {expected}, got {actual}")]
    InvalidHexLength { expected: usize, actual: usize },

    #[error("invalid hex character '{character}' at position {position}")]
    InvalidHex { position: usize, character: char },

    #[error("invalid hash length: expected {expected} bytes, got {actual}")]
    InvalidHashLength { expected: usize, actual: usize },

    #[error("abbreviated id must be 1 to 40 hex digits, got {0} digits")]
    InvalidAbbrevLength(usize),

    #[error("SHA-1 collision attack detected")]
    Sha1Collision,
}
