use crate::ObjectError;

/// A git blob — raw file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Parse blob content. A blob is simply its raw bytes.
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        Ok(Self {
            data: content.to_vec(),
        })
    }

    /// Serialize: blob content is just the raw data.
    pub fn serialize_content(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_blob() {
        assert!(Blob::parse(b"").unwrap().data.is_empty());
    }

    #[test]
    fn blob_with_null_bytes() {
        let data = b"hello\0world\0";
        assert_eq!(Blob::parse(data).unwrap().data, data);
    }

    #[test]
    fn serialize_roundtrip() {
        let original = Blob::new(b"test content".to_vec());
        assert_eq!(Blob::parse(original.serialize_content()).unwrap(), original);
    }
}
