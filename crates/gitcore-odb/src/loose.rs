//! Loose object storage: read, write, and enumerate zlib-compressed objects.
//!
//! Each loose object lives at `objects/XX/YYYY...` where `XX` is the first
//! byte of the id in hex. The file content is zlib-compressed
//! `"<type> <size>\0<content>"`.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use gitcore_hash::{Hasher, ObjectId};
use gitcore_object::{header, ObjectType};

use crate::OdbError;

/// Interface to a loose object directory.
pub struct LooseStore {
    objects_dir: PathBuf,
    compression: flate2::Compression,
}

impl LooseStore {
    /// Open the loose store rooted at the given objects directory.
    pub fn open(objects_dir: impl AsRef<Path>) -> Self {
        Self {
            objects_dir: objects_dir.as_ref().to_path_buf(),
            compression: flate2::Compression::default(),
        }
    }

    /// Set the zlib compression level (0-9).
    pub fn set_compression_level(&mut self, level: u32) {
        self.compression = flate2::Compression::new(level);
    }

    /// The file path for a given id.
    pub fn object_path(&self, oid: &ObjectId) -> PathBuf {
        self.objects_dir.join(oid.loose_path())
    }

    /// Does a loose object exist for this id?
    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.object_path(oid).is_file()
    }

    /// Read a loose object. `Ok(None)` if it does not exist.
    pub fn read(&self, oid: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, OdbError> {
        let path = self.object_path(oid);
        let compressed = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(OdbError::Io(e)),
        };

        let decompressed = decompress_all(&compressed, oid)?;
        let (obj_type, content_size, header_len) =
            header::parse_header(&decompressed).map_err(|e| OdbError::Corrupt {
                oid: *oid,
                reason: e.to_string(),
            })?;
        let content = &decompressed[header_len..];
        if content.len() != content_size {
            return Err(OdbError::Corrupt {
                oid: *oid,
                reason: format!(
                    "size mismatch: header says {content_size}, got {}",
                    content.len()
                ),
            });
        }
        Ok(Some((obj_type, content.to_vec())))
    }

    /// Read just the header (type + size) with bounded decompression.
    pub fn read_header(
        &self,
        oid: &ObjectId,
    ) -> Result<Option<(ObjectType, usize)>, OdbError> {
        let path = self.object_path(oid);
        let compressed = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(OdbError::Io(e)),
        };

        // Decompress only enough to see the null terminator. Headers are
        // short; 64 bytes is ample.
        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut buf = [0u8; 64];
        let mut filled = 0;
        loop {
            if filled >= buf.len() {
                return Err(OdbError::Corrupt {
                    oid: *oid,
                    reason: "header exceeds 64 bytes".into(),
                });
            }
            let n = decoder
                .read(&mut buf[filled..])
                .map_err(|e| OdbError::Corrupt {
                    oid: *oid,
                    reason: format!("decompression failed: {e}"),
                })?;
            if n == 0 {
                return Err(OdbError::Corrupt {
                    oid: *oid,
                    reason: "unexpected EOF before header terminator".into(),
                });
            }
            filled += n;
            if buf[..filled].contains(&0) {
                break;
            }
        }

        let (obj_type, content_size, _header_len) =
            header::parse_header(&buf[..filled]).map_err(|e| OdbError::Corrupt {
                oid: *oid,
                reason: e.to_string(),
            })?;
        Ok(Some((obj_type, content_size)))
    }

    /// Open a streaming reader over the content of a loose object, skipping
    /// its header. Returns the type, size, and the stream.
    pub fn open_stream(
        &self,
        oid: &ObjectId,
    ) -> Result<Option<(ObjectType, usize, Box<dyn Read>)>, OdbError> {
        let path = self.object_path(oid);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(OdbError::Io(e)),
        };

        let mut decoder = ZlibDecoder::new(std::io::BufReader::new(file));
        // Consume the header byte by byte up to the null terminator.
        let mut header_bytes = Vec::with_capacity(32);
        let mut byte = [0u8; 1];
        loop {
            if header_bytes.len() > 64 {
                return Err(OdbError::Corrupt {
                    oid: *oid,
                    reason: "header exceeds 64 bytes".into(),
                });
            }
            let n = decoder.read(&mut byte).map_err(|e| OdbError::Corrupt {
                oid: *oid,
                reason: format!("decompression failed: {e}"),
            })?;
            if n == 0 {
                return Err(OdbError::Corrupt {
                    oid: *oid,
                    reason: "unexpected EOF in header".into(),
                });
            }
            header_bytes.push(byte[0]);
            if byte[0] == 0 {
                break;
            }
        }
        let (obj_type, content_size, _) =
            header::parse_header(&header_bytes).map_err(|e| OdbError::Corrupt {
                oid: *oid,
                reason: e.to_string(),
            })?;

        Ok(Some((obj_type, content_size, Box::new(decoder))))
    }

    /// Write raw content with a known type. Returns the id.
    ///
    /// Idempotent: writing an object that already exists is a no-op. The
    /// file is staged as a temporary and atomically renamed into place.
    pub fn write_raw(
        &self,
        obj_type: ObjectType,
        content: &[u8],
    ) -> Result<ObjectId, OdbError> {
        let hdr = header::write_header(obj_type, content.len());

        let oid = {
            let mut hasher = Hasher::new();
            hasher.update(&hdr);
            hasher.update(content);
            hasher.finalize()?
        };

        if self.contains(&oid) {
            return Ok(oid);
        }

        let final_path = self.object_path(&oid);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.write_to_temp(&hdr, content)?;
        finalize_object(&tmp_path, &final_path)?;
        Ok(oid)
    }

    /// Enumerate all loose object ids by scanning the fan-out directories.
    pub fn iter(&self) -> Result<Vec<ObjectId>, OdbError> {
        let mut result = Vec::new();
        let entries = match fs::read_dir(&self.objects_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(result),
            Err(e) => return Err(OdbError::Io(e)),
        };

        for fanout in entries {
            let fanout = fanout?;
            let dir_name = fanout.file_name();
            let Some(prefix) = dir_name.to_str() else {
                continue;
            };
            if prefix.len() != 2 || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
                continue;
            }
            for object in fs::read_dir(fanout.path())? {
                let object = object?;
                let file_name = object.file_name();
                let Some(rest) = file_name.to_str() else {
                    continue;
                };
                if rest.len() != 38 {
                    continue;
                }
                if let Ok(oid) = ObjectId::from_hex(&format!("{prefix}{rest}")) {
                    result.push(oid);
                }
            }
        }
        Ok(result)
    }

    /// Compress header + content into a temp file under the objects dir
    /// (same filesystem, so the final rename is atomic).
    fn write_to_temp(&self, hdr: &[u8], content: &[u8]) -> Result<PathBuf, OdbError> {
        fs::create_dir_all(&self.objects_dir)?;
        let tmp_path = self.objects_dir.join(format!(
            "tmp_obj_{:x}",
            std::process::id() as u64
                ^ std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .subsec_nanos() as u64
        ));

        let file = fs::File::create(&tmp_path)?;
        let mut encoder = ZlibEncoder::new(file, self.compression);
        encoder.write_all(hdr)?;
        encoder.write_all(content)?;
        encoder.finish()?;

        // Loose objects are read-only on disk, matching C git.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o444))?;
        }

        Ok(tmp_path)
    }
}

/// Atomically move a temp file to its final destination.
///
/// If the destination already exists (another writer published first), the
/// temp file is removed and the write counts as successful: content
/// addressing makes duplicates byte-identical.
fn finalize_object(tmp: &Path, final_path: &Path) -> Result<(), OdbError> {
    match fs::rename(tmp, final_path) {
        Ok(()) => Ok(()),
        Err(_) if final_path.exists() => {
            let _ = fs::remove_file(tmp);
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(tmp);
            Err(OdbError::Io(e))
        }
    }
}

/// Zlib-decompress the full contents of a loose object file.
fn decompress_all(compressed: &[u8], oid: &ObjectId) -> Result<Vec<u8>, OdbError> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| OdbError::Corrupt {
            oid: *oid,
            reason: format!("decompression failed: {e}"),
        })?;
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path());

        let oid = store.write_raw(ObjectType::Blob, b"hello world").unwrap();
        let (obj_type, data) = store.read(&oid).unwrap().unwrap();
        assert_eq!(obj_type, ObjectType::Blob);
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path());

        let first = store.write_raw(ObjectType::Blob, b"same").unwrap();
        let second = store.write_raw(ObjectType::Blob, b"same").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path());
        let oid = ObjectId::from_hex("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        assert!(store.read(&oid).unwrap().is_none());
        assert!(store.read_header(&oid).unwrap().is_none());
    }

    #[test]
    fn header_only_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path());

        let oid = store.write_raw(ObjectType::Commit, b"some commit body").unwrap();
        let (obj_type, size) = store.read_header(&oid).unwrap().unwrap();
        assert_eq!(obj_type, ObjectType::Commit);
        assert_eq!(size, 16);
    }

    #[test]
    fn stream_skips_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path());

        let oid = store.write_raw(ObjectType::Blob, b"streamed content").unwrap();
        let (obj_type, size, mut stream) = store.open_stream(&oid).unwrap().unwrap();
        assert_eq!(obj_type, ObjectType::Blob);
        assert_eq!(size, 16);

        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"streamed content");
    }

    #[test]
    fn written_id_matches_git() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path());
        let oid = store.write_raw(ObjectType::Blob, b"what is up, doc?").unwrap();
        assert_eq!(oid.to_hex(), "bd9dbf5aae1a3862dd1526723246b20206e5fc37");
    }

    #[test]
    fn object_lands_in_fanout_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path());
        let oid = store.write_raw(ObjectType::Blob, b"fanout").unwrap();
        assert!(dir.path().join(oid.loose_path()).is_file());
    }

    #[test]
    fn enumerate_finds_written_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path());

        let a = store.write_raw(ObjectType::Blob, b"a").unwrap();
        let b = store.write_raw(ObjectType::Blob, b"b").unwrap();

        let mut all = store.iter().unwrap();
        all.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(all, expected);
    }

    #[test]
    fn corrupt_file_reports_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path());
        let oid = store.write_raw(ObjectType::Blob, b"fine").unwrap();

        let path = store.object_path(&oid);
        let mut perms = fs::metadata(&path).unwrap().permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(0o644);
        }
        fs::set_permissions(&path, perms).unwrap();
        fs::write(&path, b"not zlib at all").unwrap();

        assert!(matches!(
            store.read(&oid),
            Err(OdbError::Corrupt { .. })
        ));
    }
}
