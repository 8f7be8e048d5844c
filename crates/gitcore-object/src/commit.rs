use bstr::{BStr, BString, ByteSlice};
use gitcore_hash::ObjectId;
use gitcore_utils::date::Signature;

use crate::ObjectError;

/// A git commit object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Id of the root tree.
    pub tree: ObjectId,
    /// Parent commit ids (empty for a root commit).
    pub parents: Vec<ObjectId>,
    /// Author identity and timestamp.
    pub author: Signature,
    /// Committer identity and timestamp.
    pub committer: Signature,
    /// Optional encoding header (e.g. "ISO-8859-1").
    pub encoding: Option<BString>,
    /// Optional GPG signature (multi-line, joined with '\n').
    pub gpgsig: Option<BString>,
    /// Unrecognised headers preserved for byte-exact round-trips.
    pub extra_headers: Vec<(BString, BString)>,
    /// Commit message (everything after the blank line separator).
    pub message: BString,
}

impl Commit {
    /// Parse commit content from raw bytes (no object header).
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut tree: Option<ObjectId> = None;
        let mut parents = Vec::new();
        let mut author: Option<Signature> = None;
        let mut committer: Option<Signature> = None;
        let mut encoding: Option<BString> = None;
        let mut gpgsig: Option<BString> = None;
        let mut extra_headers: Vec<(BString, BString)> = Vec::new();

        let data = content;
        let mut pos = 0;

        loop {
            if pos >= data.len() {
                break;
            }
            // A blank line separates headers from the message.
            if data[pos] == b'\n' {
                pos += 1;
                break;
            }

            let line_end = data[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|p| p + pos)
                .unwrap_or(data.len());
            let line = &data[pos..line_end];

            let space_pos = line
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| ObjectError::InvalidHeader("header line without space".into()))?;
            let key = &line[..space_pos];
            let value = &line[space_pos + 1..];

            match key {
                b"tree" => {
                    tree = Some(parse_oid_value(value, "tree")?);
                    pos = line_end + 1;
                }
                b"parent" => {
                    parents.push(parse_oid_value(value, "parent")?);
                    pos = line_end + 1;
                }
                b"author" => {
                    author = Some(parse_signature(value)?);
                    pos = line_end + 1;
                }
                b"committer" => {
                    committer = Some(parse_signature(value)?);
                    pos = line_end + 1;
                }
                b"encoding" => {
                    encoding = Some(BString::from(value));
                    pos = line_end + 1;
                }
                b"gpgsig" => {
                    let (sig, next) = read_multiline_value(data, value, line_end);
                    gpgsig = Some(sig);
                    pos = next;
                }
                _ => {
                    // Unknown headers may be multi-line (e.g. mergetag).
                    let (val, next) = read_multiline_value(data, value, line_end);
                    extra_headers.push((BString::from(key), val));
                    pos = next;
                }
            }
        }

        let message = BString::from(&data[pos.min(data.len())..]);

        Ok(Self {
            tree: tree.ok_or(ObjectError::MissingCommitField { field: "tree" })?,
            parents,
            author: author.ok_or(ObjectError::MissingCommitField { field: "author" })?,
            committer: committer
                .ok_or(ObjectError::MissingCommitField { field: "committer" })?,
            encoding,
            gpgsig,
            extra_headers,
            message,
        })
    }

    /// Serialize commit content to bytes (no object header).
    pub fn serialize_content(&self) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(b"tree ");
        out.extend_from_slice(self.tree.to_hex().as_bytes());
        out.push(b'\n');

        for parent in &self.parents {
            out.extend_from_slice(b"parent ");
            out.extend_from_slice(parent.to_hex().as_bytes());
            out.push(b'\n');
        }

        out.extend_from_slice(b"author ");
        out.extend_from_slice(&self.author.to_bytes());
        out.push(b'\n');

        out.extend_from_slice(b"committer ");
        out.extend_from_slice(&self.committer.to_bytes());
        out.push(b'\n');

        if let Some(ref enc) = self.encoding {
            out.extend_from_slice(b"encoding ");
            out.extend_from_slice(enc);
            out.push(b'\n');
        }

        for (key, value) in &self.extra_headers {
            out.extend_from_slice(key);
            out.push(b' ');
            write_multiline_value(&mut out, value.as_bstr());
            out.push(b'\n');
        }

        if let Some(ref sig) = self.gpgsig {
            out.extend_from_slice(b"gpgsig ");
            write_multiline_value(&mut out, sig.as_bstr());
            out.push(b'\n');
        }

        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }

    /// First parent, if any.
    pub fn first_parent(&self) -> Option<ObjectId> {
        self.parents.first().copied()
    }
}

fn parse_oid_value(value: &[u8], field: &'static str) -> Result<ObjectId, ObjectError> {
    let hex = std::str::from_utf8(value)
        .map_err(|_| ObjectError::InvalidHeader(format!("non-UTF8 {field} oid")))?;
    Ok(ObjectId::from_hex(hex)?)
}

fn parse_signature(value: &[u8]) -> Result<Signature, ObjectError> {
    Signature::parse(value.as_bstr()).map_err(|e| ObjectError::InvalidSignature(e.to_string()))
}

/// Read a header value spanning continuation lines (lines starting with a
/// space). Returns the joined value and the position after the last line.
fn read_multiline_value(data: &[u8], first: &[u8], mut line_end: usize) -> (BString, usize) {
    let mut value = Vec::from(first);
    let mut next = line_end + 1;
    while next < data.len() && data[next] == b' ' {
        value.push(b'\n');
        line_end = data[next..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| p + next)
            .unwrap_or(data.len());
        value.extend_from_slice(&data[next + 1..line_end]);
        next = line_end + 1;
    }
    (BString::from(value), next)
}

/// Emit a multi-line value with continuation-line encoding.
fn write_multiline_value(out: &mut Vec<u8>, value: &BStr) {
    let mut first = true;
    for line in value.split(|&b| b == b'\n') {
        if !first {
            out.push(b'\n');
            out.push(b' ');
        }
        out.extend_from_slice(line);
        first = false;
    }
}
