use std::fmt;

use bstr::{BStr, BString, ByteSlice};

use crate::error::RefError;

/// A validated reference name.
///
/// Enforces the rules of `git-check-ref-format(1)`:
/// - no `..`, no `@{`, not the single character `@`
/// - no control characters (<= 0x20, 0x7f) and none of `~ ^ : ? * [ \`
/// - no leading/trailing `/`, no `//`
/// - no component starting or ending with `.`, no `.lock` component suffix
///
/// Names without a `/` are only accepted for the all-caps special refs
/// (`HEAD`, `MERGE_HEAD`, ...). Use [`is_valid_ref_name`] to check a
/// proposed new ref name, which additionally requires two components.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefName(BString);

/// Characters forbidden anywhere in a ref name.
const FORBIDDEN_CHARS: &[u8] = b" ~^:?*[\\";

/// Special ref names that are valid without a `/`.
const SPECIAL_REFS: &[&str] = &[
    "HEAD",
    "ORIG_HEAD",
    "FETCH_HEAD",
    "MERGE_HEAD",
    "CHERRY_PICK_HEAD",
    "REVERT_HEAD",
    "REBASE_HEAD",
    "BISECT_HEAD",
    "AUTO_MERGE",
];

impl RefName {
    /// Create and validate a ref name.
    pub fn new(name: impl Into<BString>) -> Result<Self, RefError> {
        let name = name.into();
        validate(&name, true)?;
        Ok(Self(name))
    }

    pub(crate) fn new_unchecked(name: impl Into<BString>) -> Self {
        Self(name.into())
    }

    /// The short form: `main` for `refs/heads/main`, `origin/main` for
    /// `refs/remotes/origin/main`.
    pub fn short_name(&self) -> &str {
        let s = self.as_str();
        s.strip_prefix("refs/heads/")
            .or_else(|| s.strip_prefix("refs/tags/"))
            .or_else(|| s.strip_prefix("refs/remotes/"))
            .unwrap_or(s)
    }

    pub fn is_branch(&self) -> bool {
        self.0.starts_with(b"refs/heads/")
    }

    pub fn is_tag(&self) -> bool {
        self.0.starts_with(b"refs/tags/")
    }

    pub fn is_remote(&self) -> bool {
        self.0.starts_with(b"refs/remotes/")
    }

    /// Is this a special top-level ref (HEAD, MERGE_HEAD, ...)?
    pub fn is_special(&self) -> bool {
        SPECIAL_REFS
            .iter()
            .any(|s| s.as_bytes() == self.0.as_slice())
    }

    pub fn as_bstr(&self) -> &BStr {
        self.0.as_bstr()
    }

    /// As a string slice (ref names are ASCII in practice).
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("<invalid-utf8>")
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Total validity check for proposed new ref names.
///
/// Unlike [`RefName::new`] this has no special-ref allowance: a valid
/// name has at least two slash-separated components, so `HEAD` and
/// `master` both return false.
pub fn is_valid_ref_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if validate(bytes, false).is_err() {
        return false;
    }
    bytes.contains(&b'/')
}

fn validate(name: &[u8], allow_special: bool) -> Result<(), RefError> {
    let name_str = || String::from_utf8_lossy(name).into_owned();

    if name.is_empty() {
        return Err(RefError::InvalidName("ref name is empty".into()));
    }
    if name == b"@" {
        return Err(RefError::InvalidName("'@' is not a valid ref name".into()));
    }

    for (i, &b) in name.iter().enumerate() {
        if b <= 0x20 || b == 0x7f {
            return Err(RefError::InvalidName(format!(
                "'{}': contains control character at position {}",
                name_str(),
                i
            )));
        }
        if FORBIDDEN_CHARS.contains(&b) {
            return Err(RefError::InvalidName(format!(
                "'{}': contains forbidden character '{}' at position {}",
                name_str(),
                b as char,
                i
            )));
        }
    }

    if name.starts_with(b"/") || name.ends_with(b"/") {
        return Err(RefError::InvalidName(format!(
            "'{}': leading or trailing '/'",
            name_str()
        )));
    }
    if name.find(b"//").is_some() {
        return Err(RefError::InvalidName(format!(
            "'{}': contains '//'",
            name_str()
        )));
    }
    if name.find(b"..").is_some() {
        return Err(RefError::InvalidName(format!(
            "'{}': contains '..'",
            name_str()
        )));
    }
    if name.find(b"@{").is_some() {
        return Err(RefError::InvalidName(format!(
            "'{}': contains '@{{'",
            name_str()
        )));
    }

    for component in name.split_str(b"/") {
        if component.is_empty() {
            return Err(RefError::InvalidName(format!(
                "'{}': empty path component",
                name_str()
            )));
        }
        if component.starts_with(b".") || component.ends_with(b".") {
            return Err(RefError::InvalidName(format!(
                "'{}': component starts or ends with '.'",
                name_str()
            )));
        }
        if component.ends_with(b".lock") {
            return Err(RefError::InvalidName(format!(
                "'{}': component ends with '.lock'",
                name_str()
            )));
        }
    }

    if !name.contains(&b'/') {
        let is_special = SPECIAL_REFS.iter().any(|s| s.as_bytes() == name);
        if !(allow_special && is_special) {
            return Err(RefError::InvalidName(format!(
                "'{}': needs at least two slash-separated components",
                name_str()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        for name in [
            "refs/heads/main",
            "refs/tags/v1.0",
            "refs/remotes/origin/main",
            "refs/heads/feature/sub-branch",
            "refs/heads/a",
            "HEAD",
            "MERGE_HEAD",
        ] {
            assert!(RefName::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn invalid_names() {
        for name in [
            "",
            "@",
            "refs/heads/main..branch",
            "refs/heads/bad name",
            "refs/heads/bad~name",
            "refs/heads/bad^name",
            "refs/heads/bad:name",
            "refs/heads/bad?name",
            "refs/heads/bad*name",
            "refs/heads/bad[name",
            "refs/heads/bad\\name",
            ".refs/heads/main",
            "refs/heads/.hidden",
            "refs/heads/main.",
            "refs/heads/main/",
            "/refs/heads/main",
            "refs//heads/main",
            "refs/heads/main.lock",
            "refs/heads/sub.lock/x",
            "refs/heads/main@{0}",
            "main",
            "NOT_A_SPECIAL",
        ] {
            assert!(RefName::new(name).is_err(), "{name} should be invalid");
        }
    }

    #[test]
    fn control_characters_rejected() {
        assert!(RefName::new(b"refs/heads/a\x01b".to_vec()).is_err());
        assert!(RefName::new(b"refs/heads/a\x7fb".to_vec()).is_err());
    }

    #[test]
    fn validator_requires_two_components() {
        assert!(is_valid_ref_name("refs/heads/main"));
        assert!(is_valid_ref_name("heads/main"));
        assert!(!is_valid_ref_name("main"));
        assert!(!is_valid_ref_name("HEAD"));
        assert!(!is_valid_ref_name(""));
    }

    #[test]
    fn short_names() {
        assert_eq!(RefName::new("refs/heads/main").unwrap().short_name(), "main");
        assert_eq!(RefName::new("refs/tags/v1.0").unwrap().short_name(), "v1.0");
        assert_eq!(
            RefName::new("refs/remotes/origin/main").unwrap().short_name(),
            "origin/main"
        );
        assert_eq!(RefName::new("HEAD").unwrap().short_name(), "HEAD");
    }

    #[test]
    fn namespace_predicates() {
        assert!(RefName::new("refs/heads/main").unwrap().is_branch());
        assert!(RefName::new("refs/tags/v1").unwrap().is_tag());
        assert!(RefName::new("refs/remotes/origin/x").unwrap().is_remote());
        assert!(RefName::new("HEAD").unwrap().is_special());
        assert!(!RefName::new("refs/heads/main").unwrap().is_special());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = RefName::new("refs/heads/alpha").unwrap();
        let b = RefName::new("refs/heads/beta").unwrap();
        assert!(a < b);
    }
}
