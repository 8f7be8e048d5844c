//! Property tests for the ref-name validator.

use gitcore_ref::{is_valid_ref_name, RefName};
use proptest::prelude::*;

proptest! {
    /// The validator is total: it never panics, whatever the input.
    #[test]
    fn validator_is_total(name in "\\PC*") {
        let _ = is_valid_ref_name(&name);
    }

    /// Anything the validator accepts also constructs as a RefName.
    #[test]
    fn valid_names_construct(name in "refs/[a-z]{1,12}/[a-zA-Z0-9_-]{1,20}") {
        prop_assume!(is_valid_ref_name(&name));
        prop_assert!(RefName::new(name.as_str()).is_ok());
    }

    /// Forbidden characters are rejected wherever they appear.
    #[test]
    fn forbidden_chars_rejected(
        prefix in "[a-z]{1,8}",
        bad in prop::sample::select(vec![' ', '~', '^', ':', '?', '*', '[', '\\', '\u{7f}']),
        suffix in "[a-z]{1,8}",
    ) {
        let name = format!("refs/heads/{prefix}{bad}{suffix}");
        prop_assert!(!is_valid_ref_name(&name));
        prop_assert!(RefName::new(name.as_str()).is_err());
    }

    /// Single-component names are never valid new ref names.
    #[test]
    fn single_component_rejected(name in "[a-zA-Z0-9_]{1,20}") {
        prop_assert!(!is_valid_ref_name(&name));
    }

    /// Accepted names survive a round-trip through RefName unchanged.
    #[test]
    fn roundtrip_preserves_name(name in "refs/(heads|tags)/[a-zA-Z0-9_-]{1,20}") {
        prop_assume!(is_valid_ref_name(&name));
        let parsed = RefName::new(name.as_str()).unwrap();
        prop_assert_eq!(parsed.as_str(), name.as_str());
    }
}
