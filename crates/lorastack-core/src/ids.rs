//! Entity identifier validation.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::Error;

crate::define_errors! {
    namespace = "pkg/identifiers";
    pub ERR_INVALID_IDENTIFIER = InvalidArgument("invalid_identifier", "invalid {kind} identifier `{id}`");
}

/// Maximum length of an entity identifier.
pub const MAX_ID_LENGTH: usize = 36;

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9](?:-?[a-z0-9]){2,}$").expect("static regex is valid")
});

/// Check an identifier of the given `kind` (`gateway`, `application`, ...).
pub fn validate_id(kind: &str, id: &str) -> Result<(), Error> {
    if id.len() > MAX_ID_LENGTH || !ID_PATTERN.is_match(id) {
        return Err(ERR_INVALID_IDENTIFIER
            .with_attribute("kind", kind)
            .with_attribute("id", id));
    }
    Ok(())
}

pub fn is_valid_id(id: &str) -> bool {
    id.len() <= MAX_ID_LENGTH && ID_PATTERN.is_match(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_identifiers() {
        for id in ["abc", "eui-58a0cbfffe800019", "my-app-1", "a1b"] {
            assert!(validate_id("gateway", id).is_ok(), "{id}");
        }
    }

    #[test]
    fn rejects_invalid_identifiers() {
        for id in ["", "ab", "-abc", "abc-", "a--b", "ABC", "a_b_c", &"a".repeat(37)] {
            assert!(!is_valid_id(id), "{id}");
        }
        let err = validate_id("application", "Bad").err();
        assert!(err.is_some_and(|e| e.message() == "invalid application identifier `Bad`"));
    }
}
