// ABOUTME: Identifier service generating and validating the ULIDs assigned to every persisted entity.
// ABOUTME: UIDs are immutable, never reused, and are the only cross-entity reference format.

use thiserror::Error;
use ulid::Ulid;

/// Errors produced when a string cannot be interpreted as an entity UID.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UidError {
    #[error("uid is empty")]
    Empty,

    #[error("invalid uid '{value}': {reason}")]
    Invalid { value: String, reason: String },
}

/// Generate a fresh UID for a new entity.
pub fn new_uid() -> Ulid {
    Ulid::new()
}

/// Parse a UID from its canonical 26-character Crockford base32 form.
/// Surrounding whitespace is ignored; lowercase input is accepted.
pub fn parse_uid(value: &str) -> Result<Ulid, UidError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(UidError::Empty);
    }
    Ulid::from_string(trimmed).map_err(|e| UidError::Invalid {
        value: trimmed.to_string(),
        reason: e.to_string(),
    })
}

/// Returns true if the string is a well-formed UID.
pub fn is_valid_uid(value: &str) -> bool {
    parse_uid(value).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uids_are_unique_and_parse_back() {
        let a = new_uid();
        let b = new_uid();
        assert_ne!(a, b);
        assert_eq!(parse_uid(&a.to_string()).unwrap(), a);
    }

    #[test]
    fn parse_accepts_lowercase_and_whitespace() {
        let uid = new_uid();
        let lowered = format!("  {}\n", uid.to_string().to_lowercase());
        assert_eq!(parse_uid(&lowered).unwrap(), uid);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_uid(""), Err(UidError::Empty));
        assert!(matches!(parse_uid("not-a-uid"), Err(UidError::Invalid { .. })));
        assert!(!is_valid_uid("0123"));
    }
}
